use anyhow::{ensure, Error, Result};
use candle_core::{Device, Tensor};
use tokenizers::Tokenizer;

use crate::dataset::Batch;
use crate::greedy::greedy_decode;
use crate::metrics::{bleu_score, CorpusMetrics};
use crate::model::Seq2SeqModel;
use crate::summary::SummaryWriter;
use crate::tokenizer_helper::SpecialTokens;
use crate::utils::console_width;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationSample {
    pub source: String,
    pub target: String,
    pub predicted: String,
}

fn ids_to_text(tokenizer: &Tokenizer, ids: &Tensor) -> Result<String> {
    let ids = ids.flatten_all()?.to_vec1::<u32>()?;
    tokenizer.decode(&ids, true).map_err(Error::msg)
}

/// Greedily translates the first `num_examples` validation batches and echoes
/// each one through `print_msg`.
#[allow(clippy::too_many_arguments)]
pub fn sample_translations<M, I>(
    model: &M,
    batches: I,
    tokenizer_tgt: &Tokenizer,
    tgt_special: SpecialTokens,
    max_len: usize,
    device: &Device,
    num_examples: usize,
    print_msg: &dyn Fn(&str),
) -> Result<Vec<TranslationSample>>
where
    M: Seq2SeqModel + ?Sized,
    I: IntoIterator<Item = candle_core::Result<Batch>>,
{
    let separator = "-".repeat(console_width());
    let mut samples = Vec::with_capacity(num_examples);

    for batch in batches.into_iter().take(num_examples) {
        let batch = batch?;
        let batch_size = batch.encoder_input.dim(0)?;
        ensure!(batch_size == 1, "validation batches must hold one pair, got {batch_size}");

        let model_out = greedy_decode(
            model,
            &batch.encoder_input,
            &batch.encoder_mask,
            tgt_special.sos,
            tgt_special.eos,
            max_len,
            device,
        )?;

        let sample = TranslationSample {
            source: batch.src_text[0].clone(),
            target: batch.tgt_text[0].clone(),
            predicted: ids_to_text(tokenizer_tgt, &model_out)?,
        };
        let bleu = bleu_score(
            std::slice::from_ref(&sample.predicted),
            std::slice::from_ref(&sample.target),
        );

        print_msg(&separator);
        print_msg(&format!("{:>12}{}", "SOURCE: ", sample.source));
        print_msg(&format!("{:>12}{}", "TARGET: ", sample.target));
        print_msg(&format!("{:>12}{}", "PREDICTED: ", sample.predicted));
        print_msg(&format!("{:>12}{bleu:.4}", "BLEU: "));
        samples.push(sample);
    }
    print_msg(&separator);

    Ok(samples)
}

/// Corpus CER, WER and BLEU of the predictions against their targets.
pub fn corpus_metrics(samples: &[TranslationSample]) -> CorpusMetrics {
    let predicted = samples.iter().map(|s| s.predicted.clone()).collect::<Vec<_>>();
    let expected = samples.iter().map(|s| s.target.clone()).collect::<Vec<_>>();
    CorpusMetrics::compute(&predicted, &expected)
}

/// Samples translations, reduces them to corpus metrics and records those in
/// `writer` at `global_step`. Returns `None` when there was nothing to sample.
#[allow(clippy::too_many_arguments)]
pub fn run_validation<M, I>(
    model: &M,
    batches: I,
    tokenizer_tgt: &Tokenizer,
    tgt_special: SpecialTokens,
    max_len: usize,
    device: &Device,
    print_msg: &dyn Fn(&str),
    global_step: usize,
    writer: Option<&mut SummaryWriter>,
    num_examples: usize,
) -> Result<Option<CorpusMetrics>>
where
    M: Seq2SeqModel + ?Sized,
    I: IntoIterator<Item = candle_core::Result<Batch>>,
{
    let samples = sample_translations(
        model,
        batches,
        tokenizer_tgt,
        tgt_special,
        max_len,
        device,
        num_examples,
        print_msg,
    )?;
    if samples.is_empty() {
        tracing::warn!("no validation pairs to translate");
        return Ok(None);
    }

    let metrics = corpus_metrics(&samples);
    tracing::info!(cer = metrics.cer, wer = metrics.wer, bleu = metrics.bleu, global_step, "validation");
    if let Some(writer) = writer {
        writer.add_scalar("validation cer", metrics.cer, global_step)?;
        writer.add_scalar("validation wer", metrics.wer, global_step)?;
        writer.add_scalar("validation BLEU", metrics.bleu, global_step)?;
    }
    Ok(Some(metrics))
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::dataset::{BilingualBatcher, BilingualDataset, ParallelCorpus, Side, TranslationPair};
    use crate::model::scripted::ScriptedModel;
    use crate::tokenizer_helper::TokenizerHelper;

    struct Fixture {
        _dir: tempfile::TempDir,
        tokenizer_tgt: Tokenizer,
        dataset: BilingualDataset,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let corpus = ParallelCorpus {
            train_set: vec![TranslationPair::new("thank you", "감사 합니다")],
            valid_set: vec![
                TranslationPair::new("thank you", "감사 합니다"),
                TranslationPair::new("good morning", "좋은 아침"),
                TranslationPair::new("good night", "잘 자요"),
            ],
        };
        let helper = TokenizerHelper::new(1);
        let tokenizer_src = helper
            .get_or_build_tokenizer(&dir.path().join("src.json"), "english", corpus.sentences(Side::Source))
            .unwrap();
        let tokenizer_tgt = helper
            .get_or_build_tokenizer(&dir.path().join("tgt.json"), "korean", corpus.sentences(Side::Target))
            .unwrap();
        let dataset = BilingualDataset::new(&corpus, &tokenizer_src, &tokenizer_tgt, 8, &Device::Cpu).unwrap();
        Fixture {
            _dir: dir,
            tokenizer_tgt,
            dataset,
        }
    }

    #[test]
    fn test_sample_translations_prints_each_example() {
        let fx = fixture();
        let special = SpecialTokens::from_tokenizer(&fx.tokenizer_tgt).unwrap();
        let gamsa = fx.tokenizer_tgt.token_to_id("감사").unwrap();
        let hamnida = fx.tokenizer_tgt.token_to_id("합니다").unwrap();
        let vocab_size = fx.tokenizer_tgt.get_vocab_size(true);
        let model = ScriptedModel::new(vec![gamsa, hamnida, special.eos], vocab_size);

        let lines = RefCell::new(Vec::new());
        let print_msg = |msg: &str| lines.borrow_mut().push(msg.to_string());
        let samples = sample_translations(
            &model,
            fx.dataset.valid_batcher(),
            &fx.tokenizer_tgt,
            special,
            8,
            &Device::Cpu,
            2,
            &print_msg,
        )
        .unwrap();

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].source, "thank you");
        assert_eq!(samples[0].predicted, "감사 합니다");
        assert_eq!(samples[1].target, "좋은 아침");

        let lines = lines.into_inner();
        // separator + 4 lines per example, closing separator
        assert_eq!(lines.len(), 2 * 5 + 1);
        assert!(lines[0].chars().all(|c| c == '-'));
        assert_eq!(lines[1], "    SOURCE: thank you");
        assert_eq!(lines[3], " PREDICTED: 감사 합니다");
        assert_eq!(lines[4], "      BLEU: 0.0000");
    }

    #[test]
    fn test_run_validation_records_metrics() {
        let fx = fixture();
        let special = SpecialTokens::from_tokenizer(&fx.tokenizer_tgt).unwrap();
        let vocab_size = fx.tokenizer_tgt.get_vocab_size(true);
        let model = ScriptedModel::new(vec![special.eos], vocab_size);

        let dir = tempfile::tempdir().unwrap();
        let mut writer = SummaryWriter::new(dir.path()).unwrap();
        let metrics = run_validation(
            &model,
            fx.dataset.valid_batcher(),
            &fx.tokenizer_tgt,
            special,
            8,
            &Device::Cpu,
            &|_: &str| {},
            5,
            Some(&mut writer),
            3,
        )
        .unwrap()
        .unwrap();

        // empty predictions: every reference character and word is an edit
        assert_eq!(metrics.cer, 1.0);
        assert_eq!(metrics.wer, 1.0);
        assert_eq!(metrics.bleu, 0.0);

        let contents = std::fs::read_to_string(writer.path()).unwrap();
        assert!(contents.contains("5,validation cer,1\n"));
        assert!(contents.contains("5,validation wer,1\n"));
        assert!(contents.contains("5,validation BLEU,0\n"));
    }

    #[test]
    fn test_run_validation_without_pairs() {
        let fx = fixture();
        let special = SpecialTokens::from_tokenizer(&fx.tokenizer_tgt).unwrap();
        let model = ScriptedModel::new(vec![special.eos], fx.tokenizer_tgt.get_vocab_size(true));
        let metrics = run_validation(
            &model,
            std::iter::empty(),
            &fx.tokenizer_tgt,
            special,
            8,
            &Device::Cpu,
            &|_: &str| {},
            0,
            None,
            2,
        )
        .unwrap();
        assert!(metrics.is_none());
    }

    #[test]
    fn test_rejects_multi_pair_batches() {
        let fx = fixture();
        let special = SpecialTokens::from_tokenizer(&fx.tokenizer_tgt).unwrap();
        let model = ScriptedModel::new(vec![special.eos], fx.tokenizer_tgt.get_vocab_size(true));
        let batches = BilingualBatcher::new(&fx.dataset.valid_set, 2, false);
        let err = sample_translations(
            &model,
            batches,
            &fx.tokenizer_tgt,
            special,
            8,
            &Device::Cpu,
            2,
            &|_: &str| {},
        )
        .unwrap_err();
        assert!(err.to_string().contains("one pair"));
    }
}
