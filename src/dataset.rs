use std::fs::File;
use std::path::Path;

use anyhow::{Context, Error, Result};
use candle_core::{Device, Tensor};
use hf_hub::{api::sync::Api, Repo, RepoType};
use parquet::file::reader::SerializedFileReader;
use parquet::record::Field;
use rand::seq::SliceRandom;
use rand::Rng;
use tokenizers::Tokenizer;

use crate::error::TranslatorError;
use crate::tokenizer_helper::SpecialTokens;
use crate::utils::causal_mask;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationPair {
    pub source: String,
    pub target: String,
}

impl TranslationPair {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Raw parallel corpus split into training and validation pairs.
///
/// The default source is the Korean-English TED talks corpus on the Hugging
/// Face hub (https://huggingface.co/datasets/msarmi9/korean-english-multitarget-ted-talks-task),
/// read from its parquet conversion.
#[derive(Debug, Clone)]
pub struct ParallelCorpus {
    pub train_set: Vec<TranslationPair>,
    pub valid_set: Vec<TranslationPair>,
}

impl ParallelCorpus {
    pub fn from_hub(datasource: &str, src_lang: &str, tgt_lang: &str, train_split: f32) -> Result<Self> {
        let pairs = Self::load(datasource, src_lang, tgt_lang)?;
        tracing::info!(datasource, pairs = pairs.len(), "loaded parallel corpus");
        Ok(Self::split(pairs, train_split, &mut rand::thread_rng()))
    }

    /// Random split keeping `floor(train_split * len)` pairs for training.
    pub fn split(mut pairs: Vec<TranslationPair>, train_split: f32, rng: &mut impl Rng) -> Self {
        pairs.shuffle(rng);
        let train_size = ((pairs.len() as f32 * train_split).floor() as usize).min(pairs.len());
        let valid_set = pairs.split_off(train_size);
        Self {
            train_set: pairs,
            valid_set,
        }
    }

    /// Every sentence of one side, both splits included.
    pub fn sentences(&self, side: Side) -> Vec<String> {
        self.train_set
            .iter()
            .chain(&self.valid_set)
            .map(|pair| side.of(pair).to_string())
            .collect()
    }

    fn load(datasource: &str, src_lang: &str, tgt_lang: &str) -> Result<Vec<TranslationPair>> {
        let api = Api::new().context("failed to reach the Hugging Face hub")?;
        let repo = api.repo(Repo::with_revision(
            datasource.to_string(),
            RepoType::Dataset,
            "refs/convert/parquet".to_string(),
        ));
        let local = repo
            .get("default/train/0000.parquet")
            .with_context(|| format!("failed to download {datasource}"))?;
        Self::load_parquet(&local, src_lang, tgt_lang)
    }

    /// Reads the `src_lang` and `tgt_lang` string columns of every row. A row
    /// that cannot be read or lacks either column aborts the load, and so does
    /// a file without rows.
    fn load_parquet(path: &Path, src_lang: &str, tgt_lang: &str) -> Result<Vec<TranslationPair>> {
        let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let reader = SerializedFileReader::new(file)
            .with_context(|| format!("failed to read parquet metadata of {}", path.display()))?;

        let mut pairs = Vec::new();
        for (idx, row) in reader.into_iter().enumerate() {
            let row = row.with_context(|| format!("failed to read row {idx} of {}", path.display()))?;
            let mut source = None;
            let mut target = None;
            for (name, field) in row.get_column_iter() {
                if let Field::Str(text) = field {
                    if name == src_lang {
                        source = Some(text.clone());
                    } else if name == tgt_lang {
                        target = Some(text.clone());
                    }
                }
            }
            let missing = |column: &str| TranslatorError::MissingColumn {
                path: path.to_path_buf(),
                row: idx,
                column: column.to_string(),
            };
            let source = source.ok_or_else(|| missing(src_lang))?;
            let target = target.ok_or_else(|| missing(tgt_lang))?;
            pairs.push(TranslationPair::new(source, target));
        }

        if pairs.is_empty() {
            return Err(TranslatorError::EmptyCorpus(path.display().to_string()).into());
        }
        Ok(pairs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Source,
    Target,
}

impl Side {
    fn of(self, pair: &TranslationPair) -> &str {
        match self {
            Side::Source => &pair.source,
            Side::Target => &pair.target,
        }
    }
}

/// One tokenized pair, every tensor padded to `seq_len`.
#[derive(Debug, Clone)]
pub struct BilingualItem {
    encoder_input: Tensor, // (seq_len)
    decoder_input: Tensor, // (seq_len)
    encoder_mask: Tensor,  // (1, 1, seq_len)
    decoder_mask: Tensor,  // (1, seq_len, seq_len)
    label: Tensor,         // (seq_len)
    src_text: String,
    tgt_text: String,
}

/// Frames `tokens` as `[prefix] tokens [suffix] [PAD]...`, dropping trailing
/// tokens that do not fit in `seq_len`.
fn frame(tokens: &[u32], prefix: Option<u32>, suffix: Option<u32>, pad: u32, seq_len: usize) -> Vec<u32> {
    let room = seq_len - usize::from(prefix.is_some()) - usize::from(suffix.is_some());
    let mut ids = Vec::with_capacity(seq_len);
    ids.extend(prefix);
    ids.extend(tokens.iter().take(room));
    ids.extend(suffix);
    ids.resize(seq_len, pad);
    ids
}

pub fn encode_pair(
    pair: &TranslationPair,
    tokenizer_src: &Tokenizer,
    tokenizer_tgt: &Tokenizer,
    src_special: SpecialTokens,
    tgt_special: SpecialTokens,
    seq_len: usize,
    device: &Device,
) -> Result<BilingualItem> {
    if seq_len < 2 {
        return Err(TranslatorError::SequenceLengthTooSmall(seq_len).into());
    }
    let src_encoding = tokenizer_src.encode(pair.source.as_str(), false).map_err(Error::msg)?;
    let tgt_encoding = tokenizer_tgt.encode(pair.target.as_str(), false).map_err(Error::msg)?;
    let src_ids = src_encoding.get_ids();
    let tgt_ids = tgt_encoding.get_ids();
    if src_ids.len() + 2 > seq_len || tgt_ids.len() + 1 > seq_len {
        tracing::debug!(
            src_tokens = src_ids.len(),
            tgt_tokens = tgt_ids.len(),
            seq_len,
            "truncating pair"
        );
    }

    // [SOS] src [EOS] / [SOS] tgt / tgt [EOS]
    let encoder_ids = frame(src_ids, Some(src_special.sos), Some(src_special.eos), src_special.pad, seq_len);
    let decoder_ids = frame(tgt_ids, Some(tgt_special.sos), None, tgt_special.pad, seq_len);
    let label_ids = frame(tgt_ids, None, Some(tgt_special.eos), tgt_special.pad, seq_len);

    let encoder_input = Tensor::from_vec(encoder_ids, seq_len, device)?;
    let decoder_input = Tensor::from_vec(decoder_ids, seq_len, device)?;
    let label = Tensor::from_vec(label_ids, seq_len, device)?;

    let encoder_mask = encoder_input.ne(src_special.pad)?.reshape((1, 1, seq_len))?;
    let decoder_mask = decoder_input
        .ne(tgt_special.pad)?
        .unsqueeze(0)?
        .broadcast_mul(&causal_mask(seq_len, device)?)?;

    Ok(BilingualItem {
        encoder_input,
        decoder_input,
        encoder_mask,
        decoder_mask,
        label,
        src_text: pair.source.clone(),
        tgt_text: pair.target.clone(),
    })
}

#[derive(Debug, Clone)]
pub struct BilingualDataset {
    pub train_set: Vec<BilingualItem>,
    pub valid_set: Vec<BilingualItem>,
}

impl BilingualDataset {
    pub fn new(
        corpus: &ParallelCorpus,
        tokenizer_src: &Tokenizer,
        tokenizer_tgt: &Tokenizer,
        seq_len: usize,
        device: &Device,
    ) -> Result<Self> {
        let src_special = SpecialTokens::from_tokenizer(tokenizer_src)?;
        let tgt_special = SpecialTokens::from_tokenizer(tokenizer_tgt)?;

        let (max_len_src, max_len_tgt) = corpus
            .train_set
            .iter()
            .chain(&corpus.valid_set)
            .try_fold((0, 0), |(src_max, tgt_max), pair| -> Result<_> {
                let src = tokenizer_src.encode(pair.source.as_str(), false).map_err(Error::msg)?;
                let tgt = tokenizer_tgt.encode(pair.target.as_str(), false).map_err(Error::msg)?;
                Ok((src_max.max(src.len()), tgt_max.max(tgt.len())))
            })?;
        tracing::info!(max_len_src, max_len_tgt, seq_len, "max tokenized sentence lengths");

        let encode_all = |pairs: &[TranslationPair]| {
            pairs
                .iter()
                .map(|pair| {
                    encode_pair(
                        pair,
                        tokenizer_src,
                        tokenizer_tgt,
                        src_special,
                        tgt_special,
                        seq_len,
                        device,
                    )
                })
                .collect::<Result<Vec<_>>>()
        };

        Ok(Self {
            train_set: encode_all(&corpus.train_set)?,
            valid_set: encode_all(&corpus.valid_set)?,
        })
    }

    pub fn train_batcher(&self, batch_size: usize) -> BilingualBatcher {
        BilingualBatcher::new(&self.train_set, batch_size, true)
    }

    /// Validation batches keep corpus order and hold one pair each.
    pub fn valid_batcher(&self) -> BilingualBatcher {
        BilingualBatcher::new(&self.valid_set, 1, false)
    }
}

pub struct Batch {
    pub encoder_input: Tensor, // (B, seq_len)
    pub decoder_input: Tensor, // (B, seq_len)
    pub encoder_mask: Tensor,  // (B, 1, 1, seq_len)
    pub decoder_mask: Tensor,  // (B, 1, seq_len, seq_len)
    pub label: Tensor,         // (B, seq_len)
    pub src_text: Vec<String>,
    pub tgt_text: Vec<String>,
}

pub struct BilingualBatcher<'a> {
    dataset: Vec<&'a BilingualItem>,
    batch_size: usize,
    current_idx: usize,
}

impl<'a> BilingualBatcher<'a> {
    pub fn new(dataset: &'a [BilingualItem], batch_size: usize, shuffle: bool) -> Self {
        let mut dataset = dataset.iter().collect::<Vec<_>>();
        if shuffle {
            dataset.shuffle(&mut rand::thread_rng());
        }
        Self {
            dataset,
            batch_size: batch_size.max(1),
            current_idx: 0,
        }
    }

    pub fn num_batches(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }
}

fn stack(items: &[&BilingualItem], field: impl Fn(&BilingualItem) -> &Tensor) -> candle_core::Result<Tensor> {
    Tensor::stack(&items.iter().map(|item| field(*item)).collect::<Vec<_>>(), 0)
}

impl Iterator for BilingualBatcher<'_> {
    type Item = candle_core::Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current_idx >= self.dataset.len() {
            return None;
        }

        // the last batch may be short
        let end_idx = (self.current_idx + self.batch_size).min(self.dataset.len());
        let items = &self.dataset[self.current_idx..end_idx];
        self.current_idx = end_idx;

        let batch = || -> candle_core::Result<Batch> {
            Ok(Batch {
                encoder_input: stack(items, |item| &item.encoder_input)?,
                decoder_input: stack(items, |item| &item.decoder_input)?,
                encoder_mask: stack(items, |item| &item.encoder_mask)?,
                decoder_mask: stack(items, |item| &item.decoder_mask)?,
                label: stack(items, |item| &item.label)?,
                src_text: items.iter().map(|item| item.src_text.clone()).collect(),
                tgt_text: items.iter().map(|item| item.tgt_text.clone()).collect(),
            })
        };
        Some(batch())
    }
}
