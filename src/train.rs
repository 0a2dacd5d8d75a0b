use anyhow::{Context, Result};
use candle_core::{DType, Device};
use candle_nn::{ParamsAdamW, VarBuilder, VarMap};
use indicatif::{ProgressBar, ProgressStyle};

use crate::{
    checkpoint::{load_checkpoint, save_checkpoint, CheckpointState},
    config::Config,
    dataset::{Batch, BilingualDataset, ParallelCorpus, Side},
    error::TranslatorError,
    loss::cross_entropy_with_smoothing,
    model::{Seq2SeqModel, Transformer, TransformerConfig},
    optimizer::AdamW,
    summary::SummaryWriter,
    tokenizer_helper::{SpecialTokens, TokenizerHelper},
    utils::device,
    validation::run_validation,
};

const ADAM_EPS: f64 = 1e-9;

/// Where a training run stands: the epoch to run next and the number of
/// optimizer steps taken so far.
#[derive(Debug, Clone)]
pub struct TrainingSession {
    pub device: Device,
    pub epoch: usize,
    pub global_step: usize,
}

impl TrainingSession {
    pub fn new(device: Device) -> Self {
        Self {
            device,
            epoch: 0,
            global_step: 0,
        }
    }

    /// Applies `config.preload`: restores parameters, optimizer moments and
    /// counters, then moves on to the epoch after the saved one. A missing
    /// latest checkpoint means a fresh start; a missing explicit one is an
    /// error.
    pub fn restore(&mut self, config: &Config, varmap: &VarMap, optimizer: &mut AdamW) -> Result<()> {
        let Some(path) = config.preload_weights_file_path() else {
            tracing::info!("no model to preload, starting from scratch");
            return Ok(());
        };
        tracing::info!(path = %path.display(), "preloading model");
        let state = load_checkpoint(&path, varmap, optimizer, &self.device)?;
        self.epoch = state.epoch + 1;
        self.global_step = state.global_step;
        Ok(())
    }
}

/// One forward/backward pass over `batch`; returns the loss before the update.
pub fn train_step<M: Seq2SeqModel + ?Sized>(
    model: &M,
    optimizer: &mut AdamW,
    batch: &Batch,
    pad_id: u32,
    label_smoothing: f64,
) -> Result<f32> {
    let encoder_output = model.encode(&batch.encoder_input, &batch.encoder_mask, true)?; // (B, seq_len, d_model)
    let decoder_output = model.decode(
        &encoder_output,
        &batch.encoder_mask,
        &batch.decoder_input,
        &batch.decoder_mask,
        true,
    )?; // (B, seq_len, d_model)
    let proj_output = model.project(&decoder_output)?; // (B, seq_len, vocab_size)

    let loss = cross_entropy_with_smoothing(
        &proj_output.flatten_to(1)?, // (B * seq_len, vocab_size)
        &batch.label.flatten_all()?, // (B * seq_len)
        pad_id,
        label_smoothing,
    )?;
    let value = loss.to_dtype(DType::F32)?.to_scalar::<f32>()?;
    optimizer.backward_step(&loss)?;
    Ok(value)
}

pub fn train_model(config: Config) -> Result<TrainingSession> {
    let device = device(false)?;
    let corpus = ParallelCorpus::from_hub(
        &config.datasource,
        &config.lang_src,
        &config.lang_tgt,
        config.train_split,
    )?;
    tracing::info!(
        train = corpus.train_set.len(),
        valid = corpus.valid_set.len(),
        "split corpus"
    );
    train_on_corpus(&config, &corpus, device)
}

pub fn train_on_corpus(config: &Config, corpus: &ParallelCorpus, device: Device) -> Result<TrainingSession> {
    if corpus.train_set.is_empty() {
        return Err(TranslatorError::EmptyCorpus("the training split".to_string()).into());
    }
    std::fs::create_dir_all(&config.model_folder)
        .with_context(|| format!("failed to create {}", config.model_folder))?;

    let tokenizer_helper = TokenizerHelper::new(config.tokenizer_min_frequency);
    let tokenizer_src = tokenizer_helper.get_or_build_tokenizer(
        &config.tokenizer_path(&config.lang_src),
        &config.lang_src,
        corpus.sentences(Side::Source),
    )?;
    let tokenizer_tgt = tokenizer_helper.get_or_build_tokenizer(
        &config.tokenizer_path(&config.lang_tgt),
        &config.lang_tgt,
        corpus.sentences(Side::Target),
    )?;
    let src_vocab_size = tokenizer_src.get_vocab_size(true);
    let tgt_vocab_size = tokenizer_tgt.get_vocab_size(true);
    tracing::info!(src_vocab_size, tgt_vocab_size, "tokenizers ready");

    let dataset = BilingualDataset::new(corpus, &tokenizer_src, &tokenizer_tgt, config.seq_len, &device)?;
    let tgt_special = SpecialTokens::from_tokenizer(&tokenizer_tgt)?;

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
    let model = Transformer::new(&TransformerConfig::new(config, src_vocab_size, tgt_vocab_size), vb)?;
    let mut optimizer = AdamW::new(
        &varmap,
        ParamsAdamW {
            lr: config.lr,
            eps: ADAM_EPS,
            ..Default::default()
        },
    )?;

    let mut writer = SummaryWriter::new(&config.experiment_name)?;
    let mut session = TrainingSession::new(device);
    session.restore(config, &varmap, &mut optimizer)?;

    for epoch in session.epoch..config.num_epochs {
        let batcher = dataset.train_batcher(config.batch_size);
        let progress = ProgressBar::new(batcher.num_batches() as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{prefix} {bar:30.green/black} {pos}/{len} [{elapsed}<{eta}] {msg}")?,
        );
        progress.set_prefix(format!("Processing epoch {epoch:02}"));

        for batch in batcher {
            let loss = train_step(&model, &mut optimizer, &batch?, tgt_special.pad, config.label_smoothing)?;
            progress.set_message(format!("loss: {loss:6.3}"));
            writer.add_scalar("train loss", f64::from(loss), session.global_step)?;
            session.global_step += 1;
            progress.inc(1);
        }

        run_validation(
            &model,
            dataset.valid_batcher(),
            &tokenizer_tgt,
            tgt_special,
            config.seq_len,
            &session.device,
            &|msg: &str| progress.println(msg),
            session.global_step,
            Some(&mut writer),
            config.num_validation_examples,
        )?;
        progress.finish();

        save_checkpoint(
            &config.weights_file_path(&format!("{epoch:02}")),
            CheckpointState {
                epoch,
                global_step: session.global_step,
            },
            &varmap,
            &optimizer,
        )?;
        session.epoch = epoch + 1;
    }

    Ok(session)
}
