use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TranslatorError {
    #[error("checkpoint not found: {}", .0.display())]
    CheckpointNotFound(PathBuf),

    #[error("checkpoint {} has no entry `{name}`", path.display())]
    MissingCheckpointEntry { path: PathBuf, name: String },

    #[error("tokenizer has no `{0}` token")]
    MissingSpecialToken(String),

    #[error("greedy decoding needs room for at least two tokens, got max_len = {0}")]
    DecodeLengthTooSmall(usize),

    #[error("sequence length {0} leaves no room for the [SOS] and [EOS] markers")]
    SequenceLengthTooSmall(usize),

    #[error("{} row {row} has no `{column}` string column", path.display())]
    MissingColumn {
        path: PathBuf,
        row: usize,
        column: String,
    },

    #[error("no translation pairs in {0}")]
    EmptyCorpus(String),

    #[error("no sentences to train the `{0}` tokenizer on")]
    EmptyTokenizerCorpus(String),
}
