use std::path::Path;

use anyhow::{Error, Result};
use tokenizers::models::wordlevel::{WordLevel, WordLevelTrainerBuilder};
use tokenizers::pre_tokenizers::whitespace::Whitespace;
use tokenizers::{
    AddedToken, DecoderWrapper, NormalizerWrapper, PostProcessorWrapper, PreTokenizerWrapper,
    Tokenizer, TokenizerBuilder,
};

use crate::error::TranslatorError;

pub const UNK_TOKEN: &str = "[UNK]";
pub const PAD_TOKEN: &str = "[PAD]";
pub const SOS_TOKEN: &str = "[SOS]";
pub const EOS_TOKEN: &str = "[EOS]";

/// Ids of the markers every sequence is framed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecialTokens {
    pub pad: u32,
    pub sos: u32,
    pub eos: u32,
}

impl SpecialTokens {
    pub fn from_tokenizer(tokenizer: &Tokenizer) -> Result<Self, TranslatorError> {
        let id = |token: &str| {
            tokenizer
                .token_to_id(token)
                .ok_or_else(|| TranslatorError::MissingSpecialToken(token.to_string()))
        };
        Ok(Self {
            pad: id(PAD_TOKEN)?,
            sos: id(SOS_TOKEN)?,
            eos: id(EOS_TOKEN)?,
        })
    }
}

/// Loads `tokenizer_<lang>.json` when present, otherwise trains a
/// whitespace word-level tokenizer and saves it there first.
pub struct TokenizerHelper {
    min_frequency: u64,
}

impl Default for TokenizerHelper {
    fn default() -> Self {
        Self { min_frequency: 2 }
    }
}

impl TokenizerHelper {
    pub fn new(min_frequency: u64) -> Self {
        Self { min_frequency }
    }

    pub fn get_or_build_tokenizer(
        &self,
        path: &Path,
        lang: &str,
        sequences: Vec<String>,
    ) -> Result<Tokenizer> {
        if path.exists() {
            tracing::info!(lang, path = %path.display(), "loading tokenizer");
            return Tokenizer::from_file(path).map_err(Error::msg);
        }
        if sequences.is_empty() {
            return Err(TranslatorError::EmptyTokenizerCorpus(lang.to_string()).into());
        }
        tracing::info!(lang, path = %path.display(), sentences = sequences.len(), "training tokenizer");
        self.train(path, sequences)
    }

    fn train(&self, path: &Path, sequences: Vec<String>) -> Result<Tokenizer> {
        let mut trainer = WordLevelTrainerBuilder::default()
            .show_progress(false)
            .min_frequency(self.min_frequency)
            .special_tokens(
                [UNK_TOKEN, PAD_TOKEN, SOS_TOKEN, EOS_TOKEN]
                    .into_iter()
                    .map(|token| AddedToken::from(token, true))
                    .collect(),
            )
            .build()
            .map_err(Error::msg)?;

        let model = WordLevel::builder()
            .unk_token(UNK_TOKEN.to_string())
            .build()
            .map_err(Error::msg)?;
        let mut tokenizer = TokenizerBuilder::<
            WordLevel,
            NormalizerWrapper,
            PreTokenizerWrapper,
            PostProcessorWrapper,
            DecoderWrapper,
        >::default()
        .with_model(model)
        .with_pre_tokenizer(Some(PreTokenizerWrapper::Whitespace(Whitespace::default())))
        .build()
        .map_err(Error::msg)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        tokenizer
            .train(&mut trainer, sequences.into_iter())
            .map_err(Error::msg)?
            .save(path, false)
            .map_err(Error::msg)?;

        Tokenizer::from_file(path).map_err(Error::msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentences() -> Vec<String> {
        vec![
            "the cat sat on the mat".to_string(),
            "the dog sat on the log".to_string(),
        ]
    }

    #[test]
    fn test_build_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokenizer_english.json");
        let helper = TokenizerHelper::new(1);

        let built = helper
            .get_or_build_tokenizer(&path, "english", sentences())
            .unwrap();
        assert!(path.exists());

        // the saved file wins over the (empty) corpus on the second call
        let loaded = helper
            .get_or_build_tokenizer(&path, "english", vec![])
            .unwrap();
        assert_eq!(built.get_vocab_size(true), loaded.get_vocab_size(true));

        let ids = loaded.encode("the cat sat", false).unwrap().get_ids().to_vec();
        assert_eq!(ids.len(), 3);
        assert_eq!(loaded.decode(&ids, true).unwrap(), "the cat sat");
    }

    #[test]
    fn test_special_tokens_come_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokenizer_korean.json");
        let tokenizer = TokenizerHelper::new(1)
            .get_or_build_tokenizer(&path, "korean", sentences())
            .unwrap();

        let special = SpecialTokens::from_tokenizer(&tokenizer).unwrap();
        assert_eq!(tokenizer.token_to_id(UNK_TOKEN), Some(0));
        assert_eq!(
            special,
            SpecialTokens {
                pad: 1,
                sos: 2,
                eos: 3
            }
        );
    }

    #[test]
    fn test_unknown_words_map_to_unk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokenizer_english.json");
        let tokenizer = TokenizerHelper::new(2)
            .get_or_build_tokenizer(&path, "english", sentences())
            .unwrap();

        // "cat" occurs once, below the frequency threshold
        let ids = tokenizer.encode("the cat", false).unwrap().get_ids().to_vec();
        assert_eq!(ids[1], 0);
    }

    #[test]
    fn test_empty_corpus_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = TokenizerHelper::default()
            .get_or_build_tokenizer(&dir.path().join("tokenizer_x.json"), "x", vec![])
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TranslatorError>(),
            Some(TranslatorError::EmptyTokenizerCorpus(_))
        ));
    }
}
