use std::path::{Path, PathBuf};

/// Which checkpoint, if any, training resumes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preload {
    None,
    Latest,
    /// Explicit epoch tag as it appears in the file name, e.g. `"02"`.
    Epoch(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub num_epochs: usize,
    pub batch_size: usize,
    pub seq_len: usize,
    pub d_model: usize,
    pub n: usize,
    pub num_heads: usize,
    pub drop_p: f32,
    pub d_ff: usize,
    pub lr: f64,
    pub label_smoothing: f64,
    pub datasource: String,
    pub lang_src: String,
    pub lang_tgt: String,
    pub train_split: f32,
    pub model_folder: String,
    pub model_basename: String,
    pub preload: Preload,
    /// `{0}` is replaced by the language identifier.
    pub tokenizer_file: String,
    pub tokenizer_min_frequency: u64,
    pub experiment_name: String,
    pub num_validation_examples: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_epochs: 20,
            batch_size: 8,
            seq_len: 200,
            d_model: 512,
            n: 6,
            num_heads: 8,
            drop_p: 0.1,
            d_ff: 2048,
            lr: 1e-4,
            label_smoothing: 0.1,
            datasource: "msarmi9/korean-english-multitarget-ted-talks-task".to_string(),
            lang_src: "english".to_string(),
            lang_tgt: "korean".to_string(),
            train_split: 0.9,
            model_folder: "weights".to_string(),
            model_basename: "tmodel_".to_string(),
            preload: Preload::Latest,
            tokenizer_file: "tokenizer_{0}.json".to_string(),
            tokenizer_min_frequency: 2,
            experiment_name: "runs/tmodel".to_string(),
            num_validation_examples: 2,
        }
    }
}

pub const CHECKPOINT_EXTENSION: &str = "safetensors";

impl Config {
    /// `{model_folder}/{model_basename}{epoch}.safetensors`
    pub fn weights_file_path(&self, epoch: &str) -> PathBuf {
        Path::new(&self.model_folder).join(format!(
            "{}{}.{}",
            self.model_basename, epoch, CHECKPOINT_EXTENSION
        ))
    }

    /// Last `{model_basename}*.safetensors` file in plain lexicographic
    /// file-name order, or `None` when the folder is missing or holds none.
    pub fn latest_weights_file_path(&self) -> Option<PathBuf> {
        let entries = std::fs::read_dir(&self.model_folder).ok()?;
        let mut weights_files = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with(&self.model_basename))
            })
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext == CHECKPOINT_EXTENSION)
            })
            .collect::<Vec<_>>();
        weights_files.sort();
        weights_files.pop()
    }

    /// The checkpoint `preload` points at, if any. An explicit epoch is
    /// returned even when the file does not exist; loading it fails later.
    pub fn preload_weights_file_path(&self) -> Option<PathBuf> {
        match &self.preload {
            Preload::None => None,
            Preload::Latest => self.latest_weights_file_path(),
            Preload::Epoch(tag) => Some(self.weights_file_path(tag)),
        }
    }

    pub fn tokenizer_path(&self, lang: &str) -> PathBuf {
        PathBuf::from(self.tokenizer_file.replace("{0}", lang))
    }
}
