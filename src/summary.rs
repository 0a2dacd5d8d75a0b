use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

const SCALARS_FILE: &str = "scalars.csv";

/// Append-only experiment log of named scalar series.
///
/// Every `add_scalar` call writes one `step,tag,value` row to
/// `<dir>/scalars.csv` and flushes it, so an interrupted run keeps everything
/// logged so far.
pub struct SummaryWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl SummaryWriter {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
        let path = dir.join(SCALARS_FILE);
        let is_new = !path.exists();

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        if is_new {
            writeln!(writer, "step,tag,value")?;
            writer.flush()?;
        }
        tracing::debug!(path = %path.display(), "experiment log opened");
        Ok(Self { path, writer })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn add_scalar(&mut self, tag: &str, value: f64, step: usize) -> Result<()> {
        writeln!(self.writer, "{step},{tag},{value}")?;
        self.writer.flush()?;
        Ok(())
    }
}
