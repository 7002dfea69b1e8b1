//! JSONL transcript writer.

use std::{
    fs::{self, File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use tracing::warn;

use super::{TranscriptEntry, TranscriptSink};
use crate::{AppError, Result};

/// Appends one JSON object per line to a single file.
///
/// Each record is flushed immediately so the transcript survives a crash of
/// the tool itself.
pub struct JsonlTranscriptWriter {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonlTranscriptWriter {
    /// Open (or create) `path` for appending, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the directory or file cannot be created.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                AppError::Io(format!(
                    "failed to create transcript directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                AppError::Io(format!("failed to open transcript {}: {e}", path.display()))
            })?;

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Destination path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TranscriptSink for JsonlTranscriptWriter {
    fn record(&self, entry: TranscriptEntry) -> Result<()> {
        let line = serde_json::to_string(&entry)
            .map_err(|e| AppError::Io(format!("failed to serialize transcript entry: {e}")))?;

        let mut writer = self
            .writer
            .lock()
            .map_err(|_| AppError::Io("transcript writer mutex poisoned".into()))?;

        if let Err(e) = writeln!(writer, "{line}") {
            warn!("failed to write transcript entry: {e}");
            return Err(AppError::Io(format!("transcript write failed: {e}")));
        }
        writer
            .flush()
            .map_err(|e| AppError::Io(format!("transcript flush failed: {e}")))
    }
}
