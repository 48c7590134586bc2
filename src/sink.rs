//! Per-run miner log file.

use crate::error::IngestError;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Append-only destination for the miner's raw output, one file per run.
/// The file is closed when the sink is dropped.
#[derive(Debug)]
pub struct LogSink {
    path: PathBuf,
    file: File,
}

impl LogSink {
    /// File name for a run started at `started_at`, e.g. `miner_20240131_174502.log`.
    pub fn file_name(started_at: &DateTime<Local>) -> String {
        format!("miner_{}.log", started_at.format("%Y%m%d_%H%M%S"))
    }

    pub async fn open(dir: &Path, started_at: &DateTime<Local>) -> Result<Self, IngestError> {
        fs::create_dir_all(dir).await.map_err(IngestError::LogWrite)?;
        let path = dir.join(Self::file_name(started_at));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(IngestError::LogWrite)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes one raw line and flushes it.
    pub async fn write_line(&mut self, line: &str) -> Result<(), IngestError> {
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        self.file.write_all(&buf).await.map_err(IngestError::LogWrite)?;
        self.file.flush().await.map_err(IngestError::LogWrite)
    }
}
