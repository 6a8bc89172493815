//! Batched persistence of accumulated windows.
//!
//! Each flush writes one artifact named by the cumulative window count,
//! `{stem}_{count}.bin`, holding the batch's values as raw little-endian
//! f64. The sink is a trait so the relay engine can be driven against an
//! in-memory collector in tests.

use crate::{CadenceError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

/// Destination of flushed batches.
#[async_trait]
pub trait BatchSink: Send + Sync + 'static {
    /// Persist one batch. `window_count` is the cumulative number of
    /// windows consumed at flush time and keys the artifact name.
    async fn write_batch(&self, window_count: u64, values: &[f64]) -> Result<()>;
}

/// Sink writing one binary file per batch under a path stem.
pub struct FileBatchSink {
    stem: PathBuf,
}

impl FileBatchSink {
    pub fn new(stem: impl Into<PathBuf>) -> Self {
        Self { stem: stem.into() }
    }

    /// File the batch flushed at `window_count` lands in.
    pub fn batch_path(&self, window_count: u64) -> PathBuf {
        batch_path(&self.stem, window_count)
    }
}

/// `{stem}_{count}.bin`
pub fn batch_path(stem: &Path, window_count: u64) -> PathBuf {
    let mut name = stem.file_name().unwrap_or_default().to_os_string();
    name.push(format!("_{window_count}.bin"));
    stem.with_file_name(name)
}

#[async_trait]
impl BatchSink for FileBatchSink {
    async fn write_batch(&self, window_count: u64, values: &[f64]) -> Result<()> {
        let path = self.batch_path(window_count);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CadenceError::Io {
                    message: "failed to create batch directory".to_string(),
                    path: Some(parent.to_path_buf()),
                    source: Some(e),
                })?;
        }

        let mut bytes = Vec::with_capacity(values.len() * 8);
        for value in values {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| CadenceError::Io {
                message: "failed to write batch".to_string(),
                path: Some(path.clone()),
                source: Some(e),
            })?;

        info!("wrote {} values to {}", values.len(), path.display());
        Ok(())
    }
}

/// Read one batch file back. Used by analysis tooling and tests.
pub fn read_batch(path: &Path) -> Result<Vec<f64>> {
    let bytes = std::fs::read(path).map_err(|e| CadenceError::Io {
        message: "failed to read batch".to_string(),
        path: Some(path.to_path_buf()),
        source: Some(e),
    })?;
    if bytes.len() % 8 != 0 {
        return Err(CadenceError::Other(format!(
            "{} is not a sequence of f64 values ({} bytes)",
            path.display(),
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|chunk| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            f64::from_le_bytes(raw)
        })
        .collect())
}
