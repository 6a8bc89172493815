//! Per-process file logging.
//!
//! Every process in a run writes its own file under `<result_path>/log/`,
//! so the logs of concurrently running children never interleave. The
//! verbosity comes from the parameter file (`level_log`, 0-4).

use crate::config::{level_from_log, RunPaths};
use crate::{CadenceError, Result};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Initialize file logging for this process and return the log path.
///
/// Later calls in the same process keep the first subscriber; the log file
/// is still created so the caller's path is valid either way.
pub fn init_file_logging(result_path: &Path, name: &str, level_log: u8) -> Result<PathBuf> {
    let log_dir = result_path.join(RunPaths::LOG_DIR);
    fs::create_dir_all(&log_dir).map_err(|e| CadenceError::Io {
        message: "failed to create log directory".to_string(),
        path: Some(log_dir.clone()),
        source: Some(e),
    })?;

    let log_path = log_dir.join(format!("{name}.log"));
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| CadenceError::Io {
            message: "failed to open log file".to_string(),
            path: Some(log_path.clone()),
            source: Some(e),
        })?;

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level_from_log(level_log))
        .with_target(false)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!("logging already initialized, keeping the existing subscriber");
    }
    Ok(log_path)
}
