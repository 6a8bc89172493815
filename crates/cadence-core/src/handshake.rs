//! Filesystem rendezvous for dynamically assigned channel addresses.
//!
//! A process that binds a channel cannot know its address before the OS
//! assigns the port, and its peers may start at any time. The owner
//! therefore publishes in two phases: the address file is written and
//! synced first, then a zero-byte `<path>.unlock` marker is created.
//! Readers wait for the marker, delete it, and only then read the address,
//! so an observed marker is a promise that the address is complete. One
//! marker admits exactly one reader; the address file itself stays in
//! place for any later, already-sequenced consumers.

use crate::cancel::CancellationToken;
use crate::config::TimingConfig;
use crate::{CadenceError, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Suffix of the visibility marker next to a published address file.
pub const MARKER_SUFFIX: &str = ".unlock";

/// Options for [`await_and_consume`].
#[derive(Debug, Clone)]
pub struct WaitOptions {
    /// Sleep between marker polls.
    pub poll_interval: Duration,
    /// Give up after this long. `None` waits until cancelled.
    pub timeout: Option<Duration>,
    /// Cooperative abort for the wait.
    pub cancel: CancellationToken,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            poll_interval: TimingConfig::HANDSHAKE_POLL_INTERVAL,
            timeout: None,
            cancel: CancellationToken::new(),
        }
    }
}

impl WaitOptions {
    /// Options the orchestrator uses for startup waits: bounded deadline,
    /// shared cancel token.
    pub fn startup(cancel: CancellationToken) -> Self {
        Self {
            timeout: Some(TimingConfig::STARTUP_WAIT_TIMEOUT),
            cancel,
            ..Self::default()
        }
    }
}

/// Path of the marker belonging to `path`.
pub fn marker_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(MARKER_SUFFIX);
    path.with_file_name(name)
}

/// Publish `content` at `path` for one reader to consume.
///
/// The content is fully written and synced before the marker appears, so a
/// reader that sees the marker never sees a partial address.
pub fn publish(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| CadenceError::Io {
            message: "failed to create handshake directory".to_string(),
            path: Some(parent.to_path_buf()),
            source: Some(e),
        })?;
    }

    let mut file = File::create(path).map_err(|e| CadenceError::Io {
        message: "failed to create address file".to_string(),
        path: Some(path.to_path_buf()),
        source: Some(e),
    })?;
    file.write_all(content.as_bytes())
        .map_err(|e| CadenceError::Io {
            message: "failed to write address file".to_string(),
            path: Some(path.to_path_buf()),
            source: Some(e),
        })?;
    file.sync_all().map_err(|e| CadenceError::Io {
        message: "failed to sync address file".to_string(),
        path: Some(path.to_path_buf()),
        source: Some(e),
    })?;
    drop(file);

    // Second phase: the marker only exists once the address is durable.
    let marker = marker_path(path);
    File::create(&marker).map_err(|e| CadenceError::Io {
        message: "failed to create handshake marker".to_string(),
        path: Some(marker.clone()),
        source: Some(e),
    })?;

    debug!("published {} ({} bytes)", path.display(), content.len());
    Ok(())
}

/// Wait for the marker at `path`, consume it, and return the file content.
///
/// Polls with `options.poll_interval` until the marker exists, honouring
/// the deadline and the cancel token. The marker is deleted before the
/// address is read, so the consume is single-shot: a second waiter on the
/// same path keeps waiting (or times out) instead of re-reading stale
/// state.
pub async fn await_and_consume(path: &Path, options: &WaitOptions) -> Result<String> {
    let marker = marker_path(path);
    let started = Instant::now();

    loop {
        options.cancel.check()?;
        if marker.exists() {
            break;
        }
        if let Some(timeout) = options.timeout {
            if started.elapsed() >= timeout {
                return Err(CadenceError::HandshakeTimeout {
                    path: path.to_path_buf(),
                    waited: started.elapsed(),
                });
            }
        }
        debug!("waiting for {}", marker.display());
        tokio::time::sleep(options.poll_interval).await;
    }

    fs::remove_file(&marker).map_err(|e| CadenceError::Io {
        message: "failed to consume handshake marker".to_string(),
        path: Some(marker.clone()),
        source: Some(e),
    })?;
    let content = fs::read_to_string(path).map_err(|e| CadenceError::Io {
        message: "failed to read address file".to_string(),
        path: Some(path.to_path_buf()),
        source: Some(e),
    })?;

    info!(
        "consumed {} after {:?}",
        path.display(),
        started.elapsed()
    );
    Ok(content)
}

/// Parse a published id list: whitespace-separated non-negative integers.
pub fn parse_id_list(content: &str) -> Result<Vec<u64>> {
    content
        .split_whitespace()
        .map(|token| {
            token.parse::<u64>().map_err(|_| CadenceError::Config {
                message: format!("invalid id {token:?} in published id list"),
            })
        })
        .collect()
}
