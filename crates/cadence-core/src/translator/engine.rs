//! The producer/consumer core of a relay daemon.
//!
//! One reader task per connected rank forwards parsed messages into a
//! fan-in queue. The receive task folds them into the current window and
//! hands finished windows through a bounded capacity-1 channel to the
//! persist task, which batches and flushes them. That channel is the only
//! coupling between the two sides: a send blocks while the persister is
//! still working, and closing it tells the persister to drain and stop.
//!
//! With several ranks, a window closes only once every live rank has
//! passed its boundary, and the stream ends only once every rank has sent
//! its end-of-stream (or disconnected).

use super::buffer::{WindowBuffer, WindowFrame};
use crate::channel::{DataChannel, Message};
use crate::storage::BatchSink;
use crate::{CadenceError, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Sizing of one engine run.
#[derive(Debug, Clone, Copy)]
pub struct TranslatorConfig {
    /// Total number of synchronization windows the persister consumes.
    pub nb_step: u64,
    /// Windows accumulated before each flush.
    pub save_step: u64,
}

/// What one engine run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslatorReport {
    /// Windows consumed by the persister.
    pub windows: u64,
    /// Batches flushed to the sink.
    pub batches: u64,
    /// The stream ended before `nb_step` windows arrived.
    pub stopped_early: bool,
}

/// Relay engine: receives windowed payloads and persists them in batches.
pub struct TranslatorEngine<S: BatchSink> {
    config: TranslatorConfig,
    sink: Arc<S>,
}

impl<S: BatchSink> TranslatorEngine<S> {
    pub fn new(config: TranslatorConfig, sink: S) -> Result<Self> {
        if config.save_step == 0 {
            return Err(CadenceError::Config {
                message: "save_step must be at least 1".to_string(),
            });
        }
        Ok(Self {
            config,
            sink: Arc::new(sink),
        })
    }

    /// Run over the given peer connections until `nb_step` windows are
    /// persisted or the stream ends, whichever comes first.
    pub async fn run(&self, peers: Vec<DataChannel>) -> Result<TranslatorReport> {
        if peers.is_empty() {
            return Err(CadenceError::Config {
                message: "translator needs at least one peer".to_string(),
            });
        }
        let ranks = peers.len();

        // Fan-in: one reader per rank, so a slow rank never starves the
        // others' socket buffers.
        let (message_tx, message_rx) = mpsc::channel::<(usize, Result<Message>)>(ranks * 2);
        let mut readers = Vec::with_capacity(ranks);
        for (rank, peer) in peers.into_iter().enumerate() {
            readers.push(tokio::spawn(read_rank(rank, peer, message_tx.clone())));
        }
        drop(message_tx);

        // Capacity 1: the receive side blocks while the persister is behind.
        let (frame_tx, frame_rx) = mpsc::channel::<WindowFrame>(1);
        let receive = tokio::spawn(receive_loop(ranks, message_rx, frame_tx));

        let sink = self.sink.clone();
        let config = self.config;
        let persist = tokio::spawn(async move { persist_loop(frame_rx, &*sink, config).await });

        let receive_result = receive
            .await
            .map_err(|e| CadenceError::Other(format!("receive task panicked: {e}")))?;
        let persist_result = persist
            .await
            .map_err(|e| CadenceError::Other(format!("persist task panicked: {e}")))?;
        for reader in readers {
            let _ = reader.await;
        }

        let stats = persist_result?;
        receive_result?;

        Ok(TranslatorReport {
            windows: stats.windows,
            batches: stats.batches,
            stopped_early: stats.windows < self.config.nb_step,
        })
    }
}

/// Forward messages from one rank into the fan-in queue until the rank
/// ends its stream.
async fn read_rank(rank: usize, mut peer: DataChannel, tx: mpsc::Sender<(usize, Result<Message>)>) {
    loop {
        let next = peer.recv().await;
        let ended = matches!(next, Ok(Message::EndOfStream) | Err(_));
        if tx.send((rank, next)).await.is_err() {
            break;
        }
        if ended {
            break;
        }
    }
    debug!("reader for rank {rank} finished");
}

async fn receive_loop(
    ranks: usize,
    mut messages: mpsc::Receiver<(usize, Result<Message>)>,
    frames: mpsc::Sender<WindowFrame>,
) -> Result<()> {
    let mut buffer = WindowBuffer::new();
    let mut pending_windows = vec![0u64; ranks];
    let mut ended = vec![false; ranks];
    let mut live = ranks;

    while live > 0 {
        let Some((rank, next)) = messages.recv().await else {
            break;
        };
        match next {
            Ok(Message::Data(values)) => {
                debug!("rank {rank}: {} values", values.len());
                buffer.extend(&values);
            }
            Ok(Message::EndOfWindow) => {
                pending_windows[rank] += 1;
            }
            Ok(Message::EndOfStream) => {
                info!("rank {rank}: end of stream");
                if !ended[rank] {
                    ended[rank] = true;
                    live -= 1;
                }
            }
            Err(e) => {
                error!("rank {rank}: {e}");
                return Err(e);
            }
        }

        // A window closes once every live rank has passed its boundary.
        while live > 0
            && ended
                .iter()
                .zip(&pending_windows)
                .all(|(done, pending)| *done || *pending > 0)
        {
            for (done, pending) in ended.iter().zip(pending_windows.iter_mut()) {
                if !*done {
                    *pending -= 1;
                }
            }
            let frame = buffer.finish_window();
            debug!(
                "window {} complete ({} values)",
                frame.window_index,
                frame.values.len()
            );
            if frames.send(frame).await.is_err() {
                // Persister reached nb_step and hung up.
                return Ok(());
            }
        }
    }

    // Hand off a partially received window rather than dropping it.
    if !buffer.is_empty() {
        let frame = buffer.finish_window();
        let _ = frames.send(frame).await;
    }
    info!("receive loop finished");
    Ok(())
}

struct PersistStats {
    windows: u64,
    batches: u64,
}

async fn persist_loop<S: BatchSink>(
    mut frames: mpsc::Receiver<WindowFrame>,
    sink: &S,
    config: TranslatorConfig,
) -> Result<PersistStats> {
    let mut batch: Vec<f64> = Vec::new();
    let mut windows = 0u64;
    let mut batches = 0u64;

    while windows < config.nb_step {
        let Some(frame) = frames.recv().await else {
            info!("stream closed after {windows} windows");
            break;
        };
        debug!(
            "persisting window {} ({} values)",
            frame.window_index,
            frame.values.len()
        );
        batch.extend_from_slice(&frame.values);
        windows += 1;

        if windows % config.save_step == 0 {
            sink.write_batch(windows, &batch).await?;
            batches += 1;
            batch.clear();
        }
    }

    // The trailing partial batch is flushed, never dropped.
    if !batch.is_empty() {
        sink.write_batch(windows, &batch).await?;
        batches += 1;
    }

    info!("persisted {windows} windows in {batches} batches");
    Ok(PersistStats { windows, batches })
}
