//! Cadence core - coupling runtime for windowed co-simulation data.
//!
//! Two independently launched simulators exchange time-windowed numeric
//! payloads through relay processes. This crate provides the pieces those
//! processes are built from:
//!
//! - [`handshake`]: filesystem rendezvous for dynamically assigned channel
//!   addresses (write, then mark visible).
//! - [`channel`]: the tagged localhost transport carrying payloads and
//!   phase signals.
//! - [`translator`]: the receive/persist engine relaying windowed payloads
//!   into batched storage.
//! - [`orchestrator`]: dependency-ordered launching and supervision of a
//!   run's processes.
//!
//! The `cadence-relayd` and `cadence-run` binaries are thin wrappers over
//! these modules.
//!
//! # Example
//!
//! ```rust,ignore
//! use cadence_core::channel::ChannelListener;
//! use cadence_core::storage::FileBatchSink;
//! use cadence_core::translator::{TranslatorConfig, TranslatorEngine};
//! use cadence_core::handshake;
//!
//! # async fn relay() -> cadence_core::Result<()> {
//! let listener = ChannelListener::bind().await?;
//! handshake::publish("run/relay/recorder/4.txt".as_ref(), listener.address())?;
//!
//! let peers = listener.accept_ranks(1).await?;
//! let engine = TranslatorEngine::new(
//!     TranslatorConfig { nb_step: 100, save_step: 10 },
//!     FileBatchSink::new("run/relay/save/4"),
//! )?;
//! let report = engine.run(peers).await?;
//! println!("persisted {} windows", report.windows);
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod channel;
pub mod config;
pub mod error;
pub mod handshake;
pub mod logging;
pub mod orchestrator;
pub mod storage;
pub mod translator;

// Re-export commonly used types
pub use cancel::CancellationToken;
pub use channel::{ChannelListener, DataChannel, Message};
pub use config::{RunConfig, TimingConfig, PARAMETER_FILE};
pub use error::{CadenceError, Result};
pub use orchestrator::{Orchestrator, RunSummary};
pub use storage::{BatchSink, FileBatchSink};
pub use translator::{TranslatorConfig, TranslatorEngine, TranslatorReport, WindowFrame};
