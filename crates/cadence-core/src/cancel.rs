//! Cooperative cancellation for startup waits.
//!
//! A run can stall before any data flows: a publisher that never comes up,
//! an address file that never appears. The token lets the supervising side
//! abort those waits without threading a second signalling channel through
//! every call site. The data path itself does not use it; there the
//! end-of-stream tag and peer disconnection are the termination signals.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag.
///
/// Cloning shares state: cancelling any clone cancels them all.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Observed by every clone.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Return `Err(Cancelled)` if cancellation has been requested.
    pub fn check(&self) -> crate::Result<()> {
        if self.is_cancelled() {
            Err(crate::CadenceError::Cancelled)
        } else {
            Ok(())
        }
    }
}
