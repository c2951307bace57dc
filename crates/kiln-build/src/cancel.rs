//! Cooperative cancellation for long-running builds.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use kiln_common::error::{KilnError, Result};

/// Shared flag signalling that the current build should stop.
///
/// Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns `KilnError::Cancelled` if cancellation has been requested.
    ///
    /// # Errors
    ///
    /// Returns `KilnError::Cancelled` when the token is cancelled.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(KilnError::Cancelled)
        } else {
            Ok(())
        }
    }
}
