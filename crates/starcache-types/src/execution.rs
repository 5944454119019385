//! Statement execution context: cancellation and deadline checks.
//!
//! The cache manager never blocks on SQL, but the batch reader does block on
//! futures. Cancellation is propagated cooperatively: callers check the
//! context before and between batch loads, and in-flight SQL is told to
//! cancel through its cursor.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use starcache_error::{Result, StarCacheError};

/// Shared cancellation/deadline state for one statement execution.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl ExecutionContext {
    /// Context with no deadline.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: None,
        }
    }

    /// Context that times out `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Request cancellation. All clones observe it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fail with `Cancelled` or `Timeout` if either condition holds.
    pub fn check_cancel_or_timeout(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(StarCacheError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(StarCacheError::Timeout);
            }
        }
        Ok(())
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}
