//! Error types shared across the starcache workspace.
//!
//! One enum covers the whole pipeline. Variants map one-to-one onto the
//! failure policies of the cache subsystem: unsatisfiable requests are
//! short-circuited, quantum overflow is caught by the evaluator loop,
//! serialization failures are fatal for the offending `put`, and SQL errors
//! propagate through segment futures.

use thiserror::Error;

/// Workspace-wide result alias.
pub type Result<T, E = StarCacheError> = std::result::Result<T, E>;

/// All error conditions raised by the segment cache pipeline.
///
/// The enum is `Clone` because load errors fan out through shared segment
/// futures: every waiter of a failed load observes the same error value.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StarCacheError {
    /// The cell request contradicts itself (e.g. an empty slicer) and can
    /// never produce a value. Callers return the null sentinel; no retry.
    #[error("cell request is unsatisfiable")]
    Unsatisfiable,

    /// Raised after every `request_quantum` recorded cell misses so the
    /// evaluator can flush a batch early. Never user-visible.
    #[error("cell request quantum exceeded after {0} requests")]
    QuantumExceeded(usize),

    /// A header or body failed the serialization round-trip check during
    /// `put`. Fatal for this put; the caller decides whether to continue.
    #[error("segment failed serialization round-trip: {0}")]
    NotSerializable(String),

    /// A bulk fact query failed. Propagated through every future of the
    /// failing load invocation; evaluation aborts.
    #[error("sql execution failed: {0}")]
    SqlExecution(String),

    /// The statement was cancelled while work was outstanding.
    #[error("execution cancelled")]
    Cancelled,

    /// The statement exceeded its deadline while work was outstanding.
    #[error("execution timed out")]
    Timeout,

    /// A segment body does not agree with its header (axis count, key
    /// ordinals, or cell population out of range). The segment is discarded
    /// and its header evicted.
    #[error("corrupted segment: {0}")]
    CorruptedSegment(String),

    /// The cache manager has shut down; no further commands are accepted.
    #[error("cache manager is shut down")]
    Shutdown,

    /// Invariant violation inside the cache subsystem.
    #[error("internal error: {0}")]
    Internal(String),
}

impl StarCacheError {
    /// Build an [`StarCacheError::Internal`] from any displayable message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Build a [`StarCacheError::CorruptedSegment`] from any displayable
    /// message.
    pub fn corrupted(msg: impl Into<String>) -> Self {
        Self::CorruptedSegment(msg.into())
    }
}
