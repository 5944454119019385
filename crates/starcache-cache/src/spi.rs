//! The plug-in segment cache SPI.
//!
//! Implementations may live outside the process; every call returns a
//! completion handle rather than a value. Headers and bodies crossing this
//! boundary must round-trip the interchange codec; the pool enforces that
//! at `put` time.

use std::sync::Arc;

use starcache_segment::{SegmentBody, SegmentHeader};

use crate::event::{ListenerId, SegmentCacheEvent};
use crate::future::Completion;

/// Listener callback registered with an external cache.
pub type SpiListener = Arc<dyn Fn(&SegmentCacheEvent) + Send + Sync>;

/// Service-provider interface for pluggable segment caches.
///
/// Implementations are assumed thread-safe; the pool adds no locking on
/// top. Listener failures must be contained by the implementation.
pub trait SegmentCache: Send + Sync {
    /// Whether a body for `header` is present.
    fn contains(&self, header: &SegmentHeader) -> Completion<bool>;

    /// Fetch the body for `header`, if present.
    fn get(&self, header: &SegmentHeader) -> Completion<Option<SegmentBody>>;

    /// Store a body. Implementations may reject (`false`).
    fn put(&self, header: SegmentHeader, body: SegmentBody) -> Completion<bool>;

    /// Drop the body for `header`. `true` when something was removed.
    fn remove(&self, header: &SegmentHeader) -> Completion<bool>;

    /// Enumerate every known header.
    fn segment_headers(&self) -> Completion<Vec<SegmentHeader>>;

    /// Register a listener for remote create/delete events.
    fn add_listener(&self, listener: SpiListener) -> ListenerId;

    /// Remove a previously registered listener.
    fn remove_listener(&self, id: ListenerId);

    /// Whether the cache maintains a queryable index. When `false`, the
    /// in-process index falls back to full enumeration at startup.
    fn supports_rich_index(&self) -> bool {
        true
    }
}
