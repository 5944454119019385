//! The composite worker pool: one in-memory tier plus plug-in caches.
//!
//! `put` replicates to every tier after the serialization round-trip
//! check; `get` probes tiers in priority order, in-memory first. Every
//! put/remove/evict emits a tagged event to registered listeners. The pool
//! never mutates the segment index; the manager owns that.

use std::sync::Arc;

use starcache_error::Result;
use starcache_segment::{SegmentBody, SegmentHeader, round_trip_body, round_trip_header};
use starcache_types::CacheConfig;
use tracing::{debug, warn};

use crate::event::{ListenerId, ListenerList, SegmentCacheEvent, SegmentEventKind};
use crate::memory::InMemoryWorker;
use crate::spi::SegmentCache;

/// Uniform front over the cache tiers.
pub struct WorkerPool {
    memory: Option<InMemoryWorker>,
    external: Vec<Arc<dyn SegmentCache>>,
    listeners: ListenerList,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("memory", &self.memory)
            .field("external_count", &self.external.len())
            .finish()
    }
}

impl WorkerPool {
    /// Build the pool. `DisableCaching` skips the in-memory worker.
    #[must_use]
    pub fn new(config: &CacheConfig, external: Vec<Arc<dyn SegmentCache>>) -> Self {
        let memory = if config.disable_caching {
            None
        } else {
            Some(InMemoryWorker::new(
                config.cache_max_entries,
                config.cache_max_bytes,
            ))
        };
        Self {
            memory,
            external,
            listeners: ListenerList::new(),
        }
    }

    /// Whether any plug-in cache is attached.
    #[must_use]
    pub fn has_external(&self) -> bool {
        !self.external.is_empty()
    }

    /// Whether any tier can hold a body at all.
    #[must_use]
    pub fn can_store(&self) -> bool {
        self.memory.is_some() || self.has_external()
    }

    /// The plug-in caches, in priority order.
    #[must_use]
    pub fn external(&self) -> &[Arc<dyn SegmentCache>] {
        &self.external
    }

    /// The in-memory tier, when enabled.
    #[must_use]
    pub const fn memory(&self) -> Option<&InMemoryWorker> {
        self.memory.as_ref()
    }

    /// Register a pool event listener.
    pub fn add_listener(
        &mut self,
        listener: Arc<dyn Fn(&SegmentCacheEvent) + Send + Sync>,
    ) -> ListenerId {
        self.listeners.add(listener)
    }

    /// Remove a pool event listener.
    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Replicate a body to every tier.
    ///
    /// The round-trip check runs first: a header or body that does not
    /// survive the codec fails the whole put with `NotSerializable`. On
    /// success the evicted headers (if the in-memory tier overflowed) are
    /// returned so the caller can reconcile the index.
    pub fn put(
        &mut self,
        header: Arc<SegmentHeader>,
        body: SegmentBody,
    ) -> Result<Vec<Arc<SegmentHeader>>> {
        round_trip_header(&header)?;
        round_trip_body(&body)?;

        let body = Arc::new(body);
        let mut evicted_headers = Vec::new();
        if let Some(memory) = self.memory.as_mut() {
            for evicted in memory.put(Arc::clone(&header), Arc::clone(&body)) {
                self.listeners.emit(&SegmentCacheEvent {
                    is_local: true,
                    source: Arc::clone(&evicted.header),
                    kind: SegmentEventKind::Deleted,
                });
                evicted_headers.push(evicted.header);
            }
        }
        for cache in &self.external {
            let accepted = cache.put((*header).clone(), (*body).clone());
            if matches!(accepted.try_get(), Some(false)) {
                warn!(
                    measure = %header.measure_name,
                    "external cache rejected segment put"
                );
            }
        }

        debug!(
            fingerprint = header.fingerprint(),
            measure = %header.measure_name,
            evicted = evicted_headers.len(),
            "segment replicated to cache tiers"
        );
        self.listeners.emit(&SegmentCacheEvent {
            is_local: true,
            source: header,
            kind: SegmentEventKind::Created,
        });
        Ok(evicted_headers)
    }

    /// Fetch a body, probing the in-memory tier first, then plug-ins in
    /// priority order.
    pub fn get(&mut self, header: &SegmentHeader) -> Option<Arc<SegmentBody>> {
        let fingerprint = header.fingerprint();
        if let Some(memory) = self.memory.as_mut() {
            if let Some(body) = memory.get(fingerprint) {
                return Some(body);
            }
        }
        for cache in &self.external {
            match cache.get(header).get() {
                Ok(Some(body)) => return Some(Arc::new(body)),
                Ok(None) => {}
                Err(err) => {
                    warn!(%err, "external cache get failed");
                }
            }
        }
        None
    }

    /// Whether any plug-in cache holds the body.
    #[must_use]
    pub fn external_contains(&self, header: &SegmentHeader) -> bool {
        self.external
            .iter()
            .any(|cache| matches!(cache.contains(header).try_get(), Some(true)))
    }

    /// Remove a body from every tier.
    pub fn remove(&mut self, header: &SegmentHeader) {
        let fingerprint = header.fingerprint();
        let mut removed = false;
        if let Some(memory) = self.memory.as_mut() {
            removed |= memory.remove(fingerprint).is_some();
        }
        for cache in &self.external {
            let _ = cache.remove(header);
            removed = true;
        }
        if removed {
            self.listeners.emit(&SegmentCacheEvent {
                is_local: true,
                source: Arc::new(header.clone()),
                kind: SegmentEventKind::Deleted,
            });
        }
    }

    /// Signal plug-in caches that the pool is going away. The in-memory
    /// tier simply drops.
    pub fn shutdown(&mut self) {
        self.memory = None;
        self.external.clear();
    }
}
