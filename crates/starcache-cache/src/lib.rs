//! Cache tiers and the single-writer cache manager.
//!
//! One in-memory worker plus zero or more plug-in caches sit behind a
//! uniform [`WorkerPool`]. All index and pool mutation serializes through
//! the [`CacheManager`] command thread; workers never mutate the index
//! directly, they enqueue events the manager consumes. Region-precise
//! invalidation ([`flush`]) also runs inside the manager.
//!
//! [`flush`]: CacheManager::flush

pub mod event;
pub mod flush;
pub mod future;
pub mod manager;
pub mod memory;
pub mod pool;
pub mod region;
pub mod spi;

pub use event::{ListenerId, ListenerList, SegmentCacheEvent, SegmentEventKind};
pub use flush::FlushOutcome;
pub use future::{Completion, SegmentFuture};
pub use manager::{CacheControl, CacheManager, ManagerState};
pub use memory::InMemoryWorker;
pub use pool::WorkerPool;
pub use region::{CacheRegion, CacheRegionBuilder};
pub use spi::{SegmentCache, SpiListener};
