//! The per-server aggregation engine.

use std::sync::Arc;

use starcache_batch::BatchReader;
use starcache_cache::{CacheControl, CacheManager, SegmentCache};
use starcache_loader::{AggregateMatcher, NoAggregates, SegmentLoader, SqlExecutor, SqlPool};
use starcache_types::{CacheConfig, DialectCaps};
use tracing::info;

/// Owns the cache manager, the SQL pool, and the loader for one server
/// instance. Explicitly constructed; never a process-wide singleton.
pub struct AggregationEngine {
    config: CacheConfig,
    caps: DialectCaps,
    manager: CacheManager,
    loader: Arc<SegmentLoader>,
    sql_pool: Arc<SqlPool>,
}

impl std::fmt::Debug for AggregationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregationEngine")
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}

impl AggregationEngine {
    /// Engine reading the fact source through `executor`, with no
    /// aggregate-table targeting.
    #[must_use]
    pub fn new(
        config: CacheConfig,
        caps: DialectCaps,
        executor: Arc<dyn SqlExecutor>,
        external: Vec<Arc<dyn SegmentCache>>,
    ) -> Self {
        Self::with_matcher(config, caps, executor, Arc::new(NoAggregates), external)
    }

    /// Engine with an aggregate-table matcher.
    #[must_use]
    pub fn with_matcher(
        config: CacheConfig,
        caps: DialectCaps,
        executor: Arc<dyn SqlExecutor>,
        matcher: Arc<dyn AggregateMatcher>,
        external: Vec<Arc<dyn SegmentCache>>,
    ) -> Self {
        let manager = CacheManager::new(config.clone(), external);
        let sql_pool = Arc::new(SqlPool::new(config.sql_pool_size));
        let loader = Arc::new(SegmentLoader::new(
            executor,
            Arc::clone(&sql_pool),
            manager.clone(),
            matcher,
        ));
        info!(
            sql_pool = config.sql_pool_size,
            grouping_sets = config.enable_grouping_sets,
            "aggregation engine started"
        );
        Self {
            config,
            caps,
            manager,
            loader,
            sql_pool,
        }
    }

    /// The engine configuration.
    #[must_use]
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The cache manager handle.
    #[must_use]
    pub const fn manager(&self) -> &CacheManager {
        &self.manager
    }

    /// A fresh statement-local batch reader.
    #[must_use]
    pub fn reader(&self) -> BatchReader {
        BatchReader::new(
            self.manager.clone(),
            Arc::clone(&self.loader),
            self.caps,
            self.config.request_quantum,
        )
    }

    /// The user-facing cache control surface.
    #[must_use]
    pub fn cache_control(&self) -> CacheControl {
        CacheControl::new(self.manager.clone())
    }

    /// Drain the manager, stop the SQL pool, and stop the workers.
    /// Idempotent.
    pub fn shutdown(&self) {
        self.manager.shutdown();
        self.sql_pool.shutdown();
    }
}
