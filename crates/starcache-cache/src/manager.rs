//! The single-writer cache manager.
//!
//! One thread owns the segment index, the worker pool, and the set of
//! in-flight loads; everything else talks to it through queued commands.
//! Commands must stay short and non-blocking: SQL work is delegated to the
//! executor pool, which hands futures back. External cache notifications
//! become visible only after their enqueued command runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use parking_lot::Mutex;
use starcache_error::{Result, StarCacheError};
use starcache_index::SegmentIndex;
use starcache_segment::{Segment, SegmentHeader, SegmentWithData};
use starcache_types::{BitKey, CacheConfig, Datum, StarId};
use tracing::{debug, info, warn};

use crate::event::SegmentEventKind;
use crate::flush::{FlushOutcome, flush_region};
use crate::future::SegmentFuture;
use crate::pool::WorkerPool;
use crate::region::CacheRegion;
use crate::spi::SegmentCache;

/// State owned exclusively by the manager thread.
pub struct ManagerState {
    pub config: CacheConfig,
    pub index: SegmentIndex,
    pub pool: WorkerPool,
    /// In-flight loads keyed by target header fingerprint.
    pub loading: HashMap<u64, (Arc<SegmentHeader>, SegmentFuture)>,
}

impl std::fmt::Debug for ManagerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerState")
            .field("indexed", &self.index.len())
            .field("loading", &self.loading.len())
            .finish()
    }
}

impl ManagerState {
    /// Fresh state with the given plug-in caches.
    #[must_use]
    pub fn new(config: CacheConfig, external: Vec<Arc<dyn SegmentCache>>) -> Self {
        let pool = WorkerPool::new(&config, external);
        Self {
            config,
            index: SegmentIndex::new(),
            pool,
            loading: HashMap::new(),
        }
    }

    /// Register a freshly loaded segment with the index and every cache
    /// tier, and retire its loading entry.
    ///
    /// Visible to any `locate` later in the same command, which is the
    /// ordering guarantee local loads rely on.
    pub fn register_segment(&mut self, segment: &Arc<SegmentWithData>) -> Result<()> {
        let header = segment.header();
        let fingerprint = header.fingerprint();
        self.loading.remove(&fingerprint);

        if !self.pool.can_store() {
            // With caching fully disabled the segment lives only in the
            // statement that loaded it.
            return Ok(());
        }

        let evicted = self.pool.put(Arc::clone(header), segment.to_body())?;
        self.index.register(Arc::clone(header));
        let body_may_survive_elsewhere = self.pool.has_external();
        for evicted_header in evicted {
            if !body_may_survive_elsewhere {
                self.index.unregister(evicted_header.fingerprint());
            }
        }
        Ok(())
    }

    /// Locate a ready segment able to serve the request and rehydrate it
    /// from the nearest tier. Headers whose body has vanished from every
    /// tier are evicted on the spot.
    pub fn find_ready_segment(
        &mut self,
        star: &StarId,
        fact_table: &str,
        bitkey: &BitKey,
        values: &BTreeMap<u32, Datum>,
        compound_keys: &[String],
        measure_name: &str,
    ) -> Option<Arc<SegmentWithData>> {
        let candidates =
            self.index
                .locate(star, fact_table, bitkey, values, compound_keys, measure_name);
        for header in candidates {
            let Some(body) = self.pool.get(&header) else {
                self.index.unregister(header.fingerprint());
                continue;
            };
            let rebuilt = Segment::from_header(Arc::clone(&header)).and_then(|shell| {
                SegmentWithData::add_data(shell, (*body).clone(), self.config.density_threshold)
            });
            match rebuilt {
                Ok(segment) => return Some(Arc::new(segment)),
                Err(err) => {
                    // Corrupted body: discard the segment and evict the
                    // header, then keep probing.
                    warn!(%err, "cached body failed verification, evicting");
                    self.index.unregister(header.fingerprint());
                    self.pool.remove(&header);
                }
            }
        }
        None
    }

    /// Future of an in-flight load able to serve the request, if any.
    #[must_use]
    pub fn find_loading(
        &self,
        star: &StarId,
        fact_table: &str,
        bitkey: &BitKey,
        values: &BTreeMap<u32, Datum>,
        compound_keys: &[String],
        measure_name: &str,
    ) -> Option<SegmentFuture> {
        self.loading.values().find_map(|(header, future)| {
            let usable = header.matches_prefix(star, fact_table, bitkey)
                && header.measure_name == measure_name
                && header.compound_equivalent(compound_keys)
                && header.can_serve(values);
            usable.then(|| future.clone())
        })
    }

    /// Record an in-flight load so concurrent statements can wait on it.
    pub fn register_loading(&mut self, header: Arc<SegmentHeader>, future: SegmentFuture) {
        self.loading.insert(header.fingerprint(), (header, future));
    }

    /// Drop a loading entry after a failed load.
    pub fn fail_loading(&mut self, fingerprint: u64) {
        self.loading.remove(&fingerprint);
    }

    /// Fold an externally announced segment into the index.
    pub fn external_segment_created(&mut self, header: SegmentHeader) {
        debug!(measure = %header.measure_name, "external segment announced");
        self.index.register(Arc::new(header));
    }

    /// Fold an external deletion into the index. A body still resident in
    /// the local tier keeps the header alive.
    pub fn external_segment_deleted(&mut self, header: &SegmentHeader) {
        let fingerprint = header.fingerprint();
        let locally_resident = self
            .pool
            .memory()
            .is_some_and(|memory| memory.contains(fingerprint));
        if !locally_resident {
            self.index.unregister(fingerprint);
        }
    }
}

enum Command {
    Task(Box<dyn FnOnce(&mut ManagerState) + Send>),
    Shutdown,
}

struct Shared {
    tx: Mutex<Option<Sender<Command>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Cloneable handle to the manager thread.
#[derive(Clone)]
pub struct CacheManager {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let alive = self.shared.tx.lock().is_some();
        f.debug_struct("CacheManager").field("alive", &alive).finish()
    }
}

impl CacheManager {
    /// Start the manager thread and wire external cache listeners.
    #[must_use]
    pub fn new(config: CacheConfig, external: Vec<Arc<dyn SegmentCache>>) -> Self {
        let (tx, rx) = unbounded::<Command>();
        let state = ManagerState::new(config, external.clone());
        let handle = std::thread::Builder::new()
            .name("starcache-manager".to_owned())
            .spawn(move || run_loop(rx, state))
            .expect("spawning the cache manager thread");

        let manager = Self {
            shared: Arc::new(Shared {
                tx: Mutex::new(Some(tx)),
                handle: Mutex::new(Some(handle)),
            }),
        };

        for cache in &external {
            let listener_manager = manager.clone();
            cache.add_listener(Arc::new(move |event| {
                if event.is_local {
                    return;
                }
                let outcome = match event.kind {
                    SegmentEventKind::Created => {
                        listener_manager.external_segment_created((*event.source).clone())
                    }
                    SegmentEventKind::Deleted => {
                        listener_manager.external_segment_deleted((*event.source).clone())
                    }
                };
                if let Err(err) = outcome {
                    // The local index is authoritative; a dropped external
                    // notification is survivable.
                    warn!(%err, "external cache event dropped");
                }
            }));

            if !cache.supports_rich_index() {
                // No queryable remote index: enumerate everything the cache
                // knows at startup. This blocks the constructor, never the
                // manager thread.
                match cache.segment_headers().get() {
                    Ok(headers) => {
                        info!(count = headers.len(), "startup enumeration of external cache");
                        for header in headers {
                            let _ = manager.external_segment_created(header);
                        }
                    }
                    Err(err) => warn!(%err, "external cache enumeration failed"),
                }
            }
        }

        manager
    }

    fn send(&self, command: Command) -> Result<()> {
        let guard = self.shared.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(StarCacheError::Shutdown);
        };
        tx.send(command).map_err(|_| StarCacheError::Shutdown)
    }

    /// Run a command on the manager thread and wait for its result.
    pub fn execute<R, F>(&self, command: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut ManagerState) -> R + Send + 'static,
    {
        let (reply_tx, reply_rx) = bounded(1);
        self.send(Command::Task(Box::new(move |state| {
            let _ = reply_tx.send(command(state));
        })))?;
        reply_rx.recv().map_err(|_| StarCacheError::Shutdown)
    }

    /// Enqueue a command without waiting for it.
    pub fn submit<F>(&self, command: F) -> Result<()>
    where
        F: FnOnce(&mut ManagerState) + Send + 'static,
    {
        self.send(Command::Task(Box::new(command)))
    }

    /// Fold an external create announcement into the index, asynchronously.
    pub fn external_segment_created(&self, header: SegmentHeader) -> Result<()> {
        self.submit(move |state| state.external_segment_created(header))
    }

    /// Fold an external delete announcement into the index, asynchronously.
    pub fn external_segment_deleted(&self, header: SegmentHeader) -> Result<()> {
        self.submit(move |state| state.external_segment_deleted(&header))
    }

    /// Region-precise invalidation. Runs entirely on the manager thread.
    pub fn flush(&self, region: CacheRegion) -> Result<FlushOutcome> {
        self.execute(move |state| flush_region(state, &region))
    }

    /// Stop accepting commands, drain the queue, and stop the workers.
    /// Idempotent; `execute` after shutdown fails with `Shutdown`.
    pub fn shutdown(&self) {
        let sender = self.shared.tx.lock().take();
        if let Some(tx) = sender {
            let _ = tx.send(Command::Shutdown);
            drop(tx);
        }
        let handle = self.shared.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

fn run_loop(rx: Receiver<Command>, mut state: ManagerState) {
    while let Ok(command) = rx.recv() {
        match command {
            Command::Task(task) => task(&mut state),
            Command::Shutdown => break,
        }
    }
    // Drain whatever raced in behind the shutdown marker.
    while let Ok(command) = rx.try_recv() {
        if let Command::Task(task) = command {
            task(&mut state);
        }
    }
    for (_, (_, future)) in state.loading.drain() {
        future.cancel();
    }
    state.pool.shutdown();
    info!("cache manager stopped");
}

/// User-facing cache control: flush and trace.
#[derive(Debug, Clone)]
pub struct CacheControl {
    manager: CacheManager,
}

impl CacheControl {
    /// Control surface over a manager handle.
    #[must_use]
    pub const fn new(manager: CacheManager) -> Self {
        Self { manager }
    }

    /// Invalidate a region of the cell space.
    pub fn flush(&self, region: CacheRegion) -> Result<FlushOutcome> {
        self.manager.flush(region)
    }

    /// Emit a trace message through the log sink.
    pub fn trace(&self, message: &str) {
        info!(target: "starcache::cache_control", "{message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use starcache_predicate::ColumnPredicate;
    use starcache_segment::DatasetBuilder;
    use starcache_types::{
        CellKey, CellValue, ColumnDesc, MeasureExpr, RollupAggregator, Star,
    };

    fn test_star() -> Star {
        Star::new(
            StarId::new("sales", "schema-v1", "Sales", "sales_fact"),
            vec![ColumnDesc::plain("year", 10)],
        )
    }

    fn year_segment(star: &Star, year: i64, value: i64) -> Arc<SegmentWithData> {
        let measure = MeasureExpr::new("Unit Sales", "unit_sales", RollupAggregator::Sum);
        let header = SegmentHeader::new(
            star,
            &measure,
            vec![(0, ColumnPredicate::ValueEq(Datum::Int(year)))],
            &[],
        );
        let segment = Segment::from_header(Arc::new(header)).expect("shell");
        let mut builder = DatasetBuilder::new(vec![1]);
        builder.accumulate(CellKey::new([0]), CellValue::Int(value));
        Arc::new(SegmentWithData::from_dataset(segment, builder.build(0.5)).expect("hydrates"))
    }

    #[test]
    fn test_execute_runs_on_manager_thread_and_returns() {
        let manager = CacheManager::new(CacheConfig::default(), Vec::new());
        let count = manager.execute(|state| state.index.len()).expect("runs");
        assert_eq!(count, 0);
        manager.shutdown();
    }

    #[test]
    fn test_register_then_find_ready_segment() {
        let manager = CacheManager::new(CacheConfig::default(), Vec::new());
        let star = test_star();
        let segment = year_segment(&star, 1997, 42);
        manager
            .execute({
                let segment = Arc::clone(&segment);
                move |state| state.register_segment(&segment)
            })
            .expect("command runs")
            .expect("registration succeeds");

        let star_id = star.id().clone();
        let found = manager
            .execute(move |state| {
                let mut values = BTreeMap::new();
                values.insert(0, Datum::Int(1997));
                state
                    .find_ready_segment(
                        &star_id,
                        "sales_fact",
                        &BitKey::with_bits(1, [0]),
                        &values,
                        &[],
                        "Unit Sales",
                    )
                    .is_some()
            })
            .expect("command runs");
        assert!(found);
        manager.shutdown();
    }

    #[test]
    fn test_shutdown_is_idempotent_and_rejects_commands() {
        let manager = CacheManager::new(CacheConfig::default(), Vec::new());
        manager.shutdown();
        manager.shutdown();
        let err = manager.execute(|_| ()).expect_err("rejected after shutdown");
        assert_eq!(err, StarCacheError::Shutdown);
    }

    #[test]
    fn test_shutdown_cancels_pending_loads() {
        let manager = CacheManager::new(CacheConfig::default(), Vec::new());
        let star = test_star();
        let segment = year_segment(&star, 1997, 1);
        let future = SegmentFuture::new();
        manager
            .execute({
                let header = Arc::clone(segment.header());
                let future = future.clone();
                move |state| state.register_loading(header, future)
            })
            .expect("registers loading");
        manager.shutdown();
        assert!(matches!(future.get(), Err(StarCacheError::Cancelled)));
    }

    #[test]
    fn test_external_created_folds_into_index() {
        let manager = CacheManager::new(CacheConfig::default(), Vec::new());
        let star = test_star();
        let segment = year_segment(&star, 1998, 2);
        manager
            .external_segment_created((**segment.header()).clone())
            .expect("enqueues");
        // The fold becomes visible once its command has run; a subsequent
        // execute observes it because the queue is ordered.
        let len = manager.execute(|state| state.index.len()).expect("runs");
        assert_eq!(len, 1);
        manager.shutdown();
    }
}
