//! The in-memory cache worker.
//!
//! LRU-bounded residency with an observable byte budget. Eviction removes
//! a real entry and is a pure memory operation; the pool turns evictions
//! into `Deleted` events.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use starcache_segment::{SegmentBody, SegmentHeader};
use tracing::debug;

/// A resident segment body with its accounting.
#[derive(Debug, Clone)]
pub struct CachedSegment {
    pub header: Arc<SegmentHeader>,
    pub body: Arc<SegmentBody>,
    pub bytes: usize,
}

/// Entry-capped, byte-accounted in-memory tier.
#[derive(Debug)]
pub struct InMemoryWorker {
    cache: LruCache<u64, CachedSegment>,
    max_bytes: usize,
    total_bytes: usize,
    evictions: usize,
}

impl InMemoryWorker {
    /// Worker holding at most `max_entries` segments and roughly
    /// `max_bytes` of body data.
    #[must_use]
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries.max(1))
            .unwrap_or_else(|| NonZeroUsize::new(1).expect("1 is non-zero"));
        Self {
            cache: LruCache::new(capacity),
            max_bytes,
            total_bytes: 0,
            evictions: 0,
        }
    }

    /// Resident entry count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether nothing is resident.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Approximate resident body bytes.
    #[must_use]
    pub const fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Number of evictions so far.
    #[must_use]
    pub const fn evictions(&self) -> usize {
        self.evictions
    }

    /// Whether a body for `fingerprint` is resident.
    #[must_use]
    pub fn contains(&self, fingerprint: u64) -> bool {
        self.cache.contains(&fingerprint)
    }

    /// Fetch a resident body, promoting it to most recently used.
    pub fn get(&mut self, fingerprint: u64) -> Option<Arc<SegmentBody>> {
        self.cache.get(&fingerprint).map(|entry| Arc::clone(&entry.body))
    }

    /// Insert a body; returns every entry evicted to make room.
    pub fn put(&mut self, header: Arc<SegmentHeader>, body: Arc<SegmentBody>) -> Vec<CachedSegment> {
        let fingerprint = header.fingerprint();
        let bytes = body.approx_bytes();
        let entry = CachedSegment {
            header,
            body,
            bytes,
        };

        let mut evicted = Vec::new();
        if let Some(previous) = self.cache.push(fingerprint, entry) {
            if previous.0 == fingerprint {
                // Same key replaced: account, no eviction event.
                self.total_bytes = self.total_bytes.saturating_sub(previous.1.bytes);
            } else {
                self.total_bytes = self.total_bytes.saturating_sub(previous.1.bytes);
                self.evictions += 1;
                evicted.push(previous.1);
            }
        }
        self.total_bytes += bytes;

        while self.total_bytes > self.max_bytes && self.cache.len() > 1 {
            let Some((_, victim)) = self.cache.pop_lru() else {
                break;
            };
            self.total_bytes = self.total_bytes.saturating_sub(victim.bytes);
            self.evictions += 1;
            evicted.push(victim);
        }

        if !evicted.is_empty() {
            debug!(
                count = evicted.len(),
                resident = self.cache.len(),
                bytes = self.total_bytes,
                "in-memory worker evicted segments"
            );
        }
        evicted
    }

    /// Remove a resident body.
    pub fn remove(&mut self, fingerprint: u64) -> Option<CachedSegment> {
        let entry = self.cache.pop(&fingerprint)?;
        self.total_bytes = self.total_bytes.saturating_sub(entry.bytes);
        Some(entry)
    }

    /// Headers of resident segments, most recently used first.
    #[must_use]
    pub fn headers(&self) -> Vec<Arc<SegmentHeader>> {
        self.cache
            .iter()
            .map(|(_, entry)| Arc::clone(&entry.header))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use starcache_predicate::ColumnPredicate;
    use starcache_types::{ColumnDesc, Datum, MeasureExpr, RollupAggregator, Star, StarId};

    fn header_for_year(year: i64) -> Arc<SegmentHeader> {
        let star = Star::new(
            StarId::new("sales", "schema-v1", "Sales", "sales_fact"),
            vec![ColumnDesc::plain("year", 10)],
        );
        let measure = MeasureExpr::new("Unit Sales", "unit_sales", RollupAggregator::Sum);
        Arc::new(SegmentHeader::new(
            &star,
            &measure,
            vec![(0, ColumnPredicate::ValueEq(Datum::Int(year)))],
            &[],
        ))
    }

    fn body() -> Arc<SegmentBody> {
        Arc::new(SegmentBody {
            axis_keys: vec![vec![Datum::Int(1997)]],
            cells: starcache_segment::BodyCells::Sparse(vec![(
                starcache_types::CellKey::new([0]),
                starcache_types::CellValue::Int(1),
            )]),
        })
    }

    #[test]
    fn test_entry_cap_never_exceeded() {
        let mut worker = InMemoryWorker::new(2, usize::MAX);
        for year in 1990..2000 {
            let evicted = worker.put(header_for_year(year), body());
            assert!(worker.len() <= 2, "cap exceeded at year {year}");
            if year >= 1992 {
                assert_eq!(evicted.len(), 1, "each overflow evicts a real entry");
            }
        }
        assert_eq!(worker.evictions(), 8);
    }

    #[test]
    fn test_lru_order_evicts_least_recently_used() {
        let mut worker = InMemoryWorker::new(2, usize::MAX);
        let first = header_for_year(1997);
        let second = header_for_year(1998);
        worker.put(Arc::clone(&first), body());
        worker.put(Arc::clone(&second), body());

        // Touch first so second becomes the LRU victim.
        assert!(worker.get(first.fingerprint()).is_some());
        let evicted = worker.put(header_for_year(1999), body());
        assert_eq!(evicted.len(), 1);
        assert_eq!(
            evicted[0].header.fingerprint(),
            second.fingerprint(),
            "least recently used entry goes first"
        );
        assert!(worker.contains(first.fingerprint()));
    }

    #[test]
    fn test_byte_accounting_on_remove() {
        let mut worker = InMemoryWorker::new(10, usize::MAX);
        let header = header_for_year(1997);
        worker.put(Arc::clone(&header), body());
        assert!(worker.total_bytes() > 0);
        worker.remove(header.fingerprint());
        assert_eq!(worker.total_bytes(), 0);
        assert!(worker.is_empty());
    }

    #[test]
    fn test_replacing_same_fingerprint_is_not_an_eviction() {
        let mut worker = InMemoryWorker::new(2, usize::MAX);
        let header = header_for_year(1997);
        assert!(worker.put(Arc::clone(&header), body()).is_empty());
        assert!(worker.put(header, body()).is_empty());
        assert_eq!(worker.len(), 1);
        assert_eq!(worker.evictions(), 0);
    }
}
