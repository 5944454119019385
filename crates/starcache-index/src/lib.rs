//! In-process lookup of segment headers.
//!
//! The index maps every known segment to its header and locates headers
//! able to serve a request. All mutation serializes through the cache
//! manager thread; the index itself is a plain single-threaded structure.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use starcache_segment::SegmentHeader;
use starcache_types::{BitKey, Datum, StarId};
use tracing::debug;

/// Prefix under which headers are grouped for O(1) candidate lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PrefixKey {
    schema_name: String,
    schema_checksum: u64,
    cube_name: String,
    fact_table: String,
    constrained: BitKey,
}

impl PrefixKey {
    fn of(header: &SegmentHeader) -> Self {
        Self {
            schema_name: header.schema_name.clone(),
            schema_checksum: header.schema_checksum,
            cube_name: header.cube_name.clone(),
            fact_table: header.fact_table.clone(),
            constrained: header.constrained.clone(),
        }
    }

    fn of_request(star: &StarId, fact_table: &str, bitkey: &BitKey) -> Self {
        Self {
            schema_name: star.schema_name.clone(),
            schema_checksum: star.schema_checksum,
            cube_name: star.cube_name.clone(),
            fact_table: fact_table.to_owned(),
            constrained: bitkey.clone(),
        }
    }
}

/// Header index keyed by fingerprint, with a secondary prefix map.
#[derive(Debug, Default)]
pub struct SegmentIndex {
    by_fingerprint: HashMap<u64, Arc<SegmentHeader>>,
    by_prefix: HashMap<PrefixKey, Vec<u64>>,
}

impl SegmentIndex {
    /// Empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered headers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_fingerprint.len()
    }

    /// Whether no header is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_fingerprint.is_empty()
    }

    /// Register a header. Idempotent on fingerprint.
    pub fn register(&mut self, header: Arc<SegmentHeader>) {
        let fingerprint = header.fingerprint();
        if self.by_fingerprint.contains_key(&fingerprint) {
            return;
        }
        debug!(
            fingerprint,
            measure = %header.measure_name,
            axes = header.axis_count(),
            "register segment header"
        );
        self.by_prefix
            .entry(PrefixKey::of(&header))
            .or_default()
            .push(fingerprint);
        self.by_fingerprint.insert(fingerprint, header);
    }

    /// Remove a header by fingerprint. Returns the header if present.
    pub fn unregister(&mut self, fingerprint: u64) -> Option<Arc<SegmentHeader>> {
        let header = self.by_fingerprint.remove(&fingerprint)?;
        let prefix = PrefixKey::of(&header);
        if let Some(bucket) = self.by_prefix.get_mut(&prefix) {
            bucket.retain(|fp| *fp != fingerprint);
            if bucket.is_empty() {
                self.by_prefix.remove(&prefix);
            }
        }
        debug!(fingerprint, measure = %header.measure_name, "unregister segment header");
        Some(header)
    }

    /// Header by fingerprint.
    #[must_use]
    pub fn get(&self, fingerprint: u64) -> Option<&Arc<SegmentHeader>> {
        self.by_fingerprint.get(&fingerprint)
    }

    /// All registered headers, in unspecified order.
    pub fn headers(&self) -> impl Iterator<Item = &Arc<SegmentHeader>> {
        self.by_fingerprint.values()
    }

    /// Headers able to serve a cell request.
    ///
    /// A header qualifies when its `(star identity, fact alias, bit key)`
    /// prefix matches, every axis predicate accepts the mapped value on its
    /// column, no excluded region shadows those values, and its compound
    /// predicates are equivalent to the request's. The result is ordered
    /// deterministically: fewer axes first, then smaller predicate
    /// domains, then fingerprint.
    #[must_use]
    pub fn locate(
        &self,
        star: &StarId,
        fact_table: &str,
        bitkey: &BitKey,
        values: &BTreeMap<u32, Datum>,
        compound_keys: &[String],
        measure_name: &str,
    ) -> Vec<Arc<SegmentHeader>> {
        let prefix = PrefixKey::of_request(star, fact_table, bitkey);
        let Some(bucket) = self.by_prefix.get(&prefix) else {
            return Vec::new();
        };
        let mut matches: Vec<(usize, u64, u64, Arc<SegmentHeader>)> = bucket
            .iter()
            .filter_map(|fp| self.by_fingerprint.get(fp).map(|h| (*fp, Arc::clone(h))))
            .filter(|(_, header)| {
                header.measure_name == measure_name
                    && header.compound_equivalent(compound_keys)
                    && header.can_serve(values)
            })
            .map(|(fp, header)| (header.axis_count(), header.domain_size(), fp, header))
            .collect();
        matches.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));
        matches.into_iter().map(|(_, _, _, header)| header).collect()
    }
}
