//! Region-precise invalidation with axis tightening.
//!
//! For every known segment, the flush either leaves it untouched, replaces
//! it with a tightened sub-segment, or discards it. After a flush no cached
//! segment may return a value for any cell the region covers; the excluded
//! region carried by sub-segments guarantees that for coordinates the axis
//! arithmetic alone cannot remove.

use std::sync::Arc;

use starcache_segment::{ExcludedRegion, Segment, SegmentHeader, SegmentWithData};
use tracing::{debug, info, warn};

use crate::manager::ManagerState;
use crate::region::CacheRegion;

/// What a flush did, per segment category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    /// Segments removed outright.
    pub discarded: usize,
    /// Segments replaced by a tightened sub-segment.
    pub tightened: usize,
    /// Segments the region provably cannot touch.
    pub untouched: usize,
}

/// Run a flush against everything the index knows. Executes on the cache
/// manager thread.
pub fn flush_region(state: &mut ManagerState, region: &CacheRegion) -> FlushOutcome {
    let mut outcome = FlushOutcome::default();
    let headers: Vec<Arc<SegmentHeader>> = state.index.headers().map(Arc::clone).collect();
    let density_threshold = state.config.density_threshold;

    for header in headers {
        // A segment constraining none of the flushed columns rolls up over
        // all of them, so flushed facts contribute to every one of its
        // cells. It cannot be tightened, only dropped.
        if !header.constrained.intersects(region.bitkey()) {
            drop_segment(state, &header);
            outcome.discarded += 1;
            continue;
        }

        let Some(body) = state.pool.get(&header) else {
            // No body anywhere means the segment cannot be rebuilt into a
            // sub-segment; the header must not survive the flush.
            drop_segment(state, &header);
            outcome.discarded += 1;
            continue;
        };
        let rebuilt = Segment::from_header(Arc::clone(&header)).and_then(|shell| {
            SegmentWithData::add_data(shell, (*body).clone(), density_threshold)
        });
        let segment = match rebuilt {
            Ok(segment) => segment,
            Err(err) => {
                warn!(%err, "segment failed rehydration during flush, discarding");
                drop_segment(state, &header);
                outcome.discarded += 1;
                continue;
            }
        };

        match flush_one(state, &segment, region, density_threshold) {
            SegmentFate::Untouched => outcome.untouched += 1,
            SegmentFate::Discarded => {
                drop_segment(state, &header);
                outcome.discarded += 1;
            }
            SegmentFate::Tightened(sub) => {
                drop_segment(state, &header);
                match state.register_segment(&Arc::new(sub)) {
                    Ok(()) => outcome.tightened += 1,
                    Err(err) => {
                        warn!(%err, "sub-segment registration failed, cells stay flushed");
                        outcome.discarded += 1;
                    }
                }
            }
        }
    }

    info!(
        discarded = outcome.discarded,
        tightened = outcome.tightened,
        untouched = outcome.untouched,
        "cache flush complete"
    );
    outcome
}

enum SegmentFate {
    Untouched,
    Discarded,
    Tightened(SegmentWithData),
}

/// Remove a segment from the index and every cache tier.
fn drop_segment(state: &mut ManagerState, header: &Arc<SegmentHeader>) {
    state.index.unregister(header.fingerprint());
    state.pool.remove(header);
}

fn flush_one(
    _state: &ManagerState,
    segment: &SegmentWithData,
    region: &CacheRegion,
    density_threshold: f64,
) -> SegmentFate {
    let axes = segment.segment().axes();

    // Per-axis keep masks from the per-column flush predicates.
    let mut keep: Vec<Vec<bool>> = Vec::with_capacity(axes.len());
    for axis in axes {
        match region.column_predicate(axis.bit) {
            None => keep.push(vec![true; axis.len()]),
            Some(flush_predicate) => {
                if !flush_predicate.might_intersect(&axis.predicate) {
                    // The flush provably misses this segment entirely.
                    return SegmentFate::Untouched;
                }
                keep.push(
                    axis.keys()
                        .iter()
                        .map(|key| !flush_predicate.evaluate(key))
                        .collect(),
                );
            }
        }
    }

    // Multi-column predicates: a key survives only while some populated
    // cell bearing it survives the predicate.
    for compound in region.multi() {
        let pruned = prune_masks(segment, compound);
        for (mask, pruner_mask) in keep.iter_mut().zip(pruned) {
            for (kept, pruner_kept) in mask.iter_mut().zip(pruner_mask) {
                *kept = *kept && pruner_kept;
            }
        }
    }

    // Retention per axis; zero retention anywhere discards the segment.
    // The best column is the touched axis keeping the largest share of its
    // keys: excising there removes the least collateral.
    let mut best: Option<(usize, f64)> = None;
    for (axis_idx, mask) in keep.iter().enumerate() {
        let kept = mask.iter().filter(|k| **k).count();
        if kept == 0 {
            return SegmentFate::Discarded;
        }
        if kept == mask.len() {
            continue;
        }
        let ratio = kept as f64 / mask.len().max(1) as f64;
        if best.is_none_or(|(_, best_ratio)| ratio > best_ratio) {
            best = Some((axis_idx, ratio));
        }
    }

    // Estimated surviving population; below one cell there is nothing
    // worth keeping.
    let kept_product: f64 = keep
        .iter()
        .map(|mask| mask.iter().filter(|k| **k).count() as f64)
        .product();
    let estimate = kept_product * 0.5_f64.powi(region.multi().len() as i32);
    if estimate < 1.0 {
        return SegmentFate::Discarded;
    }

    // Physical excision happens along the best column only; the excluded
    // region keeps lookups honest for coordinates on the other axes. The
    // header predicate summary of every other axis therefore still matches
    // its key array.
    let best_idx = best.map_or(0, |(idx, _)| idx);
    let best_axis = &axes[best_idx];
    let mut applied: Vec<Vec<bool>> = keep
        .iter()
        .map(|mask| vec![true; mask.len()])
        .collect();
    if best.is_some() {
        applied[best_idx].clone_from(&keep[best_idx]);
    }
    let tightened_predicate = if best.is_some() {
        let base = region.column_predicate(best_axis.bit).map_or_else(
            || best_axis.predicate.clone(),
            |flush_predicate| best_axis.predicate.minus(flush_predicate),
        );
        // The pruner may have removed keys the per-column minus kept;
        // intersect so the summary matches the surviving key array exactly.
        let surviving = best_axis
            .keys()
            .iter()
            .zip(keep[best_idx].iter())
            .filter_map(|(key, kept)| kept.then(|| key.clone()));
        base.and(starcache_predicate::ColumnPredicate::values(surviving))
    } else {
        best_axis.predicate.clone()
    };
    debug!(
        axis = %best_axis.name,
        estimate,
        "tightening segment around best-retention axis"
    );

    match segment.create_sub_segment(
        &applied,
        best_axis.bit,
        tightened_predicate,
        region.to_excluded_region(),
        density_threshold,
    ) {
        Ok(sub) => SegmentFate::Tightened(sub),
        Err(err) => {
            warn!(%err, "sub-segment construction failed, discarding segment");
            SegmentFate::Discarded
        }
    }
}

/// Per-axis keep masks for one multi-column flush predicate: a key stays
/// while at least one populated cell bearing it escapes the predicate.
fn prune_masks(
    segment: &SegmentWithData,
    compound: &starcache_predicate::CompoundPredicate,
) -> Vec<Vec<bool>> {
    let axes = segment.segment().axes();
    let mut keep: Vec<Vec<bool>> = axes.iter().map(|axis| vec![false; axis.len()]).collect();
    let probe = ExcludedRegion {
        bitkey: compound.bitkey().clone(),
        columns: Vec::new(),
        multi: vec![compound.clone()],
    };
    for (key, _) in segment.data().iter() {
        let Some(coords) = segment.segment().coordinates(&key) else {
            continue;
        };
        if !probe.shadows(&coords) {
            for (axis_idx, mask) in keep.iter_mut().enumerate() {
                mask[key.ordinal(axis_idx) as usize] = true;
            }
        }
    }
    keep
}
