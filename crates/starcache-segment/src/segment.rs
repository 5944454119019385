//! Segment shells and hydrated segments.

use std::collections::BTreeMap;
use std::sync::Arc;

use starcache_error::{Result, StarCacheError};
use starcache_predicate::ColumnPredicate;
use starcache_types::{CellKey, CellValue, Datum};

use crate::axis::SegmentAxis;
use crate::body::SegmentBody;
use crate::dataset::{DatasetBuilder, SegmentDataset};
use crate::header::{ExcludedRegion, SegmentHeader};

/// A segment without data: header plus axes.
#[derive(Debug, Clone)]
pub struct Segment {
    header: Arc<SegmentHeader>,
    axes: Vec<SegmentAxis>,
}

impl Segment {
    /// Build a segment from a header and matching axes.
    pub fn new(header: Arc<SegmentHeader>, axes: Vec<SegmentAxis>) -> Result<Self> {
        if header.columns.len() != axes.len() {
            return Err(StarCacheError::corrupted(format!(
                "header constrains {} columns but {} axes were supplied",
                header.columns.len(),
                axes.len()
            )));
        }
        for (column, axis) in header.columns.iter().zip(axes.iter()) {
            if column.bit != axis.bit {
                return Err(StarCacheError::corrupted(format!(
                    "axis bit {} does not match header column bit {}",
                    axis.bit, column.bit
                )));
            }
        }
        Ok(Self { header, axes })
    }

    /// Reconstruct a segment shell from a header alone.
    ///
    /// Axis keys come from the header's predicate summaries, so every
    /// summary must be enumerable; a header captured at load time always
    /// is.
    pub fn from_header(header: Arc<SegmentHeader>) -> Result<Self> {
        let axes = header
            .columns
            .iter()
            .map(|column| {
                let keys = column.predicate.enumerated().ok_or_else(|| {
                    StarCacheError::corrupted(format!(
                        "column {} of header has a non-enumerable predicate summary",
                        column.name
                    ))
                })?;
                Ok(SegmentAxis::new(
                    &column.name,
                    column.bit,
                    column.predicate.clone(),
                    keys,
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(header, axes)
    }

    /// The header.
    #[must_use]
    pub fn header(&self) -> &Arc<SegmentHeader> {
        &self.header
    }

    /// The axes, in header column order.
    #[must_use]
    pub fn axes(&self) -> &[SegmentAxis] {
        &self.axes
    }

    /// Axis lengths.
    #[must_use]
    pub fn shape(&self) -> Vec<usize> {
        self.axes.iter().map(SegmentAxis::len).collect()
    }

    /// Map coordinates (bit → value) to a cell key; `None` when any value
    /// is outside its axis.
    #[must_use]
    pub fn cell_key(&self, values: &BTreeMap<u32, Datum>) -> Option<CellKey> {
        self.axes
            .iter()
            .map(|axis| values.get(&axis.bit).and_then(|v| axis.ordinal_of(v)))
            .collect::<Option<CellKey>>()
    }

    /// Inverse of [`cell_key`]: coordinates of a stored cell key.
    ///
    /// [`cell_key`]: Segment::cell_key
    #[must_use]
    pub fn coordinates(&self, key: &CellKey) -> Option<BTreeMap<u32, Datum>> {
        if key.len() != self.axes.len() {
            return None;
        }
        let mut values = BTreeMap::new();
        for (axis_idx, axis) in self.axes.iter().enumerate() {
            let value = axis.key_at(key.ordinal(axis_idx))?;
            values.insert(axis.bit, value.clone());
        }
        Some(values)
    }
}

/// A segment with its dataset attached.
#[derive(Debug, Clone)]
pub struct SegmentWithData {
    segment: Segment,
    data: SegmentDataset,
}

impl SegmentWithData {
    /// Attach a body to a segment shell, verifying axis/key consistency.
    ///
    /// Verification covers: axis count and key arrays agree with the
    /// shell, every populated cell is inside the cross product, each axis
    /// predicate accepts the cell's coordinate, and no excluded region
    /// matches it.
    pub fn add_data(segment: Segment, body: SegmentBody, density_threshold: f64) -> Result<Self> {
        if body.axis_keys.len() != segment.axes().len() {
            return Err(StarCacheError::corrupted(format!(
                "body has {} axes, segment has {}",
                body.axis_keys.len(),
                segment.axes().len()
            )));
        }
        for (axis, keys) in segment.axes().iter().zip(body.axis_keys.iter()) {
            if axis.keys() != keys.as_slice() {
                return Err(StarCacheError::corrupted(format!(
                    "axis {} key array does not match segment shell",
                    axis.name
                )));
            }
        }

        let shape = segment.shape();
        let mut builder = DatasetBuilder::new(shape.clone());
        for (key, value) in body.cells.into_cells(&shape)? {
            builder.accumulate(key, value);
        }
        let data = builder.build(density_threshold);
        let hydrated = Self { segment, data };
        hydrated.verify_cells()?;
        Ok(hydrated)
    }

    /// Wrap an already-built dataset. Used by the loader, which constructs
    /// datasets directly from streamed rows.
    pub fn from_dataset(segment: Segment, data: SegmentDataset) -> Result<Self> {
        if data.shape() != segment.shape().as_slice() {
            return Err(StarCacheError::corrupted(
                "dataset shape does not match segment axes",
            ));
        }
        let hydrated = Self { segment, data };
        hydrated.verify_cells()?;
        Ok(hydrated)
    }

    fn verify_cells(&self) -> Result<()> {
        if self.data.populated() > self.data.capacity() {
            return Err(StarCacheError::corrupted(
                "populated cell count exceeds axis cross product",
            ));
        }
        for (key, _) in self.data.iter() {
            let values = self.segment.coordinates(&key).ok_or_else(|| {
                StarCacheError::corrupted(format!("cell {key:?} outside axis key arrays"))
            })?;
            for axis in self.segment.axes() {
                let value = &values[&axis.bit];
                if !axis.predicate.evaluate(value) {
                    return Err(StarCacheError::corrupted(format!(
                        "cell value {value} rejected by axis {} predicate",
                        axis.name
                    )));
                }
            }
            if self
                .segment
                .header()
                .excluded_regions
                .iter()
                .any(|region| region.shadows(&values))
            {
                return Err(StarCacheError::corrupted(
                    "populated cell falls inside an excluded region",
                ));
            }
        }
        Ok(())
    }

    /// The shell.
    #[must_use]
    pub const fn segment(&self) -> &Segment {
        &self.segment
    }

    /// The header.
    #[must_use]
    pub fn header(&self) -> &Arc<SegmentHeader> {
        self.segment.header()
    }

    /// The dataset.
    #[must_use]
    pub const fn data(&self) -> &SegmentDataset {
        &self.data
    }

    /// Value at coordinates (bit → value); `None` for absent cells or
    /// coordinates outside the axes.
    #[must_use]
    pub fn get(&self, values: &BTreeMap<u32, Datum>) -> Option<&CellValue> {
        let key = self.segment.cell_key(values)?;
        self.data.get(&key)
    }

    /// Whether the cell at `key` is populated.
    #[must_use]
    pub fn exists(&self, key: &CellKey) -> bool {
        self.data.exists(key)
    }

    /// Extract the interchange body.
    #[must_use]
    pub fn to_body(&self) -> SegmentBody {
        SegmentBody::from_dataset(self.segment.axes(), &self.data)
    }

    /// Build the sub-segment that survives a flush.
    ///
    /// `keep` holds one mask per axis marking the keys that stay.
    /// `best_bit`'s axis takes `best_predicate` in the new header; the
    /// flush region arrives as `excluded`, appended if not already present.
    pub fn create_sub_segment(
        &self,
        keep: &[Vec<bool>],
        best_bit: u32,
        best_predicate: ColumnPredicate,
        excluded: ExcludedRegion,
        density_threshold: f64,
    ) -> Result<Self> {
        if keep.len() != self.segment.axes().len() {
            return Err(StarCacheError::internal(
                "keep mask count does not match axis count",
            ));
        }

        // Remap each axis to its surviving keys.
        let mut new_axes = Vec::with_capacity(self.segment.axes().len());
        let mut remap: Vec<Vec<Option<u32>>> = Vec::with_capacity(keep.len());
        for (axis, mask) in self.segment.axes().iter().zip(keep.iter()) {
            if mask.len() != axis.len() {
                return Err(StarCacheError::internal(format!(
                    "keep mask length {} does not match axis {} key count {}",
                    mask.len(),
                    axis.name,
                    axis.len()
                )));
            }
            let mut kept_keys = Vec::new();
            let mut axis_remap = vec![None; axis.len()];
            for (ordinal, keep_key) in mask.iter().enumerate() {
                if *keep_key {
                    axis_remap[ordinal] = Some(kept_keys.len() as u32);
                    kept_keys.push(axis.keys()[ordinal].clone());
                }
            }
            let predicate = if axis.bit == best_bit {
                best_predicate.clone()
            } else {
                axis.predicate.clone()
            };
            new_axes.push(SegmentAxis::new(&axis.name, axis.bit, predicate, kept_keys));
            remap.push(axis_remap);
        }

        let mut header = (**self.segment.header()).clone();
        for column in &mut header.columns {
            if column.bit == best_bit {
                column.predicate = best_predicate.clone();
            }
        }
        if !header.excluded_regions.contains(&excluded) {
            header.excluded_regions.push(excluded);
        }

        let shape: Vec<usize> = new_axes.iter().map(SegmentAxis::len).collect();
        let mut builder = DatasetBuilder::new(shape);
        'cells: for (key, value) in self.data.iter() {
            let mut ordinals = Vec::with_capacity(key.len());
            for (axis_idx, axis_remap) in remap.iter().enumerate() {
                match axis_remap[key.ordinal(axis_idx) as usize] {
                    Some(new_ordinal) => ordinals.push(new_ordinal),
                    None => continue 'cells,
                }
            }
            // Axis masks remove whole hyperplanes; a multi-column flush can
            // shadow single cells whose keys all survive. Those must go too.
            if let Some(coords) = self.segment.coordinates(&key) {
                if header.excluded_regions.iter().any(|r| r.shadows(&coords)) {
                    continue;
                }
            }
            builder.accumulate(CellKey::new(ordinals), value.clone());
        }
        let data = builder.build(density_threshold);

        let segment = Segment::new(Arc::new(header), new_axes)?;
        Self::from_dataset(segment, data)
    }
}
