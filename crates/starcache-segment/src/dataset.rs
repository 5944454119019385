//! Dense and sparse cell storage.
//!
//! The representation is chosen per segment at hydration time: dense when
//! the populated-cell density reaches the configured threshold, sparse
//! otherwise. Both forms answer the same interrogations and iterate cells
//! in the same deterministic order.

use std::collections::BTreeMap;

use starcache_types::{CellKey, CellValue};

/// Cell storage for one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentDataset {
    /// Row-major array over the full axis cross product.
    Dense {
        shape: Vec<usize>,
        cells: Vec<Option<CellValue>>,
    },
    /// Map keyed by packed cell coordinates.
    Sparse {
        shape: Vec<usize>,
        cells: BTreeMap<CellKey, CellValue>,
    },
}

impl SegmentDataset {
    /// Axis lengths.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        match self {
            Self::Dense { shape, .. } | Self::Sparse { shape, .. } => shape,
        }
    }

    /// Full cross-product capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shape().iter().product()
    }

    /// Number of populated cells.
    #[must_use]
    pub fn populated(&self) -> usize {
        match self {
            Self::Dense { cells, .. } => cells.iter().filter(|c| c.is_some()).count(),
            Self::Sparse { cells, .. } => cells.len(),
        }
    }

    /// Value at a cell key, if populated.
    #[must_use]
    pub fn get(&self, key: &CellKey) -> Option<&CellValue> {
        match self {
            Self::Dense { shape, cells } => {
                let index = pack_index(shape, key)?;
                cells.get(index).and_then(Option::as_ref)
            }
            Self::Sparse { cells, .. } => cells.get(key),
        }
    }

    /// Whether a cell is populated.
    #[must_use]
    pub fn exists(&self, key: &CellKey) -> bool {
        self.get(key).is_some()
    }

    /// Populated cells in ascending key order.
    pub fn iter(&self) -> Box<dyn Iterator<Item = (CellKey, &CellValue)> + '_> {
        match self {
            Self::Dense { shape, cells } => Box::new(
                cells
                    .iter()
                    .enumerate()
                    .filter_map(|(index, cell)| {
                        cell.as_ref().map(|value| (unpack_index(shape, index), value))
                    }),
            ),
            Self::Sparse { cells, .. } => {
                Box::new(cells.iter().map(|(key, value)| (key.clone(), value)))
            }
        }
    }
}

/// Row-major linear index of a cell key; `None` when out of bounds.
fn pack_index(shape: &[usize], key: &CellKey) -> Option<usize> {
    if key.len() != shape.len() {
        return None;
    }
    let mut index = 0_usize;
    for (axis, &extent) in shape.iter().enumerate() {
        let ordinal = key.ordinal(axis) as usize;
        if ordinal >= extent {
            return None;
        }
        index = index * extent + ordinal;
    }
    Some(index)
}

/// Inverse of [`pack_index`].
fn unpack_index(shape: &[usize], mut index: usize) -> CellKey {
    let mut ordinals = vec![0_u32; shape.len()];
    for (axis, &extent) in shape.iter().enumerate().rev() {
        ordinals[axis] = (index % extent) as u32;
        index /= extent;
    }
    CellKey::new(ordinals)
}

/// Accumulates cells before the dense/sparse decision.
#[derive(Debug)]
pub struct DatasetBuilder {
    shape: Vec<usize>,
    cells: BTreeMap<CellKey, CellValue>,
}

impl DatasetBuilder {
    /// Builder for the given axis lengths.
    #[must_use]
    pub fn new(shape: Vec<usize>) -> Self {
        Self {
            shape,
            cells: BTreeMap::new(),
        }
    }

    /// Add a cell value, widening-summing with any value already present.
    pub fn accumulate(&mut self, key: CellKey, value: CellValue) {
        match self.cells.entry(key) {
            std::collections::btree_map::Entry::Vacant(entry) => {
                entry.insert(value);
            }
            std::collections::btree_map::Entry::Occupied(mut entry) => {
                let sum = entry.get().widen_add(&value);
                entry.insert(sum);
            }
        }
    }

    /// Number of accumulated cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether nothing has been accumulated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Choose the representation: dense when density reaches `threshold`.
    #[must_use]
    pub fn build(self, threshold: f64) -> SegmentDataset {
        let capacity: usize = self.shape.iter().product();
        let density = if capacity == 0 {
            0.0
        } else {
            self.cells.len() as f64 / capacity as f64
        };
        if density >= threshold && capacity > 0 {
            let mut cells = vec![None; capacity];
            for (key, value) in self.cells {
                if let Some(index) = pack_index(&self.shape, &key) {
                    cells[index] = Some(value);
                }
            }
            SegmentDataset::Dense {
                shape: self.shape,
                cells,
            }
        } else {
            SegmentDataset::Sparse {
                shape: self.shape,
                cells: self.cells,
            }
        }
    }
}
