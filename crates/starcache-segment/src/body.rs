//! Segment body wire format and the interchange codec.
//!
//! Headers and bodies cross process boundaries through the external cache
//! SPI, so both serialize through a stable JSON codec. Bit positions inside
//! a serialized `BitKey` derive from schema column order, which keeps the
//! format comparable across runs. The round-trip helpers are the explicit
//! mechanism for detecting schema drift in a body format: a `put` whose
//! payload does not survive encode/decode fails with `NotSerializable`.

use serde::{Deserialize, Serialize};
use starcache_error::{Result, StarCacheError};
use starcache_types::{CellKey, CellValue, Datum};

use crate::axis::SegmentAxis;
use crate::dataset::SegmentDataset;
use crate::header::SegmentHeader;

/// Cell payload of a body: dense value array or sparse pairs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BodyCells {
    Dense(Vec<Option<CellValue>>),
    Sparse(Vec<(CellKey, CellValue)>),
}

impl BodyCells {
    /// Expand into `(key, value)` pairs, validating dense lengths.
    pub fn into_cells(self, shape: &[usize]) -> Result<Vec<(CellKey, CellValue)>> {
        match self {
            Self::Dense(values) => {
                let capacity: usize = shape.iter().product();
                if values.len() != capacity {
                    return Err(StarCacheError::corrupted(format!(
                        "dense body has {} slots, axes imply {capacity}",
                        values.len()
                    )));
                }
                Ok(values
                    .into_iter()
                    .enumerate()
                    .filter_map(|(index, value)| {
                        value.map(|v| (unpack(shape, index), v))
                    })
                    .collect())
            }
            Self::Sparse(pairs) => Ok(pairs),
        }
    }
}

fn unpack(shape: &[usize], mut index: usize) -> CellKey {
    let mut ordinals = vec![0_u32; shape.len()];
    for (axis, &extent) in shape.iter().enumerate().rev() {
        ordinals[axis] = (index % extent) as u32;
        index /= extent;
    }
    CellKey::new(ordinals)
}

/// Interchange form of a segment's data: axis key arrays plus cells.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentBody {
    pub axis_keys: Vec<Vec<Datum>>,
    pub cells: BodyCells,
}

impl SegmentBody {
    /// Capture a body from axes and a dataset.
    #[must_use]
    pub fn from_dataset(axes: &[SegmentAxis], data: &SegmentDataset) -> Self {
        let axis_keys = axes.iter().map(|axis| axis.keys().to_vec()).collect();
        let cells = match data {
            SegmentDataset::Dense { cells, .. } => BodyCells::Dense(cells.clone()),
            SegmentDataset::Sparse { cells, .. } => BodyCells::Sparse(
                cells
                    .iter()
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect(),
            ),
        };
        Self { axis_keys, cells }
    }

    /// Rough in-memory footprint, used for the worker byte budget.
    #[must_use]
    pub fn approx_bytes(&self) -> usize {
        let key_bytes: usize = self
            .axis_keys
            .iter()
            .flat_map(|keys| keys.iter())
            .map(datum_bytes)
            .sum();
        let cell_bytes = match &self.cells {
            BodyCells::Dense(values) => values.len() * 24,
            BodyCells::Sparse(pairs) => pairs.iter().map(|(k, _)| 24 + 4 * k.len()).sum(),
        };
        key_bytes + cell_bytes
    }
}

fn datum_bytes(value: &Datum) -> usize {
    match value {
        Datum::Int(_) | Datum::Double(_) => 16,
        Datum::Str(s) => 24 + s.len(),
    }
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Serialize a header for interchange.
pub fn encode_header(header: &SegmentHeader) -> Result<Vec<u8>> {
    serde_json::to_vec(header).map_err(|e| StarCacheError::NotSerializable(e.to_string()))
}

/// Deserialize a header.
pub fn decode_header(bytes: &[u8]) -> Result<SegmentHeader> {
    serde_json::from_slice(bytes).map_err(|e| StarCacheError::NotSerializable(e.to_string()))
}

/// Serialize a body for interchange.
pub fn encode_body(body: &SegmentBody) -> Result<Vec<u8>> {
    serde_json::to_vec(body).map_err(|e| StarCacheError::NotSerializable(e.to_string()))
}

/// Deserialize a body.
pub fn decode_body(bytes: &[u8]) -> Result<SegmentBody> {
    serde_json::from_slice(bytes).map_err(|e| StarCacheError::NotSerializable(e.to_string()))
}

/// Verify a header survives the codec unchanged.
pub fn round_trip_header(header: &SegmentHeader) -> Result<()> {
    let decoded = decode_header(&encode_header(header)?)?;
    if decoded == *header {
        Ok(())
    } else {
        Err(StarCacheError::NotSerializable(
            "header did not survive serialization round-trip".to_owned(),
        ))
    }
}

/// Verify a body survives the codec unchanged.
pub fn round_trip_body(body: &SegmentBody) -> Result<()> {
    let decoded = decode_body(&encode_body(body)?)?;
    if decoded == *body {
        Ok(())
    } else {
        Err(StarCacheError::NotSerializable(
            "body did not survive serialization round-trip".to_owned(),
        ))
    }
}
