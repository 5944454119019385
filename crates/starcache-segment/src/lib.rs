//! Immutable multi-axis cell arrays and their interchange format.
//!
//! A [`Segment`] is the shell: header plus axes. [`SegmentWithData`] adds a
//! dataset mapping [`CellKey`] coordinates to measure values, stored dense
//! or sparse per segment. Segments are never mutated after registration;
//! flush produces new segments instead.
//!
//! [`CellKey`]: starcache_types::CellKey

pub mod axis;
pub mod body;
pub mod dataset;
pub mod header;
pub mod segment;

pub use axis::SegmentAxis;
pub use body::{
    BodyCells, SegmentBody, decode_body, decode_header, encode_body, encode_header,
    round_trip_body, round_trip_header,
};
pub use dataset::{DatasetBuilder, SegmentDataset};
pub use header::{ConstrainedColumn, ExcludedRegion, SegmentHeader};
pub use segment::{Segment, SegmentWithData};
