//! Feature currency shared between pipeline stages and the Output Merger
//! (C8). Each pipeline stage (C3/C4/C5) emits its own `Vec<FeatureRow>`
//! independently; the merger dedups by feature id, pivots tags to the
//! configured shape, optionally Hilbert-sorts, and writes the final
//! GeoParquet file via `GeoParquetSink`.

mod hilbert;
mod merge;
pub mod geoparquet;

pub use geoparquet::GeoParquetSink;
pub use merge::{write_merged, MergeSummary, TagSchema};

use geo::Geometry;

use crate::filter::TagMap;

/// Precedence order for feature_id collisions, per spec.md §4.8.2: a
/// relation's assembled geometry wins over its constituent ways, which win
/// over bare support nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum FeatureKind {
    Relation,
    Way,
    Node,
}

#[derive(Clone, Debug)]
pub struct FeatureRow {
    pub feature_id: String,
    pub kind: FeatureKind,
    pub geometry: Geometry<f64>,
    pub tags: TagMap,
}
