//! Output Merger (C8): unions the three stages' feature rows, dedups by
//! feature id (relation > way > node precedence), pivots tags to the
//! configured shape, optionally Hilbert-sorts, and writes the final file.

use std::collections::HashSet;
use std::path::Path;

use geo::{BoundingRect, Centroid};

use crate::config::{CompiledFilterDocument, ConvertOptions};
use crate::error::Result;
use crate::sinks::geoparquet::GeoParquetSink;
use crate::sinks::hilbert::{hilbert_index, normalize};
use crate::sinks::FeatureRow;

#[derive(Clone, Debug)]
pub enum TagSchema {
    Compact,
    Exploded(Vec<String>),
}

impl TagSchema {
    pub fn from_filter_document(doc: &CompiledFilterDocument) -> Self {
        if !doc.exploded {
            return TagSchema::Compact;
        }
        TagSchema::Exploded(doc.projection_keys())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MergeSummary {
    pub rows_written: u64,
    pub duplicates_dropped: u64,
}

/// Dedups by feature_id (first occurrence wins, rows pre-sorted by stage
/// precedence by the caller), optionally orders by Hilbert index of the
/// geometry centroid, and writes the result via [`GeoParquetSink`].
pub fn write_merged(
    mut rows: Vec<FeatureRow>,
    options: &ConvertOptions,
    filter_doc: &CompiledFilterDocument,
    output_path: &Path,
) -> Result<MergeSummary> {
    rows.sort_by(|a, b| a.kind.cmp(&b.kind));

    let mut seen = HashSet::new();
    let mut duplicates_dropped = 0u64;
    rows.retain(|row| {
        if seen.insert(row.feature_id.clone()) {
            true
        } else {
            duplicates_dropped += 1;
            false
        }
    });

    if options.hilbert_sort {
        sort_by_hilbert(&mut rows);
    } else {
        rows.sort_by(|a, b| a.feature_id.cmp(&b.feature_id));
    }

    let exploded = filter_doc.exploded;
    let tag_schema = TagSchema::from_filter_document(filter_doc);
    let mut sink = GeoParquetSink::new(output_path, tag_schema, options.compression, options.row_group_size)?;
    for row in &rows {
        if exploded {
            let projected = filter_doc.exploded_row(&row.tags);
            sink.add_feature(&row.feature_id, &row.geometry, &projected)?;
        } else {
            sink.add_feature(&row.feature_id, &row.geometry, &row.tags)?;
        }
    }
    sink.finish()?;

    Ok(MergeSummary {
        rows_written: rows.len() as u64,
        duplicates_dropped,
    })
}

fn sort_by_hilbert(rows: &mut [FeatureRow]) {
    let Some(bbox) = overall_bbox(rows) else {
        return;
    };
    let mut keyed: Vec<(u64, usize)> = rows
        .iter()
        .enumerate()
        .map(|(idx, row)| {
            let centroid = row.geometry.centroid().unwrap_or_else(|| geo::Point::new(bbox.min().x, bbox.min().y));
            let x = normalize(centroid.x(), bbox.min().x, bbox.max().x);
            let y = normalize(centroid.y(), bbox.min().y, bbox.max().y);
            (hilbert_index(x, y), idx)
        })
        .collect();
    keyed.sort_by_key(|(idx, _)| *idx);
    keyed.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let reordered: Vec<FeatureRow> = keyed.into_iter().map(|(_, idx)| rows[idx].clone()).collect();
    rows.clone_from_slice(&reordered);
}

fn overall_bbox(rows: &[FeatureRow]) -> Option<geo::Rect<f64>> {
    rows.iter().filter_map(|row| row.geometry.bounding_rect()).fold(None, |acc, rect| {
        Some(match acc {
            None => rect,
            Some(existing) => {
                let min_x = existing.min().x.min(rect.min().x);
                let min_y = existing.min().y.min(rect.min().y);
                let max_x = existing.max().x.max(rect.max().x);
                let max_y = existing.max().y.max(rect.max().y);
                geo::Rect::new(
                    geo::Coord { x: min_x, y: min_y },
                    geo::Coord { x: max_x, y: max_y },
                )
            }
        })
    })
}
