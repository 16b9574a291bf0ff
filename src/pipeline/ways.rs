//! Way Stage (C4): joins way refs against the node store, classifies each
//! closed way as polygon or linestring per the polygon policy (§4.4), and
//! emits both the feature rows that pass geometry/tag filters and the
//! linestring lookup the Relation Stage needs for ring assembly.

use std::collections::HashMap;

use geo::{BoundingRect, Coord, Geometry, LineString, Polygon};

use crate::config::{ClosedWayShape, CompiledFilterDocument, CompiledPolygonPolicy};
use crate::error::Result;
use crate::geometry::{repair_polygon, GeometryPredicate};
use crate::osm::OsmSource;
use crate::sinks::{FeatureKind, FeatureRow};
use crate::storage::NodeStoreReader;

#[derive(Debug, Default, Clone, Copy)]
pub struct WayStageCounters {
    pub considered: u64,
    pub dropped_unresolved_ref: u64,
    pub dropped_too_short: u64,
    pub dropped_invalid_geometry: u64,
}

pub struct WayStageOutput {
    pub feature_rows: Vec<FeatureRow>,
    pub way_linestrings: HashMap<i64, LineString<f64>>,
    pub counters: WayStageCounters,
}

fn intersects(pred: &GeometryPredicate, geometry: &Geometry<f64>) -> bool {
    match geometry.bounding_rect() {
        Some(bbox) => pred.intersects_bbox(bbox),
        None => false,
    }
}

pub fn run(
    source: &dyn OsmSource,
    filter_doc: &CompiledFilterDocument,
    geometry_predicate: Option<&GeometryPredicate>,
    polygon_policy: &CompiledPolygonPolicy,
    node_store: &NodeStoreReader,
) -> Result<WayStageOutput> {
    let mut feature_rows = Vec::new();
    let mut way_linestrings = HashMap::new();
    let mut counters = WayStageCounters::default();
    let mut first_error = None;

    source.for_each_way(&mut |way| {
        if first_error.is_some() {
            return;
        }
        counters.considered += 1;

        let mut coords = Vec::with_capacity(way.node_refs.len());
        for node_ref in &way.node_refs {
            match node_store.get(*node_ref as u64) {
                Some((lon, lat)) => coords.push(Coord { x: lon, y: lat }),
                None => {
                    counters.dropped_unresolved_ref += 1;
                    return;
                }
            }
        }

        let mut deduped: Vec<Coord<f64>> = Vec::with_capacity(coords.len());
        for c in coords {
            if deduped.last().is_none_or(|last| *last != c) {
                deduped.push(c);
            }
        }
        if deduped.len() < 2 {
            counters.dropped_too_short += 1;
            return;
        }

        let closed = way.node_refs.len() >= 4 && way.node_refs.first() == way.node_refs.last();
        let is_polygon_candidate =
            closed && deduped.len() >= 4 && polygon_policy.classify(&way.tags) == ClosedWayShape::Polygon;

        let linestring = LineString::new(deduped);
        way_linestrings.insert(way.id, linestring.clone());

        let geometry = if is_polygon_candidate {
            match repair_polygon(Polygon::new(linestring, vec![])).polygon {
                Some(p) => Geometry::Polygon(p),
                None => {
                    counters.dropped_invalid_geometry += 1;
                    return;
                }
            }
        } else {
            Geometry::LineString(linestring)
        };

        if !filter_doc.way {
            return;
        }
        if let Some(pred) = geometry_predicate {
            if !intersects(pred, &geometry) {
                return;
            }
        }
        if filter_doc.matches(&way.tags) {
            feature_rows.push(FeatureRow {
                feature_id: format!("way/{}", way.id),
                kind: FeatureKind::Way,
                geometry,
                tags: way.tags,
            });
        }
    })?;

    if let Some(e) = first_error {
        return Err(e);
    }

    Ok(WayStageOutput {
        feature_rows,
        way_linestrings,
        counters,
    })
}
