//! Geometry Repair: the cleanup pass every reconstructed way/relation
//! geometry goes through before it reaches the Output Merger.

use geo::orient::{Direction, Orient};
use geo::{BooleanOps, BoundingRect, Coord, LineString, Polygon, Rect};

/// Minimum vertex count for a ring to be geometrically meaningful (a
/// triangle, 3 distinct points plus the closing duplicate).
const MIN_RING_VERTICES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairOutcome {
    Repaired,
    Unchanged,
    Rejected,
}

pub struct RepairedPolygon {
    pub polygon: Option<Polygon<f64>>,
    pub bbox: Option<Rect<f64>>,
    pub outcome: RepairOutcome,
}

/// Removes consecutive duplicate vertices, rejects rings too small to form
/// a polygon, resolves self-intersections via `geo`'s self-union trick
/// (`BooleanOps::union` of a polygon with itself is exactly OGC make-valid
/// for the self-intersection case), and reorients exterior/interior rings
/// to the CCW-outer / CW-inner convention.
pub fn repair_polygon(polygon: Polygon<f64>) -> RepairedPolygon {
    let exterior = dedupe_consecutive(polygon.exterior());
    if exterior.0.len() < MIN_RING_VERTICES {
        return RepairedPolygon {
            polygon: None,
            bbox: None,
            outcome: RepairOutcome::Rejected,
        };
    }

    let interiors: Vec<LineString<f64>> = polygon
        .interiors()
        .iter()
        .map(dedupe_consecutive)
        .filter(|ring| ring.0.len() >= MIN_RING_VERTICES)
        .collect();

    let candidate = Polygon::new(exterior, interiors).orient(Direction::Default);

    let made_valid = self_union(&candidate);
    let outcome = if made_valid.exterior().0 != candidate.exterior().0 {
        RepairOutcome::Repaired
    } else {
        RepairOutcome::Unchanged
    };
    let bbox = made_valid.bounding_rect();

    RepairedPolygon {
        polygon: Some(made_valid),
        bbox,
        outcome,
    }
}

/// Unions a polygon with itself. A self-intersecting input resolves to a
/// simple (possibly multi-part) geometry the same way a zero-distance
/// buffer would; geo's boolean-ops clipping backend guarantees a valid
/// result. The first resulting part is kept — relation assembly in C5
/// already splits true multi-part geometries into separate output rows.
fn self_union(polygon: &Polygon<f64>) -> Polygon<f64> {
    let unioned = polygon.union(polygon);
    unioned
        .0
        .into_iter()
        .next()
        .unwrap_or_else(|| polygon.clone())
}

fn dedupe_consecutive(ring: &LineString<f64>) -> LineString<f64> {
    let mut out: Vec<Coord<f64>> = Vec::with_capacity(ring.0.len());
    for coord in ring.0.iter().copied() {
        if out.last().is_none_or(|last| *last != coord) {
            out.push(coord);
        }
    }
    LineString::new(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    #[test]
    fn dedupes_consecutive_duplicates() {
        let p = polygon![
            (x: 0.0, y: 0.0), (x: 0.0, y: 0.0), (x: 4.0, y: 0.0),
            (x: 4.0, y: 4.0), (x: 0.0, y: 4.0), (x: 0.0, y: 0.0)
        ];
        let repaired = repair_polygon(p);
        assert!(repaired.polygon.is_some());
        assert_ne!(repaired.outcome, RepairOutcome::Rejected);
    }

    #[test]
    fn degenerate_ring_is_rejected() {
        let p = polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 0.0)];
        let repaired = repair_polygon(p);
        assert_eq!(repaired.outcome, RepairOutcome::Rejected);
        assert!(repaired.polygon.is_none());
    }

    #[test]
    fn valid_polygon_gets_a_bbox() {
        let p = polygon![(x: 0.0, y: 0.0), (x: 4.0, y: 0.0), (x: 4.0, y: 4.0), (x: 0.0, y: 4.0)];
        let repaired = repair_polygon(p);
        let bbox = repaired.bbox.unwrap();
        assert_eq!(bbox.min(), Coord { x: 0.0, y: 0.0 });
        assert_eq!(bbox.max(), Coord { x: 4.0, y: 4.0 });
    }
}
