//! Geometry Predicate: a clip polygon normalized for deterministic
//! intersection testing, backed by a prepared `rstar` index over ring
//! bounding boxes, plus a stable fingerprint used as a cache key.

use geo::orient::{Direction, Orient};
use geo::{BoundingRect, Coord, Intersects, MultiPolygon, Polygon, Rect};
use geozero::{CoordDimensions, ToWkb};
use rstar::{RTree, RTreeObject, AABB};
use sha2::{Digest, Sha256};

use crate::error::{CoreError, Result};

/// One outer-or-inner ring's bounding box, indexed so a feature's geometry
/// can be bbox-rejected against the clip polygon before paying for an exact
/// intersection test.
#[derive(Debug)]
struct RingEnvelope {
    polygon_idx: usize,
    bbox: Rect<f64>,
}

impl RTreeObject for RingEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.bbox.min().x, self.bbox.min().y],
            [self.bbox.max().x, self.bbox.max().y],
        )
    }
}

#[derive(Debug)]
pub struct GeometryPredicate {
    polygons: MultiPolygon<f64>,
    index: RTree<RingEnvelope>,
    fingerprint: String,
}

impl GeometryPredicate {
    /// Normalizes `clip` (exterior rings forced CCW, per the OGC/GeoParquet
    /// convention the rest of this crate assumes) and builds the prepared
    /// index and fingerprint over it.
    pub fn new(clip: MultiPolygon<f64>) -> Result<Self> {
        if clip.0.is_empty() {
            return Err(CoreError::InvalidInput(
                "clip polygon has no rings".to_string(),
            ));
        }

        let normalized: MultiPolygon<f64> = MultiPolygon::new(
            clip.into_iter()
                .map(|p| p.orient(Direction::Default))
                .collect(),
        );

        let mut envelopes = Vec::with_capacity(normalized.0.len());
        for (idx, polygon) in normalized.0.iter().enumerate() {
            let bbox = polygon.bounding_rect().ok_or_else(|| {
                CoreError::InvalidInput(format!("clip polygon {idx} has no bounding box"))
            })?;
            envelopes.push(RingEnvelope {
                polygon_idx: idx,
                bbox,
            });
        }
        let index = RTree::bulk_load(envelopes);
        let fingerprint = fingerprint_multipolygon(&normalized)?;

        Ok(Self {
            polygons: normalized,
            index,
            fingerprint,
        })
    }

    /// SHA-256 hex digest, stable across semantically identical but
    /// differently-ordered/oriented inputs. Used both as the predicate's
    /// identity and as a cache key.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Bbox pre-filter followed by an exact test, against a single
    /// candidate point (node) or bounding box (way/relation envelope).
    pub fn intersects_point(&self, coord: Coord<f64>) -> bool {
        let candidates: Vec<&RingEnvelope> = self
            .index
            .locate_in_envelope_intersecting(&AABB::from_point([coord.x, coord.y]))
            .collect();
        candidates
            .iter()
            .any(|env| self.polygons.0[env.polygon_idx].intersects(&coord))
    }

    pub fn intersects_bbox(&self, bbox: Rect<f64>) -> bool {
        let envelope = AABB::from_corners([bbox.min().x, bbox.min().y], [bbox.max().x, bbox.max().y]);
        let candidates: Vec<&RingEnvelope> =
            self.index.locate_in_envelope_intersecting(&envelope).collect();
        candidates
            .iter()
            .any(|env| self.polygons.0[env.polygon_idx].intersects(&bbox))
    }

    pub fn polygons(&self) -> &MultiPolygon<f64> {
        &self.polygons
    }
}

/// Canonicalizes ring order (by bounding-box min corner) and vertex
/// rotation (start at the lexicographically-smallest coordinate) before
/// hashing, so the same polygon expressed with rings in a different order,
/// or a ring walked starting from a different vertex, fingerprints
/// identically.
fn fingerprint_multipolygon(mp: &MultiPolygon<f64>) -> Result<String> {
    let mut polygons: Vec<Polygon<f64>> = mp.0.iter().map(|p| canonicalize_polygon(p)).collect();
    polygons.sort_by(|a, b| {
        let ca = canonical_key(a);
        let cb = canonical_key(b);
        ca.partial_cmp(&cb).unwrap_or(std::cmp::Ordering::Equal)
    });
    let canonical = MultiPolygon::new(polygons.drain(..).collect());

    let wkb = geo::Geometry::MultiPolygon(canonical)
        .to_wkb(CoordDimensions::xy())
        .map_err(|e| CoreError::InvalidInput(format!("failed to serialize clip polygon: {e}")))?;
    let mut hasher = Sha256::new();
    hasher.update(&wkb);
    Ok(format!("{:x}", hasher.finalize()))
}

fn canonical_key(p: &Polygon<f64>) -> (f64, f64) {
    p.bounding_rect()
        .map(|r| (r.min().x, r.min().y))
        .unwrap_or((0.0, 0.0))
}

fn canonicalize_polygon(p: &Polygon<f64>) -> Polygon<f64> {
    let exterior = rotate_to_min_vertex(p.exterior());
    let interiors: Vec<_> = p.interiors().iter().map(rotate_to_min_vertex).collect();
    Polygon::new(exterior, interiors)
}

fn rotate_to_min_vertex(ring: &geo::LineString<f64>) -> geo::LineString<f64> {
    let coords: Vec<Coord<f64>> = ring.0.clone();
    if coords.len() < 2 {
        return ring.clone();
    }
    // Last coordinate duplicates the first (closed ring); work on the open form.
    let open = &coords[..coords.len() - 1];
    let min_idx = open
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            (a.x, a.y)
                .partial_cmp(&(b.x, b.y))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(idx, _)| idx)
        .unwrap_or(0);
    let mut rotated: Vec<Coord<f64>> = open[min_idx..].to_vec();
    rotated.extend_from_slice(&open[..min_idx]);
    rotated.push(rotated[0]);
    geo::LineString::new(rotated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, Coord};

    #[test]
    fn fingerprint_is_stable_across_ring_order() {
        let a = MultiPolygon::new(vec![
            polygon![(x: 0.0, y: 0.0), (x: 4.0, y: 0.0), (x: 4.0, y: 4.0), (x: 0.0, y: 4.0)],
        ]);
        let b = MultiPolygon::new(vec![
            polygon![(x: 4.0, y: 4.0), (x: 0.0, y: 4.0), (x: 0.0, y: 0.0), (x: 4.0, y: 0.0)],
        ]);
        let pa = GeometryPredicate::new(a).unwrap();
        let pb = GeometryPredicate::new(b).unwrap();
        assert_eq!(pa.fingerprint(), pb.fingerprint());
    }

    #[test]
    fn intersects_point_inside_and_outside() {
        let clip = MultiPolygon::new(vec![
            polygon![(x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 10.0, y: 10.0), (x: 0.0, y: 10.0)],
        ]);
        let pred = GeometryPredicate::new(clip).unwrap();
        assert!(pred.intersects_point(Coord { x: 5.0, y: 5.0 }));
        assert!(!pred.intersects_point(Coord { x: 50.0, y: 50.0 }));
    }

    #[test]
    fn empty_clip_is_rejected() {
        let err = GeometryPredicate::new(MultiPolygon::new(vec![])).unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }
}
