//! Relation Stage (C5): assembles multipolygon/boundary relations from
//! their member ways' linestrings via a deterministic Eulerian-walk ring
//! assembly, classifies inner rings as holes of their containing outer
//! ring, and emits the resulting (multi)polygon feature rows.
//!
//! State machine per relation: Discovered -> Resolved -> RingsBuilt ->
//! Classified -> (Valid | Dropped). Dropped relations only increment a
//! counter; they never abort the run.

use std::collections::HashMap;

use geo::{BoundingRect, Contains, Coord, Geometry, LineString, MultiPolygon, Point, Polygon};

use crate::config::CompiledFilterDocument;
use crate::error::{CoreError, Result};
use crate::geometry::{repair_polygon, GeometryPredicate};
use crate::osm::{MemberType, OsmRelation, OsmSource};
use crate::scheduler::{GroupScheduler, GROUP_SIZE_FLOOR};
use crate::sinks::{FeatureKind, FeatureRow};

/// No memory-probing crate is part of this corpus' stack, so the Relation
/// Stage assumes a conservative fixed tier rather than querying the OS.
const DEFAULT_AVAILABLE_MEMORY_BYTES: u64 = 4 * 1024 * 1024 * 1024;

/// Soft cap on total ring vertices buffered per id-range group before the
/// scheduler halves the group size for the remaining groups.
const GROUP_VERTEX_BUDGET: usize = 2_000_000;

#[derive(Debug, Default, Clone, Copy)]
pub struct RelationStageCounters {
    pub considered: u64,
    pub dropped_not_multipolygon: u64,
    pub dropped_unresolved_member: u64,
    pub dropped_unclosable_ring: u64,
    pub dropped_orphan_hole: u64,
    pub dropped_no_outer_ring: u64,
}

pub struct RelationStageOutput {
    pub feature_rows: Vec<FeatureRow>,
    pub counters: RelationStageCounters,
}

fn intersects(pred: &GeometryPredicate, geometry: &Geometry<f64>) -> bool {
    match geometry.bounding_rect() {
        Some(bbox) => pred.intersects_bbox(bbox),
        None => false,
    }
}

fn is_multipolygon_relation(tags: &crate::filter::TagMap) -> bool {
    matches!(tags.get("type").map(String::as_str), Some("multipolygon") | Some("boundary"))
}

/// Walks `members` (way id, linestring) into closed rings, always extending
/// the current ring with the smallest-id unused member that connects —
/// deterministic regardless of member order. Unclosable fragments are
/// dropped and counted.
fn assemble_rings(mut members: Vec<(i64, LineString<f64>)>) -> (Vec<LineString<f64>>, u64) {
    members.sort_by_key(|(id, _)| *id);
    let mut used = vec![false; members.len()];
    let mut rings = Vec::new();
    let mut dropped = 0u64;

    loop {
        let Some(start_idx) = used.iter().position(|used| !used) else {
            break;
        };
        used[start_idx] = true;
        let mut coords: Vec<Coord<f64>> = members[start_idx].1.0.clone();
        let start_point = coords[0];
        let mut closed = coords.len() > 1 && *coords.last().unwrap() == start_point;

        while !closed {
            let last_point = *coords.last().unwrap();
            let next = members.iter().enumerate().find_map(|(idx, (_, ls))| {
                if used[idx] {
                    return None;
                }
                let first = ls.0[0];
                let last = ls.0[ls.0.len() - 1];
                if first == last_point {
                    Some((idx, false))
                } else if last == last_point {
                    Some((idx, true))
                } else {
                    None
                }
            });

            match next {
                Some((idx, reversed)) => {
                    used[idx] = true;
                    let mut next_coords = members[idx].1.0.clone();
                    if reversed {
                        next_coords.reverse();
                    }
                    coords.extend(next_coords.into_iter().skip(1));
                    if *coords.last().unwrap() == start_point {
                        closed = true;
                    }
                }
                None => break,
            }
        }

        let mut deduped: Vec<Coord<f64>> = Vec::with_capacity(coords.len());
        for c in coords {
            if deduped.last().is_none_or(|last| *last != c) {
                deduped.push(c);
            }
        }

        if closed && deduped.len() >= 4 {
            rings.push(LineString::new(deduped));
        } else {
            dropped += 1;
        }
    }

    (rings, dropped)
}

/// Assigns each inner ring to the first outer polygon (in input order) that
/// contains one of its vertices; unassigned inner rings are orphan holes.
fn classify_holes(outers: Vec<LineString<f64>>, inners: Vec<LineString<f64>>) -> (Vec<Polygon<f64>>, u64) {
    let mut polygons: Vec<Polygon<f64>> = outers.into_iter().map(|ring| Polygon::new(ring, vec![])).collect();
    let mut assigned = vec![false; inners.len()];

    for polygon in polygons.iter_mut() {
        let mut holes = Vec::new();
        for (idx, inner) in inners.iter().enumerate() {
            if assigned[idx] {
                continue;
            }
            let probe = Point::from(inner.0[0]);
            if polygon.contains(&probe) {
                holes.push(inner.clone());
                assigned[idx] = true;
            }
        }
        if !holes.is_empty() {
            *polygon = Polygon::new(polygon.exterior().clone(), holes);
        }
    }

    let orphan_holes = assigned.iter().filter(|a| !**a).count() as u64;
    (polygons, orphan_holes)
}

struct RelationOutcome {
    feature_row: Option<FeatureRow>,
    vertex_count: usize,
    not_multipolygon: bool,
    unresolved_member: bool,
    unclosable_fragments: u64,
    orphan_holes: u64,
    no_outer_ring: bool,
}

fn process_relation(
    relation: OsmRelation,
    filter_doc: &CompiledFilterDocument,
    geometry_predicate: Option<&GeometryPredicate>,
    way_linestrings: &HashMap<i64, LineString<f64>>,
) -> RelationOutcome {
    let mut outcome = RelationOutcome {
        feature_row: None,
        vertex_count: 0,
        not_multipolygon: false,
        unresolved_member: false,
        unclosable_fragments: 0,
        orphan_holes: 0,
        no_outer_ring: false,
    };

    if !is_multipolygon_relation(&relation.tags) {
        outcome.not_multipolygon = true;
        return outcome;
    }

    let mut outer_members = Vec::new();
    let mut inner_members = Vec::new();

    for member in &relation.members {
        if member.member_type != MemberType::Way {
            continue;
        }
        let role = member.role.as_str();
        if role != "outer" && role != "inner" && !role.is_empty() {
            continue;
        }
        let Some(linestring) = way_linestrings.get(&member.id) else {
            outcome.unresolved_member = true;
            return outcome;
        };
        outcome.vertex_count += linestring.0.len();
        if role == "inner" {
            inner_members.push((member.id, linestring.clone()));
        } else {
            outer_members.push((member.id, linestring.clone()));
        }
    }

    let (outer_rings, dropped_outer_fragments) = assemble_rings(outer_members);
    let (inner_rings, dropped_inner_fragments) = assemble_rings(inner_members);
    outcome.unclosable_fragments = dropped_outer_fragments + dropped_inner_fragments;

    if outer_rings.is_empty() {
        outcome.no_outer_ring = true;
        return outcome;
    }

    let (polygons, orphan_holes) = classify_holes(outer_rings, inner_rings);
    outcome.orphan_holes = orphan_holes;

    let repaired: Vec<Polygon<f64>> = polygons.into_iter().filter_map(|p| repair_polygon(p).polygon).collect();
    if repaired.is_empty() {
        outcome.no_outer_ring = true;
        return outcome;
    }

    let geometry = if repaired.len() == 1 {
        Geometry::Polygon(repaired.into_iter().next().unwrap())
    } else {
        Geometry::MultiPolygon(MultiPolygon::new(repaired))
    };

    if !filter_doc.relation {
        return outcome;
    }
    if let Some(pred) = geometry_predicate {
        if !intersects(pred, &geometry) {
            return outcome;
        }
    }
    if filter_doc.matches(&relation.tags) {
        outcome.feature_row = Some(FeatureRow {
            feature_id: format!("relation/{}", relation.id),
            kind: FeatureKind::Relation,
            geometry,
            tags: relation.tags,
        });
    }

    outcome
}

/// Walks relations in ascending id-range groups (per the Group Scheduler,
/// §4.6) so a pathologically large batch of member rings never has to be
/// held in memory all at once; a group whose buffered vertex count exceeds
/// [`GROUP_VERTEX_BUDGET`] halves the scheduler's group size for the
/// remaining groups instead of failing the run outright.
pub fn run(
    source: &dyn OsmSource,
    filter_doc: &CompiledFilterDocument,
    geometry_predicate: Option<&GeometryPredicate>,
    way_linestrings: &HashMap<i64, LineString<f64>>,
) -> Result<RelationStageOutput> {
    let mut max_id: Option<i64> = None;
    source.for_each_relation(&mut |relation| {
        max_id = Some(max_id.map_or(relation.id, |current| current.max(relation.id)));
    })?;
    let Some(max_id) = max_id else {
        return Ok(RelationStageOutput {
            feature_rows: Vec::new(),
            counters: RelationStageCounters::default(),
        });
    };

    let mut scheduler = GroupScheduler::for_available_memory(DEFAULT_AVAILABLE_MEMORY_BYTES);
    let mut feature_rows = Vec::new();
    let mut counters = RelationStageCounters::default();
    let mut first_error = None;
    let mut cursor = 0i64;

    while cursor <= max_id {
        let group_end = cursor.saturating_add(scheduler.group_size() as i64);
        let mut group_rows = Vec::new();
        let mut group_vertex_count = 0usize;
        let mut group_counters = RelationStageCounters::default();

        source.for_each_relation(&mut |relation| {
            if first_error.is_some() || relation.id < cursor || relation.id >= group_end {
                return;
            }
            let outcome = process_relation(relation, filter_doc, geometry_predicate, way_linestrings);
            group_counters.considered += 1;
            group_vertex_count += outcome.vertex_count;
            if outcome.not_multipolygon {
                group_counters.dropped_not_multipolygon += 1;
            }
            if outcome.unresolved_member {
                group_counters.dropped_unresolved_member += 1;
            }
            group_counters.dropped_unclosable_ring += outcome.unclosable_fragments;
            group_counters.dropped_orphan_hole += outcome.orphan_holes;
            if outcome.no_outer_ring {
                group_counters.dropped_no_outer_ring += 1;
            }
            if let Some(row) = outcome.feature_row {
                group_rows.push(row);
            }
        })?;

        if let Some(e) = first_error {
            return Err(e);
        }

        if group_vertex_count > GROUP_VERTEX_BUDGET {
            if scheduler.halve() {
                tracing::warn!(
                    "relation group [{cursor}, {group_end}) exceeded the vertex budget; halving group size to {}",
                    scheduler.group_size()
                );
                continue;
            }
            return Err(CoreError::OutOfMemory { floor: GROUP_SIZE_FLOOR });
        }

        feature_rows.extend(group_rows);
        counters.considered += group_counters.considered;
        counters.dropped_not_multipolygon += group_counters.dropped_not_multipolygon;
        counters.dropped_unresolved_member += group_counters.dropped_unresolved_member;
        counters.dropped_unclosable_ring += group_counters.dropped_unclosable_ring;
        counters.dropped_orphan_hole += group_counters.dropped_orphan_hole;
        counters.dropped_no_outer_ring += group_counters.dropped_no_outer_ring;

        cursor = group_end;
    }

    Ok(RelationStageOutput { feature_rows, counters })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterDocument;
    use crate::filter::TagUniverse;
    use crate::osm::{InMemorySource, OsmRelation, RelationMember};

    fn ring(coords: &[(f64, f64)]) -> LineString<f64> {
        LineString::from(coords.to_vec())
    }

    #[test]
    fn multipolygon_with_hole_assembles_and_orients() {
        let mut way_linestrings = HashMap::new();
        way_linestrings.insert(
            1,
            ring(&[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0), (0.0, 0.0)]),
        );
        way_linestrings.insert(2, ring(&[(2.0, 2.0), (4.0, 2.0), (4.0, 4.0), (2.0, 4.0), (2.0, 2.0)]));

        let relation = OsmRelation {
            id: 99,
            members: vec![
                RelationMember { member_type: MemberType::Way, id: 1, role: "outer".to_string() },
                RelationMember { member_type: MemberType::Way, id: 2, role: "inner".to_string() },
            ],
            tags: [("type".to_string(), "multipolygon".to_string()), ("landuse".to_string(), "forest".to_string())]
                .into_iter()
                .collect(),
        };
        let source = InMemorySource {
            relations: vec![relation],
            ..Default::default()
        };

        let universe = TagUniverse::from_tags(&[]);
        let doc = FilterDocument::default().compile(&universe).unwrap();

        let output = run(&source, &doc, None, &way_linestrings).unwrap();
        assert_eq!(output.feature_rows.len(), 1);
        let Geometry::Polygon(polygon) = &output.feature_rows[0].geometry else {
            panic!("expected a Polygon geometry");
        };
        assert_eq!(polygon.interiors().len(), 1);
    }

    #[test]
    fn non_multipolygon_relation_is_skipped() {
        let relation = OsmRelation {
            id: 1,
            members: vec![],
            tags: [("type".to_string(), "route".to_string())].into_iter().collect(),
        };
        let source = InMemorySource {
            relations: vec![relation],
            ..Default::default()
        };
        let universe = TagUniverse::from_tags(&[]);
        let doc = FilterDocument::default().compile(&universe).unwrap();
        let way_linestrings = HashMap::new();

        let output = run(&source, &doc, None, &way_linestrings).unwrap();
        assert!(output.feature_rows.is_empty());
        assert_eq!(output.counters.dropped_not_multipolygon, 1);
    }

    #[test]
    fn unresolved_member_drops_relation() {
        let relation = OsmRelation {
            id: 2,
            members: vec![RelationMember { member_type: MemberType::Way, id: 404, role: "outer".to_string() }],
            tags: [("type".to_string(), "multipolygon".to_string())].into_iter().collect(),
        };
        let source = InMemorySource {
            relations: vec![relation],
            ..Default::default()
        };
        let universe = TagUniverse::from_tags(&[]);
        let doc = FilterDocument::default().compile(&universe).unwrap();
        let way_linestrings = HashMap::new();

        let output = run(&source, &doc, None, &way_linestrings).unwrap();
        assert!(output.feature_rows.is_empty());
        assert_eq!(output.counters.dropped_unresolved_member, 1);
    }

    #[test]
    fn relations_far_apart_in_id_span_both_process_across_groups() {
        let relation_a = OsmRelation {
            id: 1,
            members: vec![],
            tags: [("type".to_string(), "route".to_string())].into_iter().collect(),
        };
        let relation_b = OsmRelation {
            id: 250_000,
            members: vec![],
            tags: [("type".to_string(), "route".to_string())].into_iter().collect(),
        };
        let source = InMemorySource {
            relations: vec![relation_a, relation_b],
            ..Default::default()
        };
        let universe = TagUniverse::from_tags(&[]);
        let doc = FilterDocument::default().compile(&universe).unwrap();
        let way_linestrings = HashMap::new();

        let output = run(&source, &doc, None, &way_linestrings).unwrap();
        assert_eq!(output.counters.considered, 2);
        assert_eq!(output.counters.dropped_not_multipolygon, 2);
    }
}
