//! End-to-end scenarios driving `convert(...)` against `InMemorySource`,
//! reading the written GeoParquet back out to check feature_id/geometry/tag
//! assertions, one per spec.md §8 testable property.

use std::collections::HashMap;

use arrow_array::{Array, BinaryArray, StringArray};
use geo::Geometry;
use geozero::wkb::{FromWkb, WkbDialect};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use tempfile::NamedTempFile;

use quarry::config::ConvertOptions;
use quarry::filter::TagMap;
use quarry::osm::{InMemorySource, MemberType, OsmNode, OsmRelation, OsmWay, RelationMember};
use quarry::pipeline::convert;

fn tags(pairs: &[(&str, &str)]) -> TagMap {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

struct Row {
    feature_id: String,
    geometry: Geometry<f64>,
    tags: TagMap,
}

/// Reads every row of a GeoParquet file produced in compact mode back into
/// plain Rust values, for assertions.
fn read_rows(path: &std::path::Path) -> Vec<Row> {
    let file = std::fs::File::open(path).unwrap();
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .unwrap()
        .build()
        .unwrap();

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch.unwrap();
        let feature_ids = batch
            .column_by_name("feature_id")
            .unwrap()
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        let geometries = batch
            .column_by_name("geometry")
            .unwrap()
            .as_any()
            .downcast_ref::<BinaryArray>()
            .unwrap();
        let tag_json = batch
            .column_by_name("tags")
            .unwrap()
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();

        for i in 0..batch.num_rows() {
            let wkb = geometries.value(i);
            let geometry = geo_types::Geometry::<f64>::from_wkb(&mut &wkb[..], WkbDialect::Wkb).unwrap();
            let tag_map: HashMap<String, String> = serde_json::from_str(tag_json.value(i)).unwrap();
            rows.push(Row {
                feature_id: feature_ids.value(i).to_string(),
                geometry,
                tags: tag_map,
            });
        }
    }
    rows
}

fn run_convert(source: &InMemorySource, options: ConvertOptions) -> (quarry::pipeline::ConvertSummary, Vec<Row>) {
    let summary = convert(&options, source).unwrap();
    let rows = read_rows(&options.output);
    (summary, rows)
}

/// S1 — a single tagged node with no filter produces one point feature.
#[test]
fn s1_point_feature() {
    let source = InMemorySource {
        nodes: vec![OsmNode {
            id: 1,
            lon: 7.42245,
            lat: 43.73105,
            tags: tags(&[("shop", "bakery")]),
        }],
        ways: vec![],
        relations: vec![],
    };
    let output = NamedTempFile::with_suffix(".parquet").unwrap();
    let options = ConvertOptions {
        output: output.path().to_path_buf(),
        ..ConvertOptions::default()
    };

    let (summary, rows) = run_convert(&source, options);
    assert_eq!(summary.rows_written, 1);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].feature_id, "node/1");
    assert_eq!(rows[0].geometry, Geometry::Point(geo::Point::new(7.42245, 43.73105)));
    assert_eq!(rows[0].tags.get("shop").map(String::as_str), Some("bakery"));
}

fn unit_square_nodes() -> Vec<OsmNode> {
    vec![
        OsmNode { id: 1, lon: 0.0, lat: 0.0, tags: tags(&[]) },
        OsmNode { id: 2, lon: 1.0, lat: 0.0, tags: tags(&[]) },
        OsmNode { id: 3, lon: 1.0, lat: 1.0, tags: tags(&[]) },
        OsmNode { id: 4, lon: 0.0, lat: 1.0, tags: tags(&[]) },
    ]
}

/// S2 — a closed way tagged `building=yes` becomes a polygon, not a line.
#[test]
fn s2_closed_way_as_building_is_a_polygon() {
    let source = InMemorySource {
        nodes: unit_square_nodes(),
        ways: vec![OsmWay {
            id: 10,
            node_refs: vec![1, 2, 3, 4, 1],
            tags: tags(&[("building", "yes")]),
        }],
        relations: vec![],
    };
    let output = NamedTempFile::with_suffix(".parquet").unwrap();
    let options = ConvertOptions {
        output: output.path().to_path_buf(),
        ..ConvertOptions::default()
    };

    let (_, rows) = run_convert(&source, options);
    let way_row = rows.iter().find(|r| r.feature_id == "way/10").unwrap();
    match &way_row.geometry {
        Geometry::Polygon(p) => {
            assert_eq!(p.exterior().0.len(), 5);
        }
        other => panic!("expected a polygon, got {other:?}"),
    }
}

/// S3 — the same closed ring tagged `highway=residential` stays a
/// linestring: `highway` is not in the area-key whitelist.
#[test]
fn s3_closed_highway_remains_a_linestring() {
    let source = InMemorySource {
        nodes: unit_square_nodes(),
        ways: vec![OsmWay {
            id: 11,
            node_refs: vec![1, 2, 3, 4, 1],
            tags: tags(&[("highway", "residential")]),
        }],
        relations: vec![],
    };
    let output = NamedTempFile::with_suffix(".parquet").unwrap();
    let options = ConvertOptions {
        output: output.path().to_path_buf(),
        ..ConvertOptions::default()
    };

    let (_, rows) = run_convert(&source, options);
    let way_row = rows.iter().find(|r| r.feature_id == "way/11").unwrap();
    assert!(matches!(way_row.geometry, Geometry::LineString(_)));
}

/// S4 — a multipolygon relation with a hole assembles into a single
/// polygon feature with one interior ring.
#[test]
fn s4_multipolygon_with_hole() {
    let source = InMemorySource {
        nodes: vec![
            OsmNode { id: 1, lon: 0.0, lat: 0.0, tags: tags(&[]) },
            OsmNode { id: 2, lon: 10.0, lat: 0.0, tags: tags(&[]) },
            OsmNode { id: 3, lon: 10.0, lat: 10.0, tags: tags(&[]) },
            OsmNode { id: 4, lon: 0.0, lat: 10.0, tags: tags(&[]) },
            OsmNode { id: 5, lon: 2.0, lat: 2.0, tags: tags(&[]) },
            OsmNode { id: 6, lon: 4.0, lat: 2.0, tags: tags(&[]) },
            OsmNode { id: 7, lon: 4.0, lat: 4.0, tags: tags(&[]) },
            OsmNode { id: 8, lon: 2.0, lat: 4.0, tags: tags(&[]) },
        ],
        ways: vec![
            OsmWay { id: 20, node_refs: vec![1, 2, 3, 4, 1], tags: tags(&[]) },
            OsmWay { id: 21, node_refs: vec![5, 6, 7, 8, 5], tags: tags(&[]) },
        ],
        relations: vec![OsmRelation {
            id: 99,
            members: vec![
                RelationMember { member_type: MemberType::Way, id: 20, role: "outer".to_string() },
                RelationMember { member_type: MemberType::Way, id: 21, role: "inner".to_string() },
            ],
            tags: tags(&[("type", "multipolygon"), ("landuse", "forest")]),
        }],
    };
    let output = NamedTempFile::with_suffix(".parquet").unwrap();
    let options = ConvertOptions {
        output: output.path().to_path_buf(),
        ..ConvertOptions::default()
    };

    let (summary, rows) = run_convert(&source, options);
    assert_eq!(summary.relations_dropped_not_multipolygon, 0);
    assert_eq!(summary.relations_dropped_orphan_hole, 0);
    let relation_row = rows.iter().find(|r| r.feature_id == "relation/99").unwrap();
    match &relation_row.geometry {
        Geometry::Polygon(p) => {
            assert_eq!(p.interiors().len(), 1);
            assert_eq!(p.interiors()[0].0.len(), 5);
        }
        other => panic!("expected a polygon with a hole, got {other:?}"),
    }
    assert_eq!(relation_row.tags.get("landuse").map(String::as_str), Some("forest"));
}

/// S5 — a geometry filter clips the input down to the points it covers.
#[test]
fn s5_geometry_filter_clips_points() {
    let nodes: Vec<OsmNode> = (0..10)
        .map(|i| OsmNode {
            id: i + 1,
            lon: i as f64,
            lat: 0.0,
            tags: tags(&[("shop", "bakery")]),
        })
        .collect();
    let source = InMemorySource { nodes, ways: vec![], relations: vec![] };

    let clip_file = NamedTempFile::with_suffix(".wkt").unwrap();
    std::fs::write(
        clip_file.path(),
        "POLYGON((-0.5 -0.5, 4.5 -0.5, 4.5 0.5, -0.5 0.5, -0.5 -0.5))",
    )
    .unwrap();

    let output = NamedTempFile::with_suffix(".parquet").unwrap();
    let options = ConvertOptions {
        output: output.path().to_path_buf(),
        clip: Some(clip_file.path().to_path_buf()),
        ..ConvertOptions::default()
    };

    let (summary, rows) = run_convert(&source, options);
    assert_eq!(summary.rows_written, 5);
    assert_eq!(rows.len(), 5);
    let kept_ids: std::collections::HashSet<_> = rows.iter().map(|r| r.feature_id.clone()).collect();
    for id in ["node/1", "node/2", "node/3", "node/4", "node/5"] {
        assert!(kept_ids.contains(id), "expected {id} to survive clipping");
    }
}

/// S6 — wildcard positive + negative keys: `addr:*` present and `name`
/// absent is the pass condition.
#[test]
fn s6_wildcard_and_negative_filter() {
    let source = InMemorySource {
        nodes: vec![
            OsmNode {
                id: 1,
                lon: 1.0,
                lat: 1.0,
                tags: tags(&[("addr:housenumber", "10"), ("name", "Foo")]),
            },
            OsmNode {
                id: 2,
                lon: 2.0,
                lat: 2.0,
                tags: tags(&[("addr:city", "Monaco")]),
            },
        ],
        ways: vec![],
        relations: vec![],
    };

    let filter_path = NamedTempFile::with_suffix(".yaml").unwrap();
    std::fs::write(
        filter_path.path(),
        "tags:\n  \"addr:*\": true\n  name: false\n",
    )
    .unwrap();

    let output = NamedTempFile::with_suffix(".parquet").unwrap();
    let options = ConvertOptions {
        output: output.path().to_path_buf(),
        filter: filter_path.path().to_path_buf(),
        ..ConvertOptions::default()
    };

    let (_, rows) = run_convert(&source, options);
    let ids: std::collections::HashSet<_> = rows.iter().map(|r| r.feature_id.clone()).collect();
    assert!(!ids.contains("node/1"), "node/1 has `name` set and must be excluded");
    assert!(ids.contains("node/2"), "node/2 matches addr:* with no `name` tag");
}
