//! Node Stage (C3): filters nodes by geometry and tags into feature rows,
//! while unconditionally recording every node's coordinate in the node
//! store so C4/C5 can resolve way/relation member refs against it.

use geo::{Coord, Geometry, Point};

use crate::config::{CompiledFilterDocument, ConvertOptions, NodeCacheMode};
use crate::error::Result;
use crate::geometry::GeometryPredicate;
use crate::osm::OsmSource;
use crate::sinks::{FeatureKind, FeatureRow};
use crate::storage::{NodeStoreReader, NodeStoreWriter};

pub struct NodeStageOutput {
    pub feature_rows: Vec<FeatureRow>,
    pub node_store: NodeStoreReader,
    pub nodes_considered: u64,
    pub nodes_kept: u64,
}

pub fn build_node_store_writer(options: &ConvertOptions) -> Result<NodeStoreWriter> {
    let (mode, _label) = crate::config::resolve_node_cache_mode(options.node_cache_mode, &options.input);
    match mode {
        NodeCacheMode::Memory => Ok(NodeStoreWriter::new_memory()),
        NodeCacheMode::Dense => match &options.node_cache_path {
            Some(path) => NodeStoreWriter::new_dense(path, options.node_cache_max_nodes),
            None => NodeStoreWriter::new_dense_temp(options.node_cache_max_nodes),
        },
        NodeCacheMode::Sparse | NodeCacheMode::Auto => NodeStoreWriter::new_sparse(),
    }
}

pub fn run(
    source: &dyn OsmSource,
    options: &ConvertOptions,
    filter_doc: &CompiledFilterDocument,
    geometry_predicate: Option<&GeometryPredicate>,
) -> Result<NodeStageOutput> {
    let mut writer = build_node_store_writer(options)?;
    let mut feature_rows = Vec::new();
    let mut considered = 0u64;
    let mut kept = 0u64;
    let mut first_error = None;

    source.for_each_node(&mut |node| {
        if first_error.is_some() {
            return;
        }
        considered += 1;
        if let Err(e) = writer.put(node.id as u64, node.lat, node.lon) {
            first_error = Some(e);
            return;
        }

        if !filter_doc.node {
            return;
        }
        let coord = Coord { x: node.lon, y: node.lat };
        if let Some(pred) = geometry_predicate {
            if !pred.intersects_point(coord) {
                return;
            }
        }
        if filter_doc.matches(&node.tags) {
            feature_rows.push(FeatureRow {
                feature_id: format!("node/{}", node.id),
                kind: FeatureKind::Node,
                geometry: Geometry::Point(Point::new(node.lon, node.lat)),
                tags: node.tags,
            });
            kept += 1;
        }
    })?;

    if let Some(e) = first_error {
        return Err(e);
    }

    let node_store = writer.finalize()?;
    Ok(NodeStageOutput {
        feature_rows,
        node_store,
        nodes_considered: considered,
        nodes_kept: kept,
    })
}
