//! The OSM element model every pipeline stage operates on, and the
//! `OsmSource` collaborator that decouples those stages from `osmpbf`
//! (the external PBF decoder) so they can also run against a synthetic
//! in-memory source in tests.

use std::collections::HashMap;
use std::path::PathBuf;

use crossbeam_channel::bounded;
use osmpbf::{BlobDecode, BlobReader, Element};
use rayon::prelude::*;

use crate::error::{CoreError, Result};
use crate::filter::TagMap;

#[derive(Debug, Clone)]
pub struct OsmNode {
    pub id: i64,
    pub lon: f64,
    pub lat: f64,
    pub tags: TagMap,
}

#[derive(Debug, Clone)]
pub struct OsmWay {
    pub id: i64,
    pub node_refs: Vec<i64>,
    pub tags: TagMap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberType {
    Node,
    Way,
    Relation,
}

#[derive(Debug, Clone)]
pub struct RelationMember {
    pub member_type: MemberType,
    pub id: i64,
    pub role: String,
}

#[derive(Debug, Clone)]
pub struct OsmRelation {
    pub id: i64,
    pub members: Vec<RelationMember>,
    pub tags: TagMap,
}

/// A single collaborator abstraction over "give me every node / way /
/// relation". The real PBF decoder re-opens the file per call (osmpbf's
/// `BlobReader` is forward-only); the in-memory test double just iterates a
/// stored `Vec`.
pub trait OsmSource {
    fn for_each_node(&self, f: &mut dyn FnMut(OsmNode)) -> Result<()>;
    fn for_each_way(&self, f: &mut dyn FnMut(OsmWay)) -> Result<()>;
    fn for_each_relation(&self, f: &mut dyn FnMut(OsmRelation)) -> Result<()>;
}

pub fn build_tag_map<'a, I>(tags: I) -> TagMap
where
    I: Iterator<Item = (&'a str, &'a str)>,
{
    tags.map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

/// Adapts a `.osm.pbf` file on disk to [`OsmSource`], decoding blocks in
/// parallel via `rayon::par_bridge` and funneling results through a bounded
/// `crossbeam_channel` to a single collector thread — the same
/// producer/consumer split the teacher uses for its indexing passes.
pub struct PbfSource {
    path: PathBuf,
}

impl PbfSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn open(&self) -> Result<BlobReader<std::io::BufReader<std::fs::File>>> {
        BlobReader::from_path(&self.path)
            .map_err(|e| CoreError::InvalidInput(format!("failed to open {:?}: {e}", self.path)))
    }
}

fn run_collector<T, Extract>(reader: BlobReader<std::io::BufReader<std::fs::File>>, extract: Extract) -> Result<Vec<T>>
where
    T: Send + 'static,
    Extract: Fn(Element) -> Option<T> + Send + Sync,
{
    let (tx, rx) = bounded::<Vec<T>>(64);

    std::thread::scope(|scope| {
        let collector = scope.spawn(move || -> Vec<T> {
            let mut items = Vec::new();
            for batch in rx {
                items.extend(batch);
            }
            items
        });

        let decode_result: std::result::Result<(), osmpbf::Error> =
            reader.par_bridge().try_for_each(|blob_result| {
                let blob = blob_result?;
                if let BlobDecode::OsmData(block) = blob.decode()? {
                    let batch: Vec<T> = block.elements().filter_map(&extract).collect();
                    if !batch.is_empty() {
                        let _ = tx.send(batch);
                    }
                }
                Ok(())
            });

        drop(tx);
        let items = collector
            .join()
            .map_err(|_| CoreError::runtime("osm_decode", anyhow::anyhow!("collector thread panicked")))?;
        decode_result.map_err(|e| CoreError::runtime("osm_decode", anyhow::anyhow!(e.to_string())))?;
        Ok(items)
    })
}

impl OsmSource for PbfSource {
    fn for_each_node(&self, f: &mut dyn FnMut(OsmNode)) -> Result<()> {
        let items = run_collector(self.open()?, |elem| match elem {
            Element::Node(node) => Some(OsmNode {
                id: node.id(),
                lon: node.lon(),
                lat: node.lat(),
                tags: build_tag_map(node.tags()),
            }),
            Element::DenseNode(node) => Some(OsmNode {
                id: node.id(),
                lon: node.lon(),
                lat: node.lat(),
                tags: build_tag_map(node.tags()),
            }),
            _ => None,
        })?;
        items.into_iter().for_each(f);
        Ok(())
    }

    fn for_each_way(&self, f: &mut dyn FnMut(OsmWay)) -> Result<()> {
        let items = run_collector(self.open()?, |elem| match elem {
            Element::Way(way) => Some(OsmWay {
                id: way.id(),
                node_refs: way.refs().collect(),
                tags: build_tag_map(way.tags()),
            }),
            _ => None,
        })?;
        items.into_iter().for_each(f);
        Ok(())
    }

    fn for_each_relation(&self, f: &mut dyn FnMut(OsmRelation)) -> Result<()> {
        let items = run_collector(self.open()?, |elem| match elem {
            Element::Relation(rel) => {
                let members = rel
                    .members()
                    .map(|m| RelationMember {
                        member_type: match m.member_type {
                            osmpbf::RelMemberType::Node => MemberType::Node,
                            osmpbf::RelMemberType::Way => MemberType::Way,
                            osmpbf::RelMemberType::Relation => MemberType::Relation,
                        },
                        id: m.member_id,
                        role: m.role().unwrap_or("").to_string(),
                    })
                    .collect();
                Some(OsmRelation {
                    id: rel.id(),
                    members,
                    tags: build_tag_map(rel.tags()),
                })
            }
            _ => None,
        })?;
        items.into_iter().for_each(f);
        Ok(())
    }
}

/// A fixed, in-memory OSM dataset — what the crate's integration tests
/// drive `convert(...)` against, since no binary PBF fixture ships with
/// this tree.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    pub nodes: Vec<OsmNode>,
    pub ways: Vec<OsmWay>,
    pub relations: Vec<OsmRelation>,
}

impl OsmSource for InMemorySource {
    fn for_each_node(&self, f: &mut dyn FnMut(OsmNode)) -> Result<()> {
        for node in &self.nodes {
            f(node.clone());
        }
        Ok(())
    }

    fn for_each_way(&self, f: &mut dyn FnMut(OsmWay)) -> Result<()> {
        for way in &self.ways {
            f(way.clone());
        }
        Ok(())
    }

    fn for_each_relation(&self, f: &mut dyn FnMut(OsmRelation)) -> Result<()> {
        for relation in &self.relations {
            f(relation.clone());
        }
        Ok(())
    }
}

pub fn node_lookup(nodes: &[OsmNode]) -> HashMap<i64, (f64, f64)> {
    nodes.iter().map(|n| (n.id, (n.lon, n.lat))).collect()
}
