//! Configuration layer: `ConvertOptions` (every knob `convert(...)` accepts)
//! and the policy documents it loads (`FilterDocument`,
//! `PolygonPolicyConfig`), following the teacher's `config` crate + serde
//! pattern — a raw, deserializable struct with a `compile()` step that
//! produces a form cheap to evaluate per-feature.

mod filter_document;
mod polygon_policy;

pub use filter_document::{CompiledFilter, CompiledFilterDocument, FilterDocument};
pub use polygon_policy::{ClosedWayShape, CompiledPolygonPolicy, PolygonPolicyConfig};

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const DENSE_THRESHOLD_BYTES: u64 = 5 * 1024 * 1024 * 1024;
pub const DEFAULT_MAX_NODES: u64 = 16_000_000_000;
pub const DEFAULT_IOU_THRESHOLD: f64 = 0.98;
pub const DEFAULT_ROW_GROUP_SIZE: usize = 122_880;

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NodeCacheMode {
    /// Automatically select based on input file size (default).
    Auto,
    /// Sorted array — memory-efficient for extracts (<5GB).
    Sparse,
    /// Direct ID indexing — best for planet/continent (>=5GB).
    Dense,
    /// In-memory HashMap (no disk usage).
    Memory,
}

impl FromStr for NodeCacheMode {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "auto" => Ok(NodeCacheMode::Auto),
            "sparse" => Ok(NodeCacheMode::Sparse),
            "dense" | "mmap" => Ok(NodeCacheMode::Dense),
            "memory" => Ok(NodeCacheMode::Memory),
            _ => Err(format!("invalid node_cache_mode: {value}")),
        }
    }
}

impl NodeCacheMode {
    pub fn label(&self) -> &'static str {
        match self {
            NodeCacheMode::Auto => "auto",
            NodeCacheMode::Sparse => "sparse",
            NodeCacheMode::Dense => "dense",
            NodeCacheMode::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputCompression {
    Uncompressed,
    Snappy,
    Gzip,
    Zstd,
}

impl Default for OutputCompression {
    fn default() -> Self {
        OutputCompression::Snappy
    }
}

/// Every knob `convert(...)` accepts, with `Default` matching the
/// documented defaults.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    pub input: PathBuf,
    pub output: PathBuf,
    pub working_dir: PathBuf,
    pub filter: PathBuf,
    pub clip: Option<PathBuf>,
    pub polygon_policy: Option<PathBuf>,
    pub node_cache_mode: NodeCacheMode,
    pub node_cache_max_nodes: u64,
    pub node_cache_path: Option<PathBuf>,
    pub threads: Option<usize>,
    pub compression: OutputCompression,
    pub row_group_size: usize,
    pub hilbert_sort: bool,
    pub iou_threshold: f64,
    pub use_cache: bool,
    /// CLI-level compact/exploded override (spec.md §6's CLI surface); when
    /// unset the filter document's own `exploded` setting applies.
    pub exploded_override: Option<bool>,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            input: PathBuf::new(),
            output: PathBuf::new(),
            working_dir: std::env::temp_dir(),
            filter: PathBuf::new(),
            clip: None,
            polygon_policy: None,
            node_cache_mode: NodeCacheMode::Auto,
            node_cache_max_nodes: DEFAULT_MAX_NODES,
            node_cache_path: None,
            threads: None,
            compression: OutputCompression::default(),
            row_group_size: DEFAULT_ROW_GROUP_SIZE,
            hilbert_sort: false,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            use_cache: true,
            exploded_override: None,
        }
    }
}

pub fn resolve_node_cache_mode(
    requested: NodeCacheMode,
    input_path: &std::path::Path,
) -> (NodeCacheMode, String) {
    match requested {
        NodeCacheMode::Auto => {
            let file_size = std::fs::metadata(input_path).map(|m| m.len()).unwrap_or(0);
            let size_gb = file_size as f64 / (1024.0 * 1024.0 * 1024.0);
            if file_size >= DENSE_THRESHOLD_BYTES {
                (
                    NodeCacheMode::Dense,
                    format!("dense (auto-selected for {size_gb:.1} GB input)"),
                )
            } else {
                (
                    NodeCacheMode::Sparse,
                    format!("sparse (auto-selected for {size_gb:.1} GB input)"),
                )
            }
        }
        requested => (requested, requested.label().to_string()),
    }
}
