//! Thin CLI wrapper around the library's synchronous `convert(...)` entry
//! point — arg parsing and logging only; all pipeline logic lives in
//! `crate::pipeline`.

use std::path::PathBuf;

use clap::Parser;

use crate::config::{ConvertOptions, NodeCacheMode, OutputCompression};
use crate::error::Result;
use crate::osm::PbfSource;
use crate::pipeline::{convert, ConvertSummary};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Input PBF file
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output GeoParquet file
    #[arg(short, long)]
    pub output: PathBuf,

    /// Tag/element filter document (YAML). Omit to pass everything through.
    #[arg(short, long, default_value = "")]
    pub filter: PathBuf,

    /// Geometry filter: a file containing a WKT Polygon or MultiPolygon.
    #[arg(long)]
    pub clip: Option<PathBuf>,

    /// Closed-way polygon-classification policy (YAML). Omit for the
    /// built-in default whitelist.
    #[arg(long)]
    pub polygon_policy: Option<PathBuf>,

    /// Working directory for the node cache and the at-most-once output
    /// cache.
    #[arg(long)]
    pub working_dir: Option<PathBuf>,

    /// Force a specific node cache mode.
    #[arg(long, value_enum)]
    pub node_cache_mode: Option<NodeCacheMode>,

    /// Maximum node id the dense node cache allocates for.
    #[arg(long)]
    pub node_cache_max_nodes: Option<u64>,

    /// Number of threads (default: all cores).
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Output column layout: compact tags JSON, or one column per tag key.
    #[arg(long)]
    pub exploded: bool,

    /// Row group size for the output Parquet file.
    #[arg(long)]
    pub row_group_size: Option<usize>,

    /// Output compression codec.
    #[arg(long, value_enum)]
    pub compression: Option<OutputCompression>,

    /// Sort output rows by Hilbert curve index of their geometry centroid.
    #[arg(long)]
    pub hilbert_sort: bool,

    /// Minimum fraction of the requested geometry a catalog extract must
    /// cover before extract auto-discovery gives up.
    #[arg(long)]
    pub iou_threshold: Option<f64>,

    /// Skip the at-most-once output cache and always reconvert.
    #[arg(long)]
    pub ignore_cache: bool,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn into_options(self) -> ConvertOptions {
        let mut options = ConvertOptions {
            input: self.input,
            output: self.output,
            filter: self.filter,
            clip: self.clip,
            polygon_policy: self.polygon_policy,
            hilbert_sort: self.hilbert_sort,
            use_cache: !self.ignore_cache,
            exploded_override: self.exploded.then_some(true),
            ..ConvertOptions::default()
        };
        if let Some(working_dir) = self.working_dir {
            options.working_dir = working_dir;
        }
        if let Some(mode) = self.node_cache_mode {
            options.node_cache_mode = mode;
        }
        if let Some(max_nodes) = self.node_cache_max_nodes {
            options.node_cache_max_nodes = max_nodes;
        }
        if self.threads.is_some() {
            options.threads = self.threads;
        }
        if let Some(row_group_size) = self.row_group_size {
            options.row_group_size = row_group_size;
        }
        if let Some(compression) = self.compression {
            options.compression = compression;
        }
        if let Some(iou_threshold) = self.iou_threshold {
            options.iou_threshold = iou_threshold;
        }
        options
    }
}

pub fn run(cli: Cli) -> Result<ConvertSummary> {
    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .map_err(|e| crate::error::CoreError::runtime("thread_pool", anyhow::anyhow!(e)))?;
    }

    let input = cli.input.clone();
    let options = cli.into_options();
    let source = PbfSource::new(input);
    convert(&options, &source)
}
