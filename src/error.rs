//! Typed error taxonomy for the conversion pipeline.
//!
//! Library code returns `Result<T, CoreError>` so callers can match on the
//! kind of failure (per the "never conflated" propagation policy); the CLI
//! binary alone widens this into `anyhow::Result` at its boundary.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("tag filter is contradictory: key `{key}` is matched by both a positive and a negative spec")]
    FilterConflict { key: String },

    #[error("group scheduler reached the size floor ({floor} rows) without fitting in memory")]
    OutOfMemory { floor: u64 },

    #[error("working directory {0:?} is locked by another run")]
    CacheBusy(PathBuf),

    #[error("no combination of catalog extracts covers the requested geometry at iou_threshold={iou_threshold}")]
    UncoveredGeometry { iou_threshold: f64 },

    #[error("extract query `{query}` matched {count} catalog entries: {suggestions:?}")]
    ExtractAmbiguous {
        query: String,
        count: usize,
        suggestions: Vec<String>,
    },

    #[error("extract query `{query}` matched no catalog entries")]
    ExtractNotFound { query: String },

    #[error("runtime failure in stage {stage}: {source}")]
    RuntimeFailure {
        stage: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error(transparent)]
    Arrow(#[from] arrow_schema::ArrowError),
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Exit code for the CLI surface, per spec.md §6.
    pub fn exit_code(&self) -> i32 {
        match self {
            CoreError::InvalidInput(_) | CoreError::FilterConflict { .. } => 1,
            CoreError::UncoveredGeometry { .. }
            | CoreError::ExtractAmbiguous { .. }
            | CoreError::ExtractNotFound { .. } => 2,
            CoreError::Cancelled => 3,
            _ => 3,
        }
    }

    pub fn runtime(stage: &'static str, source: impl Into<anyhow::Error>) -> Self {
        CoreError::RuntimeFailure {
            stage,
            source: source.into(),
        }
    }
}
