//! Error taxonomy for the batch pipeline
//!
//! Each step family has its own error type. Steps report expected failures by
//! returning `Ok(false)` and recording the message on the context; anything
//! surfacing as [`PipelineError`] aborts the run.

use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

use crate::resource::ResourceKind;
use crate::tracker::RunStatus;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Failure while materializing a resource artifact
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} responded with status {status}")]
    Status { url: String, status: u16 },

    #[error("Rate limited by {url}, gave up after {attempts} attempts")]
    RateLimited { url: String, attempts: usize },

    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Source file not found: {0}")]
    MissingSource(PathBuf),

    #[error("Unexpected document structure: {0}")]
    Document(String),

    #[error("Fetcher does not handle {0} resources")]
    UnsupportedResource(ResourceKind),
}

impl FetchError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Malformed or structurally unexpected input to a transform
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No downloaded artifact available to transform")]
    MissingArtifact,

    #[error("Missing required column {column:?} in {path}")]
    MissingColumn { path: PathBuf, column: String },

    #[error("Unexpected structure in {path}: {reason}")]
    Structure { path: PathBuf, reason: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl TransformError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn structure(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Structure {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Failure while persisting rows
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid SQL identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("No rows to import")]
    NoRows,

    #[error("Store error: {0}")]
    Store(String),
}

/// Failure recording run or step state
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Run not found: {0}")]
    RunNotFound(Uuid),

    #[error("Step not found: {0}")]
    StepNotFound(Uuid),

    #[error("Illegal status transition {from} -> {to}")]
    InvalidTransition { from: RunStatus, to: RunStatus },

    #[error("Tracker state lock poisoned")]
    Poisoned,
}

/// Umbrella error for pipeline construction and execution
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Transform failed: {0}")]
    Transform(#[from] TransformError),

    #[error("Import failed: {0}")]
    Import(#[from] ImportError),

    #[error("Run tracking failed: {0}")]
    Tracker(#[from] TrackerError),

    #[error("Unknown pipeline: {0}")]
    UnknownPipeline(String),

    #[error("Pipeline {pipeline} expects {expected} resources, got {found}")]
    ResourceMismatch {
        pipeline: String,
        expected: ResourceKind,
        found: ResourceKind,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
