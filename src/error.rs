//! Error types for the facestats pipeline
//!
//! Only [`PipelineError`] aborts a run. [`LoadError`] is caught by the loader,
//! logged, and counted; schema and analysis-input problems never surface as
//! errors at all (they become rejection counts and labeled analysis statuses).

use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors: the run stops and no report is published
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Neither the command line nor the configuration names a data directory
    #[error("no response directory given (pass a PATH or set \"dataDir\" in the config)")]
    MissingDataDir,

    #[error("output directory {} is not writable: {source}", path.display())]
    OutputNotWritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Per-file ingestion failures; the offending file is skipped
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("unreadable file: {0}")]
    Io(#[from] std::io::Error),

    #[error("file is not valid UTF-8 (byte offset {0})")]
    Encoding(usize),

    #[error("malformed header: {0}")]
    Header(String),

    #[error("no recognizable image or face-view column")]
    NoRecognizedColumns,
}
