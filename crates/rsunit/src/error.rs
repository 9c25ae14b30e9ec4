//! Engine-level errors.
//!
//! Test failures are never reported through these types: they are captured
//! into the result tree. `EngineError` only covers faults that prevent the
//! engine from producing a result tree at all.

use std::path::PathBuf;
use thiserror::Error;

/// Boxed error type accepted from test bodies and hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Faults raised by the engine itself.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("no test node with index {0} exists in this tree")]
    UnknownNode(usize),

    #[error("test '{0}' is not a suite")]
    NotASuite(String),

    #[error("failed to build worker pool with {workers} workers: {source}")]
    ThreadPool {
        workers: usize,
        #[source]
        source: rayon::ThreadPoolBuildError,
    },

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize results: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
