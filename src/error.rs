use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the store and the processing engine.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record encoding failed: {0}")]
    Codec(#[from] bincode::Error),

    #[error("{path}: {reason}")]
    Format { path: PathBuf, reason: String },

    #[error("store is locked by another handle: {0}")]
    Locked(PathBuf),

    #[error("no node at '{0}'")]
    NotFound(String),

    #[error("'{0}' is a group, not a dataset")]
    NotADataset(String),

    #[error("'{0}' is a dataset, not a group")]
    NotAGroup(String),

    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("shape {shape:?} describes {expected} elements but {actual} were given")]
    Shape {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    #[error("'{function}' returned {actual} outputs but {expected} output names were given")]
    OutputArity {
        function: String,
        expected: usize,
        actual: usize,
    },

    #[error("transform '{function}' failed: {source}")]
    Transform {
        function: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("stale repack copy found at {0}; remove it before repacking")]
    RepackHazard(PathBuf),
}

pub type Result<T> = std::result::Result<T, Error>;
