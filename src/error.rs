//! Typed errors raised by the index core.
//!
//! The CLI layer wraps these in `anyhow` for reporting; inside the library
//! every fallible operation returns [`Result`].

use std::path::PathBuf;

/// Errors produced by the DECAF index core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid or inconsistent caller-supplied configuration: unknown literal
    /// level, unsupported output level for a scoped filter, missing joining
    /// operation on a multi-member constraint, shard/query count mismatch.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An operation that requires an active shard connection was called
    /// without one.
    #[error("no active shard connection")]
    NotConnected,

    /// Force-alignment could not locate a token inside the sentence text.
    #[error("could not align token '{token}' with sentence text '{context}'")]
    Alignment { token: String, context: String },

    /// A structure or hierarchy references a record that was never part of
    /// the batch being persisted.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Underlying database failure. Aborts the enclosing write as a whole.
    #[error("storage error: {0}")]
    Storage(#[from] duckdb::Error),

    /// Filesystem-level storage failure (shard discovery, corpus access).
    #[error("i/o error on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed input sentence.
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
