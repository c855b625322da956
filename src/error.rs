//! Error types for parsing, loading, and merging bibliographic databases.
//!
//! Only data-integrity problems are errors. Disagreements found while
//! merging duplicates are reported as [`Diagnostic`](crate::Diagnostic)
//! values and never abort a run.

use thiserror::Error;

/// A specialized Result type for merge operations.
pub type Result<T> = std::result::Result<T, MergeError>;

/// Syntactically invalid input, raised by a [`RecordParser`](crate::RecordParser).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Malformed record at line {line}: {message}")]
pub struct ParseError {
    /// 1-based line on which the problem was detected.
    pub line: usize,
    pub message: String,
}

impl ParseError {
    pub(crate) fn at_line(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// Integrity violations detected while loading sources into a [`RecordStore`](crate::RecordStore).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The same citation key occurs twice within one source.
    #[error("Duplicate key '{key}' in {source_name}")]
    DuplicateKey { key: String, source_name: String },
}

/// Errors surfaced by the public API. All of them are fatal for a run.
#[derive(Error, Debug)]
pub enum MergeError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
