//! Search Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction. The underlying `tantivy` error is kept as the child
//! frame.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A search error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for search operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The index couldn't be opened or created (including a schema that no
    /// longer matches the one on disk).
    #[display("failed to open index at {}", _0.display())]
    Open(#[error(not(source))] PathBuf),
    /// Adding, deleting or committing documents failed.
    #[display("failed to write to index")]
    Write,
    /// Executing a search failed.
    #[display("failed to search index")]
    Search,
    /// The query string couldn't be parsed.
    #[display("invalid query: {_0}")]
    Query(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Write | Self::Search)
    }
}
