//! Pipeline Error Types
//!
//! Errors from the component crates are kept as child frames; the kind says
//! which stage failed.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A pipeline error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("invalid configuration")]
    Config,
    /// Listing, reading or removing queue logs failed.
    #[display("queue error in {}", _0.display())]
    Queue(#[error(not(source))] PathBuf),
    #[display("capture error")]
    Capture,
    #[display("distillation error")]
    Distill,
    #[display("archive error")]
    Archive,
    #[display("index error")]
    Index,
    /// The indexer thread could not be started.
    #[display("failed to spawn indexer thread")]
    Spawn,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Queue(_) | Self::Archive | Self::Index)
    }
}
