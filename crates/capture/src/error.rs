//! Capture Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.
//!
//! Overflow is not an error: a full buffer is a state queried through
//! [`BoundedBuffer::is_overflow`](crate::BoundedBuffer::is_overflow), not a
//! failure.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A capture error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for capture operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Writing a log file failed. The captured message is lost.
    #[display("failed to persist {}", _0.display())]
    Persist(#[error(not(source))] PathBuf),
    /// A log directory could not be listed.
    #[display("failed to scan log directory {}", _0.display())]
    Scan(#[error(not(source))] PathBuf),
    /// Serializing a message into a cache buffer failed.
    #[display("failed to serialize message")]
    Serialize,
    /// A worker thread could not be started.
    #[display("failed to spawn worker thread")]
    Spawn,
    /// The pool no longer accepts tasks.
    #[display("worker pool has been terminated")]
    Terminated,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        // Persistence failures are never retried.
        false
    }
}
