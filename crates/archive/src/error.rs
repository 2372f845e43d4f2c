//! Archive Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.
//!
//! A lookup for an id the archive doesn't hold is not an error: it is `None`.

use derive_more::{Display, Error};
use std::path::PathBuf;
use trawl_compress::error::{Error as CompressionError, ErrorKind as CompressionErrorKind};

/// An archive error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Reading or writing a container (or the archive directory) failed.
    #[display("I/O error on {}", _0.display())]
    Io(#[error(not(source))] PathBuf),
    /// A container's contents don't match the container format.
    #[display("corrupt container {}: {_1}", _0.display())]
    Corrupt(#[error(not(source))] PathBuf, #[error(not(source))] String),
    /// A fully read document doesn't match its stored checksum.
    #[display("checksum mismatch for document {_0}")]
    Checksum(#[error(not(source))] u64),
    /// Ids must be strictly increasing.
    #[display("document id {given} does not follow {last}")]
    OutOfOrder { last: u64, given: u64 },
    /// The archive was opened read-only.
    #[display("archive {} is open read-only", _0.display())]
    ReadOnly(#[error(not(source))] PathBuf),
    /// A metadata field doesn't fit the container format.
    #[display("{_0} is too long to archive")]
    FieldTooLong(#[error(not(source))] &'static str),
    /// Compression/decompression error
    #[display("compression error: {_0}")]
    Compression(CompressionErrorKind),
}

impl ErrorKind {
    /// Convert a compression error into an archive error, preserving the
    /// compress crate's `Exn` frame (error tree) as a child in its own
    /// error tree.
    #[track_caller]
    pub fn compression(err: CompressionError) -> Error {
        let inner = (*err).clone();
        err.raise(ErrorKind::Compression(inner))
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
