//! CLI Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A command error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for commands.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("failed to load configuration")]
    Config,
    #[display("failed to read {}", _0.display())]
    Input(#[error(not(source))] PathBuf),
    #[display("failed to write output")]
    Output,
    #[display("capture failed")]
    Capture,
    #[display("indexing failed")]
    Pipeline,
    #[display("archive error")]
    Archive,
    #[display("search failed")]
    Search,
    /// The archive holds no document with this id.
    #[display("no archived document {_0}")]
    NotFound(#[error(not(source))] u64),
}
