//! Compression codecs for archived messages.
//!
//! Every archive entry is compressed on its own so that a single entry can be
//! read back without touching its neighbours. This crate wraps the codecs
//! behind one [`Compression`] enum, providing:
//!
//! - **In-memory** compression of a whole entry ([`Compression::compress`],
//!   [`Compression::decompress`])
//! - **Streaming** decompression of one entry ([`Compression::wrap_reader`])
//! - A **one-byte tag** recorded in container headers so a reader knows which
//!   codec wrote the entries ([`Compression::tag`], [`Compression::from_tag`])
//!
//! Bzip2 and Gzip are always available; Zstd is behind the `zstd` feature.

mod construct;
pub mod error;
mod ops;
mod util;

/// A supported entry compression format.
///
/// Defaults to [`Gzip`](Self::Gzip): captured pages are mostly markup, which
/// deflates well and decompresses quickly on random reads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Compression {
    /// Stored as-is
    None,
    /// Bzip2 compression
    Bzip2,
    /// Gzip compression
    #[default]
    Gzip,
    /// Zstd compression
    #[cfg(feature = "zstd")]
    Zstd,
}
