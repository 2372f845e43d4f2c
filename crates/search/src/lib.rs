//! Full-text search over archived documents.
//!
//! [`SearchIndex`] is the read side and [`IndexFeeder`] the single writer.
//! Documents only become searchable once the feeder commits, which is what
//! keeps unprocessed queue entries out of results.

pub mod error;
mod feeder;
mod page;
mod schema;

pub use crate::feeder::{IndexFeeder, SearchHit, SearchIndex, SearchResults, VersionStatus};
pub use crate::page::Page;
pub use crate::schema::{IndexSchema, SCHEMA_VERSION};
