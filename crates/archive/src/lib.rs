//! Permanent storage for captured messages.
//!
//! Documents are appended under strictly increasing [`DocId`]s into
//! containers of a bounded number of entries. Each entry is compressed on its
//! own, so [`ArchiveStore::get_document`] can hand back a reader over a single
//! document without decompressing its neighbours.

mod container;
pub mod error;
mod id;
mod store;

pub use crate::container::{CONTAINER_EXTENSION, EntryHeader};
pub use crate::id::{DOC_ID_WIDTH, DocId};
pub use crate::store::{ArchiveOptions, ArchiveStore, ArchivedDocument, LastEntry};
