//! Index schema and the version marker that identifies it.

use tantivy::schema::{FAST, Field, INDEXED, STORED, STRING, Schema, TEXT};

/// Version of the schema documents are indexed with. Change it whenever
/// fields change so an index built against an older layout can be detected.
pub const SCHEMA_VERSION: &str = "trawl-index-1";

/// `kind` of regular archived documents.
pub(crate) const KIND_DOCUMENT: &str = "doc";
/// `kind` of the singleton version marker.
pub(crate) const KIND_VERSION: &str = "version";

/// The index schema with a handle for every field.
#[derive(Debug, Clone)]
pub struct IndexSchema {
    pub schema: Schema,
    /// Archive id; also a fast field for tie-breaking.
    pub id: Field,
    pub uri: Field,
    pub title: Field,
    pub date: Field,
    /// Id of the captured message the document came from.
    pub message: Field,
    /// Visible text of the distilled content.
    pub text: Field,
    pub kind: Field,
    pub version: Field,
}

impl IndexSchema {
    pub fn new() -> Self {
        let mut builder = Schema::builder();
        let id = builder.add_u64_field("id", INDEXED | STORED | FAST);
        let uri = builder.add_text_field("uri", STRING | STORED);
        let title = builder.add_text_field("title", TEXT | STORED);
        let date = builder.add_text_field("date", STORED);
        let message = builder.add_text_field("message", STRING | STORED);
        let text = builder.add_text_field("text", TEXT | STORED);
        let kind = builder.add_text_field("kind", STRING | STORED);
        let version = builder.add_text_field("version", STRING | STORED);
        Self {
            schema: builder.build(),
            id,
            uri,
            title,
            date,
            message,
            text,
            kind,
            version,
        }
    }
}

impl Default for IndexSchema {
    fn default() -> Self {
        Self::new()
    }
}
