mod charset;
mod distill;
pub mod error;
pub mod headers;
pub mod markup;
mod truncate;

use std::io::{BufReader, Cursor, Read};

use exn::ResultExt;
use tracing::instrument;

pub use crate::charset::{
    CharsetSource, DEFAULT_CHARSET, default_encoding, determine_encoding, determine_encoding_lenient, find_charset,
    sniff_content_charset,
};
pub use crate::distill::{DEFAULT_BUFFER_SIZE, DistilledDocument, Distiller, INLINE_TAGS};
use crate::error::{ErrorKind, Result};
pub use crate::headers::{Headers, read_header_block, write_header_block};
pub use crate::truncate::{SNIFF_PREFIX_BYTES, safe_truncate};

/// Easy, top-level entrypoint for distilling a cached message.
///
/// - Reads the header block,
/// - sniffs the charset from the headers and the first body block, falling
///   back to [`DEFAULT_CHARSET`] for anything unknown, and
/// - distills the body with the resolved encoding.
///
/// The resolved encoding and where it came from are recorded as the
/// `charset` and `charset-source` meta entries.
#[instrument(skip(reader), fields(charset, uri))]
pub fn distill_message<R: Read>(reader: R) -> Result<DistilledDocument> {
    let mut reader = BufReader::new(reader);
    let headers = read_header_block(&mut reader).or_raise(|| ErrorKind::Read)?;
    let mut head = Vec::with_capacity(SNIFF_PREFIX_BYTES);
    (&mut reader).take(SNIFF_PREFIX_BYTES as u64).read_to_end(&mut head).or_raise(|| ErrorKind::Read)?;

    let (encoding, source) = determine_encoding_lenient(&headers, &head);
    let span = tracing::Span::current();
    span.record("charset", encoding.name());
    if let Some(uri) = headers.get("uri") {
        span.record("uri", uri);
    }

    let mut document = Distiller::default().with_encoding(encoding).parse_body(headers, Cursor::new(head).chain(reader))?;
    document.meta.insert("charset".to_string(), encoding.name().to_ascii_lowercase());
    document.meta.insert("charset-source".to_string(), source.to_string());
    Ok(document)
}
