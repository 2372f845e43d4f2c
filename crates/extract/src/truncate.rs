//! Bounding the prefix that charset sniffing looks at.

use memchr::memrchr;

/// How much of a message body is scanned for an in-content charset declaration.
pub const SNIFF_PREFIX_BYTES: usize = 8 * 1024;

/// Truncates raw markup bytes to at most `max_bytes`, backing off to before
/// the last `<` if the cut would land inside a tag.
///
/// Works on raw bytes: the body's encoding is not known yet when this runs,
/// and `<`/`>` are ASCII in every encoding sniffing cares about.
///
/// # Examples
///
/// ```rust
/// use trawl_extract::safe_truncate;
/// let html = b"<head><meta charset=utf-8></head>";
/// assert_eq!(safe_truncate(html, 12), b"<head>");
/// assert_eq!(safe_truncate(html, 100), html);
/// ```
pub fn safe_truncate(markup: &[u8], max_bytes: usize) -> &[u8] {
    if markup.len() <= max_bytes {
        return markup;
    }
    let candidate = &markup[..max_bytes];
    match (memrchr(b'<', candidate), memrchr(b'>', candidate)) {
        (Some(open), Some(close)) if close > open => candidate,
        (Some(open), _) => &candidate[..open],
        (None, _) => candidate,
    }
}
