//! The header block that starts every cached message.
//!
//! ```text
//! uri: http://example.com/page
//! content-type: text/html; charset=utf-8
//!
//! <html>...
//! ```
//!
//! One `key: value` pair per line, keys compared case-insensitively and
//! stored lower-cased, values trimmed, terminated by a blank line. Everything
//! after the blank line is the body.

use std::collections::BTreeMap;
use std::io::{self, BufRead, Read, Write};

/// Upper bound on a single header line; longer lines are cut short.
pub const MAX_HEADER_LINE: usize = 64 * 1024;

/// Ordered, case-insensitive header map.
///
/// Keeps insertion order so a message is written back the way it was
/// captured; a repeated key replaces the earlier value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header, lower-casing the key and trimming the value.
    pub fn insert(&mut self, key: impl AsRef<str>, value: impl AsRef<str>) {
        let key = key.as_ref().trim().to_ascii_lowercase();
        let value = value.as_ref().trim().to_string();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.iter().find(|(k, _)| k.eq_ignore_ascii_case(key)).map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_map(self) -> BTreeMap<String, String> {
        self.entries.into_iter().collect()
    }
}

impl<K: AsRef<str>, V: AsRef<str>> FromIterator<(K, V)> for Headers {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.insert(k, v);
        }
        headers
    }
}

/// Read the header block from the start of a message, leaving `reader`
/// positioned on the first byte of the body.
///
/// Lines without a colon are ignored. End of input before the blank line
/// simply ends the block: an empty message has empty headers and no body.
pub fn read_header_block<R: BufRead>(reader: &mut R) -> io::Result<Headers> {
    let mut headers = Headers::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        let read = reader.by_ref().take(MAX_HEADER_LINE as u64).read_until(b'\n', &mut line)?;
        if read == 0 {
            break;
        }
        if read == MAX_HEADER_LINE && line.last() != Some(&b'\n') {
            // The rest of an overlong line is dropped, not read as a new line.
            reader.skip_until(b'\n')?;
        }
        while matches!(line.last(), Some(b'\n' | b'\r')) {
            line.pop();
        }
        if line.is_empty() {
            break;
        }
        let line = String::from_utf8_lossy(&line);
        match line.split_once(':') {
            Some((key, value)) if !key.trim().is_empty() => headers.insert(key, value),
            _ => tracing::trace!(line = %line, "ignoring malformed header line"),
        }
    }
    Ok(headers)
}

/// Write a header block, including the blank terminator line.
///
/// Line breaks inside values are flattened to spaces so the block stays
/// parseable.
pub fn write_header_block<W: Write>(headers: &Headers, writer: &mut W) -> io::Result<()> {
    for (key, value) in headers.iter() {
        let value: String = value.chars().map(|c| if matches!(c, '\r' | '\n') { ' ' } else { c }).collect();
        writeln!(writer, "{key}: {value}")?;
    }
    writer.write_all(b"\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_keys_are_case_insensitive() {
        let mut headers = Headers::new();
        headers.insert("Content-Type", " text/html ");
        assert_eq!(headers.get("content-type"), Some("text/html"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/html"));
        headers.insert("CONTENT-type", "text/plain");
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.iter().next(), Some(("content-type", "text/plain")));
    }

    #[test]
    fn test_read_leaves_body() {
        let mut reader = Cursor::new(b"URI: http://a/\r\nDate:  today \r\n\r\n<p>body</p>".to_vec());
        let headers = read_header_block(&mut reader).unwrap();
        assert_eq!(headers.get("uri"), Some("http://a/"));
        assert_eq!(headers.get("date"), Some("today"));
        let mut body = String::new();
        reader.read_to_string(&mut body).unwrap();
        assert_eq!(body, "<p>body</p>");
    }

    #[test]
    fn test_value_keeps_colons() {
        let mut reader = Cursor::new(b"uri: http://example.com:8080/x\n\n".to_vec());
        let headers = read_header_block(&mut reader).unwrap();
        assert_eq!(headers.get("uri"), Some("http://example.com:8080/x"));
    }

    #[test]
    fn test_malformed_lines_ignored() {
        let mut reader = Cursor::new(b"no colon here\n: empty key\nkey: value\n\n".to_vec());
        let headers = read_header_block(&mut reader).unwrap();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("key"), Some("value"));
    }

    #[test]
    fn test_overlong_line_is_cut() {
        let mut input = format!("title: {}", "x".repeat(MAX_HEADER_LINE)).into_bytes();
        input.extend_from_slice(b"tail: not a header\nuri: http://a/\n\nbody");
        let mut reader = Cursor::new(input);
        let headers = read_header_block(&mut reader).unwrap();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("title").unwrap().len(), MAX_HEADER_LINE - "title: ".len());
        assert!(!headers.contains("tail"));
        assert_eq!(headers.get("uri"), Some("http://a/"));
        let mut body = String::new();
        reader.read_to_string(&mut body).unwrap();
        assert_eq!(body, "body");
    }

    #[test]
    fn test_empty_inputs() {
        assert!(read_header_block(&mut Cursor::new(Vec::new())).unwrap().is_empty());
        assert!(read_header_block(&mut Cursor::new(b"\n".to_vec())).unwrap().is_empty());
    }

    #[test]
    fn test_written_block_reads_back() {
        let headers: Headers = [("uri", "http://a/"), ("title", "two\nlines")].into_iter().collect();
        let mut out = Vec::new();
        write_header_block(&headers, &mut out).unwrap();
        assert_eq!(out, b"uri: http://a/\ntitle: two lines\n\n");
        let parsed = read_header_block(&mut Cursor::new(out)).unwrap();
        assert_eq!(parsed.get("title"), Some("two lines"));
    }
}
