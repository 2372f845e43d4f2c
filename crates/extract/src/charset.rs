//! Working out which text encoding a captured message uses.
//!
//! In order of precedence:
//! 1. the `charset` parameter of the transport `content-type` header,
//! 2. a declaration inside the markup itself (`<meta http-equiv>` or
//!    `<meta charset>`), looked for only in the first few kilobytes and only
//!    inside `<head>`,
//! 3. [`DEFAULT_CHARSET`].

use crate::headers::Headers;
use crate::markup::{Token, Tokenizer};
use crate::truncate::{SNIFF_PREFIX_BYTES, safe_truncate};
use encoding_rs::Encoding;
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Charset assumed when neither the transport nor the content declares one.
pub const DEFAULT_CHARSET: &str = "iso-8859-1";

/// Where a resolved charset came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharsetSource {
    Header,
    Content,
    Default,
}

impl CharsetSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CharsetSource::Header => "header",
            CharsetSource::Content => "content",
            CharsetSource::Default => "default",
        }
    }
}

impl Display for CharsetSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// The encoding [`DEFAULT_CHARSET`] resolves to.
pub fn default_encoding() -> &'static Encoding {
    // "iso-8859-1" is a label for windows-1252 in the encoding standard.
    encoding_rs::WINDOWS_1252
}

/// Extract the `charset` parameter from a `content-type` value.
///
/// Parameter names match case-insensitively, the value is trimmed and any
/// surrounding quotes removed. Returns an empty string when there is none.
///
/// # Examples
///
/// ```rust
/// use trawl_extract::find_charset;
/// assert_eq!(find_charset("text/html; Charset=\"UTF-8\""), "UTF-8");
/// assert_eq!(find_charset("text/html"), "");
/// ```
pub fn find_charset(content_type: &str) -> &str {
    content_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("charset"))
        .map(|(_, value)| value.trim().trim_matches(|c| c == '"' || c == '\'').trim())
        .unwrap_or_default()
}

/// Look for a charset declared in the markup of `first_block`.
///
/// Only the first [`SNIFF_PREFIX_BYTES`] are looked at, and scanning stops at
/// `</head>` or `<body>`. Malformed markup is never an error, it just doesn't
/// match.
pub fn sniff_content_charset(first_block: &[u8]) -> Option<String> {
    let prefix = safe_truncate(first_block, SNIFF_PREFIX_BYTES);
    // Declarations are ASCII in every encoding worth sniffing, so a byte-wise
    // widening is enough to tokenize without knowing the encoding yet.
    let text: String = prefix.iter().map(|&b| b as char).collect();

    let mut found: Option<String> = None;
    let mut done = false;
    let mut sink = |token: Token| {
        if done || found.is_some() {
            return;
        }
        match token {
            Token::StartTag(tag) if tag.name == "body" => done = true,
            Token::EndTag(tag) if tag.name == "head" => done = true,
            Token::StartTag(tag) if tag.name == "meta" => {
                if let Some(charset) = tag.attribute("charset").map(str::trim)
                    && !charset.is_empty()
                {
                    found = Some(charset.to_string());
                } else if tag.attribute("http-equiv").is_some_and(|v| v.trim().eq_ignore_ascii_case("content-type"))
                    && let Some(content) = tag.attribute("content")
                    && !find_charset(content).is_empty()
                {
                    found = Some(find_charset(content).to_string());
                }
            },
            _ => {},
        }
    };
    let mut tokenizer = Tokenizer::new();
    tokenizer.feed(&text, &mut sink);
    tokenizer.finish(&mut sink);
    if found.is_none() {
        tracing::trace!(scanned = prefix.len(), "no in-content charset declaration");
    }
    found
}

/// Resolve the charset name for a message, with its source.
pub fn determine_encoding(headers: &Headers, first_block: &[u8]) -> (String, CharsetSource) {
    if let Some(content_type) = headers.get("content-type") {
        let charset = find_charset(content_type);
        if !charset.is_empty() {
            return (charset.to_string(), CharsetSource::Header);
        }
    }
    match sniff_content_charset(first_block) {
        Some(charset) => (charset, CharsetSource::Content),
        None => (DEFAULT_CHARSET.to_string(), CharsetSource::Default),
    }
}

/// Like [`determine_encoding`], but resolves to a decoder. Names that aren't
/// a known encoding fall back to the default.
pub fn determine_encoding_lenient(headers: &Headers, first_block: &[u8]) -> (&'static Encoding, CharsetSource) {
    let (charset, source) = determine_encoding(headers, first_block);
    match Encoding::for_label(charset.as_bytes()) {
        Some(encoding) => (encoding, source),
        None => {
            tracing::debug!(charset = %charset, source = %source, "unknown charset, using default");
            (default_encoding(), CharsetSource::Default)
        },
    }
}
