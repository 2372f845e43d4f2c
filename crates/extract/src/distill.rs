//! Turning a captured message into metadata and normalized content.

use std::collections::BTreeMap;
use std::io::{BufReader, ErrorKind as IoErrorKind, Read};

use encoding_rs::{CoderResult, Decoder, Encoding};
use exn::ResultExt;
use tracing::instrument;

use crate::error::{ErrorKind, Result};
use crate::headers::{Headers, read_header_block};
use crate::markup::{Token, Tokenizer};

/// Short presentational tags dropped from distilled content. Their text is kept.
pub const INLINE_TAGS: &[&str] = &["b", "i", "u", "s", "em", "strong", "font", "span", "tt", "big", "small"];

/// Size of the read buffer used when none is configured.
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

/// The result of distilling one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DistilledDocument {
    /// Header block entries (lower-cased keys, trimmed values) plus anything
    /// the distiller learned from the body.
    pub meta: BTreeMap<String, String>,
    pub content: String,
}

impl DistilledDocument {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.meta.get(key).map(String::as_str)
    }
}

/// Streaming message distiller.
///
/// The body is decoded and tokenized one read at a time; the tokenizer holds
/// partial tags across reads, so the output doesn't depend on
/// [`buffer_size`](Self::with_buffer_size).
#[derive(Debug, Clone, Copy)]
pub struct Distiller {
    encoding: &'static Encoding,
    buffer_size: usize,
}

impl Default for Distiller {
    fn default() -> Self {
        Self {
            encoding: encoding_rs::UTF_8,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl Distiller {
    pub fn with_encoding(mut self, encoding: &'static Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    /// Distill a whole message: header block, then body.
    #[instrument(skip(self, reader), fields(encoding = self.encoding.name()))]
    pub fn parse<R: Read>(&self, reader: R) -> Result<DistilledDocument> {
        let mut reader = BufReader::with_capacity(self.buffer_size, reader);
        let headers = read_header_block(&mut reader).or_raise(|| ErrorKind::Read)?;
        self.parse_body(headers, reader)
    }

    /// Distill a body whose header block has already been read.
    pub fn parse_body<R: Read>(&self, headers: Headers, mut reader: R) -> Result<DistilledDocument> {
        let mut decoder = self.encoding.new_decoder();
        let mut tokenizer = Tokenizer::new();
        let mut collector = Collector::default();
        let mut sink = |token: Token| collector.push(token);
        let mut buffer = vec![0u8; self.buffer_size];
        let mut decoded = String::new();
        loop {
            let read = match reader.read(&mut buffer) {
                Ok(read) => read,
                Err(e) if e.kind() == IoErrorKind::Interrupted => continue,
                Err(e) => return Err(e).or_raise(|| ErrorKind::Read),
            };
            let last = read == 0;
            decoded.clear();
            decode_chunk(&mut decoder, &buffer[..read], &mut decoded, last);
            tokenizer.feed(&decoded, &mut sink);
            if last {
                break;
            }
        }
        tokenizer.finish(&mut sink);

        let mut meta = headers.into_map();
        let title = collector.title.split_whitespace().collect::<Vec<_>>().join(" ");
        if !title.is_empty() {
            meta.entry("title".to_string()).or_insert(title);
        }
        tracing::debug!(meta = meta.len(), content_size = collector.content.len(), "distilled message");
        Ok(DistilledDocument {
            meta,
            content: collector.content,
        })
    }
}

fn decode_chunk(decoder: &mut Decoder, mut input: &[u8], output: &mut String, last: bool) {
    loop {
        let needed = decoder.max_utf8_buffer_length(input.len()).unwrap_or(input.len() * 3 + 16);
        output.reserve(needed);
        let (result, read, _) = decoder.decode_to_string(input, output, last);
        input = &input[read..];
        match result {
            CoderResult::InputEmpty => break,
            CoderResult::OutputFull => continue,
        }
    }
}

/// Accumulates distilled content from the token stream.
#[derive(Debug, Default)]
struct Collector {
    content: String,
    title: String,
    in_title: bool,
    seen_title: bool,
}

impl Collector {
    fn push(&mut self, token: Token) {
        match token {
            Token::Text(text) => {
                if self.in_title {
                    self.title.push_str(&text);
                }
                self.content.push_str(&text);
            },
            Token::StartTag(tag) => {
                if INLINE_TAGS.contains(&tag.name.as_str()) {
                    return;
                }
                if tag.name == "title" && !self.seen_title && !tag.self_closing {
                    self.in_title = true;
                    self.seen_title = true;
                }
                self.content.push_str(&tag.raw);
            },
            Token::EndTag(tag) => {
                if INLINE_TAGS.contains(&tag.name.as_str()) {
                    return;
                }
                if tag.name == "title" {
                    self.in_title = false;
                }
                self.content.push_str(&tag.raw);
            },
            Token::Markup(markup) => self.content.push_str(&markup),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Cursor;

    const MESSAGE: &str = "URI: http://example.com/\r\nContent-Type:  text/html \r\n\r\n\
        <html><head><title>An   <i>Example</i></title></head>\
        <body><p>Some <b>bold</b>, <STRONG>strong</STRONG> and <span class=\"x\">spanned</span> text.</p>\
        <!-- <b>comment</b> --><div id=keep>kept <font color=red>red</font></div>\
        <p>1 < 2 &amp; ü</p></body></html>";

    const EXPECTED: &str = "<html><head><title>An   Example</title></head>\
        <body><p>Some bold, strong and spanned text.</p>\
        <!-- <b>comment</b> --><div id=keep>kept red</div>\
        <p>1 < 2 &amp; ü</p></body></html>";

    #[test]
    fn test_strips_inline_tags_only() {
        let doc = Distiller::default().parse(Cursor::new(MESSAGE)).unwrap();
        assert_eq!(doc.content, EXPECTED);
        assert_eq!(doc.get("uri"), Some("http://example.com/"));
        assert_eq!(doc.get("content-type"), Some("text/html"));
        assert_eq!(doc.get("title"), Some("An Example"));
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(3)]
    #[case(5)]
    #[case(13)]
    #[case(64)]
    #[case(DEFAULT_BUFFER_SIZE)]
    fn test_output_independent_of_buffer_size(#[case] buffer_size: usize) {
        let expected = Distiller::default().parse(Cursor::new(MESSAGE)).unwrap();
        let doc = Distiller::default().with_buffer_size(buffer_size).parse(Cursor::new(MESSAGE)).unwrap();
        assert_eq!(doc, expected);
    }

    #[rstest]
    #[case("")]
    #[case("\n")]
    #[case("\r\n")]
    fn test_empty_input(#[case] input: &str) {
        let doc = Distiller::default().parse(Cursor::new(input)).unwrap();
        assert!(doc.meta.is_empty());
        assert!(doc.content.is_empty());
    }

    #[test]
    fn test_header_title_wins() {
        let doc = Distiller::default()
            .parse(Cursor::new("title: From Header\n\n<title>From Body</title>"))
            .unwrap();
        assert_eq!(doc.get("title"), Some("From Header"));
    }

    #[test]
    fn test_decodes_configured_encoding() {
        let mut message = b"uri: x\n\n<p>caf".to_vec();
        message.push(0xE9);
        message.extend_from_slice(b"</p>");
        let doc = Distiller::default()
            .with_encoding(encoding_rs::WINDOWS_1252)
            .with_buffer_size(1)
            .parse(Cursor::new(message))
            .unwrap();
        assert_eq!(doc.content, "<p>café</p>");
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let doc = Distiller::default().parse(Cursor::new(b"\n<p>\xFF</p>".to_vec())).unwrap();
        assert_eq!(doc.content, "<p>\u{FFFD}</p>");
    }
}
