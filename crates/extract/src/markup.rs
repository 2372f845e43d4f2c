//! A minimal streaming markup tokenizer.
//!
//! Only the narrow grammar needed for charset sniffing and distillation is
//! understood: start/end tags with attributes, comments and declarations, and
//! the raw-text bodies of `<script>`/`<style>`. Input is fed in arbitrary
//! chunks and partial tags are carried across [`Tokenizer::feed`] calls, so
//! the concatenated token stream never depends on where the chunks split.
//!
//! Nothing here fails: markup that doesn't fit the grammar comes back out as
//! text.

/// Longest tag (or comment) held back while waiting for its closing `>`.
/// Anything longer is released as text. This is the lookback window that
/// keeps tag literals intact across chunk boundaries.
pub const MAX_TAG_LENGTH: usize = 1024;

/// Elements whose content is raw text until the matching end tag.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

/// A start or end tag, with its original bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tag {
    /// Lower-cased element name.
    pub name: String,
    /// Lower-cased attribute names, values as written (quotes removed).
    pub attributes: Vec<(String, String)>,
    /// The tag exactly as it appeared in the input.
    pub raw: String,
    pub self_closing: bool,
}

impl Tag {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Text(String),
    StartTag(Tag),
    EndTag(Tag),
    /// Comments, doctypes and processing instructions, verbatim.
    Markup(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quote {
    Double,
    Single,
    Unquoted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Data,
    TagOpen,
    EndTagOpen,
    TagName,
    BeforeAttributeName,
    AttributeName,
    AfterAttributeName,
    BeforeAttributeValue,
    AttributeValue(Quote),
    SelfClosingStart,
    Declaration,
    Comment,
    RawText,
    RawTextEndTag,
}

enum Step {
    Consumed,
    Reprocess,
}

#[derive(Debug)]
pub struct Tokenizer {
    state: State,
    text: String,
    raw: String,
    tag: Tag,
    is_end_tag: bool,
    attribute_name: String,
    attribute_value: String,
    raw_text_element: Option<String>,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tokenizer {
    pub fn new() -> Self {
        Self {
            state: State::Data,
            text: String::new(),
            raw: String::new(),
            tag: Tag::default(),
            is_end_tag: false,
            attribute_name: String::new(),
            attribute_value: String::new(),
            raw_text_element: None,
        }
    }

    /// Returns `true` while a tag or comment is held back waiting for more input.
    pub fn in_markup(&self) -> bool {
        !matches!(self.state, State::Data | State::RawText)
    }

    /// Tokenize the next chunk of input.
    pub fn feed(&mut self, chunk: &str, sink: &mut impl FnMut(Token)) {
        for c in chunk.chars() {
            while let Step::Reprocess = self.step(c, sink) {}
        }
        self.flush_text(sink);
    }

    /// Signal end of input; anything still held back is released as text.
    pub fn finish(&mut self, sink: &mut impl FnMut(Token)) {
        if self.in_markup() {
            self.abandon_markup();
        }
        self.flush_text(sink);
    }

    fn step(&mut self, c: char, sink: &mut impl FnMut(Token)) -> Step {
        match self.state {
            State::Data => {
                if c == '<' {
                    self.begin_markup(State::TagOpen);
                } else {
                    self.text.push(c);
                }
            },
            State::TagOpen => match c {
                c if c.is_ascii_alphabetic() => self.begin_tag(c, false),
                '/' => self.advance(c, State::EndTagOpen),
                '!' | '?' => self.advance(c, State::Declaration),
                _ => return self.reject_markup(),
            },
            State::EndTagOpen => match c {
                c if c.is_ascii_alphabetic() => self.begin_tag(c, true),
                _ => return self.reject_markup(),
            },
            State::TagName => match c {
                c if c.is_whitespace() => self.advance(c, State::BeforeAttributeName),
                '/' => self.advance(c, State::SelfClosingStart),
                '>' => self.emit_tag(c, sink),
                c => {
                    self.tag.name.push(c.to_ascii_lowercase());
                    self.advance(c, State::TagName);
                },
            },
            State::BeforeAttributeName => match c {
                c if c.is_whitespace() => self.advance(c, State::BeforeAttributeName),
                '/' => self.advance(c, State::SelfClosingStart),
                '>' => self.emit_tag(c, sink),
                c => {
                    self.attribute_name.push(c.to_ascii_lowercase());
                    self.advance(c, State::AttributeName);
                },
            },
            State::AttributeName => match c {
                c if c.is_whitespace() => self.advance(c, State::AfterAttributeName),
                '=' => self.advance(c, State::BeforeAttributeValue),
                '/' => {
                    self.push_attribute();
                    self.advance(c, State::SelfClosingStart);
                },
                '>' => {
                    self.push_attribute();
                    self.emit_tag(c, sink);
                },
                c => {
                    self.attribute_name.push(c.to_ascii_lowercase());
                    self.advance(c, State::AttributeName);
                },
            },
            State::AfterAttributeName => match c {
                c if c.is_whitespace() => self.advance(c, State::AfterAttributeName),
                '=' => self.advance(c, State::BeforeAttributeValue),
                '/' => {
                    self.push_attribute();
                    self.advance(c, State::SelfClosingStart);
                },
                '>' => {
                    self.push_attribute();
                    self.emit_tag(c, sink);
                },
                c => {
                    self.push_attribute();
                    self.attribute_name.push(c.to_ascii_lowercase());
                    self.advance(c, State::AttributeName);
                },
            },
            State::BeforeAttributeValue => match c {
                c if c.is_whitespace() => self.advance(c, State::BeforeAttributeValue),
                '"' => self.advance(c, State::AttributeValue(Quote::Double)),
                '\'' => self.advance(c, State::AttributeValue(Quote::Single)),
                '>' => {
                    self.push_attribute();
                    self.emit_tag(c, sink);
                },
                c => {
                    self.attribute_value.push(c);
                    self.advance(c, State::AttributeValue(Quote::Unquoted));
                },
            },
            State::AttributeValue(quote) => match (quote, c) {
                (Quote::Double, '"') | (Quote::Single, '\'') => {
                    self.push_attribute();
                    self.advance(c, State::BeforeAttributeName);
                },
                (Quote::Unquoted, c) if c.is_whitespace() => {
                    self.push_attribute();
                    self.advance(c, State::BeforeAttributeName);
                },
                (Quote::Unquoted, '>') => {
                    self.push_attribute();
                    self.emit_tag(c, sink);
                },
                (quote, c) => {
                    self.attribute_value.push(c);
                    self.advance(c, State::AttributeValue(quote));
                },
            },
            State::SelfClosingStart => match c {
                '>' => {
                    self.tag.self_closing = true;
                    self.emit_tag(c, sink);
                },
                _ => {
                    self.state = State::BeforeAttributeName;
                    return Step::Reprocess;
                },
            },
            State::Declaration => {
                self.advance(c, State::Declaration);
                if self.raw == "<!--" {
                    self.state = State::Comment;
                } else if c == '>' && self.state == State::Declaration {
                    self.emit_markup(sink);
                }
            },
            State::Comment => {
                self.advance(c, State::Comment);
                // "<!---->" is the shortest complete comment.
                if self.state == State::Comment && self.raw.len() >= 7 && self.raw.ends_with("-->") {
                    self.emit_markup(sink);
                }
            },
            State::RawText => {
                if c == '<' {
                    self.begin_markup(State::RawTextEndTag);
                } else {
                    self.text.push(c);
                }
            },
            State::RawTextEndTag => {
                // Matching "</name" against what has been held back so far,
                // then something that ends the name.
                let element = self.raw_text_element.as_deref().unwrap_or_default();
                let matched = self.raw.len() - 1;
                if matched == element.len() + 1 {
                    if !(c.is_whitespace() || c == '/' || c == '>') {
                        return self.reject_markup();
                    }
                    self.tag = Tag {
                        name: element.to_string(),
                        ..Tag::default()
                    };
                    self.is_end_tag = true;
                    self.raw_text_element = None;
                    self.state = State::TagName;
                    return Step::Reprocess;
                }
                let expected = if matched == 0 { Some('/') } else { element.chars().nth(matched - 1) };
                match expected {
                    Some(e) if e.eq_ignore_ascii_case(&c) => self.raw.push(c),
                    _ => return self.reject_markup(),
                }
            },
        }
        Step::Consumed
    }

    fn begin_markup(&mut self, state: State) {
        self.raw.clear();
        self.raw.push('<');
        self.state = state;
    }

    fn begin_tag(&mut self, first: char, is_end_tag: bool) {
        self.tag = Tag {
            name: first.to_ascii_lowercase().to_string(),
            ..Tag::default()
        };
        self.is_end_tag = is_end_tag;
        self.advance(first, State::TagName);
    }

    /// Record `c` as part of the held-back markup and move to `next`,
    /// releasing everything as text if the markup grew too long.
    fn advance(&mut self, c: char, next: State) {
        self.raw.push(c);
        self.state = next;
        if self.raw.len() > MAX_TAG_LENGTH {
            self.abandon_markup();
        }
    }

    /// The held-back `<...` turned out not to be markup; it becomes text and
    /// the current character is looked at again.
    fn reject_markup(&mut self) -> Step {
        self.abandon_markup();
        Step::Reprocess
    }

    fn abandon_markup(&mut self) {
        self.text.push_str(&self.raw);
        self.raw.clear();
        self.attribute_name.clear();
        self.attribute_value.clear();
        self.state = match self.raw_text_element {
            Some(_) => State::RawText,
            None => State::Data,
        };
    }

    fn push_attribute(&mut self) {
        if !self.attribute_name.is_empty() {
            let name = std::mem::take(&mut self.attribute_name);
            let value = std::mem::take(&mut self.attribute_value);
            self.tag.attributes.push((name, value));
        }
        self.attribute_value.clear();
    }

    fn emit_tag(&mut self, c: char, sink: &mut impl FnMut(Token)) {
        self.raw.push(c);
        self.flush_text(sink);
        let mut tag = std::mem::take(&mut self.tag);
        tag.raw = std::mem::take(&mut self.raw);
        self.state = State::Data;
        if self.is_end_tag {
            sink(Token::EndTag(tag));
            return;
        }
        if !tag.self_closing && RAW_TEXT_ELEMENTS.contains(&tag.name.as_str()) {
            self.raw_text_element = Some(tag.name.clone());
            self.state = State::RawText;
        }
        sink(Token::StartTag(tag));
    }

    fn emit_markup(&mut self, sink: &mut impl FnMut(Token)) {
        self.flush_text(sink);
        sink(Token::Markup(std::mem::take(&mut self.raw)));
        self.state = State::Data;
    }

    fn flush_text(&mut self, sink: &mut impl FnMut(Token)) {
        if !self.text.is_empty() {
            sink(Token::Text(std::mem::take(&mut self.text)));
        }
    }
}

/// Tokenize a complete string.
pub fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut sink = |token| tokens.push(token);
    let mut tokenizer = Tokenizer::new();
    tokenizer.feed(input, &mut sink);
    tokenizer.finish(&mut sink);
    tokens
}

/// Reduce markup to its visible text: tags and comments become word breaks,
/// script and style bodies are dropped, whitespace runs collapse to one space.
pub fn visible_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut hidden = false;
    let mut sink = |token: Token| match token {
        Token::Text(text) if !hidden => out.push_str(&text),
        Token::StartTag(tag) => {
            hidden = RAW_TEXT_ELEMENTS.contains(&tag.name.as_str()) && !tag.self_closing;
            out.push(' ');
        },
        Token::EndTag(_) => {
            hidden = false;
            out.push(' ');
        },
        Token::Markup(_) => out.push(' '),
        Token::Text(_) => {},
    };
    let mut tokenizer = Tokenizer::new();
    tokenizer.feed(input, &mut sink);
    tokenizer.finish(&mut sink);
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn concat(tokens: &[Token]) -> String {
        tokens
            .iter()
            .map(|t| match t {
                Token::Text(s) | Token::Markup(s) => s.as_str(),
                Token::StartTag(tag) | Token::EndTag(tag) => tag.raw.as_str(),
            })
            .collect()
    }

    #[test]
    fn test_tags_and_text() {
        let tokens = tokenize("<p class=intro>Hi <b>there</b></p>");
        assert_eq!(tokens.len(), 6);
        let Token::StartTag(p) = &tokens[0] else { panic!("expected start tag") };
        assert_eq!(p.name, "p");
        assert_eq!(p.attribute("CLASS"), Some("intro"));
        assert_eq!(tokens[1], Token::Text("Hi ".to_string()));
        assert!(matches!(&tokens[5], Token::EndTag(t) if t.name == "p"));
    }

    #[rstest]
    #[case(r#"<meta http-equiv="Content-Type" content="text/html; charset=utf-8">"#, "content", "text/html; charset=utf-8")]
    #[case("<meta charset='koi8-r'>", "charset", "koi8-r")]
    #[case("<meta charset=utf-8/>", "charset", "utf-8/")]
    #[case("<input disabled value = x >", "value", "x")]
    fn test_attributes(#[case] input: &str, #[case] name: &str, #[case] value: &str) {
        let tokens = tokenize(input);
        let Token::StartTag(tag) = &tokens[0] else { panic!("expected start tag") };
        assert_eq!(tag.attribute(name), Some(value));
    }

    #[test]
    fn test_self_closing() {
        let tokens = tokenize("<br/><img src=a.png />");
        assert!(matches!(&tokens[0], Token::StartTag(t) if t.name == "br" && t.self_closing));
        assert!(matches!(&tokens[1], Token::StartTag(t) if t.name == "img" && t.self_closing));
    }

    #[rstest]
    #[case("a < b and c > d")]
    #[case("1 <2")]
    #[case("</ 3>")]
    #[case("<")]
    #[case("trailing <unterminated")]
    fn test_not_markup_is_text(#[case] input: &str) {
        let tokens = tokenize(input);
        assert!(tokens.iter().all(|t| matches!(t, Token::Text(_))), "{tokens:?}");
        assert_eq!(concat(&tokens), input);
    }

    #[test]
    fn test_comments_and_declarations() {
        let tokens = tokenize("<!DOCTYPE html><!-- a <b> c -->x");
        assert_eq!(tokens[0], Token::Markup("<!DOCTYPE html>".to_string()));
        assert_eq!(tokens[1], Token::Markup("<!-- a <b> c -->".to_string()));
        assert_eq!(tokens[2], Token::Text("x".to_string()));
    }

    #[test]
    fn test_script_body_is_raw_text() {
        let tokens = tokenize("<script>if (a<b) { x = '</scr'; }</script><b>");
        assert!(matches!(&tokens[0], Token::StartTag(t) if t.name == "script"));
        assert_eq!(tokens[1], Token::Text("if (a<b) { x = '</scr'; }".to_string()));
        assert!(matches!(&tokens[2], Token::EndTag(t) if t.name == "script"));
        assert!(matches!(&tokens[3], Token::StartTag(t) if t.name == "b"));
    }

    #[rstest]
    #[case::longer_name("<script>a</scriptx>b</script >", "a</scriptx>b")]
    #[case::prefix("<style>a</styles></style/>", "a</styles>")]
    fn test_raw_text_ends_only_at_whole_name(#[case] input: &str, #[case] body: &str) {
        let tokens = tokenize(input);
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[1], Token::Text(body.to_string()));
        assert!(matches!(&tokens[2], Token::EndTag(t) if input.ends_with(t.raw.as_str())));
    }

    #[test]
    fn test_oversized_tag_released_as_text() {
        let long = format!("<a title=\"{}\">", "x".repeat(MAX_TAG_LENGTH));
        let tokens = tokenize(&long);
        assert!(tokens.iter().all(|t| matches!(t, Token::Text(_))));
        assert_eq!(concat(&tokens), long);
    }

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(3)]
    #[case(7)]
    #[case(64)]
    fn test_chunking_does_not_change_output(#[case] size: usize) {
        let input = "<html><head><!-- c --><title>T</title></head>\
                     <body><p>x <strong class=\"y\">bold</strong> &amp; <script>a<b</script> 1 < 2</p></body>";
        let whole = tokenize(input);
        let mut chunked = Vec::new();
        let mut sink = |token| chunked.push(token);
        let mut tokenizer = Tokenizer::new();
        let chars: Vec<char> = input.chars().collect();
        for piece in chars.chunks(size) {
            tokenizer.feed(&piece.iter().collect::<String>(), &mut sink);
        }
        tokenizer.finish(&mut sink);
        assert_eq!(concat(&chunked), concat(&whole));
        let tags = |tokens: &[Token]| {
            tokens
                .iter()
                .filter_map(|t| match t {
                    Token::StartTag(tag) | Token::EndTag(tag) => Some(tag.clone()),
                    _ => None,
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(tags(&chunked), tags(&whole));
    }

    #[test]
    fn test_visible_text() {
        let text = visible_text("<p>Hello <b>world</b></p><script>var x;</script><!-- no -->\n<div>again</div>");
        assert_eq!(text, "Hello world again");
    }
}
