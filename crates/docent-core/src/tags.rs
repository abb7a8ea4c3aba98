//! Parser for the `<TAG>...</TAG>` pseudo-markup spoken by the language
//! model in both ingestion and answering.
//!
//! The input is tokenized into well-formed opening (`<NAME>`) and closing
//! (`</NAME>`) tags, where `NAME` is a non-empty run of alphanumerics or
//! underscores. Anything else, including stray `<` characters and tags with
//! attributes, is plain text and never produces a token.
//!
//! Two operations are built on the tokenizer:
//!
//! - [`extract_first`] returns the first element and the remainder of the
//!   input, so callers can walk a stream left to right.
//! - [`get_tag`] returns the inner text of a named tag, or an empty string.
//!
//! # Example
//!
//! ```rust
//! use docent_core::tags::{extract_first, get_tag};
//!
//! let el = extract_first("noise <H1>Intro</H1><BODY>Hi</BODY>").unwrap();
//! assert_eq!(el.name, "H1");
//! assert_eq!(el.inner, "Intro");
//! assert_eq!(el.rest, "<BODY>Hi</BODY>");
//!
//! assert_eq!(get_tag("<ACTION>RESPOND</ACTION>", "ACTION"), "RESPOND");
//! assert_eq!(get_tag("no tags here", "ACTION"), "");
//! ```

/// Whether a token opens or closes an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    Open,
    Close,
}

/// A syntactically valid tag found in the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TagKind,
    pub name: &'a str,
    /// Byte offset of the `<`.
    pub start: usize,
    /// Byte offset just past the `>`.
    pub end: usize,
}

/// Iterator over the well-formed tags of a string, in order.
pub struct Tokenizer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    /// Try to read a tag starting at byte `lt`, which holds a `<`.
    fn read_tag(&self, lt: usize) -> Option<Token<'a>> {
        let after = &self.input[lt + 1..];
        let (kind, name_start) = match after.strip_prefix('/') {
            Some(_) => (TagKind::Close, lt + 2),
            None => (TagKind::Open, lt + 1),
        };
        let tail = &self.input[name_start..];
        let name_len: usize = tail
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_')
            .map(char::len_utf8)
            .sum();
        if name_len == 0 || !tail[name_len..].starts_with('>') {
            return None;
        }
        Some(Token {
            kind,
            name: &tail[..name_len],
            start: lt,
            end: name_start + name_len + 1,
        })
    }
}

impl<'a> Iterator for Tokenizer<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        while self.pos < self.input.len() {
            let lt = self.pos + self.input[self.pos..].find('<')?;
            match self.read_tag(lt) {
                Some(tok) => {
                    self.pos = tok.end;
                    return Some(tok);
                }
                None => self.pos = lt + 1,
            }
        }
        None
    }
}

/// An element extracted by [`extract_first`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagElement<'a> {
    /// Text between the opening and closing tag, verbatim.
    pub inner: &'a str,
    /// Tag name without brackets.
    pub name: &'a str,
    /// Everything after the closing tag.
    pub rest: &'a str,
}

/// Extract the first element of `input`.
///
/// The first well-formed opening tag wins. Returns `None` if there is no
/// opening tag, or if that tag is never closed, even when later elements
/// are complete.
pub fn extract_first(input: &str) -> Option<TagElement<'_>> {
    let mut tokens = Tokenizer::new(input);
    let open = tokens.find(|t| t.kind == TagKind::Open)?;
    let close = tokens.find(|t| t.kind == TagKind::Close && t.name == open.name)?;
    Some(TagElement {
        inner: &input[open.end..close.start],
        name: open.name,
        rest: &input[close.end..],
    })
}

/// Iterate over consecutive elements of a stream, stopping at the first
/// point where [`extract_first`] finds nothing.
pub fn elements(input: &str) -> impl Iterator<Item = TagElement<'_>> {
    let mut rest = Some(input);
    std::iter::from_fn(move || {
        let el = extract_first(rest?)?;
        rest = Some(el.rest);
        Some(el)
    })
}

/// Inner text of the first `<tag>` in `input`, up to the next `</tag>`.
///
/// Returns an empty string when the tag is missing or unclosed.
pub fn get_tag(input: &str, tag: &str) -> String {
    let mut tokens = Tokenizer::new(input).filter(|t| t.name == tag);
    let Some(open) = tokens.find(|t| t.kind == TagKind::Open) else {
        return String::new();
    };
    match tokens.find(|t| t.kind == TagKind::Close) {
        Some(close) => input[open.end..close.start].to_string(),
        None => String::new(),
    }
}
