//! Script scanner.
//!
//! Splits script text into literal text and `$name[payload]` invocations.
//! Payload boundaries are found by bracket depth so control-flow charms can
//! carry whole sub-scripts as arguments. `$$` always starts a variable token,
//! never an invocation.

use crate::runtime::error::{CharmError, CharmResult};

/// One `$name[payload]` occurrence located in script text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    /// Charm name.
    pub name: String,
    /// Raw text between the outer brackets.
    pub payload: String,
    /// Byte offset of the leading `$`.
    pub start: usize,
    /// Byte offset one past the closing `]`.
    pub end: usize,
}

/// A piece of a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Literal text, interpolated when evaluated.
    Text(String),
    /// An invocation.
    Call(Call),
}

/// Parsed script body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Script {
    /// No invocations at all.
    Literal(String),
    /// Exactly one invocation, optionally surrounded by whitespace.
    Invocation(Call),
    /// Text interleaved with invocations, or several invocations.
    Sequence(Vec<Segment>),
}

impl Script {
    /// Invocations in source order.
    pub fn calls(&self) -> Vec<&Call> {
        match self {
            Script::Literal(_) => Vec::new(),
            Script::Invocation(call) => vec![call],
            Script::Sequence(segments) => segments
                .iter()
                .filter_map(|segment| match segment {
                    Segment::Call(call) => Some(call),
                    Segment::Text(_) => None,
                })
                .collect(),
        }
    }
}

/// Parse script text into a [`Script`].
pub fn parse_script(source: &str) -> CharmResult<Script> {
    let mut parser = Parser::new(source);
    let segments = parser.parse_segments()?;

    let calls = segments
        .iter()
        .filter(|segment| matches!(segment, Segment::Call(_)))
        .count();
    let blank_text = segments.iter().all(|segment| match segment {
        Segment::Text(text) => text.trim().is_empty(),
        Segment::Call(_) => true,
    });

    if calls == 0 {
        return Ok(Script::Literal(source.to_string()));
    }
    if calls == 1 && blank_text {
        let call = segments.iter().find_map(|segment| match segment {
            Segment::Call(call) => Some(call.clone()),
            Segment::Text(_) => None,
        });
        if let Some(call) = call {
            return Ok(Script::Invocation(call));
        }
    }
    Ok(Script::Sequence(segments))
}

struct Parser<'a> {
    src: &'a str,
    bytes: &'a [u8],
    index: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            index: 0,
        }
    }

    fn eof(&self) -> bool {
        self.index >= self.bytes.len()
    }

    fn current(&self) -> Option<u8> {
        self.bytes.get(self.index).copied()
    }

    fn peek_char(&self) -> Option<u8> {
        self.bytes.get(self.index + 1).copied()
    }

    fn parse_segments(&mut self) -> CharmResult<Vec<Segment>> {
        let mut segments = Vec::new();
        let mut text_start = 0;

        while !self.eof() {
            if self.current() != Some(b'$') {
                self.index += 1;
                continue;
            }
            if self.peek_char() == Some(b'$') {
                self.index += 2;
                continue;
            }
            match self.parse_call()? {
                Some(call) => {
                    if call.start > text_start {
                        segments.push(Segment::Text(self.src[text_start..call.start].to_string()));
                    }
                    text_start = call.end;
                    self.index = call.end;
                    segments.push(Segment::Call(call));
                }
                None => self.index += 1,
            }
        }

        if text_start < self.bytes.len() {
            segments.push(Segment::Text(self.src[text_start..].to_string()));
        }
        Ok(segments)
    }

    fn parse_call(&self) -> CharmResult<Option<Call>> {
        let start = self.index;
        let Some(open) = invocation_head(self.bytes, start) else {
            return Ok(None);
        };
        let close = matching_bracket(self.bytes, open).ok_or_else(|| {
            self.error(&format!(
                "unterminated invocation `{}`",
                &self.src[start..=open]
            ))
        })?;

        Ok(Some(Call {
            name: self.src[start + 1..open].to_string(),
            payload: self.src[open + 1..close].to_string(),
            start,
            end: close + 1,
        }))
    }

    fn error(&self, message: &str) -> CharmError {
        CharmError::Parse(format!("{} at byte {}", message, self.index))
    }
}

/// If an invocation head `$name[` starts at `at`, return the index of its `[`.
pub(crate) fn invocation_head(bytes: &[u8], at: usize) -> Option<usize> {
    if bytes.get(at) != Some(&b'$') {
        return None;
    }
    let first = *bytes.get(at + 1)?;
    if !(first.is_ascii_alphabetic() || first == b'_') {
        return None;
    }
    let mut index = at + 2;
    while let Some(&ch) = bytes.get(index) {
        if is_ident_char(ch) {
            index += 1;
        } else {
            break;
        }
    }
    (bytes.get(index) == Some(&b'[')).then_some(index)
}

/// Index of the `]` closing the `[` at `open`, counting nested brackets.
pub(crate) fn matching_bracket(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (offset, &ch) in bytes[open..].iter().enumerate() {
        match ch {
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split on `separator` wherever it appears outside `[...]` and `{...}`.
pub(crate) fn split_top_level(text: &str, separator: u8) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (index, &ch) in text.as_bytes().iter().enumerate() {
        match ch {
            b'[' | b'{' => depth += 1,
            b']' | b'}' => depth -= 1,
            _ if ch == separator && depth <= 0 => {
                parts.push(&text[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

/// Whether any of `needles` occurs outside `[...]` and `{...}`.
pub(crate) fn contains_top_level(text: &str, needles: &[u8]) -> bool {
    let mut depth = 0i32;
    text.as_bytes().iter().any(|&ch| {
        match ch {
            b'[' | b'{' => depth += 1,
            b']' | b'}' => depth -= 1,
            _ => {}
        }
        depth <= 0 && needles.contains(&ch)
    })
}

/// Whether `text` is wrapped by a single `{...}` or `[...]` pair, skipping
/// delimiters inside JSON string literals.
pub(crate) fn is_enclosed(text: &str) -> bool {
    let bytes = text.as_bytes();
    let (open, close) = match bytes.first() {
        Some(b'{') => (b'{', b'}'),
        Some(b'[') => (b'[', b']'),
        _ => return false,
    };
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (index, &ch) in bytes.iter().enumerate() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            b'"' => in_string = true,
            _ if ch == open => depth += 1,
            _ if ch == close => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return index == bytes.len() - 1;
                }
            }
            _ => {}
        }
    }
    false
}

fn is_ident_char(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || ch == b'_'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_text_has_no_calls() {
        let script = parse_script("hello $$name").expect("parse");
        assert_eq!(script, Script::Literal("hello $$name".into()));
    }

    #[test]
    fn single_invocation_with_whitespace() {
        let script = parse_script("  $say[hi]\n").expect("parse");
        match script {
            Script::Invocation(call) => {
                assert_eq!(call.name, "say");
                assert_eq!(call.payload, "hi");
            }
            other => panic!("expected invocation, got {other:?}"),
        }
    }

    #[test]
    fn nested_brackets_stay_in_payload() {
        let script = parse_script(r#"$embed[{"a":"$if[true;1;0]"}]"#).expect("parse");
        match script {
            Script::Invocation(call) => {
                assert_eq!(call.name, "embed");
                assert_eq!(call.payload, r#"{"a":"$if[true;1;0]"}"#);
            }
            other => panic!("expected invocation, got {other:?}"),
        }
    }

    #[test]
    fn mixed_text_and_calls_form_a_sequence() {
        let script = parse_script("Hi $user[], you have $count[x] points").expect("parse");
        let Script::Sequence(segments) = &script else {
            panic!("expected sequence");
        };
        assert_eq!(segments.len(), 5);
        assert_eq!(script.calls().len(), 2);
        assert_eq!(segments[0], Segment::Text("Hi ".into()));
    }

    #[test]
    fn double_dollar_is_never_an_invocation() {
        let script = parse_script("$$items[0]").expect("parse");
        assert_eq!(script, Script::Literal("$$items[0]".into()));
    }

    #[test]
    fn unterminated_invocation_is_a_parse_error() {
        let err = parse_script("$say[oops").expect_err("should fail");
        assert!(matches!(err, CharmError::Parse(_)));
    }

    #[test]
    fn top_level_split_ignores_nested_separators() {
        let parts = split_top_level("a;$if[x;y];{\"k\":\"v;w\"}", b';');
        assert_eq!(parts, vec!["a", "$if[x;y]", "{\"k\":\"v;w\"}"]);
    }

    #[test]
    fn enclosure_respects_strings() {
        assert!(is_enclosed(r#"{"a":"}"}"#));
        assert!(is_enclosed("[1,[2]]"));
        assert!(!is_enclosed("[1,2];$say[x]"));
        assert!(!is_enclosed("plain"));
    }
}
