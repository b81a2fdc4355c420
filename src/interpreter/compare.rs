//! Comparison primitive shared by `if`, `while`, and `assert`.

use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::runtime::error::{CharmError, CharmResult};

use super::value::{as_number, to_text, type_name};

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// `===`
    StrictEq,
    /// `!==`
    StrictNe,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `>=`
    Ge,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `<`
    Lt,
    /// `contains`
    Contains,
    /// `matches` (regular expression)
    Matches,
    /// `startsWith`
    StartsWith,
    /// `endsWith`
    EndsWith,
    /// `is` (type check)
    Is,
}

/// Symbolic operators, longest first so `===` wins over `==`.
const SYMBOLS: [(&str, Operator); 8] = [
    ("===", Operator::StrictEq),
    ("!==", Operator::StrictNe),
    ("==", Operator::Eq),
    ("!=", Operator::Ne),
    (">=", Operator::Ge),
    ("<=", Operator::Le),
    (">", Operator::Gt),
    ("<", Operator::Lt),
];

const WORDS: [(&str, Operator); 5] = [
    ("contains", Operator::Contains),
    ("matches", Operator::Matches),
    ("startsWith", Operator::StartsWith),
    ("endsWith", Operator::EndsWith),
    ("is", Operator::Is),
];

impl Operator {
    /// Spelling used in scripts.
    pub fn symbol(self) -> &'static str {
        SYMBOLS
            .iter()
            .chain(WORDS.iter())
            .find(|(_, op)| *op == self)
            .map(|(symbol, _)| *symbol)
            .unwrap_or("?")
    }

    /// Apply the operator to two operands.
    pub fn apply(self, left: &Value, right: &Value) -> CharmResult<bool> {
        let result = match self {
            Operator::Eq => loose_eq(left, right),
            Operator::Ne => !loose_eq(left, right),
            Operator::StrictEq => strict_eq(left, right),
            Operator::StrictNe => !strict_eq(left, right),
            Operator::Gt => order(left, right) == Ordering::Greater,
            Operator::Ge => order(left, right) != Ordering::Less,
            Operator::Lt => order(left, right) == Ordering::Less,
            Operator::Le => order(left, right) != Ordering::Greater,
            Operator::Contains => contains(left, right),
            Operator::StartsWith => to_text(left).starts_with(&to_text(right)),
            Operator::EndsWith => to_text(left).ends_with(&to_text(right)),
            Operator::Matches => {
                let pattern = to_text(right);
                let regex = Regex::new(&pattern)
                    .map_err(|err| CharmError::Parse(format!("invalid pattern `{pattern}`: {err}")))?;
                regex.is_match(&to_text(left))
            }
            Operator::Is => is_type(left, &to_text(right))?,
        };
        Ok(result)
    }
}

impl FromStr for Operator {
    type Err = CharmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        SYMBOLS
            .iter()
            .find(|(symbol, _)| *symbol == s)
            .or_else(|| WORDS.iter().find(|(word, _)| word.eq_ignore_ascii_case(s)))
            .map(|(_, op)| *op)
            .ok_or_else(|| CharmError::UnknownOperator(s.to_string()))
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Split a textual condition at its first top-level operator.
///
/// Operators inside nested invocations, structured literals, or double-quoted
/// strings are ignored. Word operators must be surrounded by whitespace.
pub fn split_condition(text: &str) -> Option<(&str, Operator, &str)> {
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;

    for index in 0..bytes.len() {
        let ch = bytes[index];
        if in_string {
            if ch == b'"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            b'"' => {
                in_string = true;
                continue;
            }
            b'[' | b'{' => {
                depth += 1;
                continue;
            }
            b']' | b'}' => {
                depth -= 1;
                continue;
            }
            _ if depth > 0 || !text.is_char_boundary(index) => continue,
            _ => {}
        }

        let rest = &text[index..];
        if let Some((symbol, op)) = SYMBOLS.iter().find(|(symbol, _)| rest.starts_with(symbol)) {
            return Some((&text[..index], *op, &text[index + symbol.len()..]));
        }

        if index > 0 && bytes[index - 1].is_ascii_whitespace() {
            for (word, op) in WORDS.iter() {
                let end = index + word.len();
                let fits = rest.len() > word.len()
                    && rest
                        .get(..word.len())
                        .is_some_and(|head| head.eq_ignore_ascii_case(word))
                    && bytes[end].is_ascii_whitespace();
                if fits {
                    return Some((&text[..index], *op, &text[end..]));
                }
            }
        }
    }
    None
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (as_number(left), as_number(right)) {
        (Some(a), Some(b)) => a == b,
        _ => match (left, right) {
            (Value::Array(_) | Value::Object(_), Value::Array(_) | Value::Object(_)) => left == right,
            _ => to_text(left) == to_text(right),
        },
    }
}

fn strict_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn order(left: &Value, right: &Value) -> Ordering {
    match (as_number(left), as_number(right)) {
        (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        _ => to_text(left).cmp(&to_text(right)),
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::Array(items) => items.iter().any(|item| loose_eq(item, needle)),
        Value::Object(map) => map.contains_key(&to_text(needle)),
        other => to_text(other).contains(&to_text(needle)),
    }
}

fn is_type(value: &Value, expected: &str) -> CharmResult<bool> {
    let expected = expected.trim().to_ascii_lowercase();
    let matched = match expected.as_str() {
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "empty" => match value {
            Value::Null => true,
            Value::String(text) => text.is_empty(),
            Value::Array(items) => items.is_empty(),
            Value::Object(map) => map.is_empty(),
            _ => false,
        },
        "string" | "boolean" | "array" | "object" | "null" => type_name(value) == expected,
        other => return Err(CharmError::UnknownOperator(format!("is {other}"))),
    };
    Ok(matched)
}
