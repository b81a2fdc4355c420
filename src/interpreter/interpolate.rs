//! Variable interpolation.
//!
//! Substitutes `$$name`, `$$1`.. and `$$*` tokens in one left-to-right pass.
//! Output is never rescanned, and the text of nested `$name[...]` invocations
//! is copied through untouched so it is interpolated only when it runs.

use serde_json::Value;

use super::context::ExecutionContext;
use super::parser::{invocation_head, matching_bracket};
use super::value::to_text;

/// Interpolate every string leaf of a structured value.
///
/// A leaf that consists of exactly one named reference keeps the referenced
/// value's type, so `{"items": "$$list"}` hands the charm the list itself.
pub fn interpolate(value: &Value, ctx: &ExecutionContext) -> Value {
    match value {
        Value::String(text) => {
            if let Some(resolved) = whole_reference(text, ctx) {
                return resolved;
            }
            Value::String(interpolate_text(text, ctx))
        }
        Value::Array(items) => Value::Array(items.iter().map(|item| interpolate(item, ctx)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| (key.clone(), interpolate(item, ctx)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Interpolate variable tokens in a piece of text.
pub fn interpolate_text(text: &str, ctx: &ExecutionContext) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut index = 0;
    let mut copied = 0;

    while index < bytes.len() {
        if bytes[index] != b'$' {
            index += 1;
            continue;
        }

        if bytes.get(index + 1) != Some(&b'$') {
            // nested invocation: copy verbatim
            if let Some(open) = invocation_head(bytes, index) {
                index = match matching_bracket(bytes, open) {
                    Some(close) => close + 1,
                    None => bytes.len(),
                };
            } else {
                index += 1;
            }
            continue;
        }

        let Some((token, end)) = read_token(text, index + 2) else {
            index += 2;
            continue;
        };
        let replacement = match token {
            Token::Rest => Some(ctx.positional_args().join(" ")),
            Token::Positional(n) => Some(ctx.positional(n).to_string()),
            Token::Named(name) => ctx.lookup(name).map(|value| to_text(&value)),
        };
        if let Some(replacement) = replacement {
            out.push_str(&text[copied..index]);
            out.push_str(&replacement);
            copied = end;
        }
        index = end;
    }

    out.push_str(&text[copied..]);
    out
}

enum Token<'a> {
    Named(&'a str),
    Positional(usize),
    Rest,
}

/// Read the token after a `$$`, returning it with its end offset.
fn read_token(text: &str, start: usize) -> Option<(Token<'_>, usize)> {
    let bytes = text.as_bytes();
    let first = *bytes.get(start)?;

    if first == b'*' {
        return Some((Token::Rest, start + 1));
    }

    if first.is_ascii_digit() {
        let mut end = start;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
        let number = text[start..end].parse().ok()?;
        return Some((Token::Positional(number), end));
    }

    if !(first.is_ascii_alphabetic() || first == b'_') {
        return None;
    }
    let mut end = start + 1;
    while end < bytes.len() {
        let ch = bytes[end];
        if ch.is_ascii_alphanumeric() || ch == b'_' {
            end += 1;
        } else if ch == b'.'
            && bytes
                .get(end + 1)
                .is_some_and(|next| next.is_ascii_alphanumeric() || *next == b'_')
        {
            // dots only continue a path, a trailing one is punctuation
            end += 1;
        } else {
            break;
        }
    }
    Some((Token::Named(&text[start..end]), end))
}

fn whole_reference(text: &str, ctx: &ExecutionContext) -> Option<Value> {
    let trimmed = text.trim();
    let rest = trimmed.strip_prefix("$$")?;
    match read_token(rest, 0)? {
        (Token::Named(name), end) if end == rest.len() => ctx.lookup(name),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::context::{ActorId, Scope};
    use crate::runtime::store::VariableStore;
    use serde_json::json;
    use std::sync::Arc;

    fn context() -> ExecutionContext {
        let store = Arc::new(VariableStore::new());
        store.set("name", json!("Ada"));
        store.set("user", json!({"level": 7}));
        store.set("items", json!(["a", "b"]));
        ExecutionContext::new(ActorId::new("u1"), Scope::direct("dm1"), store)
            .with_args(["one", "two", "three"])
    }

    #[test]
    fn named_positional_and_rest() {
        let ctx = context();
        assert_eq!(interpolate_text("Hi $$name!", &ctx), "Hi Ada!");
        assert_eq!(interpolate_text("$$2/$$9/", &ctx), "two//");
        assert_eq!(interpolate_text("all: $$*", &ctx), "all: one two three");
        assert_eq!(interpolate_text("lvl $$user.level.", &ctx), "lvl 7.");
    }

    #[test]
    fn unresolved_names_stay_literal() {
        let ctx = context();
        assert_eq!(interpolate_text("$$nobody here", &ctx), "$$nobody here");
    }

    #[test]
    fn output_is_not_rescanned() {
        let ctx = context();
        ctx.variables().set("sneaky", json!("$$name"));
        assert_eq!(interpolate_text("$$sneaky", &ctx), "$$name");
    }

    #[test]
    fn nested_invocations_are_left_alone() {
        let ctx = context();
        assert_eq!(
            interpolate_text("$$name $if[$$name==Ada;yes] $$1", &ctx),
            "Ada $if[$$name==Ada;yes] one"
        );
    }

    #[test]
    fn structured_values_are_walked() {
        let ctx = context();
        let value = json!({"title": "$$name", "list": "$$items", "n": 3, "tags": ["$$1"]});
        assert_eq!(
            interpolate(&value, &ctx),
            json!({"title": "Ada", "list": ["a", "b"], "n": 3, "tags": ["one"]})
        );
    }
}
