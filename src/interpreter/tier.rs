//! Argument tier detection.
//!
//! Every payload is classified as positional text (tier 1), `key: value`
//! pairs (tier 2), or a JSON literal (tier 3). Detection is total: a malformed
//! literal falls back to tier 2/1 and the fallback is reported in
//! [`Detection::degraded`] so callers can reject it in strict mode.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use super::parser::{contains_top_level, is_enclosed, split_top_level};
use super::value::to_text;

/// Argument syntax dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    /// Plain or comma-separated text.
    Positional = 1,
    /// `key: value; key: value` pairs.
    KeyValue = 2,
    /// JSON object or array literal.
    Structured = 3,
}

impl Tier {
    /// Numeric tier as written in documentation.
    pub fn level(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tier {}", self.level())
    }
}

/// Result of classifying a payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Detected tier.
    pub tier: Tier,
    /// Normalised arguments: `Null`, a string, or an ordered map/array.
    pub value: Value,
    /// Why a structured-looking payload was not parsed as one.
    pub degraded: Option<String>,
}

/// Classify a payload. Never fails.
pub fn detect(payload: &str) -> Detection {
    detect_with(payload, None)
}

/// Classify a payload for a charm that declares its parameter names.
///
/// With `params` set, a `word: value` segment is only named when `word` is one
/// of them; any other segment stays positional text, colon included.
pub fn detect_with(payload: &str, params: Option<&[&str]>) -> Detection {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return Detection {
            tier: Tier::Positional,
            value: Value::Null,
            degraded: None,
        };
    }

    let mut degraded = None;
    if is_enclosed(trimmed) {
        match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => {
                return Detection {
                    tier: Tier::Structured,
                    value,
                    degraded: None,
                };
            }
            Err(err) => degraded = Some(format!("malformed structured literal: {err}")),
        }
    }

    if contains_top_level(trimmed, b":;") {
        return Detection {
            tier: Tier::KeyValue,
            value: Value::Object(parse_pairs(trimmed, params)),
            degraded,
        };
    }

    Detection {
        tier: Tier::Positional,
        value: Value::String(trimmed.to_string()),
        degraded,
    }
}

/// Tier of a payload.
pub fn detect_tier(payload: &str) -> Tier {
    detect(payload).tier
}

/// Build the tier-2 map. Unnamed segments are keyed by their index among all
/// non-empty segments, so a named segment never shifts the ones after it.
fn parse_pairs(payload: &str, params: Option<&[&str]>) -> Map<String, Value> {
    let mut map = Map::new();
    let segments = split_top_level(payload, b';')
        .into_iter()
        .map(str::trim)
        .filter(|segment| !segment.is_empty());
    for (position, segment) in segments.enumerate() {
        let named = split_key(segment)
            .filter(|(key, _)| params.is_none_or(|params| params.contains(key)));
        match named {
            Some((key, value)) => {
                map.insert(key.to_string(), Value::String(value.to_string()));
            }
            None => {
                map.insert(position.to_string(), Value::String(segment.to_string()));
            }
        }
    }
    map
}

/// Render a tier-2 map back to `key: value; ...` text, positional segments
/// bare.
pub fn render_pairs(map: &Map<String, Value>) -> String {
    map.iter()
        .map(|(key, value)| {
            if key.bytes().all(|byte| byte.is_ascii_digit()) {
                to_text(value)
            } else {
                format!("{key}: {}", to_text(value))
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// `identifier: value`, where the identifier may contain `.` and `-`.
fn split_key(segment: &str) -> Option<(&str, &str)> {
    let bytes = segment.as_bytes();
    let first = *bytes.first()?;
    if !(first.is_ascii_alphabetic() || first == b'_') {
        return None;
    }
    let mut end = 1;
    while end < bytes.len()
        && (bytes[end].is_ascii_alphanumeric() || matches!(bytes[end], b'_' | b'.' | b'-'))
    {
        end += 1;
    }
    let rest = segment[end..].trim_start();
    let value = rest.strip_prefix(':')?;
    Some((&segment[..end], value.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn empty_payload_is_tier_one_null() {
        let detection = detect("   ");
        assert_eq!(detection.tier, Tier::Positional);
        assert_eq!(detection.value, Value::Null);
    }

    #[test]
    fn plain_text_is_tier_one() {
        let detection = detect(" hello, world ");
        assert_eq!(detection.tier, Tier::Positional);
        assert_eq!(detection.value, json!("hello, world"));
    }

    #[test]
    fn pairs_are_tier_two_and_keep_order() {
        let detection = detect("user: ada; reason: spam; extra");
        assert_eq!(detection.tier, Tier::KeyValue);
        let keys: Vec<_> = detection.value.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["user", "reason", "2"]);
        assert_eq!(detection.value["reason"], json!("spam"));
        assert_eq!(detection.value["2"], json!("extra"));
    }

    #[test]
    fn named_segments_do_not_shift_positions() {
        let detection = detect("1 == 1; Result: yes; no");
        assert_eq!(
            detection.value,
            json!({"0": "1 == 1", "Result": "yes", "2": "no"})
        );
    }

    #[test]
    fn undeclared_keys_stay_positional() {
        let params: &[&str] = &["condition", "then", "else"];
        let detection = detect_with("1 == 1; Result: yes; else: no", Some(params));
        assert_eq!(detection.tier, Tier::KeyValue);
        assert_eq!(
            detection.value,
            json!({"0": "1 == 1", "1": "Result: yes", "else": "no"})
        );
    }

    #[test]
    fn pairs_render_back_to_text() {
        let detection = detect("Result: yes; extra");
        let map = detection.value.as_object().unwrap();
        assert_eq!(render_pairs(map), "Result: yes; extra");
    }

    #[test]
    fn positional_segments_get_ordinals() {
        let detection = detect("$$index==2;$break[]");
        assert_eq!(detection.tier, Tier::KeyValue);
        assert_eq!(detection.value, json!({"0": "$$index==2", "1": "$break[]"}));
    }

    #[test]
    fn nested_separators_do_not_change_tier() {
        assert_eq!(detect_tier("$upper[a;b]"), Tier::Positional);
    }

    #[test]
    fn json_literals_are_tier_three() {
        let detection = detect(r#"{"fields":[{"name":"$$x"}]}"#);
        assert_eq!(detection.tier, Tier::Structured);
        assert_eq!(detection.value["fields"][0]["name"], json!("$$x"));
        assert!(detection.degraded.is_none());
    }

    #[test]
    fn nested_invocation_survives_inside_literal() {
        let detection = detect(r#"{"a":"$if[true;1;0]"}"#);
        assert_eq!(detection.tier, Tier::Structured);
        assert_eq!(detection.value, json!({"a": "$if[true;1;0]"}));
    }

    #[test]
    fn malformed_literal_degrades_observably() {
        let detection = detect("{name: ada; level: 3}");
        assert_eq!(detection.tier, Tier::Positional);
        assert!(detection.degraded.is_some());
        assert_eq!(detection.value, json!("{name: ada; level: 3}"));
    }

    proptest! {
        #[test]
        fn detection_is_total_and_deterministic(payload in ".*") {
            let first = detect(&payload);
            let second = detect(&payload);
            prop_assert!((1..=3).contains(&first.tier.level()));
            prop_assert_eq!(first, second);
        }

        #[test]
        fn bracketed_noise_never_panics(payload in "[\\[\\]{}:;,\"$a-z ]{0,40}") {
            let detection = detect(&payload);
            prop_assert!((1..=3).contains(&detection.tier.level()));
        }
    }
}
