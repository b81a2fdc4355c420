//! Structured argument view handed to charms.

use serde_json::Value;

use super::parser::split_top_level;
use super::tier::Tier;
use super::value::to_text;

/// Arguments of one invocation, after tier detection (and interpolation for
/// charms that take interpolated arguments).
#[derive(Debug, Clone, PartialEq)]
pub struct Args {
    tier: Tier,
    value: Value,
    text: String,
}

impl Args {
    /// Assemble arguments from their parts.
    pub fn new(tier: Tier, value: Value, text: impl Into<String>) -> Self {
        Self {
            tier,
            value,
            text: text.into(),
        }
    }

    /// Arguments parsed from payload text without interpolation.
    pub fn parse(payload: &str) -> Self {
        Self::parse_with(payload, None)
    }

    /// Like [`Args::parse`], naming only the declared `params`.
    pub fn parse_with(payload: &str, params: Option<&[&str]>) -> Self {
        let detection = super::tier::detect_with(payload, params);
        Self::new(detection.tier, detection.value, payload.trim())
    }

    /// Detected tier.
    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Normalised structured value.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Payload text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Whether the payload was empty.
    pub fn is_empty(&self) -> bool {
        self.value.is_null()
    }

    /// Look up an argument by name, falling back to its position.
    ///
    /// Tier 1 exposes its whole text at position 0; tier 2 keys unnamed
    /// segments by their segment index; tier 3 objects are looked up by name and arrays
    /// by position.
    pub fn get(&self, name: &str, position: usize) -> Option<&Value> {
        match &self.value {
            Value::Object(map) => map.get(name).or_else(|| {
                if self.tier == Tier::KeyValue {
                    map.get(&position.to_string())
                } else {
                    None
                }
            }),
            Value::Array(items) => items.get(position),
            Value::Null => None,
            other => (position == 0).then_some(other),
        }
    }

    /// First argument found under any of `names`, then by position.
    pub fn get_any(&self, names: &[&str], position: usize) -> Option<&Value> {
        names
            .iter()
            .find_map(|name| self.named(name))
            .or_else(|| self.get("", position))
    }

    /// Named argument only.
    pub fn named(&self, name: &str) -> Option<&Value> {
        match &self.value {
            Value::Object(map) => map.get(name),
            _ => None,
        }
    }

    /// Argument rendered as text.
    pub fn text_at(&self, name: &str, position: usize) -> Option<String> {
        self.get(name, position).map(to_text)
    }

    /// Positional arguments in order.
    pub fn positional(&self) -> Vec<Value> {
        match &self.value {
            Value::Null => Vec::new(),
            Value::Array(items) => items.clone(),
            Value::Object(map) if self.tier == Tier::KeyValue => map
                .iter()
                .filter(|(key, _)| key.bytes().all(|byte| byte.is_ascii_digit()))
                .map(|(_, value)| value.clone())
                .collect(),
            Value::Object(_) => Vec::new(),
            other => vec![other.clone()],
        }
    }

    /// Arguments as a list. Tier-1 text is split on top-level commas.
    pub fn list(&self) -> Vec<Value> {
        match &self.value {
            Value::String(text) => split_top_level(text, b',')
                .into_iter()
                .map(|item| Value::String(item.trim().to_string()))
                .filter(|item| item.as_str() != Some(""))
                .collect(),
            _ => self.positional(),
        }
    }
}
