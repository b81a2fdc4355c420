//! Core store and timing charms.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::interpreter::args::Args;
use crate::interpreter::context::ExecutionContext;
use crate::interpreter::engine::{Engine, Flow};
use crate::interpreter::tier::Tier;
use crate::interpreter::value::{coerce_literal, to_text};
use crate::runtime::error::{CharmError, CharmResult};
use crate::runtime::registry::Charm;

/// `$setVar[name; value]`
pub fn set_var(args: &Args, ctx: &mut ExecutionContext) -> CharmResult<Value> {
    let name = var_name(args, "setVar")?;
    let value = match args.get("value", 1) {
        Some(Value::String(text)) if args.tier() != Tier::Structured => coerce_literal(text),
        Some(value) => value.clone(),
        None => Value::String(String::new()),
    };
    ctx.variables().set(&name, value);
    Ok(Value::Null)
}

/// `$getVar[name; default]`
pub fn get_var(args: &Args, ctx: &mut ExecutionContext) -> CharmResult<Value> {
    let name = var_name(args, "getVar")?;
    Ok(ctx
        .lookup(&name)
        .or_else(|| args.get("default", 1).cloned())
        .unwrap_or(Value::Null))
}

/// `$deleteVar[name]`
pub fn delete_var(args: &Args, ctx: &mut ExecutionContext) -> CharmResult<Value> {
    let name = var_name(args, "deleteVar")?;
    Ok(Value::Bool(ctx.variables().delete(&name)))
}

fn var_name(args: &Args, charm: &str) -> CharmResult<String> {
    args.text_at("name", 0)
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .ok_or_else(|| CharmError::invalid(charm, "missing variable name"))
}

/// `$wait[duration]`
pub struct Wait;

#[async_trait]
impl Charm for Wait {
    async fn execute(
        &self,
        args: Args,
        _ctx: &mut ExecutionContext,
        _engine: &Engine,
    ) -> CharmResult<Flow> {
        let text = args
            .get("duration", 0)
            .map(to_text)
            .ok_or_else(|| CharmError::invalid("wait", "missing duration"))?;
        let duration = parse_duration(&text)
            .ok_or_else(|| CharmError::invalid("wait", format!("invalid duration `{text}`")))?;
        tokio::time::sleep(duration).await;
        Ok(Flow::Value(Value::Null))
    }
}

/// Parse `250ms`, `2s`, `1.5m`, `1h`, or a bare number of milliseconds.
pub fn parse_duration(text: &str) -> Option<Duration> {
    let text = text.trim();
    let split = text
        .find(|ch: char| !(ch.is_ascii_digit() || ch == '.'))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let amount: f64 = number.parse().ok()?;
    let millis = match unit.trim() {
        "" | "ms" => amount,
        "s" | "sec" | "secs" => amount * 1_000.0,
        "m" | "min" | "mins" => amount * 60_000.0,
        "h" => amount * 3_600_000.0,
        _ => return None,
    };
    if !millis.is_finite() || millis < 0.0 {
        return None;
    }
    Some(Duration::from_micros((millis * 1_000.0).round() as u64))
}
