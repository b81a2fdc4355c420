//! Script-level failures: `try`, `throw`, and `assert`.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::interpreter::args::Args;
use crate::interpreter::context::ExecutionContext;
use crate::interpreter::engine::{Engine, Flow};
use crate::interpreter::tier::Tier;
use crate::interpreter::value::to_text;
use crate::runtime::error::{CharmError, CharmResult, Failure};
use crate::runtime::registry::Charm;

const DEFAULT_THROW_MESSAGE: &str = "Error";
const DEFAULT_ASSERT_MESSAGE: &str = "Assertion failed";

/// `$try[body; catch; finally]`
///
/// A failing body runs `catch` with the failure bound to `error`. `finally`
/// always runs last; its own failure or loop signal replaces the outcome.
pub struct Try;

#[async_trait]
impl Charm for Try {
    async fn execute(
        &self,
        args: Args,
        ctx: &mut ExecutionContext,
        engine: &Engine,
    ) -> CharmResult<Flow> {
        let body = args
            .get_any(&["body", "try"], 0)
            .ok_or_else(|| CharmError::invalid("try", "missing body"))?;
        let catch = args.get("catch", 1);
        let finally = args.get("finally", 2);

        let outcome = match engine.evaluate_arg(body, ctx).await {
            Ok(flow) => Ok(flow),
            Err(err) => match catch {
                Some(catch) => {
                    tracing::debug!(kind = err.kind(), error = %err, "caught failure");
                    ctx.push_locals();
                    bind_error(ctx, &err);
                    let handled = engine.evaluate_arg(catch, ctx).await;
                    ctx.pop_locals();
                    handled
                }
                None => Err(err),
            },
        };

        if let Some(finally) = finally {
            match engine.evaluate_arg(finally, ctx).await? {
                Flow::Value(_) => {}
                signal => return Ok(signal),
            }
        }
        outcome
    }
}

fn bind_error(ctx: &mut ExecutionContext, err: &CharmError) {
    let message = err.message();
    ctx.set_local("error", Value::String(message.clone()));
    ctx.set_local("error.message", Value::String(message));
    ctx.set_local("error.kind", Value::String(err.kind().to_string()));
    if let Some(fields) = err.fields() {
        for (key, value) in fields {
            if key != "message" && key != "kind" {
                ctx.set_local(format!("error.{key}"), value.clone());
            }
        }
    }
}

/// `$throw[message]` or `$throw[{"message": ..., "code": ...}]`
pub struct Throw;

#[async_trait]
impl Charm for Throw {
    async fn execute(
        &self,
        args: Args,
        _ctx: &mut ExecutionContext,
        _engine: &Engine,
    ) -> CharmResult<Flow> {
        Err(CharmError::Thrown(failure_from_args(&args)))
    }
}

/// Build a failure from `throw` arguments: the message comes from tier-1 text,
/// a `message` key, or the first positional argument; remaining named keys
/// become fields. Key-value text with neither is taken whole as the message.
fn failure_from_args(args: &Args) -> Failure {
    match args.value() {
        Value::Object(map) => {
            let mut fields = Map::new();
            let mut message = None;
            for (key, value) in map {
                match key.as_str() {
                    "message" => message = Some(to_text(value)),
                    "0" if args.tier() == Tier::KeyValue => {
                        message.get_or_insert_with(|| to_text(value));
                    }
                    _ if args.tier() == Tier::KeyValue && key.parse::<usize>().is_ok() => {}
                    _ => {
                        fields.insert(key.clone(), value.clone());
                    }
                }
            }
            // `$throw[Error: disk full]` names no message; the text is the message.
            if message.is_none() && args.tier() == Tier::KeyValue {
                return Failure::new(args.text());
            }
            let message = message
                .filter(|message| !message.is_empty())
                .unwrap_or_else(|| DEFAULT_THROW_MESSAGE.to_string());
            Failure::new(message).with_fields(fields)
        }
        Value::Array(items) => Failure::new(
            items
                .first()
                .map(to_text)
                .unwrap_or_else(|| DEFAULT_THROW_MESSAGE.to_string()),
        ),
        Value::Null => Failure::new(DEFAULT_THROW_MESSAGE),
        _ => Failure::new(args.text()),
    }
}

/// `$assert[condition; message; errorFields]`
pub struct Assert;

#[async_trait]
impl Charm for Assert {
    async fn execute(
        &self,
        args: Args,
        ctx: &mut ExecutionContext,
        engine: &Engine,
    ) -> CharmResult<Flow> {
        let condition = args
            .get("condition", 0)
            .ok_or_else(|| CharmError::invalid("assert", "missing condition"))?;
        if engine.test_condition(condition, ctx).await? {
            return Ok(Flow::Value(Value::Bool(true)));
        }

        let message = match args.get("message", 1) {
            Some(raw) => engine.render(raw, ctx).await?,
            None => String::new(),
        };
        let message = if message.trim().is_empty() {
            DEFAULT_ASSERT_MESSAGE.to_string()
        } else {
            message
        };

        let fields = match args.get_any(&["fields", "errorFields"], 2) {
            Some(raw) => match engine.evaluate_arg(raw, ctx).await?.into_value()? {
                Value::Object(map) => map,
                Value::String(text) if text.trim().is_empty() => Map::new(),
                Value::String(text) => match serde_json::from_str::<Value>(&text) {
                    Ok(Value::Object(map)) => map,
                    _ => {
                        return Err(CharmError::invalid(
                            "assert",
                            "error fields must be an object",
                        ));
                    }
                },
                Value::Null => Map::new(),
                _ => {
                    return Err(CharmError::invalid(
                        "assert",
                        "error fields must be an object",
                    ));
                }
            },
            None => Map::new(),
        };

        Err(CharmError::AssertionFailed(
            Failure::new(message).with_fields(fields),
        ))
    }
}
