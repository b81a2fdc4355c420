//! Bounded and counted loops plus the `break`/`continue` signals.
//!
//! Loops keep a frame on the context's loop stack while they run, and expose
//! `index` (and `element` for lists) as locals to their body. `break` and
//! `continue` return a signal that travels up the evaluation stack to the
//! innermost loop. A finished loop leaves its break reason in `$$breakReason`.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

use crate::interpreter::args::Args;
use crate::interpreter::context::{ExecutionContext, LoopKind};
use crate::interpreter::engine::{Engine, Flow};
use crate::interpreter::parser::split_top_level;
use crate::runtime::error::{CharmError, CharmResult};
use crate::runtime::registry::Charm;

use super::number_arg;

/// `$while[condition; body; timeoutSeconds; maxIterations]`
pub struct While;

#[async_trait]
impl Charm for While {
    async fn execute(
        &self,
        args: Args,
        ctx: &mut ExecutionContext,
        engine: &Engine,
    ) -> CharmResult<Flow> {
        let condition = args
            .get("condition", 0)
            .cloned()
            .ok_or_else(|| CharmError::invalid("while", "missing condition"))?;
        let body = body_arg(&args, "while", 1)?;

        let timeout_secs = number_arg(engine, ctx, &args, "while", &["timeout", "timeoutSeconds"], 2)
            .await?
            .unwrap_or(engine.config().while_timeout_secs);
        let max_iterations = number_arg(engine, ctx, &args, "while", &["maxIterations", "max"], 3)
            .await?
            .map(|max| max.max(0.0) as usize)
            .unwrap_or(engine.config().while_max_iterations);
        if !timeout_secs.is_finite() || timeout_secs < 0.0 {
            return Err(CharmError::invalid("while", "timeout must be a non-negative number"));
        }
        let timeout = Duration::from_secs_f64(timeout_secs);

        ctx.enter_loop(LoopKind::While);
        let result = run_while(engine, ctx, &condition, &body, timeout, timeout_secs, max_iterations).await;
        ctx.exit_loop();
        result
    }
}

async fn run_while(
    engine: &Engine,
    ctx: &mut ExecutionContext,
    condition: &Value,
    body: &Value,
    timeout: Duration,
    timeout_secs: f64,
    max_iterations: usize,
) -> CharmResult<Flow> {
    let started = Instant::now();
    let mut results = Vec::new();
    let mut iterations = 0usize;
    let mut broken = None;

    loop {
        if started.elapsed() > timeout {
            return Err(CharmError::LoopTimeout {
                seconds: timeout_secs,
                iterations,
            });
        }
        if iterations >= max_iterations {
            return Err(CharmError::LoopIterationLimit {
                limit: max_iterations,
            });
        }
        if !engine.test_condition(condition, ctx).await? {
            break;
        }

        match run_body(engine, ctx, body, iterations, None).await? {
            Flow::Value(value) => results.push(value),
            Flow::Break(reason) => {
                tracing::debug!(iterations, ?reason, "while loop broken");
                broken = reason;
                break;
            }
            Flow::Continue => {}
        }
        iterations += 1;
        tokio::task::yield_now().await;
    }

    ctx.set_break_reason(broken);
    Ok(Flow::Value(Value::Array(results)))
}

/// `$loop[times | list; body]`
pub struct Loop;

#[async_trait]
impl Charm for Loop {
    async fn execute(
        &self,
        args: Args,
        ctx: &mut ExecutionContext,
        engine: &Engine,
    ) -> CharmResult<Flow> {
        let source = args
            .get_any(&["times", "count", "items"], 0)
            .cloned()
            .ok_or_else(|| CharmError::invalid("loop", "missing `times`"))?;
        let body = body_arg(&args, "loop", 1)?;

        let source = engine.evaluate_arg(&source, ctx).await?.into_value()?;
        let items = Items::from_value("loop", source, true)?;
        iterate(engine, ctx, LoopKind::Loop, &items, &body, "element").await
    }
}

/// `$foreach[list; body; as]`
pub struct Foreach;

#[async_trait]
impl Charm for Foreach {
    async fn execute(
        &self,
        args: Args,
        ctx: &mut ExecutionContext,
        engine: &Engine,
    ) -> CharmResult<Flow> {
        let source = args
            .get_any(&["items", "array", "list"], 0)
            .cloned()
            .ok_or_else(|| CharmError::invalid("foreach", "missing `items`"))?;
        let body = body_arg(&args, "foreach", 1)?;
        let name = match args.get("as", 2) {
            Some(raw) => engine.render(raw, ctx).await?,
            None => String::from("element"),
        };
        let name = name.trim().trim_start_matches("$$").to_string();
        if name.is_empty() {
            return Err(CharmError::invalid("foreach", "`as` must name a variable"));
        }

        let source = engine.evaluate_arg(&source, ctx).await?.into_value()?;
        let items = Items::from_value("foreach", source, false)?;
        iterate(engine, ctx, LoopKind::Foreach, &items, &body, &name).await
    }
}

/// `$break[reason?]`
pub struct Break;

#[async_trait]
impl Charm for Break {
    async fn execute(
        &self,
        args: Args,
        ctx: &mut ExecutionContext,
        _engine: &Engine,
    ) -> CharmResult<Flow> {
        if !ctx.in_loop() {
            return Err(CharmError::NotInLoop("break".into()));
        }
        let reason = args
            .text_at("reason", 0)
            .map(|reason| reason.trim().to_string())
            .filter(|reason| !reason.is_empty());
        Ok(Flow::Break(reason))
    }
}

/// `$continue[]`
pub struct Continue;

#[async_trait]
impl Charm for Continue {
    async fn execute(
        &self,
        _args: Args,
        ctx: &mut ExecutionContext,
        _engine: &Engine,
    ) -> CharmResult<Flow> {
        if !ctx.in_loop() {
            return Err(CharmError::NotInLoop("continue".into()));
        }
        Ok(Flow::Continue)
    }
}

/// What a counted loop walks over.
enum Items {
    Count(usize),
    List(Vec<Value>),
    Entries(Vec<(String, Value)>),
}

impl Items {
    fn from_value(charm: &str, value: Value, allow_count: bool) -> CharmResult<Self> {
        match value {
            Value::Array(items) => Ok(Items::List(items)),
            Value::Object(map) => Ok(Items::Entries(map.into_iter().collect())),
            Value::Number(num) if allow_count => num
                .as_u64()
                .map(|n| Items::Count(n as usize))
                .ok_or_else(|| CharmError::invalid(charm, format!("`{num}` is not a count"))),
            Value::String(text) => {
                let trimmed = text.trim();
                if allow_count {
                    if let Ok(count) = trimmed.parse::<usize>() {
                        return Ok(Items::Count(count));
                    }
                }
                if trimmed.starts_with('[') {
                    if let Ok(Value::Array(items)) = serde_json::from_str(trimmed) {
                        return Ok(Items::List(items));
                    }
                }
                Ok(Items::List(
                    split_top_level(trimmed, b',')
                        .into_iter()
                        .map(str::trim)
                        .filter(|item| !item.is_empty())
                        .map(|item| Value::String(item.to_string()))
                        .collect(),
                ))
            }
            Value::Null => Ok(Items::List(Vec::new())),
            other => Err(CharmError::invalid(charm, format!("cannot iterate over {other}"))),
        }
    }

    fn len(&self) -> usize {
        match self {
            Items::Count(count) => *count,
            Items::List(items) => items.len(),
            Items::Entries(entries) => entries.len(),
        }
    }
}

async fn iterate(
    engine: &Engine,
    ctx: &mut ExecutionContext,
    kind: LoopKind,
    items: &Items,
    body: &Value,
    element_name: &str,
) -> CharmResult<Flow> {
    ctx.enter_loop(kind);
    let mut results = Vec::with_capacity(items.len().min(1024));
    let mut outcome = Ok(());
    let mut broken = None;

    for index in 0..items.len() {
        let binding = match items {
            Items::Count(_) => None,
            Items::List(list) => Some((element_name, list[index].clone(), None)),
            Items::Entries(entries) => {
                let (key, value) = &entries[index];
                Some((element_name, value.clone(), Some(key.clone())))
            }
        };
        match run_body(engine, ctx, body, index, binding).await {
            Ok(Flow::Value(value)) => results.push(value),
            Ok(Flow::Break(reason)) => {
                tracing::debug!(index, ?reason, ?kind, "loop broken");
                broken = reason;
                break;
            }
            Ok(Flow::Continue) => continue,
            Err(err) => {
                outcome = Err(err);
                break;
            }
        }
    }

    ctx.exit_loop();
    outcome.map(|()| {
        ctx.set_break_reason(broken);
        Flow::Value(Value::Array(results))
    })
}

/// Evaluate one iteration of a loop body inside its own local scope.
async fn run_body(
    engine: &Engine,
    ctx: &mut ExecutionContext,
    body: &Value,
    index: usize,
    binding: Option<(&str, Value, Option<String>)>,
) -> CharmResult<Flow> {
    ctx.set_iteration(index);
    ctx.push_locals();
    ctx.set_local("index", Value::from(index));
    if let Some((name, element, key)) = binding {
        ctx.set_local(name, element);
        if let Some(key) = key {
            ctx.set_local("key", Value::String(key));
        }
    }
    let flow = engine.evaluate_arg(body, ctx).await;
    ctx.pop_locals();
    flow
}

fn body_arg(args: &Args, charm: &str, position: usize) -> CharmResult<Value> {
    args.get_any(&["body", "do"], position)
        .cloned()
        .ok_or_else(|| CharmError::invalid(charm, "missing body"))
}
