//! Invocation engine.
//!
//! Turns script text into values: scans invocations, classifies and prepares
//! their arguments, and dispatches to registered charms. Charms call back into
//! [`Engine::evaluate`] for the sub-scripts they carry, which is where
//! recursion happens.

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::runtime::error::{CharmError, CharmResult};
use crate::runtime::registry::{ArgMode, CharmRegistry};

use super::args::Args;
use super::compare::{Operator, split_condition};
use super::context::ExecutionContext;
use super::interpolate::{interpolate, interpolate_text};
use super::parser::{Call, Script, Segment, parse_script};
use super::tier::{Tier, detect_with, render_pairs};
use super::value::{coerce_literal, is_truthy, to_text};

/// Outcome of evaluating a script.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    /// Ordinary result.
    Value(Value),
    /// `$break` was evaluated, with an optional reason.
    Break(Option<String>),
    /// `$continue` was evaluated.
    Continue,
}

impl Flow {
    /// Convenience constructor for text results.
    pub fn text(text: impl Into<String>) -> Self {
        Flow::Value(Value::String(text.into()))
    }

    /// Whether this is a loop signal.
    pub fn is_signal(&self) -> bool {
        !matches!(self, Flow::Value(_))
    }

    /// Unwrap the value; a loop signal here has escaped every loop.
    pub fn into_value(self) -> CharmResult<Value> {
        match self {
            Flow::Value(value) => Ok(value),
            Flow::Break(_) => Err(CharmError::SignalEscaped("break")),
            Flow::Continue => Err(CharmError::SignalEscaped("continue")),
        }
    }
}

/// Evaluation limits and parsing policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Reject malformed structured literals instead of degrading them.
    pub strict_structured: bool,
    /// Default `while` timeout in seconds.
    pub while_timeout_secs: f64,
    /// Default `while` iteration cap.
    pub while_max_iterations: usize,
    /// Maximum nesting depth of invocations.
    pub max_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strict_structured: false,
            while_timeout_secs: 30.0,
            while_max_iterations: 100,
            max_depth: 64,
        }
    }
}

/// One `$name[payload]` occurrence prepared for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// Charm name.
    pub name: String,
    /// Payload text as written.
    pub raw_payload: String,
    /// Detected argument tier.
    pub tier: Tier,
    /// Arguments handed to the charm.
    pub args: Args,
}

impl Invocation {
    /// Classify a scanned call without interpolating it. `params` are the
    /// charm's declared parameter names, when it has any.
    pub fn from_call(call: &Call, params: Option<&[&str]>) -> Self {
        let args = Args::parse_with(&call.payload, params);
        Self {
            name: call.name.clone(),
            raw_payload: call.payload.clone(),
            tier: args.tier(),
            args,
        }
    }
}

/// Script evaluator bound to a charm registry.
#[derive(Debug, Clone)]
pub struct Engine {
    registry: CharmRegistry,
    config: EngineConfig,
}

impl Engine {
    /// Create an engine.
    pub fn new(registry: CharmRegistry, config: EngineConfig) -> Self {
        Self { registry, config }
    }

    /// Registered charms.
    pub fn registry(&self) -> &CharmRegistry {
        &self.registry
    }

    /// Active configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Evaluate script text in the given context.
    pub fn evaluate<'a>(
        &'a self,
        script: &'a str,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, CharmResult<Flow>> {
        async move {
            let parsed = parse_script(script)?;
            self.run_script(&parsed, ctx).await
        }
        .boxed()
    }

    /// Evaluate script text where only a value is acceptable.
    pub async fn evaluate_value(
        &self,
        script: &str,
        ctx: &mut ExecutionContext,
    ) -> CharmResult<Value> {
        self.evaluate(script, ctx).await?.into_value()
    }

    /// Evaluate a raw argument: strings run as scripts, structured values are
    /// expanded leaf by leaf, and other scalars pass through.
    pub async fn evaluate_arg(&self, arg: &Value, ctx: &mut ExecutionContext) -> CharmResult<Flow> {
        match arg {
            Value::String(script) => self.evaluate(script, ctx).await,
            Value::Array(_) | Value::Object(_) => self.expand(arg, ctx).await,
            other => Ok(Flow::Value(other.clone())),
        }
    }

    /// Evaluate a raw argument and render it as text.
    pub async fn render(&self, arg: &Value, ctx: &mut ExecutionContext) -> CharmResult<String> {
        let value = self.evaluate_arg(arg, ctx).await?.into_value()?;
        Ok(to_text(&value))
    }

    /// Evaluate a condition with the comparison primitive.
    ///
    /// Accepts scalars (truthiness), `{left, op, right}` objects, and text of
    /// the form `left <op> right`. Text without an operator is evaluated and
    /// tested for truthiness.
    pub async fn test_condition(
        &self,
        condition: &Value,
        ctx: &mut ExecutionContext,
    ) -> CharmResult<bool> {
        match condition {
            Value::Object(map) if map.contains_key("op") || map.contains_key("operator") => {
                let op_text = map
                    .get("op")
                    .or_else(|| map.get("operator"))
                    .map(to_text)
                    .unwrap_or_default();
                let op: Operator = op_text.parse()?;
                let left = self.operand(map.get("left"), ctx).await?;
                let right = self.operand(map.get("right"), ctx).await?;
                op.apply(&left, &right)
            }
            Value::String(text) => match split_condition(text) {
                Some((left, op, right)) => {
                    let left = self.side(left.trim(), ctx).await?;
                    let right = self.side(right.trim(), ctx).await?;
                    op.apply(&left, &right)
                }
                None => {
                    let value = self.evaluate_value(text, ctx).await?;
                    Ok(is_truthy(&value))
                }
            },
            other => {
                let value = self.evaluate_arg(other, ctx).await?.into_value()?;
                Ok(is_truthy(&value))
            }
        }
    }

    /// Scan and classify the invocations of a script without running them.
    pub fn inspect(&self, script: &str) -> CharmResult<Vec<Invocation>> {
        let parsed = parse_script(script)?;
        Ok(parsed
            .calls()
            .into_iter()
            .map(|call| {
                let params = self.registry.get(&call.name).and_then(|charm| charm.params());
                Invocation::from_call(call, params)
            })
            .collect())
    }

    async fn run_script(&self, script: &Script, ctx: &mut ExecutionContext) -> CharmResult<Flow> {
        match script {
            Script::Literal(text) => Ok(Flow::Value(interpolate(&Value::String(text.clone()), ctx))),
            Script::Invocation(call) => self.invoke(call, ctx).await,
            Script::Sequence(segments) => {
                let mut output = String::new();
                for segment in segments {
                    match segment {
                        Segment::Text(text) => {
                            output.push_str(&interpolate_text(text, ctx))
                        }
                        Segment::Call(call) => match self.invoke(call, ctx).await? {
                            Flow::Value(value) => output.push_str(&to_text(&value)),
                            signal => return Ok(signal),
                        },
                    }
                }
                Ok(Flow::Value(Value::String(output)))
            }
        }
    }

    /// Dispatch one scanned invocation.
    pub async fn invoke(&self, call: &Call, ctx: &mut ExecutionContext) -> CharmResult<Flow> {
        let descriptor = self
            .registry
            .get(&call.name)
            .ok_or_else(|| CharmError::UnknownCapability(call.name.clone()))?;

        let detection = detect_with(&call.payload, descriptor.params());
        if let Some(reason) = &detection.degraded {
            if self.config.strict_structured {
                return Err(CharmError::Parse(format!("`${}`: {}", call.name, reason)));
            }
            tracing::debug!(charm = %call.name, %reason, "structured payload degraded");
        }

        let depth = ctx.descend();
        if depth > self.config.max_depth {
            ctx.ascend();
            return Err(CharmError::DepthExceeded(self.config.max_depth));
        }

        let result = async {
            let args = match descriptor.mode() {
                ArgMode::Deferred => {
                    Args::new(detection.tier, detection.value, call.payload.trim())
                }
                ArgMode::Interpolated => match self.expand(&detection.value, ctx).await? {
                    Flow::Value(value) => {
                        let text = match &value {
                            Value::Null => String::new(),
                            Value::Object(map) if detection.tier == Tier::KeyValue => {
                                render_pairs(map)
                            }
                            other => to_text(other),
                        };
                        Args::new(detection.tier, value, text)
                    }
                    signal => return Ok(signal),
                },
            };

            let invocation = Invocation {
                name: call.name.clone(),
                raw_payload: call.payload.clone(),
                tier: detection.tier,
                args,
            };
            tracing::trace!(
                charm = %invocation.name,
                tier = invocation.tier.level(),
                depth,
                execution = %ctx.id(),
                "invoking charm"
            );
            descriptor
                .charm()
                .execute(invocation.args, ctx, self)
                .await
        }
        .await;

        ctx.ascend();
        result
    }

    /// Evaluate every string leaf of a structured value as a script.
    fn expand<'a>(
        &'a self,
        value: &'a Value,
        ctx: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, CharmResult<Flow>> {
        async move {
            match value {
                Value::String(script) => self.evaluate(script, ctx).await,
                Value::Array(items) => {
                    let mut expanded = Vec::with_capacity(items.len());
                    for item in items {
                        match self.expand(item, ctx).await? {
                            Flow::Value(value) => expanded.push(value),
                            signal => return Ok(signal),
                        }
                    }
                    Ok(Flow::Value(Value::Array(expanded)))
                }
                Value::Object(map) => {
                    let mut expanded = Map::with_capacity(map.len());
                    for (key, item) in map {
                        match self.expand(item, ctx).await? {
                            Flow::Value(value) => {
                                expanded.insert(key.clone(), value);
                            }
                            signal => return Ok(signal),
                        }
                    }
                    Ok(Flow::Value(Value::Object(expanded)))
                }
                other => Ok(Flow::Value(other.clone())),
            }
        }
        .boxed()
    }

    async fn operand(&self, arg: Option<&Value>, ctx: &mut ExecutionContext) -> CharmResult<Value> {
        match arg {
            None => Ok(Value::Null),
            Some(Value::String(text)) => self.side(text, ctx).await,
            Some(other) => self.evaluate_arg(other, ctx).await?.into_value(),
        }
    }

    /// Evaluate one side of a comparison; text results are read as literals.
    async fn side(&self, text: &str, ctx: &mut ExecutionContext) -> CharmResult<Value> {
        match self.evaluate_value(text, ctx).await? {
            Value::String(rendered) => Ok(coerce_literal(&rendered)),
            other => Ok(other),
        }
    }
}
