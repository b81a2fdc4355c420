//! Built-in charms.
//!
//! Control flow (`if`, loops, `try`/`throw`/`assert`) lives here alongside a
//! handful of core store and timing charms. Utility charms that talk to a chat
//! platform are registered by the embedding application.

pub mod control;
pub mod errors;
pub mod loops;
pub mod stdlib;

use serde_json::Value;

use crate::interpreter::args::Args;
use crate::interpreter::context::ExecutionContext;
use crate::interpreter::engine::Engine;
use crate::interpreter::tier::Tier;
use crate::interpreter::value::as_number;
use crate::runtime::error::{CharmError, CharmResult, RegistryError};
use crate::runtime::registry::{CharmDescriptor, CharmRegistryBuilder};

/// Register `if`, `while`, `loop`, `foreach`, `break`, `continue`, `try`,
/// `throw`, and `assert`.
pub fn register_control_flow(builder: &mut CharmRegistryBuilder) -> Result<(), RegistryError> {
    builder
        .register(
            CharmDescriptor::new("if", control::If)
                .with_tier(Tier::KeyValue)
                .with_description("Evaluate one branch depending on a condition")
                .with_params(&["condition", "then", "else"])
                .deferred(),
        )?
        .register(
            CharmDescriptor::new("while", loops::While)
                .with_tier(Tier::KeyValue)
                .with_description("Repeat a body while a condition holds, within time and iteration caps")
                .with_params(&[
                    "condition",
                    "body",
                    "do",
                    "timeout",
                    "timeoutSeconds",
                    "maxIterations",
                    "max",
                ])
                .deferred(),
        )?
        .register(
            CharmDescriptor::new("loop", loops::Loop)
                .with_tier(Tier::Structured)
                .with_description("Run a body a fixed number of times or once per element")
                .with_params(&["times", "count", "items", "body", "do"])
                .deferred(),
        )?
        .register(
            CharmDescriptor::new("foreach", loops::Foreach)
                .with_tier(Tier::Structured)
                .with_description("Run a body once per element of a list")
                .with_params(&["items", "array", "list", "body", "do", "as"])
                .deferred(),
        )?
        .register(
            CharmDescriptor::new("break", loops::Break)
                .with_description("Leave the innermost loop")
                .with_params(&["reason"]),
        )?
        .register(
            CharmDescriptor::new("continue", loops::Continue)
                .with_description("Skip to the next iteration of the innermost loop"),
        )?
        .register(
            CharmDescriptor::new("try", errors::Try)
                .with_tier(Tier::Structured)
                .with_description("Run a body, handling failures with catch and finally scripts")
                .with_params(&["body", "try", "catch", "finally"])
                .deferred(),
        )?
        .register(
            CharmDescriptor::new("throw", errors::Throw)
                .with_description("Raise a failure with a message and optional fields"),
        )?
        .register(
            CharmDescriptor::new("assert", errors::Assert)
                .with_tier(Tier::Structured)
                .with_description("Raise a failure unless a condition holds")
                .with_params(&["condition", "message", "fields", "errorFields"])
                .deferred(),
        )?;
    Ok(())
}

/// Register `setVar`, `getVar`, `deleteVar`, and `wait`.
pub fn register_core(builder: &mut CharmRegistryBuilder) -> Result<(), RegistryError> {
    builder
        .register(
            CharmDescriptor::from_fn("setVar", stdlib::set_var)
                .with_tier(Tier::KeyValue)
                .with_description("Store a variable")
                .with_params(&["name", "value"]),
        )?
        .register(
            CharmDescriptor::from_fn("getVar", stdlib::get_var)
                .with_tier(Tier::KeyValue)
                .with_description("Read a variable, with an optional default")
                .with_params(&["name", "default"]),
        )?
        .register(
            CharmDescriptor::from_fn("deleteVar", stdlib::delete_var)
                .with_description("Remove a variable")
                .with_params(&["name"]),
        )?
        .register(
            CharmDescriptor::new("wait", stdlib::Wait)
                .with_description("Pause for a duration such as 10ms, 2s, or 1m")
                .with_params(&["duration"]),
        )?;
    Ok(())
}

/// Register every built-in charm.
pub fn register_builtins(builder: &mut CharmRegistryBuilder) -> Result<(), RegistryError> {
    register_control_flow(builder)?;
    register_core(builder)
}

/// Evaluate a raw numeric argument, if present.
pub(crate) async fn number_arg(
    engine: &Engine,
    ctx: &mut ExecutionContext,
    args: &Args,
    charm: &str,
    names: &[&str],
    position: usize,
) -> CharmResult<Option<f64>> {
    let Some(raw) = args.get_any(names, position) else {
        return Ok(None);
    };
    let value = engine.evaluate_arg(raw, ctx).await?.into_value()?;
    match value {
        Value::Null => Ok(None),
        Value::String(text) if text.trim().is_empty() => Ok(None),
        other => as_number(&other).map(Some).ok_or_else(|| {
            CharmError::invalid(charm, format!("`{}` is not a number: {other}", names[0]))
        }),
    }
}
