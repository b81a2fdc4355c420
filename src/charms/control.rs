//! Conditional evaluation.

use async_trait::async_trait;
use serde_json::Value;

use crate::interpreter::args::Args;
use crate::interpreter::context::ExecutionContext;
use crate::interpreter::engine::{Engine, Flow};
use crate::runtime::error::{CharmError, CharmResult};
use crate::runtime::registry::Charm;

/// `$if[condition; then; else]`
///
/// Only the chosen branch is evaluated. Without a matching branch the
/// condition's outcome is returned as a boolean.
pub struct If;

#[async_trait]
impl Charm for If {
    async fn execute(
        &self,
        args: Args,
        ctx: &mut ExecutionContext,
        engine: &Engine,
    ) -> CharmResult<Flow> {
        let condition = args
            .get("condition", 0)
            .ok_or_else(|| CharmError::invalid("if", "missing condition"))?;

        let passed = engine.test_condition(condition, ctx).await?;
        let branch = if passed {
            args.get("then", 1)
        } else {
            args.get("else", 2)
        };

        match branch {
            Some(script) => engine.evaluate_arg(script, ctx).await,
            None => Ok(Flow::Value(Value::Bool(passed))),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::charms::register_builtins;
    use crate::interpreter::context::{ActorId, ExecutionContext, Scope};
    use crate::interpreter::engine::{Engine, EngineConfig};
    use crate::runtime::error::CharmError;
    use crate::runtime::registry::CharmRegistryBuilder;
    use crate::runtime::store::VariableStore;
    use serde_json::json;
    use std::sync::Arc;

    fn setup() -> (Engine, ExecutionContext) {
        let mut builder = CharmRegistryBuilder::new();
        register_builtins(&mut builder).unwrap();
        let store = Arc::new(VariableStore::new());
        store.set("role", json!("admin"));
        let ctx = ExecutionContext::new(ActorId::new("u"), Scope::direct("d"), store);
        (Engine::new(builder.build(), EngineConfig::default()), ctx)
    }

    #[tokio::test]
    async fn picks_a_branch() {
        let (engine, mut ctx) = setup();
        let hit = engine
            .evaluate_value("$if[$$role == admin; welcome; denied]", &mut ctx)
            .await
            .unwrap();
        assert_eq!(hit, json!("welcome"));

        let miss = engine
            .evaluate_value("$if[condition: $$role == mod; then: yes; else: no]", &mut ctx)
            .await
            .unwrap();
        assert_eq!(miss, json!("no"));
    }

    #[tokio::test]
    async fn missing_else_yields_false() {
        let (engine, mut ctx) = setup();
        let value = engine
            .evaluate_value("$if[1 > 2; never]", &mut ctx)
            .await
            .unwrap();
        assert_eq!(value, json!(false));
    }

    #[tokio::test]
    async fn untaken_branch_is_not_evaluated() {
        let (engine, mut ctx) = setup();
        engine
            .evaluate_value("$if[true; kept; $setVar[role; changed]]", &mut ctx)
            .await
            .unwrap();
        assert_eq!(ctx.variables().get("role"), Some(json!("admin")));
    }

    #[tokio::test]
    async fn structured_unknown_operator_fails() {
        let (engine, mut ctx) = setup();
        let err = engine
            .evaluate(
                r#"$if[{"condition": {"left": 1, "op": "<=>", "right": 2}, "then": "x"}]"#,
                &mut ctx,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CharmError::UnknownOperator(op) if op == "<=>"));
    }
}
