//! Command executor
//!
//! Runs one top-level command for an actor. Rejections (unknown, disabled,
//! wrong scope, busy, cooldown, permissions) happen before any side effect;
//! script failures are reported to error hooks and returned to the caller.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::Instrument;

use crate::interpreter::context::{ActorId, ExecutionContext, Scope};
use crate::interpreter::engine::Engine;
use crate::runtime::error::{CharmResult, CommandError};
use crate::runtime::store::VariableStore;

use super::cooldown::CooldownTracker;
use super::hooks::{HookContext, HookPoint, HookRegistry};
use super::stats::UsageStats;
use super::{Command, CommandTable, Handler, permissions};

/// One request to run a command.
#[derive(Debug, Clone)]
pub struct CommandRequest {
    /// Command name or alias
    pub command: String,
    /// Caller
    pub actor: ActorId,
    /// Where the command was issued
    pub scope: Scope,
    /// Positional arguments (`$$1`, `$$2`, ...)
    pub args: Vec<String>,
    /// Capabilities granted to the caller in this scope
    pub actor_capabilities: BTreeSet<String>,
    /// Capabilities granted to the bot in this scope, when known
    pub bot_capabilities: Option<BTreeSet<String>>,
}

impl CommandRequest {
    /// Request with no arguments and no grants.
    pub fn new(command: impl Into<String>, actor: ActorId, scope: Scope) -> Self {
        Self {
            command: command.into(),
            actor,
            scope,
            args: Vec::new(),
            actor_capabilities: BTreeSet::new(),
            bot_capabilities: None,
        }
    }

    /// Attach positional arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Grant a capability to the caller.
    pub fn grant(mut self, capability: impl Into<String>) -> Self {
        self.actor_capabilities.insert(capability.into());
        self
    }

    /// Set the bot's grants for this scope.
    pub fn with_bot_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bot_capabilities = Some(capabilities.into_iter().map(Into::into).collect());
        self
    }
}

type InFlight = Arc<Mutex<HashSet<ActorId>>>;

/// Marks an actor busy until dropped.
struct InFlightGuard {
    actors: InFlight,
    actor: ActorId,
}

impl InFlightGuard {
    fn acquire(actors: &InFlight, actor: &ActorId) -> Option<Self> {
        actors.lock().insert(actor.clone()).then(|| Self {
            actors: actors.clone(),
            actor: actor.clone(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.actors.lock().remove(&self.actor);
    }
}

/// Wraps command evaluation with cooldown, permission, hook, and stats handling.
pub struct CommandExecutor {
    commands: Arc<CommandTable>,
    engine: Engine,
    variables: Arc<VariableStore>,
    cooldowns: CooldownTracker,
    hooks: HookRegistry,
    stats: UsageStats,
    in_flight: InFlight,
}

impl CommandExecutor {
    /// Executor over a command table.
    pub fn new(
        commands: Arc<CommandTable>,
        engine: Engine,
        variables: Arc<VariableStore>,
        cooldown_capacity: usize,
    ) -> Self {
        Self {
            commands,
            engine,
            variables,
            cooldowns: CooldownTracker::new(cooldown_capacity),
            hooks: HookRegistry::new(),
            stats: UsageStats::new(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Command table
    pub fn commands(&self) -> &Arc<CommandTable> {
        &self.commands
    }

    /// Engine
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Hook registry
    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    /// Usage statistics
    pub fn stats(&self) -> &UsageStats {
        &self.stats
    }

    /// Cooldown tracker
    pub fn cooldowns(&self) -> &CooldownTracker {
        &self.cooldowns
    }

    /// Whether the actor has a command running.
    pub fn is_busy(&self, actor: &ActorId) -> bool {
        self.in_flight.lock().contains(actor)
    }

    /// Run a command to completion.
    pub async fn run(&self, request: CommandRequest) -> Result<Value, CommandError> {
        let mut ctx = ExecutionContext::new(
            request.actor.clone(),
            request.scope.clone(),
            self.variables.clone(),
        )
        .with_args(request.args.iter().cloned());
        let span = tracing::info_span!(
            "command",
            command = %request.command,
            actor = %request.actor,
            execution_id = %ctx.id(),
        );
        self.run_in(request, &mut ctx).instrument(span).await
    }

    async fn run_in(
        &self,
        request: CommandRequest,
        ctx: &mut ExecutionContext,
    ) -> Result<Value, CommandError> {
        let command = self
            .commands
            .resolve(&request.command)
            .ok_or_else(|| CommandError::UnknownCommand(request.command.clone()))?;
        let name = command.name().to_string();

        if !command.is_enabled() {
            return Err(CommandError::Disabled(name));
        }
        if !command.scope().allows(&request.scope) {
            return Err(CommandError::ScopeMismatch {
                command: name,
                requirement: command.scope().describe(),
            });
        }
        let _guard = InFlightGuard::acquire(&self.in_flight, &request.actor)
            .ok_or_else(|| CommandError::Busy(request.actor.to_string()))?;

        let remaining = command
            .cooldown()
            .and_then(|window| self.cooldowns.remaining(&name, &request.actor, window));
        if let Some(remaining) = remaining {
            return Err(CommandError::CooldownActive {
                command: name,
                remaining,
            });
        }

        permissions::check(
            &command,
            &request.actor_capabilities,
            request.bot_capabilities.as_ref(),
        )?;

        if let Some(window) = command.cooldown() {
            self.cooldowns.record(&name, &request.actor, window);
        }

        let mut hook_ctx = HookContext {
            command: name.clone(),
            actor: request.actor.clone(),
            scope: request.scope.clone(),
            execution_id: ctx.id(),
            result: None,
            error: None,
        };
        self.hooks.dispatch(HookPoint::PreExecute, &hook_ctx).await;

        let outcome = self.execute(&command, ctx).await;
        self.stats.record(&name, &request.actor, outcome.is_ok());

        match outcome {
            Ok(value) => {
                hook_ctx.result = Some(value.clone());
                self.hooks.dispatch(HookPoint::PostExecute, &hook_ctx).await;
                Ok(value)
            }
            Err(err) => {
                tracing::warn!(kind = err.kind(), error = %err, "command failed");
                hook_ctx.error = Some(err.message());
                self.hooks.dispatch(HookPoint::OnError, &hook_ctx).await;
                Err(err.into())
            }
        }
    }

    async fn execute(&self, command: &Command, ctx: &mut ExecutionContext) -> CharmResult<Value> {
        match command.handler() {
            Handler::Script(script) => self.engine.evaluate_value(script, ctx).await,
            Handler::Native(handler) => handler.call(ctx, &self.engine).await,
        }
    }
}
