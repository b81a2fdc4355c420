//! Hook registry for command lifecycle events.
//!
//! Hooks run around every command: before evaluation, after success, and on
//! failure. They are best-effort; a failing hook is logged and never changes
//! the command's outcome.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::interpreter::context::{ActorId, Scope};

/// When a hook fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    /// Before the command's script runs
    PreExecute,
    /// After the script succeeded
    PostExecute,
    /// After the script failed
    OnError,
}

/// What a hook gets to see.
#[derive(Debug, Clone)]
pub struct HookContext {
    /// Command name
    pub command: String,
    /// Caller
    pub actor: ActorId,
    /// Conversation
    pub scope: Scope,
    /// Execution id shared with the command's logs
    pub execution_id: Uuid,
    /// Command result (post hooks)
    pub result: Option<Value>,
    /// Failure message (error hooks)
    pub error: Option<String>,
}

/// A lifecycle hook.
#[async_trait]
pub trait Hook: Send + Sync {
    /// Unique identifier.
    fn id(&self) -> &str;

    /// Which point this hook fires on.
    fn point(&self) -> HookPoint;

    /// Priority (lower = earlier). Default: 100.
    fn priority(&self) -> i32 {
        100
    }

    /// Run the hook.
    async fn run(&self, ctx: &HookContext) -> anyhow::Result<()>;
}

/// Closure-backed hook.
pub struct FnHook<F> {
    id: String,
    point: HookPoint,
    priority: i32,
    func: F,
}

impl<F> FnHook<F>
where
    F: Fn(&HookContext) -> anyhow::Result<()> + Send + Sync,
{
    /// Wrap a closure.
    pub fn new(id: impl Into<String>, point: HookPoint, func: F) -> Self {
        Self {
            id: id.into(),
            point,
            priority: 100,
            func,
        }
    }

    /// Override the default priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[async_trait]
impl<F> Hook for FnHook<F>
where
    F: Fn(&HookContext) -> anyhow::Result<()> + Send + Sync,
{
    fn id(&self) -> &str {
        &self.id
    }

    fn point(&self) -> HookPoint {
        self.point
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn run(&self, ctx: &HookContext) -> anyhow::Result<()> {
        (self.func)(ctx)
    }
}

/// Hooks indexed by point, each list sorted by ascending priority.
#[derive(Default)]
pub struct HookRegistry {
    hooks: RwLock<HashMap<HookPoint, Vec<Arc<dyn Hook>>>>,
}

impl HookRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook. Returns its id.
    pub fn register(&self, hook: Arc<dyn Hook>) -> String {
        let id = hook.id().to_string();
        let priority = hook.priority();
        let mut hooks = self.hooks.write();
        let entry = hooks.entry(hook.point()).or_default();

        // Insert in priority order (stable: FIFO for same priority)
        let pos = entry
            .iter()
            .position(|existing| existing.priority() > priority)
            .unwrap_or(entry.len());
        entry.insert(pos, hook);
        id
    }

    /// Unregister by id. Returns `true` if anything was removed.
    pub fn unregister(&self, id: &str) -> bool {
        let mut found = false;
        for hooks in self.hooks.write().values_mut() {
            let before = hooks.len();
            hooks.retain(|hook| hook.id() != id);
            found |= hooks.len() < before;
        }
        found
    }

    /// Number of registered hooks.
    pub fn len(&self) -> usize {
        self.hooks.read().values().map(Vec::len).sum()
    }

    /// Whether no hooks are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every hook for `point` in priority order. Returns how many failed.
    pub async fn dispatch(&self, point: HookPoint, ctx: &HookContext) -> usize {
        let hooks: Vec<Arc<dyn Hook>> = self
            .hooks
            .read()
            .get(&point)
            .cloned()
            .unwrap_or_default();

        let mut failures = 0;
        for hook in hooks {
            if let Err(err) = hook.run(ctx).await {
                failures += 1;
                tracing::warn!(
                    hook = hook.id(),
                    ?point,
                    command = %ctx.command,
                    error = %err,
                    "hook failed"
                );
            }
        }
        failures
    }
}
