//! Per-command execution state.
//!
//! One [`ExecutionContext`] is created per top-level command run and shared by
//! every nested invocation of that run.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::runtime::store::VariableStore;

use super::value::descend;

/// Caller identity (a platform user id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(pub String);

impl ActorId {
    /// Create from any string-like id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Conversation the command was issued in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// A channel inside a guild/server.
    Guild {
        /// Guild id
        guild: String,
        /// Channel id
        channel: String,
    },
    /// A direct-message channel.
    Direct {
        /// Channel id
        channel: String,
    },
}

impl Scope {
    /// Guild channel scope.
    pub fn guild(guild: impl Into<String>, channel: impl Into<String>) -> Self {
        Scope::Guild {
            guild: guild.into(),
            channel: channel.into(),
        }
    }

    /// Direct-message scope.
    pub fn direct(channel: impl Into<String>) -> Self {
        Scope::Direct {
            channel: channel.into(),
        }
    }

    /// Whether this is a guild channel.
    pub fn is_guild(&self) -> bool {
        matches!(self, Scope::Guild { .. })
    }

    /// Channel id.
    pub fn channel(&self) -> &str {
        match self {
            Scope::Guild { channel, .. } | Scope::Direct { channel } => channel,
        }
    }

    /// Guild id, when in a guild.
    pub fn guild_id(&self) -> Option<&str> {
        match self {
            Scope::Guild { guild, .. } => Some(guild),
            Scope::Direct { .. } => None,
        }
    }
}

/// Which construct pushed a loop frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    /// `$while`
    While,
    /// `$loop`
    Loop,
    /// `$foreach`
    Foreach,
}

/// State of one active loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopFrame {
    /// Construct that owns the frame.
    pub kind: LoopKind,
    /// Zero-based index of the running iteration.
    pub iteration_index: usize,
}

/// Execution state threaded through one top-level run.
pub struct ExecutionContext {
    id: Uuid,
    actor: ActorId,
    scope: Scope,
    positional_args: Vec<String>,
    loops: Vec<LoopFrame>,
    locals: Vec<HashMap<String, Value>>,
    variables: Arc<VariableStore>,
    depth: usize,
    break_reason: Option<String>,
}

impl ExecutionContext {
    /// Fresh context for a run.
    pub fn new(actor: ActorId, scope: Scope, variables: Arc<VariableStore>) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor,
            scope,
            positional_args: Vec::new(),
            loops: Vec::new(),
            locals: Vec::new(),
            variables,
            depth: 0,
            break_reason: None,
        }
    }

    /// Attach the positional arguments the command was called with.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.positional_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Unique id of this run (for logs).
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Caller identity.
    pub fn actor(&self) -> &ActorId {
        &self.actor
    }

    /// Conversation identity.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Positional arguments.
    pub fn positional_args(&self) -> &[String] {
        &self.positional_args
    }

    /// 1-indexed positional argument; out of range yields `""`.
    pub fn positional(&self, index: usize) -> &str {
        index
            .checked_sub(1)
            .and_then(|i| self.positional_args.get(i))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Shared variable store.
    pub fn variables(&self) -> &Arc<VariableStore> {
        &self.variables
    }

    /// Active loops, innermost last.
    pub fn loops(&self) -> &[LoopFrame] {
        &self.loops
    }

    /// Whether any loop is active.
    pub fn in_loop(&self) -> bool {
        !self.loops.is_empty()
    }

    /// Push a loop frame.
    pub fn enter_loop(&mut self, kind: LoopKind) {
        self.loops.push(LoopFrame {
            kind,
            iteration_index: 0,
        });
    }

    /// Update the innermost loop's iteration index.
    pub fn set_iteration(&mut self, index: usize) {
        if let Some(frame) = self.loops.last_mut() {
            frame.iteration_index = index;
        }
    }

    /// Pop the innermost loop frame.
    pub fn exit_loop(&mut self) -> Option<LoopFrame> {
        self.loops.pop()
    }

    /// Reason given to `$break` by the most recently finished loop; `None`
    /// when it ran to completion or broke without one.
    pub fn break_reason(&self) -> Option<&str> {
        self.break_reason.as_deref()
    }

    pub(crate) fn set_break_reason(&mut self, reason: Option<String>) {
        self.break_reason = reason;
    }

    /// Open a local variable scope.
    pub fn push_locals(&mut self) {
        self.locals.push(HashMap::new());
    }

    /// Close the innermost local scope.
    pub fn pop_locals(&mut self) {
        self.locals.pop();
    }

    /// Bind a local in the innermost scope, opening one if needed.
    pub fn set_local(&mut self, name: impl Into<String>, value: Value) {
        if self.locals.is_empty() {
            self.locals.push(HashMap::new());
        }
        if let Some(scope) = self.locals.last_mut() {
            scope.insert(name.into(), value);
        }
    }

    /// Resolve a named reference: locals (innermost first), then the variable
    /// store, then the built-ins `actor`, `channel`, and `guild`.
    pub fn lookup(&self, path: &str) -> Option<Value> {
        for scope in self.locals.iter().rev() {
            if let Some(value) = scope.get(path) {
                return Some(value.clone());
            }
            if let Some((head, rest)) = path.split_once('.') {
                if let Some(root) = scope.get(head) {
                    let segments: Vec<&str> = rest.split('.').collect();
                    return descend(root, &segments).cloned();
                }
            }
        }

        if let Some(value) = self.variables.get(path) {
            return Some(value);
        }

        match path {
            "actor" => Some(Value::String(self.actor.to_string())),
            "channel" => Some(Value::String(self.scope.channel().to_string())),
            "guild" => self
                .scope
                .guild_id()
                .map(|guild| Value::String(guild.to_string())),
            "breakReason" => Some(self.break_reason.clone().map_or(Value::Null, Value::String)),
            _ => None,
        }
    }

    /// Current nesting depth.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub(crate) fn descend(&mut self) -> usize {
        self.depth += 1;
        self.depth
    }

    pub(crate) fn ascend(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.id)
            .field("actor", &self.actor)
            .field("scope", &self.scope)
            .field("positional_args", &self.positional_args)
            .field("loops", &self.loops)
            .field("depth", &self.depth)
            .field("break_reason", &self.break_reason)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> ExecutionContext {
        ExecutionContext::new(
            ActorId::new("42"),
            Scope::guild("g1", "c1"),
            Arc::new(VariableStore::new()),
        )
        .with_args(["alpha", "beta"])
    }

    #[test]
    fn positional_is_one_indexed() {
        let ctx = context();
        assert_eq!(ctx.positional(1), "alpha");
        assert_eq!(ctx.positional(2), "beta");
        assert_eq!(ctx.positional(3), "");
        assert_eq!(ctx.positional(0), "");
    }

    #[test]
    fn locals_shadow_store_and_builtins() {
        let mut ctx = context();
        ctx.variables().set("index", json!("global"));
        assert_eq!(ctx.lookup("index"), Some(json!("global")));

        ctx.push_locals();
        ctx.set_local("index", json!(3));
        assert_eq!(ctx.lookup("index"), Some(json!(3)));
        ctx.pop_locals();

        assert_eq!(ctx.lookup("index"), Some(json!("global")));
        assert_eq!(ctx.lookup("actor"), Some(json!("42")));
        assert_eq!(ctx.lookup("guild"), Some(json!("g1")));
    }

    #[test]
    fn dotted_locals_resolve_exact_then_nested() {
        let mut ctx = context();
        ctx.set_local("error", json!("boom"));
        ctx.set_local("error.code", json!("E1"));
        ctx.set_local("item", json!({"name": "sword"}));
        assert_eq!(ctx.lookup("error"), Some(json!("boom")));
        assert_eq!(ctx.lookup("error.code"), Some(json!("E1")));
        assert_eq!(ctx.lookup("item.name"), Some(json!("sword")));
    }

    #[test]
    fn loop_frames_are_lifo() {
        let mut ctx = context();
        assert!(!ctx.in_loop());
        ctx.enter_loop(LoopKind::While);
        ctx.enter_loop(LoopKind::Foreach);
        ctx.set_iteration(4);
        let inner = ctx.exit_loop().unwrap();
        assert_eq!(inner.kind, LoopKind::Foreach);
        assert_eq!(inner.iteration_index, 4);
        assert_eq!(ctx.loops()[0].iteration_index, 0);
    }
}
