//! Commands and the command table
//!
//! A command wraps a script (or native handler) with the policy the executor
//! enforces around it: cooldown, required capabilities, scope restrictions,
//! and aliases.

pub mod cooldown;
pub mod hooks;
pub mod permissions;
pub mod pipeline;
pub mod stats;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::interpreter::context::{ExecutionContext, Scope};
use crate::interpreter::engine::Engine;
use crate::runtime::error::{CharmResult, RegistryError};

/// Command implemented in Rust instead of script text.
#[async_trait]
pub trait NativeHandler: Send + Sync {
    /// Run the command.
    async fn call(&self, ctx: &mut ExecutionContext, engine: &Engine) -> CharmResult<Value>;
}

/// What a command runs.
#[derive(Clone)]
pub enum Handler {
    /// Script text evaluated by the engine.
    Script(String),
    /// Native implementation.
    Native(Arc<dyn NativeHandler>),
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Script(script) => f.debug_tuple("Script").field(script).finish(),
            Handler::Native(_) => f.write_str("Native(..)"),
        }
    }
}

/// Where a command may be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScopeRequirement {
    /// Anywhere
    #[default]
    Any,
    /// Only in guild channels
    GuildOnly,
    /// Only in direct messages
    DirectOnly,
}

impl ScopeRequirement {
    /// Whether the scope satisfies the requirement.
    pub fn allows(self, scope: &Scope) -> bool {
        match self {
            ScopeRequirement::Any => true,
            ScopeRequirement::GuildOnly => scope.is_guild(),
            ScopeRequirement::DirectOnly => !scope.is_guild(),
        }
    }

    /// Phrase used in rejection messages.
    pub fn describe(self) -> &'static str {
        match self {
            ScopeRequirement::Any => "anywhere",
            ScopeRequirement::GuildOnly => "in servers",
            ScopeRequirement::DirectOnly => "in direct messages",
        }
    }
}

/// A registered command.
#[derive(Debug, Clone)]
pub struct Command {
    name: String,
    description: String,
    handler: Handler,
    cooldown: Option<Duration>,
    required_capabilities: BTreeSet<String>,
    bot_capabilities: BTreeSet<String>,
    aliases: Vec<String>,
    scope: ScopeRequirement,
    enabled: bool,
}

impl Command {
    fn new(name: impl Into<String>, handler: Handler) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            handler,
            cooldown: None,
            required_capabilities: BTreeSet::new(),
            bot_capabilities: BTreeSet::new(),
            aliases: Vec::new(),
            scope: ScopeRequirement::Any,
            enabled: true,
        }
    }

    /// Script-backed command.
    pub fn script(name: impl Into<String>, script: impl Into<String>) -> Self {
        Self::new(name, Handler::Script(script.into()))
    }

    /// Natively implemented command.
    pub fn native(name: impl Into<String>, handler: impl NativeHandler + 'static) -> Self {
        Self::new(name, Handler::Native(Arc::new(handler)))
    }

    /// Set the help text.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Per-actor cooldown window.
    pub fn with_cooldown(mut self, window: Duration) -> Self {
        self.cooldown = Some(window).filter(|window| !window.is_zero());
        self
    }

    /// Capability the caller (and the bot, when checked) must hold.
    pub fn require(mut self, capability: impl Into<String>) -> Self {
        self.required_capabilities.insert(capability.into());
        self
    }

    /// Capability only the bot must hold.
    pub fn require_bot(mut self, capability: impl Into<String>) -> Self {
        self.bot_capabilities.insert(capability.into());
        self
    }

    /// Add an alternative name.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Restrict where the command can run.
    pub fn scoped(mut self, scope: ScopeRequirement) -> Self {
        self.scope = scope;
        self
    }

    /// Enable or disable.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Command name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Help text
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Handler
    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    /// Cooldown window, if any
    pub fn cooldown(&self) -> Option<Duration> {
        self.cooldown
    }

    /// Capabilities required of the caller
    pub fn required_capabilities(&self) -> &BTreeSet<String> {
        &self.required_capabilities
    }

    /// Capabilities required of the bot in addition to the caller's
    pub fn bot_capabilities(&self) -> &BTreeSet<String> {
        &self.bot_capabilities
    }

    /// Aliases
    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    /// Scope requirement
    pub fn scope(&self) -> ScopeRequirement {
        self.scope
    }

    /// Whether the command may run
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[derive(Default)]
struct TableInner {
    commands: HashMap<String, Arc<Command>>,
    aliases: HashMap<String, String>,
}

impl TableInner {
    /// First name or alias of `command` already owned by a different command.
    fn conflict(&self, command: &Command) -> Option<String> {
        std::iter::once(command.name())
            .chain(command.aliases().iter().map(String::as_str))
            .find(|name| {
                let owner = self
                    .aliases
                    .get(*name)
                    .map(String::as_str)
                    .or_else(|| self.commands.contains_key(*name).then_some(*name));
                owner.is_some_and(|owner| owner != command.name())
            })
            .map(str::to_string)
    }

    fn unlink_aliases(&mut self, name: &str) {
        self.aliases.retain(|_, owner| owner != name);
    }

    fn insert(&mut self, command: Command) {
        let name = command.name().to_string();
        for alias in command.aliases() {
            self.aliases.insert(alias.clone(), name.clone());
        }
        self.commands.insert(name, Arc::new(command));
    }
}

/// Commands by name and alias.
#[derive(Default)]
pub struct CommandTable {
    inner: RwLock<TableInner>,
}

impl CommandTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a command. Its name and aliases must not collide with any existing
    /// name or alias.
    pub fn register(&self, command: Command) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();
        if inner.commands.contains_key(command.name()) {
            return Err(RegistryError::DuplicateCommand(command.name().to_string()));
        }
        if let Some(taken) = inner.conflict(&command) {
            return Err(RegistryError::DuplicateCommand(taken));
        }
        if has_repeated_names(&command) {
            return Err(RegistryError::DuplicateCommand(command.name().to_string()));
        }
        tracing::info!(command = %command.name(), aliases = ?command.aliases(), "registered command");
        inner.insert(command);
        Ok(())
    }

    /// Replace an existing command of the same name.
    pub fn reload(&self, command: Command) -> Result<Arc<Command>, RegistryError> {
        let mut inner = self.inner.write();
        let previous = inner
            .commands
            .get(command.name())
            .cloned()
            .ok_or_else(|| RegistryError::MissingCommand(command.name().to_string()))?;
        if let Some(taken) = inner.conflict(&command) {
            return Err(RegistryError::DuplicateCommand(taken));
        }
        if has_repeated_names(&command) {
            return Err(RegistryError::DuplicateCommand(command.name().to_string()));
        }
        inner.unlink_aliases(command.name());
        tracing::info!(command = %command.name(), "reloaded command");
        inner.insert(command);
        Ok(previous)
    }

    /// Remove a command and its aliases.
    pub fn remove(&self, name: &str) -> Option<Arc<Command>> {
        let mut inner = self.inner.write();
        let removed = inner.commands.remove(name)?;
        inner.unlink_aliases(name);
        tracing::info!(command = %name, "removed command");
        Some(removed)
    }

    /// Look up by name or alias.
    pub fn resolve(&self, name: &str) -> Option<Arc<Command>> {
        let inner = self.inner.read();
        let canonical = inner.aliases.get(name).map(String::as_str).unwrap_or(name);
        inner.commands.get(canonical).cloned()
    }

    /// Registered command names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().commands.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of commands.
    pub fn len(&self) -> usize {
        self.inner.read().commands.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.read().commands.is_empty()
    }
}

fn has_repeated_names(command: &Command) -> bool {
    let mut seen = BTreeSet::new();
    std::iter::once(command.name())
        .chain(command.aliases().iter().map(String::as_str))
        .any(|name| !seen.insert(name))
}
