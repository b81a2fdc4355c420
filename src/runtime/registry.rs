//! Charm registry
//!
//! Charms are registered on a [`CharmRegistryBuilder`] during startup. Building
//! it yields an immutable [`CharmRegistry`] that engines clone cheaply and read
//! without synchronization.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::interpreter::args::Args;
use crate::interpreter::context::ExecutionContext;
use crate::interpreter::engine::{Engine, Flow};
use crate::interpreter::tier::Tier;

use super::error::{CharmResult, RegistryError};

/// A named capability invocable from script text.
///
/// Implementations receive their arguments, the shared execution context, and
/// the engine so they can evaluate any sub-scripts passed to them.
#[async_trait]
pub trait Charm: Send + Sync {
    /// Run the charm.
    async fn execute(
        &self,
        args: Args,
        ctx: &mut ExecutionContext,
        engine: &Engine,
    ) -> CharmResult<Flow>;
}

/// Adapter turning a synchronous closure into a [`Charm`].
pub struct FnCharm<F> {
    func: F,
}

impl<F> FnCharm<F>
where
    F: Fn(&Args, &mut ExecutionContext) -> CharmResult<Value> + Send + Sync,
{
    /// Wrap a closure.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> Charm for FnCharm<F>
where
    F: Fn(&Args, &mut ExecutionContext) -> CharmResult<Value> + Send + Sync,
{
    async fn execute(
        &self,
        args: Args,
        ctx: &mut ExecutionContext,
        _engine: &Engine,
    ) -> CharmResult<Flow> {
        (self.func)(&args, ctx).map(Flow::Value)
    }
}

/// How the engine prepares a charm's arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArgMode {
    /// Variables are substituted before dispatch.
    #[default]
    Interpolated,
    /// Raw arguments; the charm evaluates its sub-scripts itself.
    Deferred,
}

/// Registered charm metadata plus implementation.
#[derive(Clone)]
pub struct CharmDescriptor {
    name: String,
    tier: Tier,
    description: String,
    mode: ArgMode,
    params: Option<&'static [&'static str]>,
    charm: Arc<dyn Charm>,
}

impl CharmDescriptor {
    /// Describe a charm with positional tier and interpolated arguments.
    pub fn new(name: impl Into<String>, charm: impl Charm + 'static) -> Self {
        Self {
            name: name.into(),
            tier: Tier::Positional,
            description: String::new(),
            mode: ArgMode::Interpolated,
            params: None,
            charm: Arc::new(charm),
        }
    }

    /// Describe a closure-backed charm.
    pub fn from_fn<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&Args, &mut ExecutionContext) -> CharmResult<Value> + Send + Sync + 'static,
    {
        Self::new(name, FnCharm::new(func))
    }

    /// Advisory complexity tier.
    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }

    /// One-line documentation.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Receive raw arguments.
    pub fn deferred(mut self) -> Self {
        self.mode = ArgMode::Deferred;
        self
    }

    /// Declare the names accepted in `key: value` payloads. Any other
    /// `word: text` segment is passed on as positional text.
    pub fn with_params(mut self, params: &'static [&'static str]) -> Self {
        self.params = Some(params);
        self
    }

    /// Charm name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Advisory tier.
    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Documentation line.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Argument mode.
    pub fn mode(&self) -> ArgMode {
        self.mode
    }

    /// Declared parameter names, if any.
    pub fn params(&self) -> Option<&'static [&'static str]> {
        self.params
    }

    /// Implementation.
    pub fn charm(&self) -> &Arc<dyn Charm> {
        &self.charm
    }
}

impl fmt::Debug for CharmDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CharmDescriptor")
            .field("name", &self.name)
            .field("tier", &self.tier)
            .field("mode", &self.mode)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Mutable catalog used while the application is being assembled.
#[derive(Default)]
pub struct CharmRegistryBuilder {
    charms: HashMap<String, CharmDescriptor>,
}

impl CharmRegistryBuilder {
    /// Empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a charm. Names are case-sensitive and must be unique.
    pub fn register(&mut self, descriptor: CharmDescriptor) -> Result<&mut Self, RegistryError> {
        if self.charms.contains_key(descriptor.name()) {
            return Err(RegistryError::DuplicateCharm(descriptor.name().to_string()));
        }
        self.charms.insert(descriptor.name().to_string(), descriptor);
        Ok(self)
    }

    /// Whether a name is taken.
    pub fn contains(&self, name: &str) -> bool {
        self.charms.contains_key(name)
    }

    /// Freeze into an immutable registry.
    pub fn build(self) -> CharmRegistry {
        CharmRegistry {
            charms: Arc::new(self.charms),
        }
    }
}

/// Immutable runtime view of the registered charms.
#[derive(Clone, Default)]
pub struct CharmRegistry {
    charms: Arc<HashMap<String, CharmDescriptor>>,
}

impl CharmRegistry {
    /// Look up a charm by exact name.
    pub fn get(&self, name: &str) -> Option<&CharmDescriptor> {
        self.charms.get(name)
    }

    /// Check whether a charm is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.charms.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.charms.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Descriptors sorted by name.
    pub fn descriptors(&self) -> Vec<&CharmDescriptor> {
        let mut descriptors: Vec<&CharmDescriptor> = self.charms.values().collect();
        descriptors.sort_by(|a, b| a.name().cmp(b.name()));
        descriptors
    }

    /// Number of registered charms.
    pub fn len(&self) -> usize {
        self.charms.len()
    }

    /// Whether no charms are registered.
    pub fn is_empty(&self) -> bool {
        self.charms.is_empty()
    }
}

impl fmt::Debug for CharmRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CharmRegistry")
            .field("charms", &self.names())
            .finish()
    }
}
