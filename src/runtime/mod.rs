//! Runtime orchestrator and public API
//!
//! `Runtime` wires the variable store, the charm registry, the engine, and the
//! command executor together from a single [`RuntimeConfig`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub mod error;
pub mod registry;
pub mod storage;
pub mod store;

use crate::charms::register_builtins;
use crate::command::pipeline::CommandExecutor;
use crate::command::{Command, CommandTable};
use crate::interpreter::context::{ActorId, ExecutionContext, Scope};
use crate::interpreter::engine::{Engine, EngineConfig};

use error::RegistryError;
use registry::CharmRegistryBuilder;
use storage::JsonSnapshotSink;
use store::VariableStore;

/// Configuration for the charm runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Fail on malformed structured payloads instead of degrading
    pub strict_structured: bool,

    /// Default `while` timeout in seconds
    pub while_timeout_secs: f64,

    /// Default `while` iteration cap
    pub while_max_iterations: usize,

    /// Maximum nested invocation depth
    pub max_depth: usize,

    /// Cooldown entries kept before expired ones are swept
    pub cooldown_capacity: usize,

    /// JSON snapshot file for variables (in-memory only when unset)
    pub variables_path: Option<PathBuf>,

    /// Flush the snapshot on every change
    pub persist_on_change: bool,

    /// Period of the background snapshot flush
    pub autosave_interval_secs: Option<f64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            strict_structured: engine.strict_structured,
            while_timeout_secs: engine.while_timeout_secs,
            while_max_iterations: engine.while_max_iterations,
            max_depth: engine.max_depth,
            cooldown_capacity: 10_000,
            variables_path: None,
            persist_on_change: false,
            autosave_interval_secs: None,
        }
    }
}

impl RuntimeConfig {
    /// The evaluation subset handed to the engine.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            strict_structured: self.strict_structured,
            while_timeout_secs: self.while_timeout_secs,
            while_max_iterations: self.while_max_iterations,
            max_depth: self.max_depth,
        }
    }
}

/// The main runtime
pub struct Runtime {
    config: RuntimeConfig,
    variables: Arc<VariableStore>,
    engine: Engine,
    executor: CommandExecutor,
}

impl Runtime {
    /// Create a runtime with the built-in charms plus whatever `charms` already
    /// holds (utility charms supplied by the embedding application).
    pub fn new(config: RuntimeConfig, mut charms: CharmRegistryBuilder) -> anyhow::Result<Self> {
        let variables = match &config.variables_path {
            Some(path) => {
                let store = VariableStore::with_sink(
                    Arc::new(JsonSnapshotSink::new(path)),
                    config.persist_on_change,
                );
                store.load(storage::load_snapshot(path)?);
                store
            }
            None => VariableStore::new(),
        };
        let started = Instant::now();
        variables.set_producer("uptime", move || {
            serde_json::Value::from(started.elapsed().as_millis() as u64)
        });
        let variables = Arc::new(variables);

        register_builtins(&mut charms)?;
        let engine = Engine::new(charms.build(), config.engine_config());
        let executor = CommandExecutor::new(
            Arc::new(CommandTable::new()),
            engine.clone(),
            variables.clone(),
            config.cooldown_capacity,
        );

        tracing::debug!(charms = engine.registry().len(), "runtime ready");
        Ok(Self {
            config,
            variables,
            engine,
            executor,
        })
    }

    /// Load configuration from a JSON file and create a runtime
    pub fn load(path: &Path, charms: CharmRegistryBuilder) -> anyhow::Result<Self> {
        let config = storage::load_config(path)?;
        Self::new(config, charms)
    }

    /// Get the current configuration
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Shared variable store
    pub fn variables(&self) -> &Arc<VariableStore> {
        &self.variables
    }

    /// Invocation engine
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Command executor
    pub fn executor(&self) -> &CommandExecutor {
        &self.executor
    }

    /// Register a command.
    pub fn register_command(&self, command: Command) -> Result<(), RegistryError> {
        self.executor.commands().register(command)
    }

    /// Fresh execution context sharing this runtime's variables.
    pub fn context(&self, actor: ActorId, scope: Scope) -> ExecutionContext {
        ExecutionContext::new(actor, scope, self.variables.clone())
    }

    /// Flush the variable snapshot every `autosave_interval_secs`.
    ///
    /// Returns `None` when no interval is configured. Must be called from
    /// within a tokio runtime.
    pub fn spawn_autosave(&self) -> Option<tokio::task::JoinHandle<()>> {
        let period = self
            .config
            .autosave_interval_secs
            .filter(|secs| *secs > 0.0)
            .map(Duration::from_secs_f64)?;
        let variables = self.variables.clone();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match variables.flush() {
                    Ok(true) => tracing::trace!("autosaved variables"),
                    Ok(false) => {}
                    Err(err) => tracing::warn!(error = %err, "variable autosave failed"),
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_config_mirrors_runtime_config() {
        let config = RuntimeConfig {
            max_depth: 8,
            while_max_iterations: 5,
            ..RuntimeConfig::default()
        };
        let engine = config.engine_config();
        assert_eq!(engine.max_depth, 8);
        assert_eq!(engine.while_max_iterations, 5);
        assert!(!engine.strict_structured);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: RuntimeConfig = serde_json::from_str(r#"{"max_depth": 3}"#).unwrap();
        assert_eq!(config.max_depth, 3);
        assert_eq!(config.cooldown_capacity, 10_000);
        assert_eq!(config.while_timeout_secs, 30.0);
    }

    #[tokio::test]
    async fn runtime_exposes_uptime() {
        let runtime = Runtime::new(RuntimeConfig::default(), CharmRegistryBuilder::new()).unwrap();
        assert!(runtime.variables().get("uptime").is_some());
        assert!(runtime.engine().registry().contains("foreach"));
        assert!(runtime.spawn_autosave().is_none());
    }
}
