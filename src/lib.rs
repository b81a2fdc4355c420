//! Charmkit – an embedded invocation engine for chat-bot scripting
//!
//! Commands are written as scripts of `$charm[...]` invocations:
//! - Payloads are read as positional text, `key: value` pairs, or JSON,
//!   whichever they fit
//! - `$$name` references resolve against loop locals, the shared variable
//!   store, and the invoking actor and channel
//! - Control flow (`if`, `while`, `loop`, `foreach`, `try`, ...) is itself a set
//!   of charms that evaluate their sub-scripts lazily
//! - A command executor wraps each run with cooldowns, capability checks,
//!   hooks, and usage statistics

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Built-in charms
pub mod charms;
/// Command model and executor pipeline
pub mod command;
/// Script interpreter
pub mod interpreter;
/// Runtime core: errors, variables, registry, persistence
pub mod runtime;

// Re-export key types for convenience
pub use command::pipeline::{CommandExecutor, CommandRequest};
pub use command::{Command, CommandTable};
pub use interpreter::{ActorId, Engine, ExecutionContext, Flow, Scope};
pub use runtime::error::{CharmError, CommandError};
pub use runtime::registry::{Charm, CharmDescriptor, CharmRegistry, CharmRegistryBuilder};
pub use runtime::{Runtime, RuntimeConfig};

/// Current version of charmkit
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
