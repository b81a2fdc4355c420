//! Error types for the charm runtime
//!
//! Evaluation failures, pipeline rejections, registry conflicts, and storage
//! errors are separate `thiserror` enums. Conversions exist only where one layer
//! wraps another (a script failure surfacing through the command pipeline).

use serde_json::{Map, Value};
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Script-level failure payload raised by `throw`/`assert` or a utility charm.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    /// Human-readable message.
    pub message: String,
    /// Extra structured fields visible to an enclosing `catch`.
    pub fields: Map<String, Value>,
}

impl Failure {
    /// Failure with a message and no extra fields.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fields: Map::new(),
        }
    }

    /// Attach structured fields.
    pub fn with_fields(mut self, fields: Map<String, Value>) -> Self {
        self.fields = fields;
        self
    }

    /// Look up an extra field.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// Errors raised while evaluating scripts.
#[derive(Debug, Clone, Error)]
pub enum CharmError {
    /// Invocation named a charm that is not registered
    #[error("unknown capability `${0}`")]
    UnknownCapability(String),

    /// Payload or script text could not be parsed
    #[error("parse error: {0}")]
    Parse(String),

    /// `break`/`continue` used with no active loop
    #[error("`${0}` can only be used inside a loop")]
    NotInLoop(String),

    /// `while` ran past its wall-clock budget
    #[error("loop timed out after {seconds}s ({iterations} iterations)")]
    LoopTimeout {
        /// Configured timeout in seconds
        seconds: f64,
        /// Iterations completed before the timeout fired
        iterations: usize,
    },

    /// `while` reached its iteration cap
    #[error("loop exceeded the limit of {limit} iterations")]
    LoopIterationLimit {
        /// Configured iteration cap
        limit: usize,
    },

    /// `assert` condition was falsy
    #[error("{}", .0.message)]
    AssertionFailed(Failure),

    /// Explicit `throw`
    #[error("{}", .0.message)]
    Thrown(Failure),

    /// Condition used an operator the comparison primitive does not know
    #[error("unknown comparison operator `{0}`")]
    UnknownOperator(String),

    /// A charm received arguments it cannot use
    #[error("invalid argument for `${charm}`: {detail}")]
    InvalidArgument {
        /// Charm that rejected the argument
        charm: String,
        /// What was wrong
        detail: String,
    },

    /// Nested invocations went deeper than the configured maximum
    #[error("invocation depth exceeded the limit of {0}")]
    DepthExceeded(usize),

    /// A loop signal reached a consumer that only accepts values
    #[error("`${0}` signal escaped its enclosing loop")]
    SignalEscaped(&'static str),

    /// Opaque failure raised by a utility charm
    #[error("`${charm}` failed: {message}")]
    Capability {
        /// Charm that failed
        charm: String,
        /// Failure message
        message: String,
    },
}

impl CharmError {
    /// Build an [`CharmError::InvalidArgument`].
    pub fn invalid(charm: &str, detail: impl Into<String>) -> Self {
        CharmError::InvalidArgument {
            charm: charm.to_string(),
            detail: detail.into(),
        }
    }

    /// Build an opaque capability failure.
    pub fn capability(charm: &str, message: impl Into<String>) -> Self {
        CharmError::Capability {
            charm: charm.to_string(),
            message: message.into(),
        }
    }

    /// Stable name of the error class, exposed to scripts as `error.kind`.
    pub fn kind(&self) -> &'static str {
        match self {
            CharmError::UnknownCapability(_) => "UnknownCapability",
            CharmError::Parse(_) => "ParseError",
            CharmError::NotInLoop(_) => "NotInLoop",
            CharmError::LoopTimeout { .. } => "LoopTimeout",
            CharmError::LoopIterationLimit { .. } => "LoopIterationLimit",
            CharmError::AssertionFailed(_) => "AssertionFailed",
            CharmError::Thrown(_) => "ThrownError",
            CharmError::UnknownOperator(_) => "UnknownOperator",
            CharmError::InvalidArgument { .. } => "InvalidArgument",
            CharmError::DepthExceeded(_) => "DepthExceeded",
            CharmError::SignalEscaped(_) => "SignalEscaped",
            CharmError::Capability { .. } => "CapabilityError",
        }
    }

    /// Human-readable message without the kind prefix.
    pub fn message(&self) -> String {
        match self {
            CharmError::AssertionFailed(failure) | CharmError::Thrown(failure) => {
                failure.message.clone()
            }
            CharmError::Capability { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Structured fields attached by `throw`/`assert`, if any.
    pub fn fields(&self) -> Option<&Map<String, Value>> {
        match self {
            CharmError::AssertionFailed(failure) | CharmError::Thrown(failure) => {
                Some(&failure.fields)
            }
            _ => None,
        }
    }

    /// Structured view bound into `catch` scripts.
    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        object.insert("message".into(), Value::String(self.message()));
        object.insert("kind".into(), Value::String(self.kind().to_string()));
        if let Some(fields) = self.fields() {
            for (key, value) in fields {
                if key != "message" && key != "kind" {
                    object.insert(key.clone(), value.clone());
                }
            }
        }
        Value::Object(object)
    }
}

/// Convenience result alias for evaluation.
pub type CharmResult<T> = std::result::Result<T, CharmError>;

/// Which party lacked a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subject {
    /// The caller
    Actor,
    /// The bot itself in the current scope
    Bot,
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Subject::Actor => write!(f, "caller"),
            Subject::Bot => write!(f, "bot"),
        }
    }
}

/// Rejections and failures surfaced by the command pipeline.
#[derive(Debug, Clone, Error)]
pub enum CommandError {
    /// No command or alias with this name
    #[error("unknown command `{0}`")]
    UnknownCommand(String),

    /// Command is registered but switched off
    #[error("command `{0}` is disabled")]
    Disabled(String),

    /// Command cannot run in this kind of conversation
    #[error("command `{command}` can only be used {requirement}")]
    ScopeMismatch {
        /// Command name
        command: String,
        /// Human-readable requirement (e.g. "in servers")
        requirement: &'static str,
    },

    /// The actor already has a command in flight
    #[error("a command is already running for {0}")]
    Busy(String),

    /// Cooldown window has not elapsed
    #[error("command `{command}` is on cooldown for another {:.1}s", remaining.as_secs_f64())]
    CooldownActive {
        /// Command name
        command: String,
        /// Time left in the window
        remaining: Duration,
    },

    /// Required capabilities are missing
    #[error("{subject} is missing required capabilities: {}", missing.join(", "))]
    PermissionDenied {
        /// Who lacks them
        subject: Subject,
        /// The missing capability names
        missing: Vec<String>,
    },

    /// The script or native handler failed
    #[error(transparent)]
    Script(#[from] CharmError),
}

impl CommandError {
    /// Whether the error was a pipeline rejection raised before evaluation.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, CommandError::Script(_))
    }
}

/// Registration conflicts.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A charm with this name is already registered
    #[error("charm `{0}` is already registered")]
    DuplicateCharm(String),

    /// A command name or alias collides with an existing one
    #[error("command name or alias `{0}` is already taken")]
    DuplicateCommand(String),

    /// Reload targeted a command that does not exist
    #[error("command `{0}` is not registered")]
    MissingCommand(String),
}

/// Persistence errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Path not found
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    /// Atomic write failed
    #[error("Atomic write failed for {path}: {detail}")]
    AtomicWriteFailed {
        /// Path where write failed
        path: PathBuf,
        /// Error details
        detail: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience result alias for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;
