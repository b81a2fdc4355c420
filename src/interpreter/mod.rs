//! Script interpreter.
//!
//! Scripts are text containing `$name[payload]` invocations and `$$variable`
//! references. The scanner splits text from invocations, tier detection decides
//! how each payload is read, interpolation substitutes variables, and the
//! engine dispatches invocations to registered charms.

/// Argument views over a detected payload.
pub mod args;
/// Condition operators.
pub mod compare;
/// Per-invocation execution state.
pub mod context;
/// Invocation engine.
pub mod engine;
/// Variable substitution.
pub mod interpolate;
/// Script scanner.
pub mod parser;
/// Payload tier detection.
pub mod tier;
/// JSON value helpers.
pub mod value;

pub use args::Args;
pub use compare::Operator;
pub use context::{ActorId, ExecutionContext, LoopFrame, LoopKind, Scope};
pub use engine::{Engine, EngineConfig, Flow, Invocation};
pub use interpolate::{interpolate, interpolate_text};
pub use parser::{Call, Script, Segment, parse_script};
pub use tier::{Detection, Tier, detect, detect_tier, detect_with};
