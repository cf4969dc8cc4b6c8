//! External engine plumbing
//!
//! Command templating and process invocation shared by the execution units,
//! the per-device test engine and the report engine.

mod command;
pub mod distribution;
mod process;

pub use command::{expand_pairs, CommandTemplate, Placeholders};
pub use process::{run_to_completion, EngineError, InvocationOutcome};
