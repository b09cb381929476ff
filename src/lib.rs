//! Verbrunner – A deterministic, resumable verb interpreter for adventure game scripting
//!
//! This crate implements the runtime side of designer-authored verbs:
//! - Flat action lists with id-correlated control blocks (If/Else, Repeat, Choose, RunOnce)
//! - A cooperative runner that suspends on text, timers, animations and sub-verbs
//! - A frame-scoped deferred-resume queue that keeps resumption out of world updates
//! - Save/restore of paused runners, sticky control state and pending continuations
//! - A reference in-memory world and a CLI for checking and driving verb libraries

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Actions, verbs, the control-block resolver and the verb runner
pub mod interpreter;
/// Engine orchestration, continuations, persistence and errors
pub mod runtime;
/// World surface consumed by actions, plus an in-memory implementation
pub mod world;

// Re-export key types for convenience
pub use interpreter::{ActionCatalog, RunnerId, StepOutcome, VerbLibrary, VerbRef};
pub use runtime::{EngineConfig, TickReport, VerbEngine};
pub use world::{HydratableWorld, MemoryWorld, World};

/// Current version of the verbrunner crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
