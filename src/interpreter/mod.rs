//! Verb interpreter: actions, control blocks and the per-verb runner.
//!
//! Verbs are flat action lists authored in design data. Control flow
//! (`If`/`Else`, `Repeat`, `Choose`, `RunOnce`) is expressed by opener and
//! terminator actions sharing a block id; the [`resolver`] turns those ids
//! into jump targets and the [`runtime::VerbRunner`] walks the list one action
//! at a time, suspending whenever an action waits on the world.

/// Action kind catalog: parameter schemas and constructors.
pub mod builder;
/// Predicates evaluated by `If*` actions.
pub mod condition;
/// Typed action representation.
pub mod ir;
/// Parameter schemas and the `configure` step.
pub mod params;
/// Control-block resolution over flat action lists.
pub mod resolver;
/// Verb runner and the context actions execute in.
pub mod runtime;
/// Verbs, verb references and the loaded verb library.
pub mod verb;

mod control;
mod effects;

pub use builder::{ActionCatalog, ActionFactory};
pub use condition::{CompareOp, Condition, Expression, Operand};
pub use ir::{
    Action, Block, BlockExit, BlockKind, ChooseBlock, ChoosePolicy, ControlRole, Flow, IfBlock,
    RepeatBlock, ResumeFlow, ResumeState,
};
pub use params::{ParamMap, ParamSpec, ParamType, ParamValue, Params, configure};
pub use runtime::{
    ActionContext, EngineCommand, Host, RunnerId, RunnerStatus, StepOutcome, VerbRunner,
    WrapperRepeat,
};
pub use verb::{
    ActionDefinition, ActionDocument, LibraryDocument, Verb, VerbDocument, VerbLibrary, VerbRef,
    VerbScope,
};
