use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::interpreter::ir::{Action, BlockExit, Flow, ResumeFlow, ResumeState};
use crate::interpreter::verb::{Verb, VerbLibrary, VerbRef};
use crate::runtime::continuation::{Continuation, ContinuationKey};
use crate::runtime::error::{
    ActionError, ContinuationError, EngineError, Result, SaveError, SaveResult,
};
use crate::runtime::snapshot::RunnerRecord;
use crate::runtime::state::ControlState;
use crate::world::World;

/// Identifier of one verb execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunnerId(pub u64);

impl fmt::Display for RunnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerStatus {
    /// Executing actions (or yielded on budget)
    Running,
    /// Waiting for its continuation
    Suspended,
    /// Ran off the end of the action list
    Finished,
    /// Cancelled by `CancelVerb` or the host
    Cancelled,
    /// Stopped by a structural error
    Failed,
}

impl RunnerStatus {
    /// Whether the runner is still executing or waiting
    pub fn is_in_flight(&self) -> bool {
        matches!(self, RunnerStatus::Running | RunnerStatus::Suspended)
    }
}

impl fmt::Display for RunnerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunnerStatus::Running => "running",
            RunnerStatus::Suspended => "suspended",
            RunnerStatus::Finished => "finished",
            RunnerStatus::Cancelled => "cancelled",
            RunnerStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of a [`VerbRunner::step`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Action budget exhausted; continue on a later tick
    Yielded,
    /// An action emitted engine commands that must be applied first
    Interrupted,
    /// Waiting for a continuation
    Suspended,
    /// Verb complete
    Finished,
    /// Runner was cancelled
    Cancelled,
    /// Runner stopped on a structural error
    Failed,
}

/// Request from an action to the owning engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    /// Start a child runner
    Spawn {
        /// Verb to run
        verb: VerbRef,
        /// Wrapper repeat count
        repeat: i32,
        /// Continuation to enqueue when the child ends
        parent: Option<Continuation>,
    },
    /// Cancel every in-flight runner of a verb
    Cancel {
        /// Verb to cancel
        verb: VerbRef,
    },
}

/// Repeat counters of a runner started as "run this verb N times".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrapperRepeat {
    /// Requested runs, `-1` for forever
    pub count: i32,
    /// Runs started so far
    pub current: u32,
}

impl WrapperRepeat {
    fn new(count: i32) -> Self {
        Self {
            count,
            current: if count == 0 { 0 } else { 1 },
        }
    }

    fn another_run(&self) -> bool {
        self.count < 0 || i64::from(self.current) < i64::from(self.count)
    }
}

/// Collaborators an action executes against.
pub struct Host<'a> {
    /// Game state
    pub world: &'a mut dyn World,
    /// Loaded verbs (for `RunVerb` lookups)
    pub library: &'a VerbLibrary,
    /// Sticky per-verb control state
    pub control: &'a mut ControlState,
    /// Deterministic generator for the `RANDOM` choose policy
    pub rng: &'a mut ChaCha8Rng,
    /// Maximum `RunVerb` nesting depth
    pub max_depth: usize,
}

/// Everything one action invocation may touch.
pub struct ActionContext<'a, 'h> {
    host: &'a mut Host<'h>,
    verb: &'a Verb,
    ip: usize,
    runner: RunnerId,
    depth: usize,
    repeats: &'a mut BTreeMap<usize, u32>,
    commands: &'a mut Vec<EngineCommand>,
    tickets: &'a mut u64,
    minted: Option<Continuation>,
}

impl<'a, 'h> ActionContext<'a, 'h> {
    /// Verb being executed
    pub fn verb(&self) -> &'a Verb {
        self.verb
    }

    /// Reference of the verb being executed
    pub fn verb_ref(&self) -> &'a VerbRef {
        self.verb.reference()
    }

    /// Action list of the verb being executed
    pub fn actions(&self) -> &'a [Action] {
        self.verb.actions()
    }

    /// Index of the executing action
    pub fn ip(&self) -> usize {
        self.ip
    }

    /// Runner executing the action
    pub fn runner(&self) -> RunnerId {
        self.runner
    }

    /// Nesting depth of the runner (0 for top-level verbs)
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Maximum nesting depth
    pub fn max_depth(&self) -> usize {
        self.host.max_depth
    }

    /// Read-only world access
    pub fn world(&self) -> &dyn World {
        &*self.host.world
    }

    /// Mutable world access
    pub fn world_mut(&mut self) -> &mut dyn World {
        &mut *self.host.world
    }

    /// Loaded verb library
    pub fn library(&self) -> &VerbLibrary {
        self.host.library
    }

    /// Sticky control state
    pub fn control(&mut self) -> &mut ControlState {
        &mut *self.host.control
    }

    /// Deterministic random generator
    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut *self.host.rng
    }

    /// Per-runner `Repeat` counters keyed by action index
    pub fn repeats(&mut self) -> &mut BTreeMap<usize, u32> {
        &mut *self.repeats
    }

    /// Ask the engine to do something once this action returns
    pub fn emit(&mut self, command: EngineCommand) {
        self.commands.push(command);
    }

    /// Continuation for suspending at this action. Minted on first use; later
    /// calls during the same invocation return the same handle.
    pub fn continuation(&mut self) -> Continuation {
        if let Some(existing) = &self.minted {
            return existing.clone();
        }
        *self.tickets += 1;
        let continuation = Continuation::new(
            ContinuationKey {
                verb: self.verb.reference().clone(),
                runner: self.runner,
                ip: self.ip,
            },
            *self.tickets,
        );
        self.minted = Some(continuation.clone());
        continuation
    }
}

/// One in-flight execution of a verb.
///
/// The runner walks its verb's flat action list with an instruction pointer,
/// following the jumps returned by control actions and parking on a single
/// continuation whenever an action suspends.
#[derive(Debug)]
pub struct VerbRunner {
    id: RunnerId,
    verb: Arc<Verb>,
    ip: usize,
    status: RunnerStatus,
    pending: Option<Continuation>,
    resume_state: Option<ResumeState>,
    exits: Vec<BlockExit>,
    repeats: BTreeMap<usize, u32>,
    wrapper: WrapperRepeat,
    parent: Option<Continuation>,
    depth: usize,
    tickets: u64,
    commands: Vec<EngineCommand>,
}

impl VerbRunner {
    /// Create a runner at the start of `verb`, running it `repeat` times
    /// (`-1` for forever).
    pub fn new(id: RunnerId, verb: Arc<Verb>, repeat: i32, depth: usize) -> Self {
        let wrapper = WrapperRepeat::new(repeat);
        let ip = if wrapper.current == 0 { verb.len() } else { 0 };
        Self {
            id,
            verb,
            ip,
            status: RunnerStatus::Running,
            pending: None,
            resume_state: None,
            exits: Vec::new(),
            repeats: BTreeMap::new(),
            wrapper,
            parent: None,
            depth,
            tickets: 0,
            commands: Vec::new(),
        }
    }

    /// Attach the continuation to enqueue when this runner ends
    pub fn with_parent(mut self, parent: Option<Continuation>) -> Self {
        self.parent = parent;
        self
    }

    /// Runner id
    pub fn id(&self) -> RunnerId {
        self.id
    }

    /// Verb being executed
    pub fn verb(&self) -> &Arc<Verb> {
        &self.verb
    }

    /// Instruction pointer (`0..=len`)
    pub fn ip(&self) -> usize {
        self.ip
    }

    /// Lifecycle state
    pub fn status(&self) -> RunnerStatus {
        self.status
    }

    /// Continuation the runner is waiting on
    pub fn pending(&self) -> Option<&Continuation> {
        self.pending.as_ref()
    }

    /// Private resume state of the suspended action
    pub fn resume_state(&self) -> Option<&ResumeState> {
        self.resume_state.as_ref()
    }

    /// Open `Choose` redirects, innermost last
    pub fn exits(&self) -> &[BlockExit] {
        &self.exits
    }

    /// `Repeat` counters keyed by action index
    pub fn repeats(&self) -> &BTreeMap<usize, u32> {
        &self.repeats
    }

    /// Wrapper repeat counters
    pub fn wrapper(&self) -> WrapperRepeat {
        self.wrapper
    }

    /// Continuation held for a waiting parent
    pub fn parent(&self) -> Option<&Continuation> {
        self.parent.as_ref()
    }

    /// Nesting depth
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Whether the runner is running or suspended
    pub fn is_in_flight(&self) -> bool {
        self.status.is_in_flight()
    }

    /// Commands emitted since the last call
    pub fn take_commands(&mut self) -> Vec<EngineCommand> {
        std::mem::take(&mut self.commands)
    }

    /// Detach the parent continuation
    pub fn take_parent(&mut self) -> Option<Continuation> {
        self.parent.take()
    }

    /// Execute actions until the runner suspends, finishes, fails, exhausts
    /// `budget`, or an action emits engine commands.
    pub fn step(&mut self, host: &mut Host<'_>, budget: &mut usize) -> Result<StepOutcome> {
        match self.status {
            RunnerStatus::Running => {}
            RunnerStatus::Suspended => return Ok(StepOutcome::Suspended),
            RunnerStatus::Finished => return Ok(StepOutcome::Finished),
            RunnerStatus::Cancelled => return Ok(StepOutcome::Cancelled),
            RunnerStatus::Failed => return Ok(StepOutcome::Failed),
        }

        let verb = Arc::clone(&self.verb);
        let actions = verb.actions();

        loop {
            if self.ip >= actions.len() {
                if !self.wrapper.another_run() {
                    self.finish();
                    return Ok(StepOutcome::Finished);
                }
                if *budget == 0 {
                    return Ok(StepOutcome::Yielded);
                }
                *budget -= 1;
                self.restart();
                continue;
            }
            if *budget == 0 {
                return Ok(StepOutcome::Yielded);
            }
            *budget -= 1;

            let index = self.ip;
            let action = &actions[index];
            let mut ctx = self.context(host, &verb, index);
            let result = action.run(&mut ctx);
            let minted = ctx.minted.take();

            match result {
                Ok(Flow::Next) => self.advance(index + 1),
                Ok(Flow::Jump(target)) => self.advance(target),
                Ok(Flow::Enter { at, exit }) => {
                    self.exits.push(exit);
                    self.advance(at);
                }
                Ok(Flow::Suspend(state)) => {
                    self.suspend(minted, state);
                    return Ok(StepOutcome::Suspended);
                }
                Err(ActionError::Malformed(error)) => {
                    tracing::error!(
                        verb = %verb.reference(),
                        runner = %self.id,
                        index,
                        kind = action.kind_name(),
                        error = %error,
                        "malformed control block; verb stopped"
                    );
                    self.fail();
                    return Err(error.into());
                }
                Err(error) => {
                    tracing::warn!(
                        verb = %verb.reference(),
                        runner = %self.id,
                        index,
                        kind = action.kind_name(),
                        error = %error,
                        "action failed; skipping"
                    );
                    self.advance(index + 1);
                }
            }

            if !self.commands.is_empty() {
                return Ok(StepOutcome::Interrupted);
            }
        }
    }

    /// Transition Suspended → Running for `continuation`.
    ///
    /// Returns `false` when the suspended action asked to suspend again (a
    /// new continuation has been issued and the runner stays suspended).
    pub fn wake(&mut self, continuation: &Continuation, host: &mut Host<'_>) -> Result<bool> {
        let key = continuation.key().to_string();
        if self.status != RunnerStatus::Suspended {
            return Err(ContinuationError::NotSuspended {
                key,
                status: self.status.to_string(),
            }
            .into());
        }
        if self.pending.as_ref() != Some(continuation) {
            return Err(ContinuationError::StaleTicket { key }.into());
        }

        self.pending = None;
        self.status = RunnerStatus::Running;
        let index = self.ip;

        let Some(state) = self.resume_state.take() else {
            self.advance(index + 1);
            return Ok(true);
        };

        let verb = Arc::clone(&self.verb);
        let Some(action) = verb.actions().get(index) else {
            tracing::warn!(
                verb = %verb.reference(),
                runner = %self.id,
                index,
                "suspended action no longer exists; continuing past it"
            );
            self.advance(index + 1);
            return Ok(true);
        };
        let mut ctx = self.context(host, &verb, index);
        let result = action.resume(&state, &mut ctx);
        let minted = ctx.minted.take();

        match result {
            Ok(ResumeFlow::Done) => {
                self.advance(index + 1);
                Ok(true)
            }
            Ok(ResumeFlow::Suspend(next)) => {
                self.suspend(minted, Some(next));
                Ok(false)
            }
            Err(ActionError::Malformed(error)) => {
                tracing::error!(
                    verb = %verb.reference(),
                    runner = %self.id,
                    index,
                    kind = action.kind_name(),
                    error = %error,
                    "malformed control block while resuming; verb stopped"
                );
                self.fail();
                Err(error.into())
            }
            Err(error) => {
                tracing::warn!(
                    verb = %verb.reference(),
                    runner = %self.id,
                    index,
                    kind = action.kind_name(),
                    error = %error,
                    "resume failed; skipping"
                );
                self.advance(index + 1);
                Ok(true)
            }
        }
    }

    /// [`wake`](Self::wake) followed by [`step`](Self::step).
    pub fn resume(
        &mut self,
        continuation: &Continuation,
        host: &mut Host<'_>,
        budget: &mut usize,
    ) -> Result<StepOutcome> {
        if self.wake(continuation, host)? {
            self.step(host, budget)
        } else {
            Ok(StepOutcome::Suspended)
        }
    }

    /// Stop without running any further action. The pending continuation,
    /// if any, is discarded. Returns `false` if the runner already ended.
    pub fn cancel(&mut self) -> bool {
        if !self.is_in_flight() {
            return false;
        }
        tracing::debug!(verb = %self.verb.reference(), runner = %self.id, ip = self.ip, "runner cancelled");
        self.ip = self.verb.len();
        self.pending = None;
        self.resume_state = None;
        self.exits.clear();
        self.repeats.clear();
        self.status = RunnerStatus::Cancelled;
        true
    }

    fn context<'a, 'h>(
        &'a mut self,
        host: &'a mut Host<'h>,
        verb: &'a Verb,
        ip: usize,
    ) -> ActionContext<'a, 'h> {
        ActionContext {
            host,
            verb,
            ip,
            runner: self.id,
            depth: self.depth,
            repeats: &mut self.repeats,
            commands: &mut self.commands,
            tickets: &mut self.tickets,
            minted: None,
        }
    }

    fn advance(&mut self, target: usize) {
        self.ip = target.min(self.verb.len());
        while let Some(exit) = self.exits.last().copied() {
            if exit.at != self.ip {
                break;
            }
            self.exits.pop();
            self.ip = exit.to.min(self.verb.len());
        }
    }

    fn restart(&mut self) {
        self.wrapper.current = self.wrapper.current.saturating_add(1);
        self.ip = 0;
        self.exits.clear();
        self.repeats.clear();
        tracing::trace!(
            verb = %self.verb.reference(),
            runner = %self.id,
            run = self.wrapper.current,
            "verb restarted by wrapper repeat"
        );
    }

    fn suspend(&mut self, minted: Option<Continuation>, state: Option<ResumeState>) {
        let continuation = match minted {
            Some(continuation) => continuation,
            None => {
                tracing::warn!(
                    verb = %self.verb.reference(),
                    runner = %self.id,
                    index = self.ip,
                    "action suspended without handing out a continuation"
                );
                self.mint()
            }
        };
        tracing::debug!(key = %continuation.key(), "runner suspended");
        self.pending = Some(continuation);
        self.resume_state = state;
        self.status = RunnerStatus::Suspended;
    }

    fn mint(&mut self) -> Continuation {
        self.tickets += 1;
        Continuation::new(
            ContinuationKey {
                verb: self.verb.reference().clone(),
                runner: self.id,
                ip: self.ip,
            },
            self.tickets,
        )
    }

    fn finish(&mut self) {
        tracing::debug!(verb = %self.verb.reference(), runner = %self.id, "runner finished");
        self.ip = self.verb.len();
        self.exits.clear();
        self.repeats.clear();
        self.status = RunnerStatus::Finished;
    }

    fn fail(&mut self) {
        self.pending = None;
        self.resume_state = None;
        self.status = RunnerStatus::Failed;
    }

    /// Capture the runner for a save.
    pub fn record(&self) -> RunnerRecord {
        RunnerRecord {
            id: self.id,
            verb: self.verb.reference().clone(),
            ip: self.ip,
            status: self.status,
            pending: self.pending.as_ref().map(|c| c.key().clone()),
            resume_state: self.resume_state.clone(),
            exits: self.exits.clone(),
            repeats: self.repeats.clone(),
            wrapper: self.wrapper,
            parent: self.parent.as_ref().map(|c| c.key().clone()),
            depth: self.depth,
        }
    }

    /// Rebuild a runner from a save record (first load pass).
    ///
    /// A suspended runner receives a fresh continuation for its saved key.
    /// The parent continuation is resolved in the second pass.
    pub fn from_record(record: &RunnerRecord, verb: Arc<Verb>) -> SaveResult<Self> {
        let invalid = |reason: String| SaveError::InvalidState(format!("runner {}: {reason}", record.id));

        if record.verb != *verb.reference() {
            return Err(invalid(format!(
                "record for '{}' restored with verb '{}'",
                record.verb,
                verb.reference()
            )));
        }
        if record.ip > verb.len() {
            return Err(invalid(format!("ip {} past end of {} actions", record.ip, verb.len())));
        }
        if !record.status.is_in_flight() {
            return Err(invalid(format!("status {} is not in flight", record.status)));
        }
        if record.status == RunnerStatus::Suspended && record.ip >= verb.len() {
            return Err(invalid(format!(
                "suspended at {} but verb has {} actions",
                record.ip,
                verb.len()
            )));
        }
        if (record.status == RunnerStatus::Suspended) != record.pending.is_some() {
            return Err(invalid("pending continuation does not match status".into()));
        }
        if record.exits.iter().any(|exit| exit.at > verb.len() || exit.to > verb.len()) {
            return Err(invalid("block exit past end of verb".into()));
        }

        let mut runner = Self {
            id: record.id,
            verb,
            ip: record.ip,
            status: record.status,
            pending: None,
            resume_state: record.resume_state.clone(),
            exits: record.exits.clone(),
            repeats: record.repeats.clone(),
            wrapper: record.wrapper,
            parent: None,
            depth: record.depth,
            tickets: 0,
            commands: Vec::new(),
        };

        if let Some(key) = &record.pending {
            if key.runner != record.id || key.ip != record.ip || key.verb != record.verb {
                return Err(invalid(format!("pending key '{key}' does not match runner")));
            }
            runner.pending = Some(runner.mint());
        }
        Ok(runner)
    }

    pub(crate) fn set_parent(&mut self, parent: Option<Continuation>) {
        self.parent = parent;
    }
}

/// Convert a nesting failure into the error `RunVerb` reports.
pub(crate) fn nesting_error(verb: &VerbRef, limit: usize) -> ActionError {
    ActionError::Failed(
        EngineError::NestingLimit {
            verb: verb.to_string(),
            limit,
        }
        .to_string(),
    )
}
