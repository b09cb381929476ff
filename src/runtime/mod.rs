//! Verb engine orchestrator and public API
//!
//! This module provides [`VerbEngine`], which owns every in-flight
//! [`VerbRunner`], the deferred-resume queue and the sticky control state,
//! and exposes the per-frame entry points a game loop calls.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

// Submodules
pub mod continuation;
pub mod error;
pub mod queue;
pub mod snapshot;
pub mod state;
pub mod storage;

use crate::interpreter::runtime::{
    EngineCommand, Host, RunnerId, RunnerStatus, StepOutcome, VerbRunner,
};
use crate::interpreter::verb::{Verb, VerbLibrary, VerbRef};
use crate::world::World;
use continuation::Continuation;
use error::{ContinuationError, EngineError, Result};
use queue::DeferredQueue;
use state::ControlState;

/// Configuration for the verb engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root directory for save slots and config (default: .verbrun/)
    pub root: PathBuf,

    /// Actions a runner may execute per drive before yielding to the next tick
    pub max_actions_per_step: usize,

    /// Maximum `RunVerb` nesting depth
    pub max_verb_depth: usize,

    /// Seed for the `RANDOM` choose policy
    pub rng_seed: u64,

    /// Reject saves created against a different verb library
    pub strict_fingerprint: bool,

    /// Validate control-block structure when loading libraries
    pub validate_blocks: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(".verbrun"),
            max_actions_per_step: 10_000,
            max_verb_depth: 16,
            rng_seed: 0x5eed,
            strict_fingerprint: false,
            validate_blocks: true,
        }
    }
}

/// What happened during one [`VerbEngine::tick`].
#[derive(Debug, Default)]
pub struct TickReport {
    /// Continuations drained from the deferred queue
    pub resumed: usize,
    /// Runners that ran to completion since the previous tick
    pub finished: Vec<RunnerId>,
    /// Errors raised since the previous tick. None of them stopped the tick.
    pub errors: Vec<EngineError>,
}

impl TickReport {
    /// Whether the tick completed without errors
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// The verb engine
///
/// Owns the runners, the deferred queue, sticky control state and the
/// deterministic random generator. The world is borrowed per call.
pub struct VerbEngine {
    config: EngineConfig,
    library: Arc<VerbLibrary>,
    queue: DeferredQueue,
    runners: BTreeMap<RunnerId, VerbRunner>,
    control: ControlState,
    rng: ChaCha8Rng,
    next_runner: u64,
    yielded: BTreeSet<RunnerId>,
    /// Continuations still held by the host for runners that were cancelled
    /// while suspended. An entry is dropped once delivered.
    cancelled: BTreeMap<RunnerId, Continuation>,
    finished: Vec<RunnerId>,
    errors: Vec<EngineError>,
}

impl std::fmt::Debug for VerbEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerbEngine")
            .field("library", &self.library.fingerprint())
            .field("runners", &self.runners.keys().collect::<Vec<_>>())
            .field("queued", &self.queue.len())
            .field("next_runner", &self.next_runner)
            .finish()
    }
}

impl VerbEngine {
    /// Create an engine over a loaded library
    pub fn new(config: EngineConfig, library: Arc<VerbLibrary>) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(config.rng_seed);
        Self {
            config,
            library,
            queue: DeferredQueue::new(),
            runners: BTreeMap::new(),
            control: ControlState::new(),
            rng,
            next_runner: 1,
            yielded: BTreeSet::new(),
            cancelled: BTreeMap::new(),
            finished: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Initialize storage directories and write the config
    pub fn init(config: &EngineConfig) -> anyhow::Result<()> {
        storage::init_storage(&config.root)?;
        storage::write_config(config)?;
        Ok(())
    }

    /// Create an engine from the config stored under `root`
    pub fn load(root: PathBuf, library: Arc<VerbLibrary>) -> anyhow::Result<Self> {
        let config = storage::load_config(&root)?;
        Ok(Self::new(config, library))
    }

    /// Get the current configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Get the loaded library
    pub fn library(&self) -> &Arc<VerbLibrary> {
        &self.library
    }

    /// Handle to the deferred-resume queue. Worlds enqueue completed
    /// continuations here.
    pub fn queue(&self) -> DeferredQueue {
        self.queue.clone()
    }

    /// Start a top-level run of a library verb.
    pub fn start(&mut self, verb: &VerbRef, world: &mut dyn World) -> Result<RunnerId> {
        let found = self
            .library
            .get(verb)
            .ok_or_else(|| EngineError::UnknownVerb(verb.to_string()))?;
        self.start_verb(found, 1, world)
    }

    /// Start a top-level run of `verb`, repeated `repeat` times (`-1` for
    /// forever), and drive it until it suspends, yields or ends.
    ///
    /// Errors of sub-verbs spawned along the way are reported by the next
    /// [`tick`](Self::tick).
    pub fn start_verb(
        &mut self,
        verb: Arc<Verb>,
        repeat: i32,
        world: &mut dyn World,
    ) -> Result<RunnerId> {
        let id = self.spawn(verb, repeat, 0, None);
        self.drive(id, world, None)?;
        Ok(id)
    }

    /// Deliver a continuation immediately, bypassing the deferred queue.
    ///
    /// The continuation a runner was suspended on when it was cancelled is
    /// ignored once. Any other continuation that does not match a suspended
    /// runner is misuse. Cancelled runners are not saved, so after a restore
    /// the world no longer holds their keys.
    pub fn resume(
        &mut self,
        continuation: &Continuation,
        world: &mut dyn World,
    ) -> Result<StepOutcome> {
        let id = continuation.runner();
        if !self.runners.contains_key(&id) {
            if self.cancelled.get(&id) == Some(continuation) {
                self.cancelled.remove(&id);
                tracing::debug!(key = %continuation.key(), "continuation for cancelled runner ignored");
                return Ok(StepOutcome::Cancelled);
            }
            let error = ContinuationError::UnknownRunner {
                key: continuation.key().to_string(),
            };
            tracing::error!(error = %error, "continuation misuse");
            return Err(error.into());
        }

        let result = self.drive(id, world, Some(continuation.clone()));
        if let Err(EngineError::Continuation(error)) = &result {
            tracing::error!(error = %error, "continuation misuse");
        }
        result
    }

    /// Run one frame: drain the deferred queue and resume each continuation
    /// in FIFO order, then continue runners that yielded on budget during the
    /// previous tick.
    pub fn tick(&mut self, world: &mut dyn World) -> TickReport {
        let mut report = TickReport::default();
        let yielded = std::mem::take(&mut self.yielded);

        for continuation in self.queue.drain_all() {
            report.resumed += 1;
            if let Err(error) = self.resume(&continuation, world) {
                self.errors.push(error);
            }
        }

        for id in yielded {
            let running = self
                .runners
                .get(&id)
                .is_some_and(|runner| runner.status() == RunnerStatus::Running);
            if !running {
                continue;
            }
            if let Err(error) = self.drive(id, world, None) {
                self.errors.push(error);
            }
        }

        report.finished = std::mem::take(&mut self.finished);
        report.errors = std::mem::take(&mut self.errors);
        if !report.errors.is_empty() {
            tracing::debug!(errors = report.errors.len(), "tick completed with errors");
        }
        report
    }

    /// Cancel a runner and every sub-verb it is waiting on.
    ///
    /// The runner's pending continuation is discarded; a parent waiting on it
    /// is notified through the deferred queue. Returns `false` if the runner
    /// is not in flight.
    pub fn cancel(&mut self, id: RunnerId) -> bool {
        self.cancel_runner(id, true)
    }

    /// Cancel every in-flight runner of `verb`. Returns how many were cancelled.
    pub fn cancel_verb(&mut self, verb: &VerbRef) -> usize {
        let targets: Vec<RunnerId> = self
            .runners
            .values()
            .filter(|runner| runner.verb().reference() == verb)
            .map(VerbRunner::id)
            .collect();
        let cancelled = targets
            .into_iter()
            .filter(|id| self.cancel_runner(*id, true))
            .count();
        tracing::debug!(verb = %verb, cancelled, "verb cancelled");
        cancelled
    }

    /// Get an in-flight runner
    pub fn runner(&self, id: RunnerId) -> Option<&VerbRunner> {
        self.runners.get(&id)
    }

    /// In-flight runners in id order
    pub fn runners(&self) -> impl Iterator<Item = &VerbRunner> {
        self.runners.values()
    }

    /// Whether nothing is running, suspended or queued
    pub fn is_idle(&self) -> bool {
        self.runners.is_empty() && self.queue.is_empty()
    }

    /// Sticky control state
    pub fn control_state(&self) -> &ControlState {
        &self.control
    }

    /// Tear down: drop every runner and queued continuation without invoking
    /// anything. Sticky control state is kept.
    pub fn clear(&mut self) {
        tracing::debug!(runners = self.runners.len(), "engine cleared");
        self.queue.clear();
        self.runners.clear();
        self.yielded.clear();
        self.cancelled.clear();
        self.finished.clear();
        self.errors.clear();
    }

    fn spawn(
        &mut self,
        verb: Arc<Verb>,
        repeat: i32,
        depth: usize,
        parent: Option<Continuation>,
    ) -> RunnerId {
        let id = RunnerId(self.next_runner);
        self.next_runner += 1;
        tracing::debug!(verb = %verb.reference(), runner = %id, repeat, depth, "runner started");
        let runner = VerbRunner::new(id, verb, repeat, depth).with_parent(parent);
        self.runners.insert(id, runner);
        id
    }

    /// Step (or resume) one runner until it suspends, yields or ends,
    /// applying the engine commands its actions emit along the way.
    fn drive(
        &mut self,
        id: RunnerId,
        world: &mut dyn World,
        mut wake: Option<Continuation>,
    ) -> Result<StepOutcome> {
        let mut budget = self.config.max_actions_per_step;

        loop {
            let Some(runner) = self.runners.get_mut(&id) else {
                // Cancelled by one of its own commands.
                return Ok(StepOutcome::Cancelled);
            };
            let mut host = Host {
                world: &mut *world,
                library: self.library.as_ref(),
                control: &mut self.control,
                rng: &mut self.rng,
                max_depth: self.config.max_verb_depth,
            };
            let result = match wake.take() {
                Some(continuation) => runner.resume(&continuation, &mut host, &mut budget),
                None => runner.step(&mut host, &mut budget),
            };
            let commands = runner.take_commands();

            for command in commands {
                self.apply(id, command, world);
            }

            match result {
                Ok(StepOutcome::Interrupted) => continue,
                Ok(StepOutcome::Yielded) => {
                    tracing::trace!(runner = %id, "runner yielded on action budget");
                    self.yielded.insert(id);
                    return Ok(StepOutcome::Yielded);
                }
                Ok(StepOutcome::Suspended) => return Ok(StepOutcome::Suspended),
                Ok(outcome) => {
                    self.retire(id);
                    return Ok(outcome);
                }
                Err(error) => {
                    let in_flight = self
                        .runners
                        .get(&id)
                        .is_some_and(VerbRunner::is_in_flight);
                    if !in_flight {
                        self.retire(id);
                    }
                    return Err(error);
                }
            }
        }
    }

    fn apply(&mut self, origin: RunnerId, command: EngineCommand, world: &mut dyn World) {
        match command {
            EngineCommand::Spawn {
                verb,
                repeat,
                parent,
            } => {
                let depth = self.runners.get(&origin).map_or(0, |runner| runner.depth() + 1);
                let found = match self.library.get(&verb) {
                    Some(found) if depth <= self.config.max_verb_depth => found,
                    Some(_) => {
                        self.errors.push(EngineError::NestingLimit {
                            verb: verb.to_string(),
                            limit: self.config.max_verb_depth,
                        });
                        self.notify(parent);
                        return;
                    }
                    None => {
                        self.errors.push(EngineError::UnknownVerb(verb.to_string()));
                        self.notify(parent);
                        return;
                    }
                };
                let child = self.spawn(found, repeat, depth, parent);
                if let Err(error) = self.drive(child, world, None) {
                    self.errors.push(error);
                }
            }
            EngineCommand::Cancel { verb } => {
                self.cancel_verb(&verb);
            }
        }
    }

    fn cancel_runner(&mut self, id: RunnerId, notify_parent: bool) -> bool {
        let Some(runner) = self.runners.get_mut(&id) else {
            return false;
        };
        if !notify_parent {
            runner.take_parent();
        }
        let outstanding = runner.pending().cloned();
        if !runner.cancel() {
            return false;
        }

        let children: Vec<RunnerId> = self
            .runners
            .values()
            .filter(|child| child.parent().is_some_and(|parent| parent.runner() == id))
            .map(VerbRunner::id)
            .collect();
        // A continuation held by a child dies with the cascade below.
        if let Some(outstanding) = outstanding {
            let held_by_child = children.iter().any(|child| {
                self.runners
                    .get(child)
                    .and_then(VerbRunner::parent)
                    .is_some_and(|parent| *parent == outstanding)
            });
            if !held_by_child {
                self.cancelled.insert(id, outstanding);
            }
        }
        for child in children {
            self.cancel_runner(child, false);
        }

        self.retire(id);
        true
    }

    /// Remove an ended runner and wake whoever waits on it.
    fn retire(&mut self, id: RunnerId) {
        let Some(mut runner) = self.runners.remove(&id) else {
            return;
        };
        self.yielded.remove(&id);
        if runner.status() == RunnerStatus::Finished {
            self.finished.push(id);
        }
        tracing::trace!(runner = %id, status = %runner.status(), "runner retired");
        self.notify(runner.take_parent());
    }

    fn notify(&self, parent: Option<Continuation>) {
        if let Some(parent) = parent {
            self.queue.enqueue(parent);
        }
    }
}

pub use continuation::{ContinuationKey, ContinuationTable};
pub use snapshot::{EngineSnapshot, RngState, RunnerRecord, SaveGame, SaveMetadata};
pub use state::{ControlEntry, StickyState};
pub use storage::{SaveStore, Storage};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.root, PathBuf::from(".verbrun"));
        assert_eq!(config.max_actions_per_step, 10_000);
        assert_eq!(config.max_verb_depth, 16);
        assert!(!config.strict_fingerprint);
        assert!(config.validate_blocks);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"max_verb_depth": 4}"#).unwrap();
        assert_eq!(config.max_verb_depth, 4);
        assert_eq!(config.max_actions_per_step, 10_000);
    }

    #[test]
    fn test_empty_engine_is_idle() {
        let engine = VerbEngine::new(
            EngineConfig::default(),
            Arc::new(VerbLibrary::from_verbs(Vec::new()).unwrap()),
        );
        assert!(engine.is_idle());
        assert_eq!(engine.runners().count(), 0);
    }

    #[test]
    fn test_cancel_tracks_only_deliverable_continuations() {
        let text = serde_json::json!({
            "verbs": [
                {
                    "owner": "global",
                    "id": "parent",
                    "actions": [{ "kind": "RunVerb", "params": { "verb": "global/child", "wait": "true" } }]
                },
                {
                    "owner": "global",
                    "id": "child",
                    "actions": [{ "kind": "Say", "params": { "text": "hush" } }]
                }
            ]
        })
        .to_string();
        let catalog = crate::interpreter::ActionCatalog::standard();
        let library = VerbLibrary::load_str(&text, &catalog, true).unwrap();
        let mut engine = VerbEngine::new(EngineConfig::default(), Arc::new(library));
        let mut world = crate::world::MemoryWorld::new(engine.queue());

        let parent = engine.start(&VerbRef::global("parent"), &mut world).unwrap();
        assert_eq!(engine.runners().count(), 2);
        assert!(engine.cancel(parent));

        // The parent's continuation died with its child; only the child's
        // pending text is still held by the world.
        assert_eq!(engine.cancelled.len(), 1);
        assert!(!engine.cancelled.contains_key(&parent));

        assert!(world.dismiss_text());
        let report = engine.tick(&mut world);
        assert!(report.is_clean());
        assert!(engine.cancelled.is_empty());
        assert!(engine.is_idle());
    }
}
