//! Engine snapshots and save games
//!
//! Captures every in-flight runner, the sticky control table, queued
//! continuations and the random stream position. Loading is two-phase:
//! runners are rebuilt first (minting fresh continuations into a
//! [`ContinuationTable`]), then every saved continuation key (parents, the
//! deferred queue, the world) is resolved against that table.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::VerbEngine;
use super::continuation::{ContinuationKey, ContinuationTable};
use super::error::{SaveError, SaveResult};
use super::state::{ControlEntry, ControlState};
use crate::interpreter::ir::{BlockExit, ResumeState};
use crate::interpreter::runtime::{RunnerId, RunnerStatus, VerbRunner, WrapperRepeat};
use crate::interpreter::verb::VerbRef;
use crate::world::HydratableWorld;

/// Current save format version
pub const SAVE_FORMAT_VERSION: u32 = 1;

/// Saved state of one in-flight runner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerRecord {
    /// Runner id
    pub id: RunnerId,

    /// Verb being executed
    pub verb: VerbRef,

    /// Instruction pointer
    pub ip: usize,

    /// Running (yielded on budget) or suspended
    pub status: RunnerStatus,

    /// Key of the continuation the runner waits on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<ContinuationKey>,

    /// Private resume state of the suspended action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_state: Option<ResumeState>,

    /// Open `Choose` redirects, innermost last
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exits: Vec<BlockExit>,

    /// `Repeat` counters keyed by action index
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub repeats: BTreeMap<usize, u32>,

    /// Wrapper repeat counters
    pub wrapper: WrapperRepeat,

    /// Key of the parent continuation delivered when this runner ends
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ContinuationKey>,

    /// Nesting depth
    pub depth: usize,
}

/// Position of the deterministic random stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RngState {
    /// ChaCha key
    pub seed: [u8; 32],

    /// Word position within the stream (decimal, it does not fit a JSON number)
    pub word_pos: String,
}

impl RngState {
    fn capture(rng: &ChaCha8Rng) -> Self {
        Self {
            seed: rng.get_seed(),
            word_pos: rng.get_word_pos().to_string(),
        }
    }

    fn rebuild(&self) -> SaveResult<ChaCha8Rng> {
        let word_pos: u128 = self
            .word_pos
            .parse()
            .map_err(|_| SaveError::Format(format!("invalid rng word position '{}'", self.word_pos)))?;
        let mut rng = ChaCha8Rng::from_seed(self.seed);
        rng.set_word_pos(word_pos);
        Ok(rng)
    }
}

/// Complete engine state at a frame boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    /// Fingerprint of the library the runners execute
    pub fingerprint: String,

    /// Next runner id to allocate
    pub next_runner: u64,

    /// Random stream position
    pub rng: RngState,

    /// In-flight runners, ordered by id
    pub runners: Vec<RunnerRecord>,

    /// Sticky control entries
    pub control: Vec<ControlEntry>,

    /// Keys waiting in the deferred queue, oldest first
    pub queued: Vec<ContinuationKey>,
}

impl VerbEngine {
    /// Capture the engine state.
    ///
    /// Queued continuations that no longer match their runner's pending
    /// suspension are left out; delivering them would be a no-op or misuse.
    pub fn snapshot(&self) -> EngineSnapshot {
        let queued = self
            .queue
            .pending()
            .into_iter()
            .filter(|continuation| {
                let live = self
                    .runners
                    .get(&continuation.runner())
                    .and_then(VerbRunner::pending)
                    .is_some_and(|pending| pending == continuation);
                if !live {
                    tracing::debug!(key = %continuation.key(), "stale queued continuation not saved");
                }
                live
            })
            .map(|continuation| continuation.key().clone())
            .collect();

        EngineSnapshot {
            fingerprint: self.library.fingerprint().to_string(),
            next_runner: self.next_runner,
            rng: RngState::capture(&self.rng),
            runners: self.runners.values().map(VerbRunner::record).collect(),
            control: self.control.entries(),
            queued,
        }
    }

    /// Replace the engine state with a snapshot.
    ///
    /// Runs both load passes for the engine's own keys and returns the table
    /// of live continuations so the world can resolve its keys too. On error
    /// the engine is left unchanged.
    pub fn restore(&mut self, snapshot: &EngineSnapshot) -> SaveResult<ContinuationTable> {
        if snapshot.fingerprint != self.library.fingerprint() {
            if self.config.strict_fingerprint {
                return Err(SaveError::FingerprintMismatch {
                    saved: snapshot.fingerprint.clone(),
                    current: self.library.fingerprint().to_string(),
                });
            }
            tracing::warn!(
                saved = %snapshot.fingerprint,
                current = %self.library.fingerprint(),
                "save was created against a different verb library"
            );
        }
        let rng = snapshot.rng.rebuild()?;

        // Pass 1: rebuild runners and mint their continuations.
        let mut runners = BTreeMap::new();
        let mut table = ContinuationTable::new();
        for record in &snapshot.runners {
            let verb = self
                .library
                .get(&record.verb)
                .ok_or_else(|| SaveError::UnknownVerb(record.verb.to_string()))?;
            if record.id.0 >= snapshot.next_runner {
                return Err(SaveError::InvalidState(format!(
                    "runner {} allocated past next id {}",
                    record.id, snapshot.next_runner
                )));
            }
            let runner = VerbRunner::from_record(record, verb)?;
            if let Some(pending) = runner.pending() {
                table.insert(pending.clone());
            }
            if runners.insert(record.id, runner).is_some() {
                return Err(SaveError::InvalidState(format!("runner {} saved twice", record.id)));
            }
        }

        // Pass 2: resolve parent and queued keys.
        for record in &snapshot.runners {
            if let Some(key) = &record.parent {
                let parent = table.resolve(key)?;
                if let Some(runner) = runners.get_mut(&record.id) {
                    runner.set_parent(Some(parent));
                }
            }
        }
        let queued = snapshot
            .queued
            .iter()
            .map(|key| table.resolve(key))
            .collect::<SaveResult<Vec<_>>>()?;

        let yielded: BTreeSet<RunnerId> = runners
            .values()
            .filter(|runner| runner.status() == RunnerStatus::Running)
            .map(VerbRunner::id)
            .collect();

        self.clear();
        self.runners = runners;
        self.yielded = yielded;
        self.control = ControlState::from_entries(snapshot.control.iter().cloned());
        self.rng = rng;
        self.next_runner = snapshot.next_runner;
        for continuation in queued {
            self.queue.enqueue(continuation);
        }

        tracing::debug!(
            runners = self.runners.len(),
            queued = self.queue.len(),
            "engine restored"
        );
        Ok(table)
    }
}

/// Save metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveMetadata {
    /// Unique id of this save
    pub save_id: uuid::Uuid,

    /// When the save was captured
    pub created_at: chrono::DateTime<chrono::Utc>,

    /// Format version the save was written with
    pub format_version: u32,
}

/// A complete saved game: engine plus world state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveGame {
    /// Metadata
    pub metadata: SaveMetadata,

    /// Engine state
    pub engine: EngineSnapshot,

    /// World state (from [`HydratableWorld::snapshot_state`])
    pub world: serde_json::Value,
}

impl SaveGame {
    /// Capture the engine and world at a frame boundary
    pub fn capture<W: HydratableWorld + ?Sized>(engine: &VerbEngine, world: &W) -> Self {
        Self {
            metadata: SaveMetadata {
                save_id: uuid::Uuid::new_v4(),
                created_at: chrono::Utc::now(),
                format_version: SAVE_FORMAT_VERSION,
            },
            engine: engine.snapshot(),
            world: world.snapshot_state(),
        }
    }

    /// Restore the engine and the world.
    ///
    /// The world must already be wired to `engine`'s queue. Suspended runners
    /// whose continuation nothing holds afterwards are reported; they stay
    /// parked until cancelled.
    pub fn restore<W: HydratableWorld + ?Sized>(
        &self,
        engine: &mut VerbEngine,
        world: &mut W,
    ) -> SaveResult<()> {
        if self.metadata.format_version != SAVE_FORMAT_VERSION {
            return Err(SaveError::Format(format!(
                "unsupported save format version {}",
                self.metadata.format_version
            )));
        }

        let table = engine.restore(&self.engine)?;
        if let Err(error) = world.restore_state(&self.world, &table) {
            engine.clear();
            return Err(error);
        }

        for key in table.unclaimed() {
            tracing::warn!(key = %key, "restored runner is suspended but nothing holds its continuation");
        }
        tracing::info!(save_id = %self.metadata.save_id, "save restored");
        Ok(())
    }

    /// Encode as pretty JSON
    pub fn to_json(&self) -> SaveResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Decode from JSON
    pub fn from_json(text: &str) -> SaveResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
