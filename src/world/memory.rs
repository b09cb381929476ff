//! In-memory reference world
//!
//! Keeps actors, scenes and properties in maps and simulates the async
//! effects verbs wait on: timers elapse through [`MemoryWorld::advance`],
//! text waits on [`MemoryWorld::dismiss_text`] and animations on
//! [`MemoryWorld::finish_animation`]. Completed waits are handed to the
//! deferred queue, never resumed in place.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use super::{HydratableWorld, Vec2, World, WorldResult};
use crate::runtime::continuation::{Continuation, ContinuationKey, ContinuationTable};
use crate::runtime::error::{ReferenceKind, ReferenceNotFound, SaveError, SaveResult};
use crate::runtime::queue::DeferredQueue;

/// One actor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Actor {
    /// Current state
    pub state: Option<String>,
    /// Visibility
    pub visible: bool,
    /// Position
    pub position: Vec2,
    /// Current animation
    pub animation: Option<String>,
}

impl Default for Actor {
    fn default() -> Self {
        Self {
            state: None,
            visible: true,
            position: Vec2::default(),
            animation: None,
        }
    }
}

/// One scene
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Scene {
    /// Current state
    pub state: Option<String>,
}

/// JSON description a [`MemoryWorld`] is built from.
///
/// ```json
/// { "actors": { "door": { "state": "closed" } },
///   "scenes": { "hall": {} },
///   "current_scene": "hall",
///   "properties": { "coins": "0" },
///   "sounds": ["creak"] }
/// ```
///
/// An empty `sounds` list accepts every sound id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldSeed {
    /// Actors by id
    pub actors: BTreeMap<String, Actor>,
    /// Scenes by id
    pub scenes: BTreeMap<String, Scene>,
    /// Scene used when an action names none
    pub current_scene: Option<String>,
    /// Global properties
    pub properties: BTreeMap<String, String>,
    /// Known sound ids
    pub sounds: BTreeSet<String>,
}

impl WorldSeed {
    /// Parse a seed from JSON
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// Something observable the world did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TranscriptEntry {
    /// A displayed line of text
    Line {
        /// Speaking actor, if any
        actor: Option<String>,
        /// Text shown
        text: String,
    },
    /// A played sound
    Sound {
        /// Sound id
        sound: String,
    },
    /// A started animation
    Animation {
        /// Actor id
        actor: String,
        /// Animation id
        animation: String,
    },
}

impl fmt::Display for TranscriptEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscriptEntry::Line {
                actor: Some(actor),
                text,
            } => write!(f, "{actor}: {text}"),
            TranscriptEntry::Line { actor: None, text } => write!(f, "{text}"),
            TranscriptEntry::Sound { sound } => write!(f, "[sound {sound}]"),
            TranscriptEntry::Animation { actor, animation } => {
                write!(f, "[{actor} plays {animation}]")
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Timer {
    due: f64,
    continuation: Continuation,
}

#[derive(Debug, Clone)]
struct PendingText {
    actor: Option<String>,
    text: String,
    continuation: Continuation,
}

/// Reference [`World`] implementation backed by plain maps.
#[derive(Debug, Clone)]
pub struct MemoryWorld {
    actors: BTreeMap<String, Actor>,
    scenes: BTreeMap<String, Scene>,
    current_scene: Option<String>,
    properties: BTreeMap<String, String>,
    sounds: BTreeSet<String>,
    queue: DeferredQueue,
    clock: f64,
    timers: Vec<Timer>,
    texts: VecDeque<PendingText>,
    animations: BTreeMap<String, Continuation>,
    transcript: Vec<TranscriptEntry>,
}

impl MemoryWorld {
    /// Create an empty world delivering completions to `queue`
    pub fn new(queue: DeferredQueue) -> Self {
        Self::from_seed(WorldSeed::default(), queue)
    }

    /// Create a world from a seed
    pub fn from_seed(seed: WorldSeed, queue: DeferredQueue) -> Self {
        Self {
            actors: seed.actors,
            scenes: seed.scenes,
            current_scene: seed.current_scene,
            properties: seed.properties,
            sounds: seed.sounds,
            queue,
            clock: 0.0,
            timers: Vec::new(),
            texts: VecDeque::new(),
            animations: BTreeMap::new(),
            transcript: Vec::new(),
        }
    }

    /// Add (or replace) an actor
    pub fn insert_actor(&mut self, id: impl Into<String>, actor: Actor) {
        self.actors.insert(id.into(), actor);
    }

    /// Add (or replace) a scene
    pub fn insert_scene(&mut self, id: impl Into<String>, scene: Scene) {
        self.scenes.insert(id.into(), scene);
    }

    /// Select the scene used when actions name none
    pub fn set_current_scene(&mut self, id: Option<&str>) {
        self.current_scene = id.map(str::to_string);
    }

    /// Look up an actor
    pub fn actor(&self, id: &str) -> Option<&Actor> {
        self.actors.get(id)
    }

    /// Simulated seconds elapsed
    pub fn clock(&self) -> f64 {
        self.clock
    }

    /// Advance the clock, enqueueing every timer that came due in due order.
    /// Returns how many fired.
    pub fn advance(&mut self, seconds: f32) -> usize {
        self.clock += f64::from(seconds.max(0.0));
        let clock = self.clock;

        let (mut due, pending): (Vec<Timer>, Vec<Timer>) = std::mem::take(&mut self.timers)
            .into_iter()
            .partition(|timer| timer.due <= clock);
        self.timers = pending;
        due.sort_by(|a, b| a.due.total_cmp(&b.due));

        let fired = due.len();
        for timer in due {
            self.queue.enqueue(timer.continuation);
        }
        fired
    }

    /// Dismiss the oldest line that waits for the player. Returns `false` if
    /// no line is waiting.
    pub fn dismiss_text(&mut self) -> bool {
        match self.texts.pop_front() {
            Some(pending) => {
                tracing::trace!(text = %pending.text, "text dismissed");
                self.queue.enqueue(pending.continuation);
                true
            }
            None => false,
        }
    }

    /// Complete the animation an actor is playing. Returns `false` if nothing
    /// waits on it.
    pub fn finish_animation(&mut self, actor: &str) -> bool {
        match self.animations.remove(actor) {
            Some(continuation) => {
                self.queue.enqueue(continuation);
                true
            }
            None => false,
        }
    }

    /// Dismiss every waiting line and finish every waited animation.
    /// Returns how many waits completed.
    pub fn complete_waits(&mut self) -> usize {
        let mut completed = 0;
        while self.dismiss_text() {
            completed += 1;
        }
        let actors: Vec<String> = self.animations.keys().cloned().collect();
        for actor in actors {
            if self.finish_animation(&actor) {
                completed += 1;
            }
        }
        completed
    }

    /// Whether any timer, line or animation is still waiting
    pub fn has_pending_waits(&self) -> bool {
        !self.timers.is_empty() || !self.texts.is_empty() || !self.animations.is_empty()
    }

    /// Everything displayed or played so far
    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    /// Displayed lines so far, as text
    pub fn lines(&self) -> Vec<String> {
        self.transcript
            .iter()
            .filter_map(|entry| match entry {
                TranscriptEntry::Line { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// Take the transcript, leaving it empty
    pub fn take_transcript(&mut self) -> Vec<TranscriptEntry> {
        std::mem::take(&mut self.transcript)
    }

    fn actor_mut(&mut self, id: &str) -> WorldResult<&mut Actor> {
        self.actors
            .get_mut(id)
            .ok_or_else(|| ReferenceNotFound::new(ReferenceKind::Actor, id))
    }

    fn lookup_actor(&self, id: &str) -> WorldResult<&Actor> {
        self.actors
            .get(id)
            .ok_or_else(|| ReferenceNotFound::new(ReferenceKind::Actor, id))
    }

    fn scene_id<'a>(&'a self, scene: Option<&'a str>) -> WorldResult<&'a str> {
        scene
            .or(self.current_scene.as_deref())
            .ok_or_else(|| ReferenceNotFound::new(ReferenceKind::Scene, "<current>"))
    }
}

impl World for MemoryWorld {
    fn actor_state(&self, actor: &str) -> WorldResult<Option<String>> {
        Ok(self.lookup_actor(actor)?.state.clone())
    }

    fn set_actor_state(&mut self, actor: &str, state: Option<&str>) -> WorldResult<()> {
        self.actor_mut(actor)?.state = state.map(str::to_string);
        Ok(())
    }

    fn actor_visible(&self, actor: &str) -> WorldResult<bool> {
        Ok(self.lookup_actor(actor)?.visible)
    }

    fn set_actor_visible(&mut self, actor: &str, visible: bool) -> WorldResult<()> {
        self.actor_mut(actor)?.visible = visible;
        Ok(())
    }

    fn set_actor_position(&mut self, actor: &str, position: Vec2) -> WorldResult<()> {
        self.actor_mut(actor)?.position = position;
        Ok(())
    }

    fn scene_state(&self, scene: Option<&str>) -> WorldResult<Option<String>> {
        let id = self.scene_id(scene)?;
        self.scenes
            .get(id)
            .map(|scene| scene.state.clone())
            .ok_or_else(|| ReferenceNotFound::new(ReferenceKind::Scene, id))
    }

    fn set_scene_state(&mut self, scene: Option<&str>, state: Option<&str>) -> WorldResult<()> {
        let id = self.scene_id(scene)?.to_string();
        let scene = self
            .scenes
            .get_mut(&id)
            .ok_or_else(|| ReferenceNotFound::new(ReferenceKind::Scene, id.as_str()))?;
        scene.state = state.map(str::to_string);
        Ok(())
    }

    fn property(&self, name: &str) -> Option<String> {
        self.properties.get(name).cloned()
    }

    fn set_property(&mut self, name: &str, value: Option<&str>) {
        match value {
            Some(value) => {
                self.properties.insert(name.to_string(), value.to_string());
            }
            None => {
                self.properties.remove(name);
            }
        }
    }

    fn show_text(
        &mut self,
        actor: Option<&str>,
        text: &str,
        on_dismiss: Option<Continuation>,
    ) -> WorldResult<()> {
        if let Some(actor) = actor {
            self.lookup_actor(actor)?;
        }
        self.transcript.push(TranscriptEntry::Line {
            actor: actor.map(str::to_string),
            text: text.to_string(),
        });
        if let Some(continuation) = on_dismiss {
            self.texts.push_back(PendingText {
                actor: actor.map(str::to_string),
                text: text.to_string(),
                continuation,
            });
        }
        Ok(())
    }

    fn start_timer(&mut self, seconds: f32, on_elapsed: Continuation) {
        self.timers.push(Timer {
            due: self.clock + f64::from(seconds.max(0.0)),
            continuation: on_elapsed,
        });
    }

    fn play_animation(
        &mut self,
        actor: &str,
        animation: &str,
        on_complete: Option<Continuation>,
    ) -> WorldResult<Option<String>> {
        let previous = self
            .actor_mut(actor)?
            .animation
            .replace(animation.to_string());
        self.transcript.push(TranscriptEntry::Animation {
            actor: actor.to_string(),
            animation: animation.to_string(),
        });

        // A replaced animation counts as finished for whoever waited on it.
        if let Some(interrupted) = self.animations.remove(actor) {
            self.queue.enqueue(interrupted);
        }
        if let Some(continuation) = on_complete {
            self.animations.insert(actor.to_string(), continuation);
        }
        Ok(previous)
    }

    fn set_animation(&mut self, actor: &str, animation: Option<&str>) -> WorldResult<()> {
        self.actor_mut(actor)?.animation = animation.map(str::to_string);
        Ok(())
    }

    fn play_sound(&mut self, sound: &str) -> WorldResult<()> {
        if !self.sounds.is_empty() && !self.sounds.contains(sound) {
            return Err(ReferenceNotFound::new(ReferenceKind::Sound, sound));
        }
        self.transcript.push(TranscriptEntry::Sound {
            sound: sound.to_string(),
        });
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SavedTimer {
    due: f64,
    key: ContinuationKey,
}

#[derive(Debug, Serialize, Deserialize)]
struct SavedText {
    actor: Option<String>,
    text: String,
    key: ContinuationKey,
}

#[derive(Debug, Serialize, Deserialize)]
struct SavedWorld {
    #[serde(flatten)]
    seed: WorldSeed,
    clock: f64,
    #[serde(default)]
    timers: Vec<SavedTimer>,
    #[serde(default)]
    texts: Vec<SavedText>,
    #[serde(default)]
    animations: BTreeMap<String, ContinuationKey>,
    #[serde(default)]
    transcript: Vec<TranscriptEntry>,
}

/// Resolve a saved key, dropping it with a warning when no restored runner
/// owns it.
fn resolve_or_drop(table: &ContinuationTable, key: &ContinuationKey) -> Option<Continuation> {
    match table.resolve(key) {
        Ok(continuation) => Some(continuation),
        Err(error) => {
            tracing::warn!(key = %key, error = %error, "dropping world wait with no restored runner");
            None
        }
    }
}

impl HydratableWorld for MemoryWorld {
    fn snapshot_state(&self) -> serde_json::Value {
        let saved = SavedWorld {
            seed: WorldSeed {
                actors: self.actors.clone(),
                scenes: self.scenes.clone(),
                current_scene: self.current_scene.clone(),
                properties: self.properties.clone(),
                sounds: self.sounds.clone(),
            },
            clock: self.clock,
            timers: self
                .timers
                .iter()
                .map(|timer| SavedTimer {
                    due: timer.due,
                    key: timer.continuation.key().clone(),
                })
                .collect(),
            texts: self
                .texts
                .iter()
                .map(|pending| SavedText {
                    actor: pending.actor.clone(),
                    text: pending.text.clone(),
                    key: pending.continuation.key().clone(),
                })
                .collect(),
            animations: self
                .animations
                .iter()
                .map(|(actor, continuation)| (actor.clone(), continuation.key().clone()))
                .collect(),
            transcript: self.transcript.clone(),
        };
        match serde_json::to_value(&saved) {
            Ok(value) => value,
            Err(error) => {
                tracing::error!(error = %error, "failed to encode world state");
                serde_json::Value::Null
            }
        }
    }

    fn restore_state(
        &mut self,
        state: &serde_json::Value,
        continuations: &ContinuationTable,
    ) -> SaveResult<()> {
        let saved = SavedWorld::deserialize(state)
            .map_err(|error| SaveError::Format(format!("world state: {error}")))?;

        self.timers = saved
            .timers
            .iter()
            .filter_map(|timer| {
                resolve_or_drop(continuations, &timer.key).map(|continuation| Timer {
                    due: timer.due,
                    continuation,
                })
            })
            .collect();
        self.texts = saved
            .texts
            .iter()
            .filter_map(|pending| {
                resolve_or_drop(continuations, &pending.key).map(|continuation| PendingText {
                    actor: pending.actor.clone(),
                    text: pending.text.clone(),
                    continuation,
                })
            })
            .collect();
        self.animations = saved
            .animations
            .iter()
            .filter_map(|(actor, key)| {
                resolve_or_drop(continuations, key).map(|continuation| (actor.clone(), continuation))
            })
            .collect();

        self.actors = saved.seed.actors;
        self.scenes = saved.seed.scenes;
        self.current_scene = saved.seed.current_scene;
        self.properties = saved.seed.properties;
        self.sounds = saved.seed.sounds;
        self.clock = saved.clock;
        self.transcript = saved.transcript;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::runtime::RunnerId;
    use crate::interpreter::verb::VerbRef;

    fn continuation(runner: u64, ip: usize) -> Continuation {
        Continuation::new(
            ContinuationKey {
                verb: VerbRef::global("test"),
                runner: RunnerId(runner),
                ip,
            },
            1,
        )
    }

    fn seeded(queue: DeferredQueue) -> MemoryWorld {
        let seed = WorldSeed::from_json(
            r#"{
                "actors": { "door": { "state": "closed" }, "guy": {} },
                "scenes": { "hall": { "state": "day" } },
                "current_scene": "hall",
                "properties": { "coins": "2" },
                "sounds": ["creak"]
            }"#,
        )
        .unwrap();
        MemoryWorld::from_seed(seed, queue)
    }

    #[test]
    fn test_lookups_report_missing_references() {
        let mut world = seeded(DeferredQueue::new());

        assert_eq!(world.actor_state("door").unwrap().as_deref(), Some("closed"));
        assert!(world.actor_visible("guy").unwrap());
        assert_eq!(world.scene_state(None).unwrap().as_deref(), Some("day"));

        let missing = world.set_actor_state("ghost", Some("boo")).unwrap_err();
        assert_eq!(missing.kind, ReferenceKind::Actor);
        assert_eq!(
            world.scene_state(Some("attic")).unwrap_err().kind,
            ReferenceKind::Scene
        );
        assert_eq!(world.play_sound("bang").unwrap_err().kind, ReferenceKind::Sound);
        assert!(world.play_sound("creak").is_ok());
    }

    #[test]
    fn test_timers_fire_in_due_order() {
        let queue = DeferredQueue::new();
        let mut world = seeded(queue.clone());
        world.start_timer(2.0, continuation(1, 0));
        world.start_timer(1.0, continuation(2, 0));
        world.start_timer(5.0, continuation(3, 0));

        assert_eq!(world.advance(0.5), 0);
        assert_eq!(world.advance(2.0), 2);
        let fired: Vec<RunnerId> = queue.drain_all().iter().map(Continuation::runner).collect();
        assert_eq!(fired, vec![RunnerId(2), RunnerId(1)]);
        assert!(world.has_pending_waits());
    }

    #[test]
    fn test_text_and_animation_waits() {
        let queue = DeferredQueue::new();
        let mut world = seeded(queue.clone());

        world.show_text(Some("guy"), "Hello", Some(continuation(1, 0))).unwrap();
        world.show_text(None, "narration", None).unwrap();
        assert!(world.show_text(Some("ghost"), "boo", None).is_err());
        assert_eq!(world.lines(), vec!["Hello", "narration"]);

        let previous = world
            .play_animation("guy", "wave", Some(continuation(2, 1)))
            .unwrap();
        assert_eq!(previous, None);

        assert_eq!(world.complete_waits(), 2);
        assert_eq!(queue.len(), 2);
        assert!(!world.dismiss_text());
        assert!(!world.finish_animation("guy"));
    }

    #[test]
    fn test_replaced_animation_releases_its_waiter() {
        let queue = DeferredQueue::new();
        let mut world = seeded(queue.clone());
        world.play_animation("guy", "walk", Some(continuation(1, 0))).unwrap();
        let previous = world.play_animation("guy", "talk", None).unwrap();

        assert_eq!(previous.as_deref(), Some("walk"));
        assert_eq!(queue.drain_all()[0].runner(), RunnerId(1));
    }

    #[test]
    fn test_state_round_trip_resolves_and_drops_keys() {
        let queue = DeferredQueue::new();
        let mut world = seeded(queue.clone());
        world.start_timer(3.0, continuation(1, 4));
        world.show_text(None, "wait", Some(continuation(2, 0))).unwrap();
        world.set_property("coins", Some("5"));
        let state = world.snapshot_state();

        let mut table = ContinuationTable::new();
        table.insert(continuation(1, 4));

        let mut restored = MemoryWorld::new(queue.clone());
        restored.restore_state(&state, &table).unwrap();

        assert_eq!(restored.property("coins").as_deref(), Some("5"));
        assert_eq!(restored.actor_state("door").unwrap().as_deref(), Some("closed"));
        // The text wait had no restored runner and was dropped.
        assert!(!restored.dismiss_text());
        assert_eq!(restored.advance(3.0), 1);
        assert_eq!(queue.drain_all()[0].key().ip, 4);
    }
}
