//! World query-and-mutate surface
//!
//! Leaf actions read and modify game state exclusively through the [`World`]
//! trait. Lookups by string id either return a value or
//! [`ReferenceNotFound`], which actions report and then treat as a no-op.
//! Asynchronous effects (text display, timers, animations) receive a
//! [`Continuation`] that the world must hand to the deferred-resume queue once
//! the effect completes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::runtime::continuation::{Continuation, ContinuationTable};
use crate::runtime::error::{ReferenceNotFound, SaveResult};

pub mod memory;

pub use memory::{MemoryWorld, WorldSeed};

/// Result alias for world lookups
pub type WorldResult<T> = std::result::Result<T, ReferenceNotFound>;

/// Two-dimensional position
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    /// Horizontal component
    pub x: f32,
    /// Vertical component
    pub y: f32,
}

impl Vec2 {
    /// Create a new vector
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Vec2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

impl FromStr for Vec2 {
    type Err = String;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let (x, y) = text
            .split_once(',')
            .ok_or_else(|| format!("expected 'x,y', got '{text}'"))?;
        let x = x.trim().parse::<f32>().map_err(|e| e.to_string())?;
        let y = y.trim().parse::<f32>().map_err(|e| e.to_string())?;
        Ok(Self { x, y })
    }
}

/// Game state surface consumed by leaf actions and predicates.
///
/// Scene arguments default to the current scene when `None`.
pub trait World {
    /// Current state of an actor (`None` when the actor has no state)
    fn actor_state(&self, actor: &str) -> WorldResult<Option<String>>;

    /// Set or clear an actor's state
    fn set_actor_state(&mut self, actor: &str, state: Option<&str>) -> WorldResult<()>;

    /// Whether an actor is visible
    fn actor_visible(&self, actor: &str) -> WorldResult<bool>;

    /// Show or hide an actor
    fn set_actor_visible(&mut self, actor: &str, visible: bool) -> WorldResult<()>;

    /// Move an actor
    fn set_actor_position(&mut self, actor: &str, position: Vec2) -> WorldResult<()>;

    /// State of a scene
    fn scene_state(&self, scene: Option<&str>) -> WorldResult<Option<String>>;

    /// Set or clear a scene's state
    fn set_scene_state(&mut self, scene: Option<&str>, state: Option<&str>) -> WorldResult<()>;

    /// Read a global property
    fn property(&self, name: &str) -> Option<String>;

    /// Write or remove a global property
    fn set_property(&mut self, name: &str, value: Option<&str>);

    /// Display a line of text. When `on_dismiss` is given the world must
    /// enqueue it once the player dismisses the line.
    fn show_text(
        &mut self,
        actor: Option<&str>,
        text: &str,
        on_dismiss: Option<Continuation>,
    ) -> WorldResult<()>;

    /// Start a timer that enqueues `on_elapsed` after `seconds`
    fn start_timer(&mut self, seconds: f32, on_elapsed: Continuation);

    /// Start an animation on an actor, returning the animation it replaced.
    /// When `on_complete` is given the world must enqueue it once the
    /// animation finishes.
    fn play_animation(
        &mut self,
        actor: &str,
        animation: &str,
        on_complete: Option<Continuation>,
    ) -> WorldResult<Option<String>>;

    /// Set an actor's animation without waiting (used to restore a previous one)
    fn set_animation(&mut self, actor: &str, animation: Option<&str>) -> WorldResult<()>;

    /// Play a sound effect
    fn play_sound(&mut self, sound: &str) -> WorldResult<()>;
}

/// A world whose private state can be captured into a save and rebuilt.
///
/// Pending continuations are stored by [`ContinuationKey`](crate::runtime::continuation::ContinuationKey)
/// and re-resolved against the table produced by the first load pass.
pub trait HydratableWorld: World {
    /// Capture the world state, storing continuations by key
    fn snapshot_state(&self) -> serde_json::Value;

    /// Rebuild the world state, resolving continuation keys through `continuations`
    fn restore_state(
        &mut self,
        state: &serde_json::Value,
        continuations: &ContinuationTable,
    ) -> SaveResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec2_parse() {
        let v: Vec2 = "12.5, -3".parse().unwrap();
        assert_eq!(v, Vec2::new(12.5, -3.0));
        assert_eq!(v.to_string(), "12.5,-3");
    }

    #[test]
    fn test_vec2_rejects_garbage() {
        assert!("12.5".parse::<Vec2>().is_err());
        assert!("a,b".parse::<Vec2>().is_err());
    }
}
