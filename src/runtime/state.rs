//! Sticky per-verb control state
//!
//! Action definitions are immutable. The state that must outlive a single
//! run of a verb (whether a `RunOnce` block already executed, how far a
//! `Choose` block has advanced) lives here, keyed by verb and action index.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::interpreter::verb::VerbRef;

/// Sticky state of one control action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StickyState {
    /// `RunOnce` block flag
    RunOnce {
        /// Whether the block body has been entered
        executed: bool,
    },
    /// `Choose` selection counter
    Choose {
        /// Number of completed selections
        count: u64,
    },
}

/// Serialized form of one sticky entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlEntry {
    /// Owning verb
    pub verb: VerbRef,
    /// Action index within the verb
    pub index: usize,
    /// State of the action
    #[serde(flatten)]
    pub state: StickyState,
}

/// Engine-owned table of sticky control state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlState {
    entries: BTreeMap<(VerbRef, usize), StickyState>,
}

impl ControlState {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a table from serialized entries
    pub fn from_entries(entries: impl IntoIterator<Item = ControlEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|entry| ((entry.verb, entry.index), entry.state))
                .collect(),
        }
    }

    /// Serialize the table in key order
    pub fn entries(&self) -> Vec<ControlEntry> {
        self.entries
            .iter()
            .map(|((verb, index), state)| ControlEntry {
                verb: verb.clone(),
                index: *index,
                state: *state,
            })
            .collect()
    }

    /// Whether the `RunOnce` at `index` has executed
    pub fn run_once_executed(&self, verb: &VerbRef, index: usize) -> bool {
        matches!(
            self.entries.get(&(verb.clone(), index)),
            Some(StickyState::RunOnce { executed: true })
        )
    }

    /// Mark the `RunOnce` at `index` as executed
    pub fn mark_run_once(&mut self, verb: &VerbRef, index: usize) {
        self.entries
            .insert((verb.clone(), index), StickyState::RunOnce { executed: true });
    }

    /// Selections made so far by the `Choose` at `index`
    pub fn choose_count(&self, verb: &VerbRef, index: usize) -> u64 {
        match self.entries.get(&(verb.clone(), index)) {
            Some(StickyState::Choose { count }) => *count,
            _ => 0,
        }
    }

    /// Record the selection counter of the `Choose` at `index`
    pub fn set_choose_count(&mut self, verb: &VerbRef, index: usize, count: u64) {
        self.entries
            .insert((verb.clone(), index), StickyState::Choose { count });
    }

    /// Forget every entry of one verb
    pub fn reset_verb(&mut self, verb: &VerbRef) {
        self.entries.retain(|(owner, _), _| owner != verb);
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_round_trip() {
        let look = VerbRef::global("look");
        let mut state = ControlState::new();
        state.mark_run_once(&look, 2);
        state.set_choose_count(&look, 5, 7);

        let json = serde_json::to_string(&state.entries()).unwrap();
        assert!(json.contains("\"kind\":\"run_once\""));
        let entries: Vec<ControlEntry> = serde_json::from_str(&json).unwrap();
        let restored = ControlState::from_entries(entries);

        assert_eq!(restored, state);
        assert!(restored.run_once_executed(&look, 2));
        assert_eq!(restored.choose_count(&look, 5), 7);
    }

    #[test]
    fn test_reset_verb_is_scoped() {
        let look = VerbRef::global("look");
        let talk = VerbRef::global("talk");
        let mut state = ControlState::new();
        state.mark_run_once(&look, 0);
        state.mark_run_once(&talk, 0);

        state.reset_verb(&look);
        assert!(!state.run_once_executed(&look, 0));
        assert!(state.run_once_executed(&talk, 0));
    }
}
