//! Continuation handles and their stable string keys
//!
//! A [`Continuation`] is handed to whatever async effect suspended a runner
//! (a timer, a text box, an animation, a child verb). Its [`ContinuationKey`]
//! is the stable form stored in saves; on load the keys are resolved against a
//! [`ContinuationTable`] built from the restored runners.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::interpreter::runtime::RunnerId;
use crate::interpreter::verb::VerbRef;
use crate::runtime::error::{SaveError, SaveResult};

/// Stable identity of a suspension: `<verb-ref>@<runner-id>#<ip>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContinuationKey {
    /// Verb the runner executes
    pub verb: VerbRef,
    /// Runner that suspended
    pub runner: RunnerId,
    /// Index of the action that suspended
    pub ip: usize,
}

impl fmt::Display for ContinuationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}#{}", self.verb, self.runner, self.ip)
    }
}

impl FromStr for ContinuationKey {
    type Err = SaveError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let invalid = || SaveError::Format(format!("invalid continuation key '{text}'"));

        let (head, ip) = text.rsplit_once('#').ok_or_else(invalid)?;
        let (verb, runner) = head.rsplit_once('@').ok_or_else(invalid)?;
        Ok(Self {
            verb: verb.parse().map_err(|_| invalid())?,
            runner: RunnerId(runner.parse().map_err(|_| invalid())?),
            ip: ip.parse().map_err(|_| invalid())?,
        })
    }
}

impl TryFrom<String> for ContinuationKey {
    type Error = SaveError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        text.parse()
    }
}

impl From<ContinuationKey> for String {
    fn from(key: ContinuationKey) -> Self {
        key.to_string()
    }
}

/// Live resume handle for one suspension.
///
/// The ticket distinguishes successive suspensions of the same runner at the
/// same action, so a consumed continuation cannot resume a later suspension.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Continuation {
    key: ContinuationKey,
    ticket: u64,
}

impl Continuation {
    pub(crate) fn new(key: ContinuationKey, ticket: u64) -> Self {
        Self { key, ticket }
    }

    /// Stable key
    pub fn key(&self) -> &ContinuationKey {
        &self.key
    }

    /// Runner this continuation resumes
    pub fn runner(&self) -> RunnerId {
        self.key.runner
    }

    /// Ticket of the suspension
    pub fn ticket(&self) -> u64 {
        self.ticket
    }
}

impl fmt::Display for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)
    }
}

/// Second-pass lookup from saved keys to live continuations.
///
/// Resolutions are recorded so the loader can report suspended runners that
/// nothing claimed (they would stay parked forever).
#[derive(Debug, Clone, Default)]
pub struct ContinuationTable {
    entries: BTreeMap<ContinuationKey, Continuation>,
    claimed: RefCell<BTreeSet<ContinuationKey>>,
}

impl ContinuationTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a live continuation under its key
    pub fn insert(&mut self, continuation: Continuation) {
        self.entries.insert(continuation.key.clone(), continuation);
    }

    /// Resolve a saved key to its live continuation
    pub fn resolve(&self, key: &ContinuationKey) -> SaveResult<Continuation> {
        let continuation = self
            .entries
            .get(key)
            .cloned()
            .ok_or_else(|| SaveError::UnresolvedContinuation(key.to_string()))?;
        self.claimed.borrow_mut().insert(key.clone());
        Ok(continuation)
    }

    /// Keys that no [`resolve`](Self::resolve) call has claimed yet
    pub fn unclaimed(&self) -> Vec<ContinuationKey> {
        let claimed = self.claimed.borrow();
        self.entries
            .keys()
            .filter(|key| !claimed.contains(*key))
            .cloned()
            .collect()
    }

    /// Whether a key resolves
    pub fn contains(&self, key: &ContinuationKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of live continuations
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate keys in order
    pub fn keys(&self) -> impl Iterator<Item = &ContinuationKey> {
        self.entries.keys()
    }
}
