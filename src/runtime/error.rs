//! Error types for the verb runtime
//!
//! Domain errors are thiserror enums with conversions into [`EngineError`] at
//! the engine boundary. Data-level errors (bad parameters, missing references)
//! are recovered close to where they happen; structural errors (malformed
//! blocks, continuation misuse) abort only the runner that hit them.

use std::fmt;
use std::io;
use thiserror::Error;

/// Malformed or missing action parameters, raised while configuring an action.
///
/// These fail verb loading, never execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParameterError {
    /// A mandatory parameter was absent from the raw parameter map
    #[error("{kind}: missing mandatory parameter '{param}'")]
    Missing {
        /// Action kind being configured
        kind: String,
        /// Parameter name
        param: String,
    },

    /// A parameter failed to parse into its declared semantic type
    #[error("{kind}: parameter '{param}' value '{value}' is not a valid {expected}")]
    Invalid {
        /// Action kind being configured
        kind: String,
        /// Parameter name
        param: String,
        /// Raw text supplied
        value: String,
        /// Human readable description of the expected type
        expected: String,
    },

    /// The parameter map named a kind the catalog does not know
    #[error("unknown action kind '{0}'")]
    UnknownKind(String),

    /// A structured (object/array) value was supplied where text is expected
    #[error("{kind}: parameter '{param}' must be a scalar value")]
    Unsupported {
        /// Action kind being configured
        kind: String,
        /// Parameter name
        param: String,
    },
}

/// Category of world object a lookup failed to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    /// An actor id
    Actor,
    /// A scene id
    Scene,
    /// A sound id
    Sound,
    /// An animation id on an actor
    Animation,
    /// A verb reference
    Verb,
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReferenceKind::Actor => "actor",
            ReferenceKind::Scene => "scene",
            ReferenceKind::Sound => "sound",
            ReferenceKind::Animation => "animation",
            ReferenceKind::Verb => "verb",
        };
        f.write_str(name)
    }
}

/// A world lookup by string id found nothing.
///
/// Actions treat this as a logged no-op; it never aborts a verb.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} '{id}' not found")]
pub struct ReferenceNotFound {
    /// What kind of object was looked up
    pub kind: ReferenceKind,
    /// The id that failed to resolve
    pub id: String,
}

impl ReferenceNotFound {
    /// Construct a not-found error for the given kind and id
    pub fn new(kind: ReferenceKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

/// Control-block structure of a verb is broken.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedVerbError {
    /// An opener has no same-id action after it
    #[error("verb '{verb}': block '{ca_id}' opened at action {index} has no matching terminator")]
    Unterminated {
        /// Verb reference
        verb: String,
        /// Index of the opener
        index: usize,
        /// Control block id
        ca_id: String,
    },

    /// A terminator (or `Else`) has no opener with its id
    #[error("verb '{verb}': action {index} closes block '{ca_id}' which was never opened")]
    Unopened {
        /// Verb reference
        verb: String,
        /// Index of the terminator
        index: usize,
        /// Control block id
        ca_id: String,
    },

    /// Blocks with different ids overlap instead of nesting
    #[error("verb '{verb}': action {index} closes block '{ca_id}' while block '{open}' is still open")]
    Interleaved {
        /// Verb reference
        verb: String,
        /// Index of the offending terminator
        index: usize,
        /// Block id being closed
        ca_id: String,
        /// Innermost block id that is still open
        open: String,
    },

    /// Two openers share one block id
    #[error("verb '{verb}': block id '{ca_id}' reused by action {index}")]
    DuplicateId {
        /// Verb reference
        verb: String,
        /// Index of the second opener
        index: usize,
        /// Control block id
        ca_id: String,
    },

    /// An `Else` outside an `If`, or a second `Else` in one `If`
    #[error("verb '{verb}': misplaced Else for block '{ca_id}' at action {index}")]
    MisplacedElse {
        /// Verb reference
        verb: String,
        /// Index of the Else
        index: usize,
        /// Control block id
        ca_id: String,
    },

    /// A terminator kind that does not match its opener (e.g. `EndRepeat` closing an `If`)
    #[error("verb '{verb}': action {index} of kind {kind} cannot close block '{ca_id}'")]
    MismatchedTerminator {
        /// Verb reference
        verb: String,
        /// Index of the terminator
        index: usize,
        /// Kind name of the terminator
        kind: String,
        /// Control block id
        ca_id: String,
    },

    /// The resolver was asked to scan from an action that is not a control action
    #[error("verb '{verb}': action {index} is not a control action")]
    NotControl {
        /// Verb reference
        verb: String,
        /// Offending index
        index: usize,
    },
}

/// Misuse of the suspend/resume protocol. This is a logic bug in an action or
/// world implementation and is always reported, never ignored.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContinuationError {
    /// The runner is not suspended (already resumed, running, or finished)
    #[error("continuation '{key}' resumed while runner is {status}")]
    NotSuspended {
        /// Continuation key
        key: String,
        /// Current runner status
        status: String,
    },

    /// The runner is suspended on a different ticket (continuation already consumed)
    #[error("continuation '{key}' was already consumed")]
    StaleTicket {
        /// Continuation key
        key: String,
    },

    /// No in-flight runner owns this continuation
    #[error("continuation '{key}' targets a runner that is not in flight")]
    UnknownRunner {
        /// Continuation key
        key: String,
    },
}

/// Failure of a single action's `run`/`resume`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ActionError {
    /// A referenced world object does not exist
    #[error(transparent)]
    Reference(#[from] ReferenceNotFound),

    /// The control-block resolver failed; fatal to the runner
    #[error(transparent)]
    Malformed(#[from] MalformedVerbError),

    /// Any other failure; logged and skipped
    #[error("{0}")]
    Failed(String),
}

/// Convenience result alias for action execution
pub type ActionResult<T> = std::result::Result<T, ActionError>;

/// Errors raised while loading a verb library document.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The document is not valid JSON for the library schema
    #[error("Invalid library document: {0}")]
    Json(#[from] serde_json::Error),

    /// The document could not be read
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// An action failed to configure
    #[error("verb '{verb}', action {index}: {source}")]
    Parameter {
        /// Verb reference
        verb: String,
        /// Action index within the verb
        index: usize,
        /// Underlying parameter error
        #[source]
        source: ParameterError,
    },

    /// A verb failed block validation
    #[error(transparent)]
    Malformed(#[from] MalformedVerbError),

    /// Two verbs share the same reference
    #[error("verb '{0}' is defined more than once")]
    DuplicateVerb(String),

    /// A verb reference string could not be parsed
    #[error("invalid verb reference '{text}': {reason}")]
    InvalidReference {
        /// The text supplied
        text: String,
        /// Why it was rejected
        reason: String,
    },
}

/// Errors raised while capturing or restoring a save.
#[derive(Debug, Error)]
pub enum SaveError {
    /// The save document is structurally wrong
    #[error("Invalid save format: {0}")]
    Format(String),

    /// The save references a verb missing from the loaded library
    #[error("Save references unknown verb '{0}'")]
    UnknownVerb(String),

    /// A continuation key did not resolve during the second load pass
    #[error("Continuation key '{0}' does not resolve to a suspended runner")]
    UnresolvedContinuation(String),

    /// The save was created against a different verb library
    #[error("Save was created against verb library {saved}, loaded library is {current}")]
    FingerprintMismatch {
        /// Fingerprint stored in the save
        saved: String,
        /// Fingerprint of the loaded library
        current: String,
    },

    /// A runner record contradicts itself or the verb it references
    #[error("Invalid runner state in save: {0}")]
    InvalidState(String),

    /// JSON encoding/decoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience result alias for save operations
pub type SaveResult<T> = std::result::Result<T, SaveError>;

/// Top-level engine error
#[derive(Debug, Error)]
pub enum EngineError {
    /// Parameter configuration errors
    #[error("Parameter error: {0}")]
    Parameter(#[from] ParameterError),

    /// Control-block structure errors
    #[error("Malformed verb: {0}")]
    Malformed(#[from] MalformedVerbError),

    /// Suspend/resume protocol misuse
    #[error("Continuation misuse: {0}")]
    Continuation(#[from] ContinuationError),

    /// Library loading errors
    #[error("Library error: {0}")]
    Load(#[from] LoadError),

    /// Save/restore errors
    #[error("Save error: {0}")]
    Save(#[from] SaveError),

    /// A verb reference did not resolve in the library
    #[error("Verb '{0}' not found")]
    UnknownVerb(String),

    /// Starting a verb would exceed the configured nesting depth
    #[error("Verb nesting limit of {limit} exceeded starting '{verb}'")]
    NestingLimit {
        /// Verb that could not be started
        verb: String,
        /// Configured limit
        limit: usize,
    },
}

/// Result type using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;
