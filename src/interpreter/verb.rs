//! Verbs, verb references and the loaded verb library

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use crate::interpreter::builder::ActionCatalog;
use crate::interpreter::ir::Action;
use crate::interpreter::params::ParamMap;
use crate::interpreter::resolver;
use crate::runtime::error::{LoadError, MalformedVerbError, ParameterError};

/// Characters that may not appear inside a scope, verb, state or target id.
const RESERVED: &[char] = &['/', '#', '>', '@', ':'];

/// Owner of a verb.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VerbScope {
    /// Game-global verb
    Global,
    /// Verb attached to a scene
    Scene(String),
    /// Verb attached to an actor
    Actor(String),
}

impl fmt::Display for VerbScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerbScope::Global => f.write_str("global"),
            VerbScope::Scene(id) => write!(f, "scene:{id}"),
            VerbScope::Actor(id) => write!(f, "actor:{id}"),
        }
    }
}

impl FromStr for VerbScope {
    type Err = LoadError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| LoadError::InvalidReference {
            text: text.to_string(),
            reason: reason.to_string(),
        };

        if text == "global" {
            return Ok(VerbScope::Global);
        }
        let (prefix, id) = text
            .split_once(':')
            .ok_or_else(|| invalid("expected 'global', 'scene:<id>' or 'actor:<id>'"))?;
        check_id(id).map_err(|reason| invalid(reason))?;
        match prefix {
            "scene" => Ok(VerbScope::Scene(id.to_string())),
            "actor" => Ok(VerbScope::Actor(id.to_string())),
            _ => Err(invalid("unknown scope prefix")),
        }
    }
}

fn check_id(id: &str) -> Result<(), &'static str> {
    if id.is_empty() {
        return Err("empty id");
    }
    if id.contains(RESERVED) {
        return Err("id contains a reserved character");
    }
    Ok(())
}

/// Stable identity of a verb: owner, id and optional qualifiers.
///
/// Text form: `global/<id>`, `scene:<id>/<verb>` or `actor:<id>/<verb>`,
/// optionally followed by `#<state>` and `><target>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VerbRef {
    /// Owner
    pub scope: VerbScope,
    /// Verb id (e.g. `open`, `look`)
    pub id: String,
    /// Owner state this verb is restricted to
    pub state: Option<String>,
    /// Target object this verb is restricted to (`use X with <target>`)
    pub target: Option<String>,
}

impl VerbRef {
    /// Unqualified verb reference
    pub fn new(scope: VerbScope, id: impl Into<String>) -> Self {
        Self {
            scope,
            id: id.into(),
            state: None,
            target: None,
        }
    }

    /// Global verb reference
    pub fn global(id: impl Into<String>) -> Self {
        Self::new(VerbScope::Global, id)
    }

    /// Restrict to an owner state
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    /// Restrict to a target
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }
}

impl fmt::Display for VerbRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scope, self.id)?;
        if let Some(state) = &self.state {
            write!(f, "#{state}")?;
        }
        if let Some(target) = &self.target {
            write!(f, ">{target}")?;
        }
        Ok(())
    }
}

impl FromStr for VerbRef {
    type Err = LoadError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| LoadError::InvalidReference {
            text: text.to_string(),
            reason: reason.to_string(),
        };

        let (scope, rest) = text
            .split_once('/')
            .ok_or_else(|| invalid("expected '<scope>/<verb>'"))?;
        let scope: VerbScope = scope.parse()?;

        let (rest, target) = match rest.split_once('>') {
            Some((head, target)) => (head, Some(target)),
            None => (rest, None),
        };
        let (id, state) = match rest.split_once('#') {
            Some((id, state)) => (id, Some(state)),
            None => (rest, None),
        };

        check_id(id).map_err(|reason| invalid(reason))?;
        for qualifier in state.iter().chain(target.iter()) {
            check_id(qualifier).map_err(|reason| invalid(reason))?;
        }

        Ok(Self {
            scope,
            id: id.to_string(),
            state: state.map(str::to_string),
            target: target.map(str::to_string),
        })
    }
}

impl TryFrom<String> for VerbRef {
    type Error = LoadError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        text.parse()
    }
}

impl From<VerbRef> for String {
    fn from(reference: VerbRef) -> Self {
        reference.to_string()
    }
}

/// Design data an action was configured from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDefinition {
    /// Kind name as written in the document
    pub kind: String,
    /// Raw parameters, sorted by name
    pub params: ParamMap,
}

/// A named, ordered action list. Immutable once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct Verb {
    reference: VerbRef,
    actions: Vec<Action>,
    definitions: Vec<ActionDefinition>,
}

impl Verb {
    /// Create a verb without validating its block structure
    pub fn new(reference: VerbRef, actions: Vec<Action>) -> Self {
        Self {
            reference,
            actions,
            definitions: Vec::new(),
        }
    }

    /// Attach the design data the actions were configured from.
    ///
    /// The library fingerprint hashes these when present.
    pub fn with_definitions(mut self, definitions: Vec<ActionDefinition>) -> Self {
        self.definitions = definitions;
        self
    }

    /// Create a verb, rejecting malformed control blocks
    pub fn validated(reference: VerbRef, actions: Vec<Action>) -> Result<Self, MalformedVerbError> {
        let verb = Self::new(reference, actions);
        verb.validate()?;
        Ok(verb)
    }

    /// Identity of this verb
    pub fn reference(&self) -> &VerbRef {
        &self.reference
    }

    /// Action list
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Number of actions
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether the verb has no actions
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Design data of each action, empty for verbs built in code
    pub fn definitions(&self) -> &[ActionDefinition] {
        &self.definitions
    }

    /// Check control-block structure
    pub fn validate(&self) -> Result<(), MalformedVerbError> {
        resolver::validate(&self.reference, &self.actions)
    }
}

/// Library document root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LibraryDocument {
    /// Verb definitions
    #[serde(default)]
    pub verbs: Vec<VerbDocument>,
}

/// One verb in a library document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerbDocument {
    /// `global`, `scene:<id>` or `actor:<id>`
    pub owner: String,
    /// Verb id
    pub id: String,
    /// Optional owner-state qualifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Optional target qualifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// Actions in execution order
    #[serde(default)]
    pub actions: Vec<ActionDocument>,
}

/// One action in a library document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDocument {
    /// Kind name registered in the [`ActionCatalog`]
    pub kind: String,
    /// Raw parameters; scalars are converted to text
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
}

impl ActionDocument {
    fn raw_params(&self) -> Result<ParamMap, ParameterError> {
        let mut raw = ParamMap::new();
        for (name, value) in &self.params {
            let text = match value {
                serde_json::Value::Null => continue,
                serde_json::Value::String(text) => text.clone(),
                serde_json::Value::Bool(flag) => flag.to_string(),
                serde_json::Value::Number(number) => number.to_string(),
                serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                    return Err(ParameterError::Unsupported {
                        kind: self.kind.clone(),
                        param: name.clone(),
                    });
                }
            };
            raw.insert(name.clone(), text);
        }
        Ok(raw)
    }
}

impl VerbDocument {
    fn reference(&self) -> Result<VerbRef, LoadError> {
        let scope: VerbScope = self.owner.parse()?;
        let text = VerbRef {
            scope,
            id: self.id.clone(),
            state: self.state.clone(),
            target: self.target.clone(),
        }
        .to_string();
        // Round-trip through the parser so qualifiers get the same id checks.
        text.parse()
    }
}

/// All verbs of a loaded chapter, keyed by reference.
#[derive(Debug, Clone, Default)]
pub struct VerbLibrary {
    verbs: BTreeMap<VerbRef, Arc<Verb>>,
    fingerprint: String,
}

impl VerbLibrary {
    /// Build a library from already-constructed verbs
    pub fn from_verbs(verbs: impl IntoIterator<Item = Verb>) -> Result<Self, LoadError> {
        let mut map = BTreeMap::new();
        for verb in verbs {
            let reference = verb.reference().clone();
            if map.contains_key(&reference) {
                return Err(LoadError::DuplicateVerb(reference.to_string()));
            }
            map.insert(reference, Arc::new(verb));
        }
        let fingerprint = fingerprint(&map);
        Ok(Self {
            verbs: map,
            fingerprint,
        })
    }

    /// Configure every action of a parsed document
    pub fn from_document(
        document: &LibraryDocument,
        catalog: &ActionCatalog,
        validate: bool,
    ) -> Result<Self, LoadError> {
        let mut verbs = Vec::with_capacity(document.verbs.len());
        for entry in &document.verbs {
            let reference = entry.reference()?;
            let mut actions = Vec::with_capacity(entry.actions.len());
            let mut definitions = Vec::with_capacity(entry.actions.len());
            for (index, action) in entry.actions.iter().enumerate() {
                let located = |source| LoadError::Parameter {
                    verb: reference.to_string(),
                    index,
                    source,
                };
                let raw = action.raw_params().map_err(located)?;
                actions.push(catalog.build(&action.kind, &raw).map_err(located)?);
                definitions.push(ActionDefinition {
                    kind: action.kind.clone(),
                    params: raw,
                });
            }
            let verb = if validate {
                Verb::validated(reference, actions)?
            } else {
                Verb::new(reference, actions)
            };
            verbs.push(verb.with_definitions(definitions));
        }

        let library = Self::from_verbs(verbs)?;
        tracing::debug!(
            verbs = library.len(),
            fingerprint = %library.fingerprint,
            "verb library loaded"
        );
        Ok(library)
    }

    /// Parse and configure a JSON library document
    pub fn load_str(text: &str, catalog: &ActionCatalog, validate: bool) -> Result<Self, LoadError> {
        let document: LibraryDocument = serde_json::from_str(text)?;
        Self::from_document(&document, catalog, validate)
    }

    /// Read, parse and configure a JSON library document from disk
    pub fn load_path(
        path: impl AsRef<Path>,
        catalog: &ActionCatalog,
        validate: bool,
    ) -> Result<Self, LoadError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::load_str(&text, catalog, validate)
    }

    /// Exact lookup
    pub fn get(&self, reference: &VerbRef) -> Option<Arc<Verb>> {
        self.verbs.get(reference).cloned()
    }

    /// Whether a verb with exactly this reference exists
    pub fn contains(&self, reference: &VerbRef) -> bool {
        self.verbs.contains_key(reference)
    }

    /// Find the most specific verb for an interaction.
    ///
    /// Within a scope a verb qualified by a matching state beats one qualified
    /// by a matching target, which beats an unqualified one. Verbs whose
    /// qualifiers do not match are never chosen. Actor and scene scopes fall
    /// back to global verbs with the same id.
    pub fn resolve(
        &self,
        scope: &VerbScope,
        id: &str,
        state: Option<&str>,
        target: Option<&str>,
    ) -> Option<Arc<Verb>> {
        let global = VerbScope::Global;
        let mut scopes = vec![scope];
        if *scope != global {
            scopes.push(&global);
        }

        for scope in scopes {
            let best = self
                .verbs
                .iter()
                .filter(|(reference, _)| reference.scope == *scope && reference.id == id)
                .filter_map(|(reference, verb)| {
                    let state_score = match (&reference.state, state) {
                        (None, _) => 0,
                        (Some(wanted), Some(actual)) if wanted == actual => 2,
                        _ => return None,
                    };
                    let target_score = match (&reference.target, target) {
                        (None, _) => 0,
                        (Some(wanted), Some(actual)) if wanted == actual => 1,
                        _ => return None,
                    };
                    Some((state_score + target_score, verb))
                })
                .fold(None::<(u8, &Arc<Verb>)>, |best, (score, verb)| match best {
                    Some((top, _)) if top >= score => best,
                    _ => Some((score, verb)),
                });

            if let Some((_, verb)) = best {
                return Some(Arc::clone(verb));
            }
        }
        None
    }

    /// Blake3 fingerprint of every verb reference and action definition
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Iterate verbs in reference order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Verb>> {
        self.verbs.values()
    }

    /// Number of verbs
    pub fn len(&self) -> usize {
        self.verbs.len()
    }

    /// Whether the library is empty
    pub fn is_empty(&self) -> bool {
        self.verbs.is_empty()
    }
}

fn fingerprint(verbs: &BTreeMap<VerbRef, Arc<Verb>>) -> String {
    let mut hasher = blake3::Hasher::new();
    for (reference, verb) in verbs {
        hasher.update(reference.to_string().as_bytes());
        hasher.update(b"\n");
        hasher.update(&(verb.len() as u64).to_le_bytes());
        if verb.definitions.is_empty() {
            for action in verb.actions() {
                hasher.update(action.kind_name().as_bytes());
                hasher.update(b"\n");
            }
        }
        // Canonical JSON: parameters are a sorted map of strings.
        for definition in &verb.definitions {
            if let Ok(buf) = serde_json::to_vec(definition) {
                hasher.update(&buf);
            }
            hasher.update(b"\n");
        }
    }
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verb_ref_text_form() {
        let cases = [
            "global/look",
            "scene:hall/enter",
            "actor:door/open#locked",
            "actor:door/use>key",
            "actor:door/use#locked>key",
        ];
        for text in cases {
            let reference: VerbRef = text.parse().unwrap();
            assert_eq!(reference.to_string(), text);
        }

        let reference: VerbRef = "actor:door/use#locked>key".parse().unwrap();
        assert_eq!(reference.scope, VerbScope::Actor("door".into()));
        assert_eq!(reference.id, "use");
        assert_eq!(reference.state.as_deref(), Some("locked"));
        assert_eq!(reference.target.as_deref(), Some("key"));
    }

    #[test]
    fn test_verb_ref_rejects_bad_text() {
        for text in ["look", "planet:x/look", "actor:/open", "actor:door/", "global/a#", "global/a@b"] {
            assert!(text.parse::<VerbRef>().is_err(), "{text} should not parse");
        }
    }

    #[test]
    fn test_verb_ref_serializes_as_string() {
        let reference = VerbRef::new(VerbScope::Actor("door".into()), "open").with_state("locked");
        let json = serde_json::to_string(&reference).unwrap();
        assert_eq!(json, "\"actor:door/open#locked\"");
        let back: VerbRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, reference);
    }

    fn library(refs: &[&str]) -> VerbLibrary {
        VerbLibrary::from_verbs(
            refs.iter()
                .map(|text| Verb::new(text.parse().unwrap(), Vec::new())),
        )
        .unwrap()
    }

    #[test]
    fn test_resolve_prefers_most_specific() {
        let lib = library(&[
            "actor:door/use",
            "actor:door/use>key",
            "actor:door/use#locked",
            "global/use",
        ]);
        let door = VerbScope::Actor("door".into());

        let hit = lib.resolve(&door, "use", Some("locked"), Some("key")).unwrap();
        assert_eq!(hit.reference().to_string(), "actor:door/use#locked");

        let hit = lib.resolve(&door, "use", Some("open"), Some("key")).unwrap();
        assert_eq!(hit.reference().to_string(), "actor:door/use>key");

        let hit = lib.resolve(&door, "use", None, None).unwrap();
        assert_eq!(hit.reference().to_string(), "actor:door/use");

        let chest = VerbScope::Actor("chest".into());
        let hit = lib.resolve(&chest, "use", None, None).unwrap();
        assert_eq!(hit.reference().to_string(), "global/use");

        assert!(lib.resolve(&chest, "push", None, None).is_none());
    }

    #[test]
    fn test_duplicate_verbs_are_rejected() {
        let result = VerbLibrary::from_verbs(vec![
            Verb::new(VerbRef::global("look"), Vec::new()),
            Verb::new(VerbRef::global("look"), Vec::new()),
        ]);
        assert!(matches!(result, Err(LoadError::DuplicateVerb(_))));
    }

    #[test]
    fn test_fingerprint_tracks_contents() {
        let a = library(&["global/look"]);
        let b = library(&["global/look"]);
        let c = library(&["global/look", "global/talk"]);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_fingerprint_hashes_design_data() {
        let catalog = ActionCatalog::standard();
        let load = |params: &str| {
            let text = format!(
                r#"{{"verbs": [{{"owner": "global", "id": "greet",
                    "actions": [{{"kind": "Say", "params": {params}}}]}}]}}"#
            );
            VerbLibrary::load_str(&text, &catalog, true).unwrap()
        };

        let a = load(r#"{"text": "hi", "wait": "no"}"#);
        let b = load(r#"{"wait": "no", "text": "hi"}"#);
        let c = load(r#"{"text": "hello", "wait": "no"}"#);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());

        let greet = a.get(&VerbRef::global("greet")).unwrap();
        assert_eq!(greet.definitions().len(), 1);
        assert_eq!(greet.definitions()[0].kind, "Say");
        assert_eq!(greet.definitions()[0].params.get("text").map(String::as_str), Some("hi"));
    }
}
