//! Action kind catalog and factories
//!
//! Maps stable kind names from design data to a parameter schema and a
//! constructor. Library loading looks every action up here, so adding a kind
//! is a matter of registering it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::interpreter::condition::Condition;
use crate::interpreter::ir::{
    Action, Block, CancelVerb, ChooseBlock, ChoosePolicy, Comment, IfBlock, IncrementProperty,
    PlayAnimation, PlaySound, RepeatBlock, RunVerb, Say, SetPosition, SetProperty, SetSceneState,
    SetState, SetVisible, Wait,
};
use crate::interpreter::params::{ParamMap, ParamSpec, ParamType, Params, configure};
use crate::runtime::error::ParameterError;

/// Constructor from validated parameters to an action
pub type ActionFactory = Arc<dyn Fn(&Params) -> Result<Action, ParameterError> + Send + Sync>;

#[derive(Clone)]
struct ActionKindInfo {
    schema: &'static [ParamSpec],
    factory: ActionFactory,
}

/// Registry of action kinds available to library loading.
#[derive(Clone, Default)]
pub struct ActionCatalog {
    kinds: HashMap<String, ActionKindInfo>,
}

impl std::fmt::Debug for ActionCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionCatalog")
            .field("kinds", &self.kind_names())
            .finish()
    }
}

impl ActionCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) an action kind
    pub fn register<F>(&mut self, kind: &str, schema: &'static [ParamSpec], factory: F)
    where
        F: Fn(&Params) -> Result<Action, ParameterError> + Send + Sync + 'static,
    {
        self.kinds.insert(
            kind.to_string(),
            ActionKindInfo {
                schema,
                factory: Arc::new(factory),
            },
        );
    }

    /// Register `alias` as another name for an existing kind.
    /// Returns `false` if `kind` is unknown.
    pub fn alias(&mut self, alias: &str, kind: &str) -> bool {
        match self.kinds.get(kind).cloned() {
            Some(info) => {
                self.kinds.insert(alias.to_string(), info);
                true
            }
            None => false,
        }
    }

    /// Configure and construct an action from a raw parameter map
    pub fn build(&self, kind: &str, raw: &ParamMap) -> Result<Action, ParameterError> {
        let info = self
            .kinds
            .get(kind)
            .ok_or_else(|| ParameterError::UnknownKind(kind.to_string()))?;
        let params = configure(kind, info.schema, raw)?;
        (info.factory)(&params)
    }

    /// Parameter schema of a kind
    pub fn schema(&self, kind: &str) -> Option<&'static [ParamSpec]> {
        self.kinds.get(kind).map(|info| info.schema)
    }

    /// Whether a kind is registered
    pub fn has_kind(&self, kind: &str) -> bool {
        self.kinds.contains_key(kind)
    }

    /// Registered kind names, sorted
    pub fn kind_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.kinds.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Catalog with every built-in kind registered
    pub fn standard() -> Self {
        let mut catalog = Self::new();

        catalog.register("IfActorState", IF_ACTOR_STATE, |p| {
            Ok(Action::If(IfBlock {
                ca_id: p.text(CA_ID)?,
                condition: Condition::ActorState {
                    actor: p.text("actor")?,
                    state: non_empty(p.opt_text("state")?),
                },
            }))
        });
        catalog.register("IfActorVisible", IF_ACTOR_VISIBLE, |p| {
            Ok(Action::If(IfBlock {
                ca_id: p.text(CA_ID)?,
                condition: Condition::ActorVisible {
                    actor: p.text("actor")?,
                    visible: p.boolean("visible")?,
                },
            }))
        });
        catalog.register("IfSceneState", IF_SCENE_STATE, |p| {
            Ok(Action::If(IfBlock {
                ca_id: p.text(CA_ID)?,
                condition: Condition::SceneState {
                    scene: non_empty(p.opt_text("scene")?),
                    state: non_empty(p.opt_text("state")?),
                },
            }))
        });
        catalog.register("IfProperty", IF_PROPERTY, |p| {
            Ok(Action::If(IfBlock {
                ca_id: p.text(CA_ID)?,
                condition: Condition::Property {
                    name: p.text("name")?,
                    value: p.opt_text("value")?,
                },
            }))
        });
        catalog.register("IfExpression", IF_EXPRESSION, |p| {
            Ok(Action::If(IfBlock {
                ca_id: p.text(CA_ID)?,
                condition: Condition::Expression(p.expression("expression")?),
            }))
        });

        catalog.register("Else", MARKER, |p| Ok(Action::Else(block(p)?)));
        catalog.register("EndIf", MARKER, |p| Ok(Action::EndIf(block(p)?)));
        catalog.register("EndRepeat", MARKER, |p| Ok(Action::EndRepeat(block(p)?)));
        catalog.register("EndChoose", MARKER, |p| Ok(Action::EndChoose(block(p)?)));
        catalog.register("RunOnce", MARKER, |p| Ok(Action::RunOnce(block(p)?)));
        catalog.register("EndRunOnce", MARKER, |p| Ok(Action::EndRunOnce(block(p)?)));

        catalog.register("Repeat", REPEAT, |p| {
            Ok(Action::Repeat(RepeatBlock {
                ca_id: p.text(CA_ID)?,
                repeat: repeat_count(p, "repeat")?,
            }))
        });
        catalog.register("Choose", CHOOSE, |p| {
            let name = p.text("policy")?;
            let policy = ChoosePolicy::from_name(&name).ok_or_else(|| invalid(p, "policy", &name, "choose policy"))?;
            Ok(Action::Choose(ChooseBlock {
                ca_id: p.text(CA_ID)?,
                policy,
            }))
        });

        catalog.register("SetState", SET_STATE, |p| {
            Ok(Action::SetState(SetState {
                actor: p.text("actor")?,
                state: non_empty(p.opt_text("state")?),
            }))
        });
        catalog.register("SetVisible", SET_VISIBLE, |p| {
            Ok(Action::SetVisible(SetVisible {
                actor: p.text("actor")?,
                visible: p.boolean("visible")?,
            }))
        });
        catalog.register("SetPosition", SET_POSITION, |p| {
            Ok(Action::SetPosition(SetPosition {
                actor: p.text("actor")?,
                position: p.vector2("position")?,
            }))
        });
        catalog.register("SetSceneState", SET_SCENE_STATE, |p| {
            Ok(Action::SetSceneState(SetSceneState {
                scene: non_empty(p.opt_text("scene")?),
                state: non_empty(p.opt_text("state")?),
            }))
        });
        catalog.register("SetProperty", SET_PROPERTY, |p| {
            Ok(Action::SetProperty(SetProperty {
                name: p.text("name")?,
                value: p.opt_text("value")?,
            }))
        });
        catalog.register("IncrementProperty", INCREMENT_PROPERTY, |p| {
            Ok(Action::IncrementProperty(IncrementProperty {
                name: p.text("name")?,
                amount: p.integer("amount")?,
            }))
        });
        catalog.register("Say", SAY, |p| {
            let text = p.text("text")?;
            Ok(Action::Say(Say {
                actor: non_empty(p.opt_text("actor")?),
                lines: split_lines(&text),
                wait: p.boolean("wait")?,
            }))
        });
        catalog.register("Wait", WAIT, |p| {
            let seconds = p.float("time")?;
            if seconds < 0.0 {
                return Err(invalid(p, "time", &seconds.to_string(), "non-negative number"));
            }
            Ok(Action::Wait(Wait { seconds }))
        });
        catalog.register("PlayAnimation", PLAY_ANIMATION, |p| {
            Ok(Action::PlayAnimation(PlayAnimation {
                actor: p.text("actor")?,
                animation: p.text("animation")?,
                wait: p.boolean("wait")?,
                restore: p.boolean("restore")?,
            }))
        });
        catalog.register("PlaySound", PLAY_SOUND, |p| {
            Ok(Action::PlaySound(PlaySound {
                sound: p.text("sound")?,
            }))
        });
        catalog.register("RunVerb", RUN_VERB, |p| {
            Ok(Action::RunVerb(RunVerb {
                verb: p.verb_ref("verb")?,
                repeat: repeat_count(p, "repeat")?,
                wait: p.boolean("wait")?,
            }))
        });
        catalog.register("CancelVerb", CANCEL_VERB, |p| {
            Ok(Action::CancelVerb(CancelVerb {
                verb: p.verb_ref("verb")?,
            }))
        });
        catalog.register("Comment", COMMENT, |p| {
            Ok(Action::Comment(Comment {
                text: p.text("text")?,
            }))
        });

        catalog
    }
}

const CA_ID: &str = "caID";

const MARKER: &[ParamSpec] = &[ParamSpec::required(CA_ID, ParamType::Text)];

const IF_ACTOR_STATE: &[ParamSpec] = &[
    ParamSpec::required(CA_ID, ParamType::Text),
    ParamSpec::required("actor", ParamType::ActorRef),
    ParamSpec::optional("state", ParamType::Text),
];

const IF_ACTOR_VISIBLE: &[ParamSpec] = &[
    ParamSpec::required(CA_ID, ParamType::Text),
    ParamSpec::required("actor", ParamType::ActorRef),
    ParamSpec::with_default("visible", ParamType::Boolean, "true"),
];

const IF_SCENE_STATE: &[ParamSpec] = &[
    ParamSpec::required(CA_ID, ParamType::Text),
    ParamSpec::optional("scene", ParamType::SceneRef),
    ParamSpec::optional("state", ParamType::Text),
];

const IF_PROPERTY: &[ParamSpec] = &[
    ParamSpec::required(CA_ID, ParamType::Text),
    ParamSpec::required("name", ParamType::Text),
    ParamSpec::optional("value", ParamType::Text),
];

const IF_EXPRESSION: &[ParamSpec] = &[
    ParamSpec::required(CA_ID, ParamType::Text),
    ParamSpec::required("expression", ParamType::Expression),
];

const REPEAT: &[ParamSpec] = &[
    ParamSpec::required(CA_ID, ParamType::Text),
    ParamSpec::with_default("repeat", ParamType::Integer, "1"),
];

const CHOOSE: &[ParamSpec] = &[
    ParamSpec::required(CA_ID, ParamType::Text),
    ParamSpec::with_default("policy", ParamType::Choice(ChoosePolicy::NAMES), "ITERATE"),
];

const SET_STATE: &[ParamSpec] = &[
    ParamSpec::required("actor", ParamType::ActorRef),
    ParamSpec::optional("state", ParamType::Text),
];

const SET_VISIBLE: &[ParamSpec] = &[
    ParamSpec::required("actor", ParamType::ActorRef),
    ParamSpec::with_default("visible", ParamType::Boolean, "true"),
];

const SET_POSITION: &[ParamSpec] = &[
    ParamSpec::required("actor", ParamType::ActorRef),
    ParamSpec::required("position", ParamType::Vector2),
];

const SET_SCENE_STATE: &[ParamSpec] = &[
    ParamSpec::optional("scene", ParamType::SceneRef),
    ParamSpec::optional("state", ParamType::Text),
];

const SET_PROPERTY: &[ParamSpec] = &[
    ParamSpec::required("name", ParamType::Text),
    ParamSpec::optional("value", ParamType::Text),
];

const INCREMENT_PROPERTY: &[ParamSpec] = &[
    ParamSpec::required("name", ParamType::Text),
    ParamSpec::with_default("amount", ParamType::Integer, "1"),
];

const SAY: &[ParamSpec] = &[
    ParamSpec::optional("actor", ParamType::ActorRef),
    ParamSpec::required("text", ParamType::Text),
    ParamSpec::with_default("wait", ParamType::Boolean, "true"),
];

const WAIT: &[ParamSpec] = &[ParamSpec::required("time", ParamType::Float)];

const PLAY_ANIMATION: &[ParamSpec] = &[
    ParamSpec::required("actor", ParamType::ActorRef),
    ParamSpec::required("animation", ParamType::Text),
    ParamSpec::with_default("wait", ParamType::Boolean, "true"),
    ParamSpec::with_default("restore", ParamType::Boolean, "false"),
];

const PLAY_SOUND: &[ParamSpec] = &[ParamSpec::required("sound", ParamType::SoundRef)];

const RUN_VERB: &[ParamSpec] = &[
    ParamSpec::required("verb", ParamType::VerbRef),
    ParamSpec::with_default("repeat", ParamType::Integer, "1"),
    ParamSpec::with_default("wait", ParamType::Boolean, "false"),
];

const CANCEL_VERB: &[ParamSpec] = &[ParamSpec::required("verb", ParamType::VerbRef)];

const COMMENT: &[ParamSpec] = &[ParamSpec::with_default("text", ParamType::Text, "")];

fn block(params: &Params) -> Result<Block, ParameterError> {
    Ok(Block {
        ca_id: params.text(CA_ID)?,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.is_empty())
}

fn invalid(params: &Params, param: &str, value: &str, expected: &str) -> ParameterError {
    ParameterError::Invalid {
        kind: params.kind().to_string(),
        param: param.to_string(),
        value: value.to_string(),
        expected: expected.to_string(),
    }
}

/// Repeat counts are `-1` (forever) or a non-negative `i32`.
fn repeat_count(params: &Params, name: &str) -> Result<i32, ParameterError> {
    let raw = params.integer(name)?;
    i32::try_from(raw)
        .ok()
        .filter(|count| *count >= -1)
        .ok_or_else(|| invalid(params, name, &raw.to_string(), "-1 or a non-negative count"))
}

fn split_lines(text: &str) -> Vec<String> {
    text.split(['\n', '|'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pairs: &[(&str, &str)]) -> ParamMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_standard_catalog_builds_every_kind() {
        let catalog = ActionCatalog::standard();
        let cases: &[(&str, &[(&str, &str)])] = &[
            ("IfActorState", &[("caID", "a"), ("actor", "door"), ("state", "open")]),
            ("IfActorVisible", &[("caID", "a"), ("actor", "door")]),
            ("IfSceneState", &[("caID", "a"), ("state", "night")]),
            ("IfProperty", &[("caID", "a"), ("name", "coins"), ("value", "3")]),
            ("IfExpression", &[("caID", "a"), ("expression", "$coins >= 3")]),
            ("Else", &[("caID", "a")]),
            ("EndIf", &[("caID", "a")]),
            ("Repeat", &[("caID", "r"), ("repeat", "3")]),
            ("EndRepeat", &[("caID", "r")]),
            ("Choose", &[("caID", "c"), ("policy", "cycle")]),
            ("EndChoose", &[("caID", "c")]),
            ("RunOnce", &[("caID", "o")]),
            ("EndRunOnce", &[("caID", "o")]),
            ("SetState", &[("actor", "door"), ("state", "open")]),
            ("SetVisible", &[("actor", "door"), ("visible", "no")]),
            ("SetPosition", &[("actor", "door"), ("position", "1,2")]),
            ("SetSceneState", &[("state", "night")]),
            ("SetProperty", &[("name", "coins"), ("value", "3")]),
            ("IncrementProperty", &[("name", "coins")]),
            ("Say", &[("text", "Hello|World")]),
            ("Wait", &[("time", "0.5")]),
            ("PlayAnimation", &[("actor", "guy"), ("animation", "wave")]),
            ("PlaySound", &[("sound", "creak")]),
            ("RunVerb", &[("verb", "actor:door/open")]),
            ("CancelVerb", &[("verb", "global/idle")]),
            ("Comment", &[]),
        ];

        for (kind, params) in cases {
            let action = catalog
                .build(kind, &raw(params))
                .unwrap_or_else(|e| panic!("{kind}: {e}"));
            assert_eq!(action.kind_name(), *kind);
        }
        assert_eq!(catalog.kind_names().len(), cases.len());
    }

    #[test]
    fn test_say_splits_lines() {
        let catalog = ActionCatalog::standard();
        let action = catalog
            .build("Say", &raw(&[("actor", "guy"), ("text", "One|Two\nThree")]))
            .unwrap();
        let Action::Say(say) = action else {
            panic!("expected Say");
        };
        assert_eq!(say.lines, vec!["One", "Two", "Three"]);
        assert!(say.wait);
    }

    #[test]
    fn test_unknown_kind_and_bad_repeat() {
        let catalog = ActionCatalog::standard();
        assert_eq!(
            catalog.build("Teleport", &raw(&[])).unwrap_err(),
            ParameterError::UnknownKind("Teleport".into())
        );
        assert!(matches!(
            catalog.build("Repeat", &raw(&[("caID", "r"), ("repeat", "-2")])),
            Err(ParameterError::Invalid { .. })
        ));
        assert!(matches!(
            catalog.build("RunVerb", &raw(&[("verb", "nonsense")])),
            Err(ParameterError::Invalid { .. })
        ));
        assert!(matches!(
            catalog.build("SetPosition", &raw(&[("actor", "a")])),
            Err(ParameterError::Missing { .. })
        ));
    }

    #[test]
    fn test_alias_shares_factory() {
        let mut catalog = ActionCatalog::standard();
        assert!(catalog.alias("Talk", "Say"));
        assert!(!catalog.alias("Nope", "Missing"));
        let action = catalog.build("Talk", &raw(&[("text", "hi")])).unwrap();
        assert_eq!(action.kind_name(), "Say");
    }
}
