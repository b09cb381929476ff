//! Parameter schemas and the `configure` step
//!
//! Design data hands each action a flat string-keyed map. This module is the
//! only place that text is converted into typed values: every action kind
//! declares an ordered [`ParamSpec`] schema and [`configure`] checks the raw
//! map against it.

use std::collections::BTreeMap;

use crate::interpreter::condition::Expression;
use crate::interpreter::verb::VerbRef;
use crate::runtime::error::ParameterError;
use crate::world::Vec2;

/// Raw parameter map as produced by loaders and editors.
pub type ParamMap = BTreeMap<String, String>;

/// Semantic type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    /// Free text
    Text,
    /// Signed integer
    Integer,
    /// Floating-point number
    Float,
    /// `true/false/yes/no/1/0`
    Boolean,
    /// `x,y`
    Vector2,
    /// One of a fixed set of options (case-insensitive)
    Choice(&'static [&'static str]),
    /// Actor id
    ActorRef,
    /// Scene id
    SceneRef,
    /// Sound id
    SoundRef,
    /// Verb reference (`actor:door/open#state>target`)
    VerbRef,
    /// Predicate expression for `IfExpression`
    Expression,
}

impl ParamType {
    fn describe(&self) -> String {
        match self {
            ParamType::Text => "text".into(),
            ParamType::Integer => "integer".into(),
            ParamType::Float => "number".into(),
            ParamType::Boolean => "boolean".into(),
            ParamType::Vector2 => "vector 'x,y'".into(),
            ParamType::Choice(options) => format!("one of {}", options.join("|")),
            ParamType::ActorRef => "actor id".into(),
            ParamType::SceneRef => "scene id".into(),
            ParamType::SoundRef => "sound id".into(),
            ParamType::VerbRef => "verb reference".into(),
            ParamType::Expression => "expression".into(),
        }
    }
}

/// One entry of an action kind's parameter schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    /// Parameter name as it appears in design data
    pub name: &'static str,
    /// Semantic type
    pub ty: ParamType,
    /// Whether loading fails when the parameter is absent
    pub mandatory: bool,
    /// Text used when an optional parameter is absent
    pub default: Option<&'static str>,
}

impl ParamSpec {
    /// Mandatory parameter
    pub const fn required(name: &'static str, ty: ParamType) -> Self {
        Self {
            name,
            ty,
            mandatory: true,
            default: None,
        }
    }

    /// Optional parameter without a default (absent means "unset")
    pub const fn optional(name: &'static str, ty: ParamType) -> Self {
        Self {
            name,
            ty,
            mandatory: false,
            default: None,
        }
    }

    /// Optional parameter with a default value
    pub const fn with_default(name: &'static str, ty: ParamType, default: &'static str) -> Self {
        Self {
            name,
            ty,
            mandatory: false,
            default: Some(default),
        }
    }
}

/// A typed parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// Free text, or any of the id reference types
    Text(String),
    /// Integer
    Integer(i64),
    /// Number
    Float(f32),
    /// Boolean
    Boolean(bool),
    /// Vector
    Vector2(Vec2),
    /// Canonical (upper-case) option name
    Choice(String),
    /// Parsed verb reference
    VerbRef(VerbRef),
    /// Parsed predicate expression
    Expression(Expression),
}

/// Typed, validated parameter set for one action.
#[derive(Debug, Clone, PartialEq)]
pub struct Params {
    kind: String,
    values: BTreeMap<&'static str, ParamValue>,
}

/// Bind and validate a raw parameter map against a schema.
pub fn configure(
    kind: &str,
    schema: &[ParamSpec],
    raw: &ParamMap,
) -> Result<Params, ParameterError> {
    let mut values = BTreeMap::new();

    for spec in schema {
        let text = match raw.get(spec.name).map(|s| s.trim()) {
            Some(text) if !text.is_empty() || matches!(spec.ty, ParamType::Text) => text,
            _ => match (spec.mandatory, spec.default) {
                (true, _) => {
                    return Err(ParameterError::Missing {
                        kind: kind.to_string(),
                        param: spec.name.to_string(),
                    });
                }
                (false, Some(default)) => default,
                (false, None) => continue,
            },
        };

        let value = parse_value(spec.ty, text).ok_or_else(|| ParameterError::Invalid {
            kind: kind.to_string(),
            param: spec.name.to_string(),
            value: text.to_string(),
            expected: spec.ty.describe(),
        })?;
        values.insert(spec.name, value);
    }

    for key in raw.keys() {
        if !schema.iter().any(|spec| spec.name == key) {
            tracing::debug!(kind, param = %key, "ignoring unknown action parameter");
        }
    }

    Ok(Params {
        kind: kind.to_string(),
        values,
    })
}

fn parse_value(ty: ParamType, text: &str) -> Option<ParamValue> {
    match ty {
        ParamType::Text | ParamType::ActorRef | ParamType::SceneRef | ParamType::SoundRef => {
            Some(ParamValue::Text(text.to_string()))
        }
        ParamType::Integer => text.parse().ok().map(ParamValue::Integer),
        ParamType::Float => text
            .parse::<f32>()
            .ok()
            .filter(|v| v.is_finite())
            .map(ParamValue::Float),
        ParamType::Boolean => parse_bool(text).map(ParamValue::Boolean),
        ParamType::Vector2 => text.parse().ok().map(ParamValue::Vector2),
        ParamType::Choice(options) => options
            .iter()
            .find(|option| option.eq_ignore_ascii_case(text))
            .map(|option| ParamValue::Choice(option.to_ascii_uppercase())),
        ParamType::VerbRef => text.parse().ok().map(ParamValue::VerbRef),
        ParamType::Expression => Expression::parse(text).ok().map(ParamValue::Expression),
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Some(true),
        "false" | "no" | "0" => Some(false),
        _ => None,
    }
}

impl Params {
    /// Kind name these parameters were configured for
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Whether a value (supplied or defaulted) is present
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    fn get(&self, name: &str) -> Result<&ParamValue, ParameterError> {
        self.values.get(name).ok_or_else(|| ParameterError::Missing {
            kind: self.kind.clone(),
            param: name.to_string(),
        })
    }

    fn mismatch(&self, name: &str, expected: &str) -> ParameterError {
        ParameterError::Invalid {
            kind: self.kind.clone(),
            param: name.to_string(),
            value: format!("{:?}", self.values.get(name)),
            expected: expected.to_string(),
        }
    }

    /// Text (or id) parameter
    pub fn text(&self, name: &str) -> Result<String, ParameterError> {
        match self.get(name)? {
            ParamValue::Text(text) | ParamValue::Choice(text) => Ok(text.clone()),
            _ => Err(self.mismatch(name, "text")),
        }
    }

    /// Optional text parameter; absent means `None`
    pub fn opt_text(&self, name: &str) -> Result<Option<String>, ParameterError> {
        if !self.contains(name) {
            return Ok(None);
        }
        self.text(name).map(Some)
    }

    /// Integer parameter
    pub fn integer(&self, name: &str) -> Result<i64, ParameterError> {
        match self.get(name)? {
            ParamValue::Integer(value) => Ok(*value),
            _ => Err(self.mismatch(name, "integer")),
        }
    }

    /// Number parameter
    pub fn float(&self, name: &str) -> Result<f32, ParameterError> {
        match self.get(name)? {
            ParamValue::Float(value) => Ok(*value),
            ParamValue::Integer(value) => Ok(*value as f32),
            _ => Err(self.mismatch(name, "number")),
        }
    }

    /// Boolean parameter
    pub fn boolean(&self, name: &str) -> Result<bool, ParameterError> {
        match self.get(name)? {
            ParamValue::Boolean(value) => Ok(*value),
            _ => Err(self.mismatch(name, "boolean")),
        }
    }

    /// Vector parameter
    pub fn vector2(&self, name: &str) -> Result<Vec2, ParameterError> {
        match self.get(name)? {
            ParamValue::Vector2(value) => Ok(*value),
            _ => Err(self.mismatch(name, "vector")),
        }
    }

    /// Verb reference parameter
    pub fn verb_ref(&self, name: &str) -> Result<VerbRef, ParameterError> {
        match self.get(name)? {
            ParamValue::VerbRef(value) => Ok(value.clone()),
            _ => Err(self.mismatch(name, "verb reference")),
        }
    }

    /// Expression parameter
    pub fn expression(&self, name: &str) -> Result<Expression, ParameterError> {
        match self.get(name)? {
            ParamValue::Expression(value) => Ok(value.clone()),
            _ => Err(self.mismatch(name, "expression")),
        }
    }
}
