//! Predicates evaluated by the `If*` control actions

use crate::world::{World, WorldResult};

/// Predicate carried by an `If` block.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Actor's state equals `state` (`None` = actor has no state)
    ActorState {
        /// Actor id
        actor: String,
        /// Expected state
        state: Option<String>,
    },
    /// Actor's visibility equals `visible`
    ActorVisible {
        /// Actor id
        actor: String,
        /// Expected visibility
        visible: bool,
    },
    /// Scene's state equals `state` (`None` scene = current scene)
    SceneState {
        /// Scene id
        scene: Option<String>,
        /// Expected state
        state: Option<String>,
    },
    /// Global property equals `value` (`None` = property is unset)
    Property {
        /// Property name
        name: String,
        /// Expected value
        value: Option<String>,
    },
    /// Embedded expression over global properties
    Expression(Expression),
}

impl Condition {
    /// Kind name of the `If` action carrying this predicate
    pub fn kind_name(&self) -> &'static str {
        match self {
            Condition::ActorState { .. } => "IfActorState",
            Condition::ActorVisible { .. } => "IfActorVisible",
            Condition::SceneState { .. } => "IfSceneState",
            Condition::Property { .. } => "IfProperty",
            Condition::Expression(_) => "IfExpression",
        }
    }

    /// Evaluate against the world
    pub fn evaluate(&self, world: &dyn World) -> WorldResult<bool> {
        match self {
            Condition::ActorState { actor, state } => Ok(world.actor_state(actor)? == *state),
            Condition::ActorVisible { actor, visible } => Ok(world.actor_visible(actor)? == *visible),
            Condition::SceneState { scene, state } => {
                Ok(world.scene_state(scene.as_deref())? == *state)
            }
            Condition::Property { name, value } => Ok(world.property(name) == *value),
            Condition::Expression(expression) => Ok(expression.evaluate(world)),
        }
    }
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

// Two-character operators first so `<=` is not read as `<`.
const OPERATORS: &[(&str, CompareOp)] = &[
    ("==", CompareOp::Eq),
    ("!=", CompareOp::Ne),
    ("<=", CompareOp::Le),
    (">=", CompareOp::Ge),
    ("<", CompareOp::Lt),
    (">", CompareOp::Gt),
];

/// Expression operand
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// `$name`: value of a global property
    Property(String),
    /// Literal text (quotes stripped)
    Literal(String),
}

impl Operand {
    fn parse(text: &str) -> Result<Self, String> {
        let text = text.trim();
        if text.is_empty() {
            return Err("empty operand".into());
        }
        if let Some(name) = text.strip_prefix('$') {
            if name.is_empty() {
                return Err("empty property name".into());
            }
            return Ok(Operand::Property(name.to_string()));
        }
        for quote in ['\'', '"'] {
            if text.len() >= 2 && text.starts_with(quote) && text.ends_with(quote) {
                return Ok(Operand::Literal(text[1..text.len() - 1].to_string()));
            }
        }
        Ok(Operand::Literal(text.to_string()))
    }

    fn value(&self, world: &dyn World) -> Option<String> {
        match self {
            Operand::Property(name) => world.property(name),
            Operand::Literal(text) => Some(text.clone()),
        }
    }
}

/// Parsed `IfExpression` predicate.
///
/// Grammar: `<operand> <op> <operand>` or `[!]<operand>`, where operands are
/// `$property` references or literals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expression {
    /// Binary comparison
    Compare {
        /// Left operand
        lhs: Operand,
        /// Operator
        op: CompareOp,
        /// Right operand
        rhs: Operand,
    },
    /// Truthiness test
    Truthy {
        /// Operand tested
        operand: Operand,
        /// Whether the result is inverted
        negated: bool,
    },
}

impl Expression {
    /// Parse expression text
    pub fn parse(text: &str) -> Result<Self, String> {
        if let Some((at, symbol, op)) = find_operator(text) {
            let lhs = Operand::parse(&text[..at])?;
            let rhs = Operand::parse(&text[at + symbol.len()..])?;
            return Ok(Expression::Compare { lhs, op, rhs });
        }

        let trimmed = text.trim();
        match trimmed.strip_prefix('!') {
            Some(rest) => Ok(Expression::Truthy {
                operand: Operand::parse(rest)?,
                negated: true,
            }),
            None => Ok(Expression::Truthy {
                operand: Operand::parse(trimmed)?,
                negated: false,
            }),
        }
    }

    /// Evaluate against the world's global properties
    pub fn evaluate(&self, world: &dyn World) -> bool {
        match self {
            Expression::Compare { lhs, op, rhs } => {
                compare(lhs.value(world).as_deref(), *op, rhs.value(world).as_deref())
            }
            Expression::Truthy { operand, negated } => {
                let value = operand.value(world);
                is_truthy(value.as_deref()) != *negated
            }
        }
    }
}

fn find_operator(text: &str) -> Option<(usize, &'static str, CompareOp)> {
    let mut quote: Option<char> = None;
    for (at, ch) in text.char_indices() {
        match quote {
            Some(open) if ch == open => quote = None,
            Some(_) => {}
            None if ch == '\'' || ch == '"' => quote = Some(ch),
            None => {
                let rest = &text[at..];
                if let Some((symbol, op)) = OPERATORS.iter().find(|(s, _)| rest.starts_with(s)) {
                    return Some((at, *symbol, *op));
                }
            }
        }
    }
    None
}

fn compare(lhs: Option<&str>, op: CompareOp, rhs: Option<&str>) -> bool {
    let numbers = lhs
        .and_then(|l| l.trim().parse::<f64>().ok())
        .zip(rhs.and_then(|r| r.trim().parse::<f64>().ok()));

    if let Some((l, r)) = numbers {
        return match op {
            CompareOp::Eq => l == r,
            CompareOp::Ne => l != r,
            CompareOp::Lt => l < r,
            CompareOp::Le => l <= r,
            CompareOp::Gt => l > r,
            CompareOp::Ge => l >= r,
        };
    }

    match op {
        CompareOp::Eq => lhs == rhs,
        CompareOp::Ne => lhs != rhs,
        _ => false,
    }
}

fn is_truthy(value: Option<&str>) -> bool {
    match value.map(str::trim) {
        None => false,
        Some(text) => !matches!(
            text.to_ascii_lowercase().as_str(),
            "" | "0" | "false" | "no"
        ),
    }
}
