use serde::{Deserialize, Serialize};

use crate::interpreter::condition::Condition;
use crate::interpreter::runtime::ActionContext;
use crate::interpreter::verb::VerbRef;
use crate::interpreter::{control, effects};
use crate::runtime::error::ActionResult;
use crate::world::Vec2;

/// Selection policy of a `Choose` block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChoosePolicy {
    /// Branches 0..N-1 once each, then the last branch forever
    Iterate,
    /// Uniform over all branches
    Random,
    /// Branches 0..N-1, wrapping
    Cycle,
}

impl ChoosePolicy {
    /// Option names accepted by the `policy` parameter
    pub const NAMES: &'static [&'static str] = &["ITERATE", "RANDOM", "CYCLE"];

    /// Parse a canonical option name
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "ITERATE" => Some(ChoosePolicy::Iterate),
            "RANDOM" => Some(ChoosePolicy::Random),
            "CYCLE" => Some(ChoosePolicy::Cycle),
            _ => None,
        }
    }
}

/// Opener or terminator that carries nothing but its block id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Control block id
    pub ca_id: String,
}

/// `If*` opener.
#[derive(Debug, Clone, PartialEq)]
pub struct IfBlock {
    /// Control block id
    pub ca_id: String,
    /// Predicate
    pub condition: Condition,
}

/// `Repeat` opener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepeatBlock {
    /// Control block id
    pub ca_id: String,
    /// Number of iterations, `-1` for forever
    pub repeat: i32,
}

/// `Choose` opener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChooseBlock {
    /// Control block id
    pub ca_id: String,
    /// Selection policy
    pub policy: ChoosePolicy,
}

/// Set or clear an actor's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetState {
    /// Actor id
    pub actor: String,
    /// New state (`None` clears)
    pub state: Option<String>,
}

/// Show or hide an actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetVisible {
    /// Actor id
    pub actor: String,
    /// New visibility
    pub visible: bool,
}

/// Move an actor.
#[derive(Debug, Clone, PartialEq)]
pub struct SetPosition {
    /// Actor id
    pub actor: String,
    /// Destination
    pub position: Vec2,
}

/// Set or clear a scene's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetSceneState {
    /// Scene id (`None` = current scene)
    pub scene: Option<String>,
    /// New state (`None` clears)
    pub state: Option<String>,
}

/// Set or remove a global property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetProperty {
    /// Property name
    pub name: String,
    /// New value (`None` removes)
    pub value: Option<String>,
}

/// Add to an integer global property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncrementProperty {
    /// Property name
    pub name: String,
    /// Amount added (may be negative)
    pub amount: i64,
}

/// Display one or more lines of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Say {
    /// Speaking actor (`None` = narrator)
    pub actor: Option<String>,
    /// Lines shown in order
    pub lines: Vec<String>,
    /// Whether the verb waits for each line to be dismissed
    pub wait: bool,
}

/// Suspend for a duration.
#[derive(Debug, Clone, PartialEq)]
pub struct Wait {
    /// Seconds to wait
    pub seconds: f32,
}

/// Play an animation on an actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayAnimation {
    /// Actor id
    pub actor: String,
    /// Animation id
    pub animation: String,
    /// Whether the verb waits for the animation to finish
    pub wait: bool,
    /// Whether the previous animation is restored afterwards
    pub restore: bool,
}

/// Play a sound effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaySound {
    /// Sound id
    pub sound: String,
}

/// Start another verb as a child runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunVerb {
    /// Verb to run
    pub verb: VerbRef,
    /// How many times to run it, `-1` for forever
    pub repeat: i32,
    /// Whether this verb waits for the child to end
    pub wait: bool,
}

/// Cancel every in-flight run of a verb.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelVerb {
    /// Verb to cancel
    pub verb: VerbRef,
}

/// Authoring note; does nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    /// Note text
    pub text: String,
}

/// One executable instruction of a verb.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// `IfActorState`, `IfActorVisible`, `IfSceneState`, `IfProperty`, `IfExpression`
    If(IfBlock),
    /// Start of the false branch of an `If`
    Else(Block),
    /// End of an `If`
    EndIf(Block),
    /// Loop opener
    Repeat(RepeatBlock),
    /// Loop terminator
    EndRepeat(Block),
    /// Selection opener
    Choose(ChooseBlock),
    /// Selection terminator
    EndChoose(Block),
    /// At-most-once block opener
    RunOnce(Block),
    /// At-most-once block terminator
    EndRunOnce(Block),
    /// Set actor state
    SetState(SetState),
    /// Set actor visibility
    SetVisible(SetVisible),
    /// Set actor position
    SetPosition(SetPosition),
    /// Set scene state
    SetSceneState(SetSceneState),
    /// Set global property
    SetProperty(SetProperty),
    /// Increment global property
    IncrementProperty(IncrementProperty),
    /// Show text
    Say(Say),
    /// Timer
    Wait(Wait),
    /// Animation
    PlayAnimation(PlayAnimation),
    /// Sound
    PlaySound(PlaySound),
    /// Child verb
    RunVerb(RunVerb),
    /// Cancel a verb
    CancelVerb(CancelVerb),
    /// No-op note
    Comment(Comment),
}

/// Kind of control block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// `If*` ... [`Else`] ... `EndIf`
    If,
    /// `Repeat` ... `EndRepeat`
    Repeat,
    /// `Choose` ... `EndChoose`
    Choose,
    /// `RunOnce` ... `EndRunOnce`
    RunOnce,
}

/// Position of a control action within its block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRole {
    /// Block opener
    Open(BlockKind),
    /// `Else` marker of an `If`
    Else,
    /// Block terminator
    Close(BlockKind),
}

impl Action {
    /// Stable kind name as used in library documents
    pub fn kind_name(&self) -> &'static str {
        match self {
            Action::If(block) => block.condition.kind_name(),
            Action::Else(_) => "Else",
            Action::EndIf(_) => "EndIf",
            Action::Repeat(_) => "Repeat",
            Action::EndRepeat(_) => "EndRepeat",
            Action::Choose(_) => "Choose",
            Action::EndChoose(_) => "EndChoose",
            Action::RunOnce(_) => "RunOnce",
            Action::EndRunOnce(_) => "EndRunOnce",
            Action::SetState(_) => "SetState",
            Action::SetVisible(_) => "SetVisible",
            Action::SetPosition(_) => "SetPosition",
            Action::SetSceneState(_) => "SetSceneState",
            Action::SetProperty(_) => "SetProperty",
            Action::IncrementProperty(_) => "IncrementProperty",
            Action::Say(_) => "Say",
            Action::Wait(_) => "Wait",
            Action::PlayAnimation(_) => "PlayAnimation",
            Action::PlaySound(_) => "PlaySound",
            Action::RunVerb(_) => "RunVerb",
            Action::CancelVerb(_) => "CancelVerb",
            Action::Comment(_) => "Comment",
        }
    }

    /// Block id of a control action
    pub fn control_id(&self) -> Option<&str> {
        match self {
            Action::If(IfBlock { ca_id, .. })
            | Action::Repeat(RepeatBlock { ca_id, .. })
            | Action::Choose(ChooseBlock { ca_id, .. })
            | Action::Else(Block { ca_id })
            | Action::EndIf(Block { ca_id })
            | Action::EndRepeat(Block { ca_id })
            | Action::EndChoose(Block { ca_id })
            | Action::RunOnce(Block { ca_id })
            | Action::EndRunOnce(Block { ca_id }) => Some(ca_id),
            _ => None,
        }
    }

    /// Role of a control action within its block
    pub fn control_role(&self) -> Option<ControlRole> {
        Some(match self {
            Action::If(_) => ControlRole::Open(BlockKind::If),
            Action::Else(_) => ControlRole::Else,
            Action::EndIf(_) => ControlRole::Close(BlockKind::If),
            Action::Repeat(_) => ControlRole::Open(BlockKind::Repeat),
            Action::EndRepeat(_) => ControlRole::Close(BlockKind::Repeat),
            Action::Choose(_) => ControlRole::Open(BlockKind::Choose),
            Action::EndChoose(_) => ControlRole::Close(BlockKind::Choose),
            Action::RunOnce(_) => ControlRole::Open(BlockKind::RunOnce),
            Action::EndRunOnce(_) => ControlRole::Close(BlockKind::RunOnce),
            _ => return None,
        })
    }

    /// Whether this action can alter the instruction pointer
    pub fn is_control(&self) -> bool {
        self.control_role().is_some()
    }

    /// Whether this action opens a block
    pub fn is_opener(&self) -> bool {
        matches!(self.control_role(), Some(ControlRole::Open(_)))
    }

    /// Execute the action
    pub fn run(&self, ctx: &mut ActionContext<'_, '_>) -> ActionResult<Flow> {
        match self {
            Action::If(block) => control::run_if(block, ctx),
            Action::Else(_) => control::run_else(ctx),
            Action::Repeat(block) => control::run_repeat(block, ctx),
            Action::EndRepeat(_) => control::run_end_repeat(ctx),
            Action::Choose(block) => control::run_choose(block, ctx),
            Action::RunOnce(_) => control::run_once(ctx),
            Action::EndIf(_) | Action::EndChoose(_) | Action::EndRunOnce(_) | Action::Comment(_) => {
                Ok(Flow::Next)
            }
            Action::SetState(action) => effects::set_state(action, ctx),
            Action::SetVisible(action) => effects::set_visible(action, ctx),
            Action::SetPosition(action) => effects::set_position(action, ctx),
            Action::SetSceneState(action) => effects::set_scene_state(action, ctx),
            Action::SetProperty(action) => effects::set_property(action, ctx),
            Action::IncrementProperty(action) => effects::increment_property(action, ctx),
            Action::Say(action) => effects::say(action, ctx),
            Action::Wait(action) => effects::wait(action, ctx),
            Action::PlayAnimation(action) => effects::play_animation(action, ctx),
            Action::PlaySound(action) => effects::play_sound(action, ctx),
            Action::RunVerb(action) => effects::run_verb(action, ctx),
            Action::CancelVerb(action) => effects::cancel_verb(action, ctx),
        }
    }

    /// Continue after the suspension this action requested completed
    pub fn resume(
        &self,
        state: &ResumeState,
        ctx: &mut ActionContext<'_, '_>,
    ) -> ActionResult<ResumeFlow> {
        match (self, state) {
            (Action::Say(action), ResumeState::SayLines { next }) => {
                effects::resume_say(action, *next, ctx)
            }
            (Action::PlayAnimation(_), ResumeState::RestoreAnimation { actor, previous }) => {
                effects::restore_animation(actor, previous.as_deref(), ctx)
            }
            _ => {
                tracing::warn!(
                    kind = self.kind_name(),
                    state = ?state,
                    "resume state does not belong to this action; continuing"
                );
                Ok(ResumeFlow::Done)
            }
        }
    }
}

/// Pending redirect pushed when a `Choose` enters a branch: once the
/// instruction pointer reaches `at`, it continues at `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockExit {
    /// Index just past the chosen branch
    pub at: usize,
    /// Index just past the `EndChoose`
    pub to: usize,
}

/// What the runner does after an action ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    /// Continue with the next action
    Next,
    /// Continue at exactly this index
    Jump(usize),
    /// Continue at `at` and redirect through `exit` later
    Enter {
        /// First action of the chosen branch
        at: usize,
        /// Redirect to apply when the branch ends
        exit: BlockExit,
    },
    /// Suspend until the issued continuation is resumed
    Suspend(Option<ResumeState>),
}

/// Private state an action needs to finish after a suspension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResumeState {
    /// Index of the next pending line of a multi-line `Say`
    SayLines {
        /// Next line to show
        next: usize,
    },
    /// Animation to restore once a waited animation completes
    RestoreAnimation {
        /// Actor id
        actor: String,
        /// Animation to restore (`None` = clear)
        previous: Option<String>,
    },
}

/// Result of [`Action::resume`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeFlow {
    /// The action is complete; advance past it
    Done,
    /// Suspend again on a fresh continuation
    Suspend(ResumeState),
}
