//! Leaf actions: world mutations, text, timers, animation, sound and sub-verbs
//!
//! Missing world objects surface as [`ActionError::Reference`]; the runner
//! logs them and moves on to the next action.

use crate::interpreter::ir::{
    CancelVerb, Flow, IncrementProperty, PlayAnimation, PlaySound, ResumeFlow, ResumeState,
    RunVerb, Say, SetPosition, SetProperty, SetSceneState, SetState, SetVisible, Wait,
};
use crate::interpreter::runtime::{ActionContext, EngineCommand, nesting_error};
use crate::runtime::error::{ActionError, ActionResult, ReferenceKind, ReferenceNotFound};

pub fn set_state(action: &SetState, ctx: &mut ActionContext<'_, '_>) -> ActionResult<Flow> {
    ctx.world_mut()
        .set_actor_state(&action.actor, action.state.as_deref())?;
    Ok(Flow::Next)
}

pub fn set_visible(action: &SetVisible, ctx: &mut ActionContext<'_, '_>) -> ActionResult<Flow> {
    ctx.world_mut()
        .set_actor_visible(&action.actor, action.visible)?;
    Ok(Flow::Next)
}

pub fn set_position(action: &SetPosition, ctx: &mut ActionContext<'_, '_>) -> ActionResult<Flow> {
    ctx.world_mut()
        .set_actor_position(&action.actor, action.position)?;
    Ok(Flow::Next)
}

pub fn set_scene_state(
    action: &SetSceneState,
    ctx: &mut ActionContext<'_, '_>,
) -> ActionResult<Flow> {
    ctx.world_mut()
        .set_scene_state(action.scene.as_deref(), action.state.as_deref())?;
    Ok(Flow::Next)
}

pub fn set_property(action: &SetProperty, ctx: &mut ActionContext<'_, '_>) -> ActionResult<Flow> {
    ctx.world_mut()
        .set_property(&action.name, action.value.as_deref());
    Ok(Flow::Next)
}

/// Unset properties count as zero; non-integer values are an error.
pub fn increment_property(
    action: &IncrementProperty,
    ctx: &mut ActionContext<'_, '_>,
) -> ActionResult<Flow> {
    let current = match ctx.world().property(&action.name) {
        None => 0,
        Some(text) => text.trim().parse::<i64>().map_err(|_| {
            ActionError::Failed(format!(
                "property '{}' holds '{}', not an integer",
                action.name, text
            ))
        })?,
    };
    let next = current.saturating_add(action.amount);
    ctx.world_mut()
        .set_property(&action.name, Some(&next.to_string()));
    Ok(Flow::Next)
}

/// Show the first line; with `wait`, suspend once per line.
pub fn say(action: &Say, ctx: &mut ActionContext<'_, '_>) -> ActionResult<Flow> {
    if !action.wait {
        for line in &action.lines {
            ctx.world_mut()
                .show_text(action.actor.as_deref(), line, None)?;
        }
        return Ok(Flow::Next);
    }

    let Some(first) = action.lines.first() else {
        return Ok(Flow::Next);
    };
    let continuation = ctx.continuation();
    ctx.world_mut()
        .show_text(action.actor.as_deref(), first, Some(continuation))?;

    let state = (action.lines.len() > 1).then_some(ResumeState::SayLines { next: 1 });
    Ok(Flow::Suspend(state))
}

pub fn resume_say(
    action: &Say,
    next: usize,
    ctx: &mut ActionContext<'_, '_>,
) -> ActionResult<ResumeFlow> {
    let Some(line) = action.lines.get(next) else {
        return Ok(ResumeFlow::Done);
    };
    let continuation = ctx.continuation();
    ctx.world_mut()
        .show_text(action.actor.as_deref(), line, Some(continuation))?;

    // Past the last line the next resume reports Done.
    Ok(ResumeFlow::Suspend(ResumeState::SayLines { next: next + 1 }))
}

pub fn wait(action: &Wait, ctx: &mut ActionContext<'_, '_>) -> ActionResult<Flow> {
    if action.seconds <= 0.0 {
        return Ok(Flow::Next);
    }
    let continuation = ctx.continuation();
    ctx.world_mut().start_timer(action.seconds, continuation);
    Ok(Flow::Suspend(None))
}

pub fn play_animation(
    action: &PlayAnimation,
    ctx: &mut ActionContext<'_, '_>,
) -> ActionResult<Flow> {
    let on_complete = action.wait.then(|| ctx.continuation());
    let previous = ctx
        .world_mut()
        .play_animation(&action.actor, &action.animation, on_complete)?;

    if !action.wait {
        return Ok(Flow::Next);
    }
    let state = action.restore.then(|| ResumeState::RestoreAnimation {
        actor: action.actor.clone(),
        previous,
    });
    Ok(Flow::Suspend(state))
}

pub fn restore_animation(
    actor: &str,
    previous: Option<&str>,
    ctx: &mut ActionContext<'_, '_>,
) -> ActionResult<ResumeFlow> {
    ctx.world_mut().set_animation(actor, previous)?;
    Ok(ResumeFlow::Done)
}

pub fn play_sound(action: &PlaySound, ctx: &mut ActionContext<'_, '_>) -> ActionResult<Flow> {
    ctx.world_mut().play_sound(&action.sound)?;
    Ok(Flow::Next)
}

/// Spawn a child runner. With `wait` the child carries this runner's
/// continuation and delivers it when it ends.
pub fn run_verb(action: &RunVerb, ctx: &mut ActionContext<'_, '_>) -> ActionResult<Flow> {
    if !ctx.library().contains(&action.verb) {
        return Err(ReferenceNotFound::new(ReferenceKind::Verb, action.verb.to_string()).into());
    }
    if ctx.depth() + 1 > ctx.max_depth() {
        return Err(nesting_error(&action.verb, ctx.max_depth()));
    }

    let parent = action.wait.then(|| ctx.continuation());
    ctx.emit(EngineCommand::Spawn {
        verb: action.verb.clone(),
        repeat: action.repeat,
        parent,
    });

    if action.wait {
        Ok(Flow::Suspend(None))
    } else {
        Ok(Flow::Next)
    }
}

pub fn cancel_verb(action: &CancelVerb, ctx: &mut ActionContext<'_, '_>) -> ActionResult<Flow> {
    ctx.emit(EngineCommand::Cancel {
        verb: action.verb.clone(),
    });
    Ok(Flow::Next)
}
