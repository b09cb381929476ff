//! Control actions: conditional, looping, selection and at-most-once blocks
//!
//! Each returns a [`Flow`] telling the runner where to continue. None of them
//! suspend.

use rand::Rng;

use crate::interpreter::ir::{BlockExit, ChooseBlock, ChoosePolicy, Flow, IfBlock, RepeatBlock};
use crate::interpreter::resolver;
use crate::interpreter::runtime::ActionContext;
use crate::runtime::error::ActionResult;

/// `If*`: fall into the block when the predicate holds, otherwise continue
/// just past the matching `Else` or `EndIf`.
pub fn run_if(block: &IfBlock, ctx: &mut ActionContext<'_, '_>) -> ActionResult<Flow> {
    let holds = match block.condition.evaluate(ctx.world()) {
        Ok(holds) => holds,
        Err(missing) => {
            tracing::warn!(
                verb = %ctx.verb_ref(),
                index = ctx.ip(),
                kind = block.condition.kind_name(),
                error = %missing,
                "predicate lookup failed; treating as false"
            );
            false
        }
    };

    if holds {
        Ok(Flow::Next)
    } else {
        let target = resolver::skip_block(ctx.verb_ref(), ctx.actions(), ctx.ip())?;
        Ok(Flow::Jump(target))
    }
}

/// `Else` is only reached by falling out of the true branch; skip the false one.
pub fn run_else(ctx: &mut ActionContext<'_, '_>) -> ActionResult<Flow> {
    let target = resolver::skip_block(ctx.verb_ref(), ctx.actions(), ctx.ip())?;
    Ok(Flow::Jump(target))
}

/// `Repeat`: count entries; once the count exceeds `repeat` skip the block
/// and reset the counter. `repeat == -1` never skips.
pub fn run_repeat(block: &RepeatBlock, ctx: &mut ActionContext<'_, '_>) -> ActionResult<Flow> {
    let ip = ctx.ip();
    let counter = ctx.repeats().entry(ip).or_insert(0);
    *counter = counter.saturating_add(1);
    let current = *counter;

    if block.repeat >= 0 && i64::from(current) > i64::from(block.repeat) {
        ctx.repeats().remove(&ip);
        let target = resolver::skip_block(ctx.verb_ref(), ctx.actions(), ip)?;
        return Ok(Flow::Jump(target));
    }
    tracing::trace!(verb = %ctx.verb_ref(), index = ip, iteration = current, "repeat iteration");
    Ok(Flow::Next)
}

/// `EndRepeat`: jump back to the opener so it can count the next iteration.
pub fn run_end_repeat(ctx: &mut ActionContext<'_, '_>) -> ActionResult<Flow> {
    let opener = resolver::find_opener(ctx.verb_ref(), ctx.actions(), ctx.ip())?;
    Ok(Flow::Jump(opener))
}

/// `Choose`: enter exactly one top-level item of the block, then continue
/// past `EndChoose`.
pub fn run_choose(block: &ChooseBlock, ctx: &mut ActionContext<'_, '_>) -> ActionResult<Flow> {
    let ip = ctx.ip();
    let verb = ctx.verb_ref();
    let branches = resolver::branches(verb, ctx.actions(), ip)?;
    let end = resolver::skip_block(verb, ctx.actions(), ip)?;

    if branches.is_empty() {
        return Ok(Flow::Jump(end));
    }

    let count = ctx.control().choose_count(verb, ip);
    let last = branches.len() - 1;
    let pick = match block.policy {
        ChoosePolicy::Iterate => usize::try_from(count).map_or(last, |count| count.min(last)),
        ChoosePolicy::Cycle => (count % branches.len() as u64) as usize,
        ChoosePolicy::Random => ctx.rng().gen_range(0..branches.len()),
    };
    ctx.control().set_choose_count(verb, ip, count.saturating_add(1));

    let branch = &branches[pick];
    tracing::trace!(verb = %verb, index = ip, branch = pick, "choose selected branch");
    Ok(Flow::Enter {
        at: branch.start,
        exit: BlockExit {
            at: branch.end,
            to: end,
        },
    })
}

/// `RunOnce`: enter the block the first time only.
pub fn run_once(ctx: &mut ActionContext<'_, '_>) -> ActionResult<Flow> {
    let ip = ctx.ip();
    let verb = ctx.verb_ref();
    if ctx.control().run_once_executed(verb, ip) {
        let target = resolver::skip_block(verb, ctx.actions(), ip)?;
        return Ok(Flow::Jump(target));
    }
    ctx.control().mark_run_once(verb, ip);
    Ok(Flow::Next)
}
