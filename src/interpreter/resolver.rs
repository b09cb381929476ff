//! Control-block resolution over a flat action list
//!
//! Blocks are correlated by id, not by nesting depth: the terminator of a
//! block is the first later control action carrying the same id. Every scan
//! is bounded by the action list and reports [`MalformedVerbError`] instead of
//! running off the end.

use std::collections::HashSet;
use std::ops::Range;

use crate::interpreter::ir::{Action, BlockKind, ControlRole};
use crate::interpreter::verb::VerbRef;
use crate::runtime::error::MalformedVerbError;

fn control_id<'a>(
    verb: &VerbRef,
    actions: &'a [Action],
    ip: usize,
) -> Result<&'a str, MalformedVerbError> {
    actions
        .get(ip)
        .and_then(Action::control_id)
        .ok_or_else(|| MalformedVerbError::NotControl {
            verb: verb.to_string(),
            index: ip,
        })
}

/// Index of the first control action after `ip` sharing its block id.
pub fn find_closer(verb: &VerbRef, actions: &[Action], ip: usize) -> Result<usize, MalformedVerbError> {
    let id = control_id(verb, actions, ip)?;
    actions
        .iter()
        .enumerate()
        .skip(ip + 1)
        .find(|(_, action)| action.control_id() == Some(id))
        .map(|(index, _)| index)
        .ok_or_else(|| MalformedVerbError::Unterminated {
            verb: verb.to_string(),
            index: ip,
            ca_id: id.to_string(),
        })
}

/// Index just past the action matching `ip` (an `Else` or the terminator).
pub fn skip_block(verb: &VerbRef, actions: &[Action], ip: usize) -> Result<usize, MalformedVerbError> {
    find_closer(verb, actions, ip).map(|closer| closer + 1)
}

/// Index just past the final terminator of the block opened at `ip`,
/// stepping over an `Else` marker.
pub fn block_end(verb: &VerbRef, actions: &[Action], ip: usize) -> Result<usize, MalformedVerbError> {
    let closer = find_closer(verb, actions, ip)?;
    match actions[closer].control_role() {
        Some(ControlRole::Else) => skip_block(verb, actions, closer),
        _ => Ok(closer + 1),
    }
}

/// Index of the last control action before `ip` sharing its block id.
pub fn find_opener(verb: &VerbRef, actions: &[Action], ip: usize) -> Result<usize, MalformedVerbError> {
    let id = control_id(verb, actions, ip)?;
    actions[..ip]
        .iter()
        .rposition(|action| action.is_opener() && action.control_id() == Some(id))
        .ok_or_else(|| MalformedVerbError::Unopened {
            verb: verb.to_string(),
            index: ip,
            ca_id: id.to_string(),
        })
}

/// Top-level items of the block opened at `ip`. A nested block counts as a
/// single item spanning opener to terminator.
pub fn branches(
    verb: &VerbRef,
    actions: &[Action],
    ip: usize,
) -> Result<Vec<Range<usize>>, MalformedVerbError> {
    let closer = find_closer(verb, actions, ip)?;
    let mut items = Vec::new();
    let mut index = ip + 1;

    while index < closer {
        let end = if actions[index].is_opener() {
            block_end(verb, actions, index)?
        } else {
            index + 1
        };
        if end > closer {
            return Err(MalformedVerbError::Interleaved {
                verb: verb.to_string(),
                index: closer,
                ca_id: control_id(verb, actions, ip)?.to_string(),
                open: control_id(verb, actions, index)?.to_string(),
            });
        }
        items.push(index..end);
        index = end;
    }
    Ok(items)
}

struct OpenBlock<'a> {
    id: &'a str,
    kind: BlockKind,
    seen_else: bool,
}

/// Check that every block is opened once, closed once by the matching
/// terminator kind, nested properly, and that `Else` only appears directly
/// inside its own `If`.
pub fn validate(verb: &VerbRef, actions: &[Action]) -> Result<(), MalformedVerbError> {
    let mut open: Vec<OpenBlock<'_>> = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    let name = || verb.to_string();

    for (index, action) in actions.iter().enumerate() {
        let (Some(role), Some(id)) = (action.control_role(), action.control_id()) else {
            continue;
        };

        let enclosing = open.iter().any(|block| block.id == id);
        match role {
            ControlRole::Open(kind) => {
                if !seen.insert(id) {
                    return Err(MalformedVerbError::DuplicateId {
                        verb: name(),
                        index,
                        ca_id: id.to_string(),
                    });
                }
                open.push(OpenBlock {
                    id,
                    kind,
                    seen_else: false,
                });
            }
            ControlRole::Else => match open.last_mut() {
                Some(top) if top.id == id => {
                    if top.kind != BlockKind::If || top.seen_else {
                        return Err(MalformedVerbError::MisplacedElse {
                            verb: name(),
                            index,
                            ca_id: id.to_string(),
                        });
                    }
                    top.seen_else = true;
                }
                Some(top) if enclosing => {
                    return Err(MalformedVerbError::Interleaved {
                        verb: name(),
                        index,
                        ca_id: id.to_string(),
                        open: top.id.to_string(),
                    });
                }
                _ => {
                    return Err(MalformedVerbError::MisplacedElse {
                        verb: name(),
                        index,
                        ca_id: id.to_string(),
                    });
                }
            },
            ControlRole::Close(kind) => match open.last() {
                Some(top) if top.id == id => {
                    if top.kind != kind {
                        return Err(MalformedVerbError::MismatchedTerminator {
                            verb: name(),
                            index,
                            kind: action.kind_name().to_string(),
                            ca_id: id.to_string(),
                        });
                    }
                    open.pop();
                }
                Some(top) if enclosing => {
                    return Err(MalformedVerbError::Interleaved {
                        verb: name(),
                        index,
                        ca_id: id.to_string(),
                        open: top.id.to_string(),
                    });
                }
                _ => {
                    return Err(MalformedVerbError::Unopened {
                        verb: name(),
                        index,
                        ca_id: id.to_string(),
                    });
                }
            },
        }
    }

    if let Some(block) = open.last() {
        let index = actions
            .iter()
            .position(|action| action.is_opener() && action.control_id() == Some(block.id))
            .unwrap_or(0);
        return Err(MalformedVerbError::Unterminated {
            verb: name(),
            index,
            ca_id: block.id.to_string(),
        });
    }
    Ok(())
}
