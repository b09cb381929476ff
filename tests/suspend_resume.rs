mod support;

use serde_json::json;

use support::{Harness, action, library, mark, unvalidated_library, verb};
use verbrunner::interpreter::{ResumeState, RunnerId, RunnerStatus, StepOutcome};
use verbrunner::runtime::EngineConfig;
use verbrunner::runtime::error::{ContinuationError, EngineError, MalformedVerbError};

fn say(text: &str) -> serde_json::Value {
    action("Say", json!({ "text": text }))
}

fn run_verb(reference: &str, wait: bool) -> serde_json::Value {
    action("RunVerb", json!({ "verb": reference, "wait": wait }))
}

#[test]
fn say_suspends_until_dismissed() {
    let lib = library(vec![verb("global/greet", vec![say("Hello"), mark("after")])]);
    let mut h = Harness::new(lib);
    let id = h.start("global/greet");

    let runner = h.engine.runner(id).unwrap();
    assert_eq!(runner.status(), RunnerStatus::Suspended);
    assert_eq!(runner.ip(), 0);
    assert!(runner.pending().is_some());
    assert_eq!(h.lines(), vec!["Hello"]);

    // Nothing happens until the world reports the dismissal.
    let report = h.tick();
    assert_eq!(report.resumed, 0);
    assert_eq!(h.lines(), vec!["Hello"]);

    assert!(h.world.dismiss_text());
    let report = h.tick();
    assert_eq!(report.resumed, 1);
    assert_eq!(report.finished, vec![id]);
    assert!(report.is_clean());
    assert_eq!(h.lines(), vec!["Hello", "after"]);
    assert!(h.engine.is_idle());
}

#[test]
fn resume_continues_at_the_next_action() {
    let lib = library(vec![verb(
        "global/talk",
        vec![say("one"), say("two"), mark("three")],
    )]);
    let mut h = Harness::new(lib);
    let id = h.start("global/talk");
    let first = h.engine.runner(id).unwrap().pending().cloned().unwrap();

    let outcome = h.engine.resume(&first, &mut h.world).unwrap();
    assert_eq!(outcome, StepOutcome::Suspended);
    let runner = h.engine.runner(id).unwrap();
    assert_eq!(runner.ip(), 1);
    assert_ne!(runner.pending(), Some(&first));
    assert_eq!(h.lines(), vec!["one", "two"]);

    // The first continuation was consumed.
    let stale = h.engine.resume(&first, &mut h.world).unwrap_err();
    assert!(matches!(
        stale,
        EngineError::Continuation(ContinuationError::StaleTicket { .. })
    ));
    assert_eq!(h.engine.runner(id).unwrap().ip(), 1);

    let second = h.engine.runner(id).unwrap().pending().cloned().unwrap();
    assert_eq!(
        h.engine.resume(&second, &mut h.world).unwrap(),
        StepOutcome::Finished
    );
    assert_eq!(h.lines(), vec!["one", "two", "three"]);

    // Once the runner is gone its continuations target nothing.
    let unknown = h.engine.resume(&second, &mut h.world).unwrap_err();
    assert!(matches!(
        unknown,
        EngineError::Continuation(ContinuationError::UnknownRunner { .. })
    ));
}

#[test]
fn resuming_a_running_runner_is_misuse() {
    let lib = library(vec![verb(
        "global/chatter",
        vec![say("wait"), mark("a"), mark("b"), mark("c"), mark("d"), mark("e")],
    )]);
    let config = EngineConfig {
        max_actions_per_step: 3,
        ..EngineConfig::default()
    };
    let mut h = Harness::with_config(config, lib);
    let id = h.start("global/chatter");
    let pending = h.engine.runner(id).unwrap().pending().cloned().unwrap();

    assert_eq!(
        h.engine.resume(&pending, &mut h.world).unwrap(),
        StepOutcome::Yielded
    );
    assert_eq!(h.engine.runner(id).unwrap().status(), RunnerStatus::Running);

    let error = h.engine.resume(&pending, &mut h.world).unwrap_err();
    assert!(matches!(
        error,
        EngineError::Continuation(ContinuationError::NotSuspended { .. })
    ));

    // The yielded runner still finishes on the next tick.
    let report = h.tick();
    assert_eq!(report.finished, vec![id]);
    assert_eq!(h.lines(), vec!["wait", "a", "b", "c", "d", "e"]);
}

#[test]
fn multi_line_say_suspends_once_per_line() {
    let lib = library(vec![verb(
        "actor:guy/story",
        vec![
            action("Say", json!({ "actor": "guy", "text": "one|two|three" })),
            mark("end"),
        ],
    )]);
    let mut h = Harness::new(lib);
    let id = h.start("actor:guy/story");
    assert_eq!(h.lines(), vec!["one"]);
    assert_eq!(
        h.engine.runner(id).unwrap().resume_state(),
        Some(&ResumeState::SayLines { next: 1 })
    );

    h.settle_tick(0.0);
    assert_eq!(h.lines(), vec!["one", "two"]);
    assert_eq!(h.engine.runner(id).unwrap().ip(), 0);

    h.settle_tick(0.0);
    assert_eq!(h.lines(), vec!["one", "two", "three"]);

    h.settle_tick(0.0);
    assert_eq!(h.lines(), vec!["one", "two", "three", "end"]);
    assert!(h.engine.is_idle());
}

#[test]
fn wait_resumes_after_the_timer_elapses() {
    let lib = library(vec![verb(
        "global/pause",
        vec![action("Wait", json!({ "time": 2.0 })), mark("late")],
    )]);
    let mut h = Harness::new(lib);
    let id = h.start("global/pause");

    h.world.advance(1.0);
    h.tick();
    assert_eq!(h.engine.runner(id).unwrap().status(), RunnerStatus::Suspended);
    assert!(h.lines().is_empty());

    assert_eq!(h.world.advance(1.0), 1);
    h.tick();
    assert_eq!(h.lines(), vec!["late"]);
    assert!(h.engine.is_idle());
}

#[test]
fn zero_wait_does_not_suspend() {
    let lib = library(vec![verb(
        "global/blink",
        vec![action("Wait", json!({ "time": 0 })), mark("now")],
    )]);
    let mut h = Harness::new(lib);
    h.start("global/blink");
    assert_eq!(h.lines(), vec!["now"]);
    assert!(h.engine.is_idle());
}

#[test]
fn queued_continuations_resume_in_enqueue_order() {
    let lib = library(vec![
        verb(
            "global/first",
            vec![action("Wait", json!({ "time": 2.0 })), mark("first")],
        ),
        verb(
            "global/second",
            vec![action("Wait", json!({ "time": 1.0 })), mark("second")],
        ),
        verb("global/third", vec![say("third?"), mark("third")]),
    ]);
    let mut h = Harness::new(lib);
    h.start("global/first");
    h.start("global/second");
    h.start("global/third");

    // Timers fire in due order, then the dismissed text joins the queue.
    assert_eq!(h.world.advance(5.0), 2);
    assert!(h.world.dismiss_text());
    let report = h.tick();
    assert_eq!(report.resumed, 3);
    assert_eq!(h.lines(), vec!["third?", "second", "first", "third"]);
}

#[test]
fn waiting_run_verb_resumes_parent_on_the_next_tick() {
    let lib = library(vec![
        verb(
            "global/parent",
            vec![mark("p1"), run_verb("global/child", true), mark("p2")],
        ),
        verb("global/child", vec![say("c1"), mark("c2")]),
    ]);
    let mut h = Harness::new(lib);
    let parent = h.start("global/parent");

    assert_eq!(h.lines(), vec!["p1", "c1"]);
    assert_eq!(h.engine.runners().count(), 2);
    let child = h.engine.runners().map(|r| r.id()).find(|id| *id != parent).unwrap();
    assert_eq!(h.engine.runner(child).unwrap().depth(), 1);
    assert_eq!(
        h.engine.runner(parent).unwrap().status(),
        RunnerStatus::Suspended
    );

    // The child finishes this tick; its completion is queued for the next.
    let report = h.settle_tick(0.0);
    assert_eq!(report.finished, vec![child]);
    assert_eq!(h.lines(), vec!["p1", "c1", "c2"]);
    assert_eq!(
        h.engine.runner(parent).unwrap().status(),
        RunnerStatus::Suspended
    );

    let report = h.tick();
    assert_eq!(report.finished, vec![parent]);
    assert_eq!(h.lines(), vec!["p1", "c1", "c2", "p2"]);
    assert!(h.engine.is_idle());
}

#[test]
fn fire_and_forget_run_verb_does_not_block_parent() {
    let lib = library(vec![
        verb(
            "global/parent",
            vec![run_verb("global/child", false), mark("p")],
        ),
        verb("global/child", vec![say("c1"), mark("c2")]),
    ]);
    let mut h = Harness::new(lib);
    let parent = h.start("global/parent");

    assert!(h.engine.runner(parent).is_none());
    assert_eq!(h.lines(), vec!["c1", "p"]);
    h.run_to_idle(5);
    assert_eq!(h.lines(), vec!["c1", "p", "c2"]);
}

#[test]
fn cancelled_runner_ignores_its_late_continuation() {
    let lib = library(vec![
        verb("global/waiter", vec![say("zzz"), mark("woke")]),
        verb(
            "global/stopper",
            vec![
                action("CancelVerb", json!({ "verb": "global/waiter" })),
                mark("stopped"),
            ],
        ),
    ]);
    let mut h = Harness::new(lib);
    let waiter = h.start("global/waiter");
    let pending = h.engine.runner(waiter).unwrap().pending().cloned().unwrap();

    h.start("global/stopper");
    assert!(h.engine.runner(waiter).is_none());
    assert!(h.engine.is_idle());

    // The world still delivers the dismissal; it is a no-op.
    let report = h.settle_tick(0.0);
    assert_eq!(report.resumed, 1);
    assert!(report.is_clean());
    assert_eq!(h.lines(), vec!["zzz", "stopped"]);

    // Only the outstanding continuation is forgiven, and only once.
    assert!(matches!(
        h.engine.resume(&pending, &mut h.world),
        Err(EngineError::Continuation(ContinuationError::UnknownRunner { .. }))
    ));
}

#[test]
fn cancelled_runner_late_continuation_is_ignored_once() {
    let lib = library(vec![verb("global/waiter", vec![say("zzz"), mark("woke")])]);
    let mut h = Harness::new(lib);
    let waiter = h.start("global/waiter");
    let pending = h.engine.runner(waiter).unwrap().pending().cloned().unwrap();
    assert!(h.engine.cancel(waiter));

    assert_eq!(
        h.engine.resume(&pending, &mut h.world).unwrap(),
        StepOutcome::Cancelled
    );
    assert!(h.engine.resume(&pending, &mut h.world).is_err());
    assert_eq!(h.lines(), vec!["zzz"]);
}

#[test]
fn cancel_cascades_to_waited_children() {
    let lib = library(vec![
        verb(
            "global/parent",
            vec![run_verb("global/child", true), mark("p")],
        ),
        verb("global/child", vec![say("c1"), mark("c2")]),
    ]);
    let mut h = Harness::new(lib);
    let parent = h.start("global/parent");
    assert_eq!(h.engine.runners().count(), 2);

    assert!(h.engine.cancel(parent));
    assert!(!h.engine.cancel(parent));
    assert!(h.engine.is_idle());

    let report = h.settle_tick(0.0);
    assert!(report.is_clean());
    assert_eq!(h.lines(), vec!["c1"]);
}

#[test]
fn cancelling_a_child_wakes_its_parent() {
    let lib = library(vec![
        verb(
            "global/parent",
            vec![run_verb("global/child", true), mark("p")],
        ),
        verb("global/child", vec![say("c1"), mark("c2")]),
    ]);
    let mut h = Harness::new(lib);
    let parent = h.start("global/parent");
    let child = RunnerId(parent.0 + 1);

    assert!(h.engine.cancel(child));
    assert_eq!(h.engine.queue().len(), 1);

    h.tick();
    assert_eq!(h.lines(), vec!["c1", "p"]);
    assert!(h.engine.is_idle());
}

#[test]
fn malformed_child_fails_alone() {
    let lib = unvalidated_library(vec![
        verb(
            "global/parent",
            vec![run_verb("global/broken", true), mark("after")],
        ),
        verb(
            "global/broken",
            vec![
                action("IfExpression", json!({ "caID": "x", "expression": "0" })),
                mark("never"),
            ],
        ),
    ]);
    let mut h = Harness::new(lib);
    let parent = h.start("global/parent");
    assert_eq!(h.engine.runners().count(), 1);

    let report = h.tick();
    assert_eq!(report.errors.len(), 1);
    assert!(matches!(
        &report.errors[0],
        EngineError::Malformed(MalformedVerbError::Unterminated { .. })
    ));
    assert_eq!(report.finished, vec![parent]);
    assert_eq!(h.lines(), vec!["after"]);
}

#[test]
fn missing_reference_skips_only_that_action() {
    let lib = library(vec![verb(
        "global/careless",
        vec![
            mark("A"),
            action("SetState", json!({ "actor": "nobody", "state": "x" })),
            action("Say", json!({ "actor": "nobody", "text": "lost", "wait": false })),
            mark("B"),
        ],
    )]);
    let mut h = Harness::new(lib);
    h.start("global/careless");
    let report = h.tick();

    assert!(report.is_clean());
    assert_eq!(h.lines(), vec!["A", "B"]);
    assert!(h.engine.is_idle());
}

#[test]
fn recursive_run_verb_stops_at_the_nesting_limit() {
    let lib = library(vec![verb(
        "global/echo",
        vec![mark("e"), run_verb("global/echo", false)],
    )]);
    let config = EngineConfig {
        max_verb_depth: 3,
        ..EngineConfig::default()
    };
    let mut h = Harness::with_config(config, lib);
    h.start("global/echo");

    assert_eq!(h.lines(), vec!["e", "e", "e", "e"]);
    assert!(h.engine.is_idle());
}

#[test]
fn clear_drops_everything_without_resuming() {
    let lib = library(vec![verb("global/greet", vec![say("Hello"), mark("after")])]);
    let mut h = Harness::new(lib);
    h.start("global/greet");
    h.start("global/greet");
    h.world.complete_waits();
    assert_eq!(h.engine.queue().len(), 2);

    h.engine.clear();
    assert!(h.engine.is_idle());
    assert_eq!(h.tick().resumed, 0);
    assert_eq!(h.lines(), vec!["Hello", "Hello"]);
}
