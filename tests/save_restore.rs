mod support;

use serde_json::json;
use std::sync::Arc;

use support::{Harness, action, library, mark, verb};
use verbrunner::interpreter::{RunnerStatus, VerbLibrary};
use verbrunner::runtime::error::SaveError;
use verbrunner::runtime::{EngineConfig, SaveGame, SaveStore, VerbEngine};
use verbrunner::world::MemoryWorld;

fn say(text: &str) -> serde_json::Value {
    action("Say", json!({ "text": text }))
}

/// A verb that suspends every iteration and draws from every choose policy.
fn busy_library() -> Arc<VerbLibrary> {
    library(vec![verb(
        "actor:guy/ramble",
        vec![
            action("Repeat", json!({ "caID": "loop", "repeat": 5 })),
            action("Choose", json!({ "caID": "mood", "policy": "RANDOM" })),
            mark("happy"),
            mark("sad"),
            mark("bored"),
            mark("sleepy"),
            action("EndChoose", json!({ "caID": "mood" })),
            action("Choose", json!({ "caID": "topic", "policy": "CYCLE" })),
            say("weather"),
            say("politics"),
            action("EndChoose", json!({ "caID": "topic" })),
            action("RunOnce", json!({ "caID": "intro" })),
            mark("by the way"),
            action("EndRunOnce", json!({ "caID": "intro" })),
            action("Wait", json!({ "time": 1.5 })),
            action("EndRepeat", json!({ "caID": "loop" })),
            mark("done"),
        ],
    )])
}

/// Restore `save` into a fresh engine and world over `library`.
fn restored(config: EngineConfig, library: Arc<VerbLibrary>, save: &SaveGame) -> Harness {
    let engine = VerbEngine::new(config, library);
    let world = MemoryWorld::new(engine.queue());
    let mut h = Harness { engine, world };
    save.restore(&mut h.engine, &mut h.world).expect("save restores");
    h
}

#[test]
fn restored_run_matches_uninterrupted_run() {
    let lib = busy_library();
    let mut original = Harness::new(lib.clone());
    original.start("actor:guy/ramble");
    for _ in 0..3 {
        original.settle_tick(1.0);
    }
    assert!(!original.engine.is_idle());

    let text = SaveGame::capture(&original.engine, &original.world)
        .to_json()
        .unwrap();
    let save = SaveGame::from_json(&text).unwrap();
    let mut copy = restored(EngineConfig::default(), lib, &save);
    assert_eq!(copy.lines(), original.lines());

    original.run_to_idle(50);
    copy.run_to_idle(50);
    assert_eq!(copy.lines(), original.lines());
    assert_eq!(copy.lines().last().map(String::as_str), Some("done"));
    assert_eq!(
        copy.engine.control_state().entries(),
        original.engine.control_state().entries()
    );
}

#[test]
fn snapshot_of_restored_engine_is_identical() {
    let lib = busy_library();
    let mut h = Harness::new(lib.clone());
    h.start("actor:guy/ramble");
    h.settle_tick(1.0);
    // The runner now waits on a timer; fire it without ticking.
    assert_eq!(h.world.advance(2.0), 1);

    let save = SaveGame::capture(&h.engine, &h.world);
    assert!(!save.engine.queued.is_empty());

    let copy = restored(EngineConfig::default(), lib, &save);
    assert_eq!(copy.engine.snapshot(), save.engine);
}

#[test]
fn sticky_choose_state_survives_restore() {
    let lib = library(vec![verb(
        "global/pick",
        vec![
            action("Choose", json!({ "caID": "c", "policy": "CYCLE" })),
            mark("0"),
            mark("1"),
            mark("2"),
            action("EndChoose", json!({ "caID": "c" })),
        ],
    )]);
    let mut h = Harness::new(lib.clone());
    h.start("global/pick");
    h.start("global/pick");

    let save = SaveGame::capture(&h.engine, &h.world);
    let mut copy = restored(EngineConfig::default(), lib, &save);
    copy.start("global/pick");
    copy.start("global/pick");
    assert_eq!(copy.lines(), vec!["0", "1", "2", "0"]);
}

#[test]
fn parent_and_child_restore_together() {
    let lib = library(vec![
        verb(
            "global/parent",
            vec![
                action("RunVerb", json!({ "verb": "global/child", "wait": true })),
                mark("parent done"),
            ],
        ),
        verb("global/child", vec![say("c1"), say("c2"), mark("child done")]),
    ]);
    let mut h = Harness::new(lib.clone());
    let parent = h.start("global/parent");
    h.settle_tick(0.0);

    let save = SaveGame::capture(&h.engine, &h.world);
    let child_record = save
        .engine
        .runners
        .iter()
        .find(|record| record.id != parent)
        .unwrap();
    assert_eq!(child_record.parent.as_ref().map(|key| key.runner), Some(parent));

    let mut copy = restored(EngineConfig::default(), lib, &save);
    let restored_parent = copy.engine.runner(parent).unwrap();
    assert_eq!(restored_parent.status(), RunnerStatus::Suspended);
    assert_eq!(copy.engine.runners().count(), 2);

    copy.run_to_idle(10);
    assert_eq!(copy.lines(), vec!["c1", "c2", "child done", "parent done"]);
}

#[test]
fn unclaimed_suspensions_are_reported() {
    let lib = library(vec![verb("global/greet", vec![say("Hello")])]);
    let mut h = Harness::new(lib.clone());
    h.start("global/greet");
    let snapshot = h.engine.snapshot();

    let mut engine = VerbEngine::new(EngineConfig::default(), lib);
    let table = engine.restore(&snapshot).unwrap();
    assert_eq!(table.len(), 1);
    assert_eq!(table.unclaimed(), vec![snapshot.runners[0].pending.clone().unwrap()]);
}

#[test]
fn fingerprint_mismatch_is_fatal_only_when_strict() {
    let lib = library(vec![verb("global/greet", vec![say("Hello"), mark("bye")])]);
    let mut h = Harness::new(lib);
    h.start("global/greet");
    let save = SaveGame::capture(&h.engine, &h.world);

    let changed = library(vec![
        verb("global/greet", vec![say("Hello"), mark("bye")]),
        verb("global/extra", vec![mark("new")]),
    ]);
    assert_ne!(changed.fingerprint(), save.engine.fingerprint);

    let strict = EngineConfig {
        strict_fingerprint: true,
        ..EngineConfig::default()
    };
    let mut engine = VerbEngine::new(strict, changed.clone());
    let mut world = MemoryWorld::new(engine.queue());
    assert!(matches!(
        save.restore(&mut engine, &mut world),
        Err(SaveError::FingerprintMismatch { .. })
    ));
    assert!(engine.is_idle());

    let mut lenient = restored(EngineConfig::default(), changed, &save);
    lenient.run_to_idle(5);
    assert_eq!(lenient.lines(), vec!["Hello", "bye"]);
}

#[test]
fn save_referencing_unknown_verb_is_rejected() {
    let lib = library(vec![verb("global/greet", vec![say("Hello")])]);
    let mut h = Harness::new(lib);
    h.start("global/greet");
    let save = SaveGame::capture(&h.engine, &h.world);

    let other = library(vec![verb("global/other", vec![say("Hi")])]);
    let mut engine = VerbEngine::new(EngineConfig::default(), other);
    let mut world = MemoryWorld::new(engine.queue());
    assert!(matches!(
        save.restore(&mut engine, &mut world),
        Err(SaveError::UnknownVerb(verb)) if verb == "global/greet"
    ));
    assert!(engine.is_idle());
}

#[test]
fn inconsistent_runner_record_is_rejected() {
    let lib = library(vec![verb("global/greet", vec![say("Hello")])]);
    let mut h = Harness::new(lib.clone());
    h.start("global/greet");
    let mut snapshot = h.engine.snapshot();
    snapshot.runners[0].ip = 7;

    let mut engine = VerbEngine::new(EngineConfig::default(), lib);
    assert!(matches!(
        engine.restore(&snapshot),
        Err(SaveError::InvalidState(_))
    ));
}

#[test]
fn save_against_shortened_verb_is_rejected() {
    let lib = library(vec![verb(
        "global/chat",
        vec![mark("hi"), say("one|two")],
    )]);
    let mut h = Harness::new(lib);
    let id = h.start("global/chat");
    assert_eq!(h.engine.runner(id).unwrap().ip(), 1);
    let save = SaveGame::capture(&h.engine, &h.world);

    let shortened = library(vec![verb("global/chat", vec![say("one|two")])]);
    let mut engine = VerbEngine::new(EngineConfig::default(), shortened);
    let mut world = MemoryWorld::new(engine.queue());
    assert!(matches!(
        save.restore(&mut engine, &mut world),
        Err(SaveError::InvalidState(_))
    ));
    assert!(engine.is_idle());

    // The surviving prefix of the verb still restores.
    let lengthened = library(vec![verb(
        "global/chat",
        vec![mark("hi"), say("one|two"), mark("bye")],
    )]);
    let mut copy = restored(EngineConfig::default(), lengthened, &save);
    copy.run_to_idle(5);
    assert_eq!(copy.lines(), vec!["hi", "one", "two", "bye"]);
}

#[test]
fn save_store_round_trip() {
    let temp = tempfile::tempdir().unwrap();
    let lib = library(vec![verb("global/greet", vec![say("Hello"), mark("bye")])]);
    let mut h = Harness::new(lib.clone());
    h.start("global/greet");
    let save = SaveGame::capture(&h.engine, &h.world);

    let store = SaveStore::open(temp.path()).unwrap();
    let path = store.save("chapter-1", &save).unwrap();
    assert!(path.exists());
    assert_eq!(store.list_slots().unwrap(), vec!["chapter-1"]);

    let loaded = store.load("chapter-1").unwrap();
    assert_eq!(loaded, save);

    let mut copy = restored(EngineConfig::default(), lib, &loaded);
    copy.run_to_idle(5);
    assert_eq!(copy.lines(), vec!["Hello", "bye"]);

    assert!(store.remove("chapter-1").unwrap());
    assert!(!store.remove("chapter-1").unwrap());
    assert!(store.list_slots().unwrap().is_empty());
    assert!(store.save("../escape", &save).is_err());
}

#[test]
fn unsupported_format_version_is_rejected() {
    let lib = library(vec![verb("global/greet", vec![say("Hello")])]);
    let mut h = Harness::new(lib.clone());
    h.start("global/greet");
    let mut save = SaveGame::capture(&h.engine, &h.world);
    save.metadata.format_version = 99;

    let mut engine = VerbEngine::new(EngineConfig::default(), lib);
    let mut world = MemoryWorld::new(engine.queue());
    assert!(matches!(
        save.restore(&mut engine, &mut world),
        Err(SaveError::Format(_))
    ));
}
