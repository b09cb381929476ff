#![allow(dead_code)]

use serde_json::{Value, json};
use std::sync::{Arc, Once};

use verbrunner::interpreter::{ActionCatalog, LibraryDocument, RunnerId, VerbLibrary, VerbRef};
use verbrunner::runtime::{EngineConfig, TickReport, VerbEngine};
use verbrunner::world::{MemoryWorld, WorldSeed};

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

pub fn action(kind: &str, params: Value) -> Value {
    json!({ "kind": kind, "params": params })
}

/// Non-suspending line used to observe execution order.
pub fn mark(text: &str) -> Value {
    action("Say", json!({ "text": text, "wait": false }))
}

pub fn verb(reference: &str, actions: Vec<Value>) -> Value {
    let reference: VerbRef = reference.parse().expect("valid verb reference");
    json!({
        "owner": reference.scope.to_string(),
        "id": reference.id,
        "state": reference.state,
        "target": reference.target,
        "actions": actions,
    })
}

pub fn document(verbs: Vec<Value>) -> LibraryDocument {
    serde_json::from_value(json!({ "verbs": verbs })).expect("valid library document")
}

pub fn library(verbs: Vec<Value>) -> Arc<VerbLibrary> {
    let library = VerbLibrary::from_document(&document(verbs), &ActionCatalog::standard(), true)
        .expect("library loads");
    Arc::new(library)
}

pub fn unvalidated_library(verbs: Vec<Value>) -> Arc<VerbLibrary> {
    let library = VerbLibrary::from_document(&document(verbs), &ActionCatalog::standard(), false)
        .expect("library loads");
    Arc::new(library)
}

pub fn seed() -> WorldSeed {
    WorldSeed::from_json(
        r#"{
            "actors": {
                "door": { "state": "closed" },
                "guy": { "position": { "x": 1.0, "y": 2.0 } }
            },
            "scenes": { "hall": { "state": "day" } },
            "current_scene": "hall",
            "properties": { "coins": "3" }
        }"#,
    )
    .expect("valid world seed")
}

pub struct Harness {
    pub engine: VerbEngine,
    pub world: MemoryWorld,
}

impl Harness {
    pub fn new(library: Arc<VerbLibrary>) -> Self {
        Self::with_config(EngineConfig::default(), library)
    }

    pub fn with_config(config: EngineConfig, library: Arc<VerbLibrary>) -> Self {
        init_tracing();
        let engine = VerbEngine::new(config, library);
        let world = MemoryWorld::from_seed(seed(), engine.queue());
        Self { engine, world }
    }

    pub fn start(&mut self, reference: &str) -> RunnerId {
        let reference: VerbRef = reference.parse().expect("valid verb reference");
        self.engine
            .start(&reference, &mut self.world)
            .expect("verb starts")
    }

    pub fn tick(&mut self) -> TickReport {
        self.engine.tick(&mut self.world)
    }

    /// Complete every wait, advance the clock and tick.
    pub fn settle_tick(&mut self, dt: f32) -> TickReport {
        self.world.complete_waits();
        self.world.advance(dt);
        self.tick()
    }

    /// Settle-tick until idle. Panics if still busy after `limit` ticks.
    pub fn run_to_idle(&mut self, limit: usize) {
        for _ in 0..limit {
            if self.engine.is_idle() {
                return;
            }
            let report = self.settle_tick(1.0);
            assert!(report.is_clean(), "unexpected errors: {:?}", report.errors);
        }
        assert!(self.engine.is_idle(), "engine still busy after {limit} ticks");
    }

    pub fn lines(&self) -> Vec<String> {
        self.world.lines()
    }
}
