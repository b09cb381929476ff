//! Verbrun CLI - Command-line interface for verb libraries
//!
//! Provides subcommands for validating libraries, listing action kinds, and
//! driving verbs against the in-memory reference world with save slots.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use verbrunner::runtime::storage::{self, SaveStore};
use verbrunner::runtime::snapshot::SaveGame;
use verbrunner::world::WorldSeed;
use verbrunner::{ActionCatalog, EngineConfig, MemoryWorld, VerbEngine, VerbLibrary, VerbRef};

#[derive(Parser)]
#[command(name = "verbrun")]
#[command(about = "Deterministic, resumable verb interpreter for adventure game scripting", long_about = None)]
struct Cli {
    /// Root directory for config and save slots
    #[arg(short, long, default_value = ".verbrun")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a storage root with a config file
    Init {
        /// Actions a runner may execute per tick
        #[arg(long, default_value = "10000")]
        max_actions_per_step: usize,

        /// Maximum RunVerb nesting depth
        #[arg(long, default_value = "16")]
        max_verb_depth: usize,

        /// Seed for the RANDOM choose policy
        #[arg(long)]
        rng_seed: Option<u64>,

        /// Reject saves created against a different library
        #[arg(long)]
        strict_fingerprint: bool,
    },

    /// Load and validate a library
    Check {
        /// Library document (JSON)
        library: PathBuf,
    },

    /// List action kinds and their parameters
    Kinds,

    /// Run a verb against an in-memory world
    Run {
        /// Library document (JSON)
        library: PathBuf,

        /// Verb reference, e.g. actor:door/open
        #[arg(long)]
        verb: String,

        /// World seed (JSON)
        #[arg(long)]
        world: Option<PathBuf>,

        /// Maximum ticks to drive
        #[arg(long, default_value = "100")]
        ticks: usize,

        /// Seconds of world time per tick
        #[arg(long, default_value = "0.5")]
        dt: f32,

        /// Save slot to write if the verb is still in flight
        #[arg(long)]
        slot: Option<String>,
    },

    /// Continue a saved run
    Resume {
        /// Library document (JSON)
        library: PathBuf,

        /// Save slot to load
        #[arg(long)]
        slot: String,

        /// Maximum ticks to drive
        #[arg(long, default_value = "100")]
        ticks: usize,

        /// Seconds of world time per tick
        #[arg(long, default_value = "0.5")]
        dt: f32,
    },

    /// List save slots
    Slots,
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init {
            max_actions_per_step,
            max_verb_depth,
            rng_seed,
            strict_fingerprint,
        } => {
            let root = cli.root.clone();
            let defaults = EngineConfig::default();
            let config = EngineConfig {
                root: cli.root,
                max_actions_per_step,
                max_verb_depth,
                rng_seed: rng_seed.unwrap_or(defaults.rng_seed),
                strict_fingerprint,
                validate_blocks: defaults.validate_blocks,
            };

            VerbEngine::init(&config)?;
            println!("Initialized verbrun storage at {:?}", root);
        }

        Commands::Check { library } => {
            let config = load_or_default(&cli.root)?;
            let library = load_library(&library, &config)?;

            let mut scopes: BTreeMap<String, usize> = BTreeMap::new();
            for verb in library.iter() {
                *scopes.entry(verb.reference().scope.to_string()).or_default() += 1;
            }
            println!("{} verbs, fingerprint {}", library.len(), library.fingerprint());
            for (scope, count) in scopes {
                println!("  {scope}: {count}");
            }
        }

        Commands::Kinds => {
            let catalog = ActionCatalog::standard();
            for kind in catalog.kind_names() {
                println!("{kind}");
                for spec in catalog.schema(kind).unwrap_or_default() {
                    let requirement = match (spec.mandatory, spec.default) {
                        (true, _) => "required".to_string(),
                        (false, Some(default)) => format!("default {default:?}"),
                        (false, None) => "optional".to_string(),
                    };
                    println!("  {} ({:?}, {})", spec.name, spec.ty, requirement);
                }
            }
        }

        Commands::Run {
            library,
            verb,
            world,
            ticks,
            dt,
            slot,
        } => {
            let config = load_or_default(&cli.root)?;
            let library = load_library(&library, &config)?;
            let mut engine = VerbEngine::new(config, library);

            let seed = match world {
                Some(path) => {
                    let text = fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read world seed: {:?}", path))?;
                    WorldSeed::from_json(&text).context("Failed to parse world seed")?
                }
                None => WorldSeed::default(),
            };
            let mut world = MemoryWorld::from_seed(seed, engine.queue());

            let verb: VerbRef = verb.parse()?;
            let runner = engine.start(&verb, &mut world)?;
            println!("Started {verb} as runner {runner}");

            drive(&mut engine, &mut world, ticks, dt);
            finish(&cli.root, &engine, &world, slot.as_deref())?;
        }

        Commands::Resume {
            library,
            slot,
            ticks,
            dt,
        } => {
            let config = load_or_default(&cli.root)?;
            let library = load_library(&library, &config)?;
            let store = SaveStore::open(&cli.root)?;
            let save = store.load(&slot)?;

            let mut engine = VerbEngine::new(config, library);
            let mut world = MemoryWorld::new(engine.queue());
            save.restore(&mut engine, &mut world)?;
            world.take_transcript();
            println!(
                "Restored slot '{slot}' ({} runners in flight)",
                engine.runners().count()
            );

            drive(&mut engine, &mut world, ticks, dt);
            finish(&cli.root, &engine, &world, Some(&slot))?;
        }

        Commands::Slots => {
            let store = SaveStore::open(&cli.root)?;
            for slot in store.list_slots()? {
                println!("{slot}");
            }
        }
    }

    Ok(())
}

fn load_or_default(root: &Path) -> anyhow::Result<EngineConfig> {
    if root.join("config.json").exists() {
        storage::load_config(root)
    } else {
        Ok(EngineConfig {
            root: root.to_path_buf(),
            ..EngineConfig::default()
        })
    }
}

fn load_library(path: &Path, config: &EngineConfig) -> anyhow::Result<Arc<VerbLibrary>> {
    let library = VerbLibrary::load_path(path, &ActionCatalog::standard(), config.validate_blocks)
        .with_context(|| format!("Failed to load library: {:?}", path))?;
    Ok(Arc::new(library))
}

/// Tick until idle, auto-completing every text and animation wait.
fn drive(engine: &mut VerbEngine, world: &mut MemoryWorld, ticks: usize, dt: f32) {
    for _ in 0..ticks {
        if engine.is_idle() {
            break;
        }
        world.complete_waits();
        world.advance(dt);
        let report = engine.tick(world);
        for error in &report.errors {
            eprintln!("error: {error}");
        }
    }
}

fn finish(
    root: &Path,
    engine: &VerbEngine,
    world: &MemoryWorld,
    slot: Option<&str>,
) -> anyhow::Result<()> {
    for entry in world.transcript() {
        println!("{entry}");
    }

    let store = SaveStore::open(root)?;
    if engine.is_idle() {
        println!("All verbs finished");
        if let Some(slot) = slot {
            store.remove(slot)?;
        }
        return Ok(());
    }

    match slot {
        Some(slot) => {
            let path = store.save(slot, &SaveGame::capture(engine, world))?;
            println!("Still in flight; saved to {:?}", path);
        }
        None => println!("Still in flight; pass --slot to save"),
    }
    Ok(())
}
