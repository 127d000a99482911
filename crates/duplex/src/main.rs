//! Duplex CLI
//!
//! Starts an engine, loads the class table, runs the rc script (or the given
//! script) and closes the engine again.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use duplex::{ClassTable, EngineConfig, ScriptEngine, TypeCatalog};

/// Native/script object bridge
#[derive(Parser, Debug)]
#[command(name = "duplex")]
#[command(about = "Run scripts against bound native objects", long_about = None)]
struct Args {
    /// Engine configuration file
    #[arg(short, long, default_value = "duplex.toml")]
    config: PathBuf,

    /// Class registration table, overrides the configured one
    #[arg(long)]
    classes: Option<PathBuf>,

    /// Extra module search path, probed after the configured ones
    #[arg(short = 'I', long = "include")]
    include: Vec<PathBuf>,

    /// Print descriptor summaries of the registered types as JSON
    #[arg(long)]
    describe: bool,

    /// Log as JSON
    #[arg(long)]
    json_logs: bool,

    /// Script to run instead of the rc file
    script: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("duplex=info"));
    if args.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let mut config = if args.config.is_file() {
        EngineConfig::load(&args.config)?
    } else {
        info!("No config at {}, using defaults", args.config.display());
        EngineConfig::default()
    };
    config.search_paths.extend(args.include.iter().cloned());
    if let Some(classes) = &args.classes {
        config.class_table = Some(classes.clone());
    }

    let engine = ScriptEngine::new(config.clone()).context("failed to start engine")?;

    match &config.class_table {
        Some(path) if path.is_file() => {
            let table = ClassTable::load(path)?;
            let report = engine.load_class_table(&table, &TypeCatalog::with_builtins());
            for (module, reason) in &report.failures {
                warn!("Class table entry {} failed: {}", module, reason);
            }
        }
        Some(path) if args.classes.is_some() => {
            anyhow::bail!("class table {} not found", path.display());
        }
        _ => {}
    }

    let outcome = match &args.script {
        Some(script) => engine.eval_file(script).map(|_| true),
        None => engine.run_rc(),
    };

    if args.describe {
        let summaries = engine.bridge().summaries();
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    }

    let report = engine.close()?;
    info!(
        "Engine closed: {} objects closed, {} handles released",
        report.closed_natives, report.released_handles
    );

    if !outcome? {
        info!("Nothing to run");
    }
    Ok(())
}
