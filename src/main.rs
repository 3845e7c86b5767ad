//! Demonlist Engine CLI
//!
//! Maintenance entry point for a list database.
//!
//! ## Usage
//!
//! ```bash
//! # Create the schema and a default config
//! demonlist-engine init
//!
//! # Re-derive every point value, completion and rank
//! demonlist-engine rebuild
//!
//! # Recompute a position range after a manual fix
//! demonlist-engine recompute --min 1 --max 75
//!
//! # Replace the points formula
//! demonlist-engine set-formula --file formula.json
//!
//! # Print the top of the leaderboard as JSON
//! demonlist-engine leaderboard --limit 50
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use demonlist_engine::services::spawn_logging_listener;
use demonlist_engine::{Config, ListDb, PointFormula, Services};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "demonlist-engine")]
#[command(about = "Consistency engine for a position-ranked level list")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "DEMONLIST_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long, env = "DEMONLIST_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// Database file name inside the storage directory
    #[arg(long, env = "DEMONLIST_DATABASE_FILE")]
    database_file: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the schema and write a default config if none exists
    Init,
    /// Re-derive every derived table from the base tables
    Rebuild,
    /// Recompute level, pack and user points for a position range
    Recompute {
        #[arg(long)]
        min: i64,
        #[arg(long)]
        max: i64,
    },
    /// Replace the points formula with the JSON in a file
    SetFormula {
        #[arg(long)]
        file: PathBuf,
    },
    /// Print a page of the leaderboard as JSON
    Leaderboard {
        #[arg(long, default_value_t = 50)]
        limit: u32,
        #[arg(long, default_value_t = 0)]
        offset: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("demonlist_engine=info".parse()?))
        .init();

    let args = Args::parse();

    // Load config
    let mut config = if let Some(config_path) = &args.config {
        Config::load(config_path)?
    } else {
        Config::default()
    };

    // Apply CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(file) = args.database_file {
        config.database_file = file;
    }

    info!(
        storage_dir = %config.storage_dir.display(),
        list = %config.list.name,
        "Starting demonlist-engine"
    );

    tokio::fs::create_dir_all(&config.storage_dir)
        .await
        .with_context(|| format!("creating {}", config.storage_dir.display()))?;

    let db = Arc::new(ListDb::open(
        &config.database_path(),
        config.list.clone(),
        Duration::from_millis(config.busy_timeout_ms),
    )?);
    let services = Services::new(db.clone());
    let listener = spawn_logging_listener(services.events.clone());

    match args.command {
        Command::Init => {
            let config_path = config.config_path();
            if !config_path.exists() {
                config.save(&config_path)?;
                info!(path = %config_path.display(), "Created default config");
            }
            let stats = db.stats()?;
            info!(levels = stats.level_count, users = stats.user_count, "Database ready");
        }
        Command::Rebuild => {
            services.leaderboard.rebuild_all()?;
        }
        Command::Recompute { min, max } => {
            services.leaderboard.recompute_range(min, max)?;
        }
        Command::SetFormula { file } => {
            let json = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let formula: PointFormula = serde_json::from_str(&json).context("parsing formula")?;
            services.leaderboard.set_point_formula(formula)?;
        }
        Command::Leaderboard { limit, offset } => {
            let page = services.leaderboard.page(limit, offset)?;
            println!("{}", serde_json::to_string_pretty(&page)?);
        }
    }

    // Closing the bus lets the listener drain and stop
    drop(services);
    listener.await?;
    Ok(())
}
