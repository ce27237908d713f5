//! wardwatch server
//!
//! Serves the row store over REST, the notification function and the
//! realtime WebSocket.
//!
//! Run with: cargo run --bin wardwatch -- --seed
//!
//! Configuration is read from `--config`, or the default locations, with
//! `WARDWATCH_*` environment overrides. `RUST_LOG` overrides the log level.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wardwatch::api::{serve, AppState};
use wardwatch::config::{Config, LoggingConfig};
use wardwatch::fixtures;
use wardwatch::realtime::ChangeFeed;
use wardwatch::store::SqliteStore;

#[derive(Parser)]
#[command(name = "wardwatch")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Hospital resource management server")]
struct Args {
    /// Config file (default: search the standard locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Load the sample hospital into an empty store
    #[arg(long)]
    seed: bool,

    /// Keep rows in memory instead of the configured database file
    #[arg(long)]
    in_memory: bool,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("wardwatch={},tower_http=debug", logging.level).into()
    });

    let json = logging.format == "json";
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    init_tracing(&config.logging);

    tracing::info!("Starting wardwatch server v{}", env!("CARGO_PKG_VERSION"));

    let feed = Arc::new(ChangeFeed::new(config.realtime.feed_capacity));
    let store = if args.in_memory {
        tracing::info!("Using in-memory row store");
        SqliteStore::in_memory(feed)?
    } else {
        let path = config.storage.resolved_path();
        tracing::info!("Database: {:?}", path);
        SqliteStore::open(&path, feed)
            .with_context(|| format!("failed to open database {}", path.display()))?
    };
    let store = Arc::new(store);

    if args.seed {
        let written = fixtures::seed(store.as_ref()).await?;
        tracing::info!(rows = written, "Seeded sample hospital");
    }

    serve(AppState::new(store, config)).await?;
    Ok(())
}
