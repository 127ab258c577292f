//! NLBW Monitor - traffic dashboard for nlbwmon accounting snapshots
//!
//! Watches a directory of daily `*.db.gz` snapshots and serves:
//! - Activity calendar and per-day device breakdowns
//! - Per-device protocol statistics over any date range
//! - Network-wide achievements computed from the whole history

mod achievements;
mod aggregator;
mod config;
mod demo;
mod scanner;
mod snapshot;
mod web;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::achievements::{AchievementCache, AchievementEngine};
use crate::aggregator::Aggregator;
use crate::snapshot::SnapshotStore;

#[derive(Debug, Parser)]
#[command(name = "nlbw-monitor", version, about = "Traffic dashboard for nlbwmon snapshots")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.yaml", env = "NLBW_CONFIG")]
    config: PathBuf,

    /// Generate demo data for a date range instead of scanning (DD.MM.YYYY-DD.MM.YYYY)
    #[arg(long, value_name = "RANGE")]
    demo: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (before any other initialization)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Use LOG_FORMAT=gcp for structured GCP Cloud Logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "gcp" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!("Starting NLBW Monitor...");

    let config = config::Config::load(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;
    info!(
        "Configuration loaded ({} friendly names)",
        config.friendly_names.len()
    );

    let store = Arc::new(SnapshotStore::new());
    let aggregator = Arc::new(Aggregator::new(store.clone(), Arc::new(config.clone())));
    let achievements = Arc::new(AchievementEngine::new(
        aggregator.clone(),
        Arc::new(AchievementCache::new()),
    ));

    match &cli.demo {
        Some(range) => {
            let range = demo::DateRange::parse(range).context("Invalid demo date range")?;
            info!("Demo mode enabled: {} to {}", range.from, range.to);
            demo::populate(&store, &range, &mut demo::Generator::new());
        }
        None => {
            let mut file_scanner = scanner::Scanner::new(config.data_dir.clone());
            info!("Performing initial scan of {}", config.data_dir.display());
            let loaded = scanner::sync(&mut file_scanner, &store)
                .with_context(|| format!("Initial scan of {} failed", config.data_dir.display()))?;
            info!("Initial scan complete: {} files", loaded);

            scanner::start_scanner(file_scanner, store.clone(), config.scan_interval);
        }
    }

    if store.is_empty() {
        warn!("No snapshots loaded, serving empty views until the scanner finds some");
    } else {
        info!("{} snapshots in memory", store.len());
    }

    let state = Arc::new(web::AppState {
        store,
        aggregator,
        achievements,
    });

    // Start web server (blocking)
    web::start_server(&config, state).await?;

    Ok(())
}
