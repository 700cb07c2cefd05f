//! Ski conditions service
//!
//! Periodically scrapes the resort conditions page, enriches trails with map
//! geometry and serves the latest snapshot over HTTP.
//!
//! Module structure:
//! - `domain/` - Conditions, geometry and snapshot types
//! - `io/` - External interfaces (conditions page, Overpass, HTTP API)
//! - `services/` - Parser, geometry index, matcher, registry, coordinator
//! - `infra/` - Infrastructure (Config, Metrics)

use anyhow::{bail, Context};
use clap::Parser;
use ski_conditions::infra::{Config, LogFormat, Metrics};
use ski_conditions::io::{start_api_server, HttpPageSource, OverpassSource, WayCache};
use ski_conditions::services::{GeometryProvider, RefreshCoordinator, TrailMatcher};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Ski conditions scraper and trail geometry enrichment service
#[derive(Parser, Debug)]
#[command(name = "ski-conditions", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Run a single refresh cycle, print the snapshot as JSON and exit
    #[arg(long)]
    once: bool,
}

fn init_logging(format: LogFormat) {
    // Default: INFO, use RUST_LOG=debug for per-row parse warnings
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Config first: it selects the log format
    let config_path = Config::resolve_config_path(args.config.as_deref());
    let config = Config::load_from_path(&config_path)?;
    init_logging(config.log_format());

    info!(version = env!("CARGO_PKG_VERSION"), git_hash = env!("GIT_HASH"), "ski-conditions starting");

    let policy = config.refresh_policy();
    info!(
        config_file = %config.config_file(),
        source_url = %config.source_url(),
        interval_secs = policy.interval().as_secs(),
        fetch_timeout_secs = policy.fetch_timeout().as_secs(),
        max_staleness_secs = policy.max_staleness().as_secs(),
        accept_threshold = config.match_policy().accept_threshold(),
        overpass_url = %config.overpass_url(),
        geometry_cache = ?config.geometry_cache_file(),
        api_port = %config.api_port(),
        "config_loaded"
    );

    let metrics = Arc::new(Metrics::new());

    let page_source = HttpPageSource::new(config.source_url(), config.user_agent(), policy.fetch_timeout())
        .context("failed to build conditions page client")?;
    let way_cache = config
        .geometry_cache_file()
        .map(|path| WayCache::new(path, config.geometry_cache_max_age()));
    let geometry_source = OverpassSource::new(
        config.overpass_url(),
        config.user_agent(),
        config.bbox(),
        config.geometry_query_timeout(),
        way_cache,
    )?;
    let geometry = Arc::new(GeometryProvider::new(Arc::new(geometry_source), metrics.clone()));

    let coordinator = Arc::new(RefreshCoordinator::new(
        Arc::new(page_source),
        geometry.clone(),
        TrailMatcher::new(config.match_policy()),
        policy,
        metrics.clone(),
    ));

    if args.once {
        // One-shot runs match against the map, so wait for it here
        if let Err(e) = geometry.reload().await {
            warn!(error = %e, "geometry_unavailable");
        }
        let outcome = coordinator.refresh().await;
        let view = coordinator.view(chrono::Utc::now());
        println!("{}", serde_json::to_string_pretty(&view)?);
        if let Some(e) = outcome.error {
            bail!("refresh failed: {}", e);
        }
        return Ok(());
    }

    // Load the map in the background; cycles match against whatever is loaded
    geometry.spawn_load();

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start HTTP API (if port > 0)
    let api_port = config.api_port();
    if api_port > 0 {
        let bind = config.api_bind_address().to_string();
        let api_coordinator = coordinator.clone();
        let api_metrics = metrics.clone();
        let api_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = start_api_server(&bind, api_port, api_coordinator, api_metrics, api_shutdown).await {
                error!(error = %e, "api_server_error");
            }
        });
    }

    // Start metrics reporter
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    let mut metrics_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        // First tick fires immediately; skip it so the first report has data
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => metrics_clone.report().log(),
                _ = metrics_shutdown.changed() => {
                    if *metrics_shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    });

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    // Refresh loop runs until shutdown
    coordinator.run(shutdown_rx).await;

    info!("ski-conditions shutdown complete");
    Ok(())
}
