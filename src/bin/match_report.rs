//! Trail Match Report - offline check of trail-to-way matching
//!
//! Parses a saved conditions page, matches its trails against a saved map
//! dataset and prints one line per trail, so the acceptance threshold can be
//! tuned against real data before it goes into the service config.
//!
//! Usage:
//!   trail-match-report --page saved/conditions.html --ways cache/ways.json
//!   trail-match-report --page saved/conditions.html --ways overpass.json --threshold 0.6 --unmatched
//!
//! The ways file is either the service's way cache or a raw Overpass JSON
//! response (`out geom`).

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use ski_conditions::domain::{RawDocument, WayRecord};
use ski_conditions::infra::MatchPolicy;
use ski_conditions::io::overpass::{parse_response, WayCache};
use ski_conditions::services::{GeoIndex, PageParser, TrailMatcher};
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Trail Match Report - trail-to-way matching on saved data
#[derive(Parser, Debug)]
#[command(name = "trail-match-report", version, about, long_about = None)]
struct Args {
    /// Saved conditions page (HTML)
    #[arg(short, long)]
    page: String,

    /// Way cache file or raw Overpass JSON response
    #[arg(short, long)]
    ways: String,

    /// Fuzzy acceptance threshold (0 < t <= 1)
    #[arg(short, long, default_value_t = 0.5)]
    threshold: f64,

    /// Only print trails without an accepted match
    #[arg(short, long)]
    unmatched: bool,
}

async fn load_ways(path: &str) -> anyhow::Result<Vec<WayRecord>> {
    let cache = WayCache::new(path, Duration::MAX);
    match cache.read(Utc::now()).await {
        Ok(Some(cached)) => return Ok(cached.ways),
        Ok(None) => anyhow::bail!("ways file {} not found", path),
        Err(e) => warn!(error = %e, "not_a_way_cache_trying_overpass_format"),
    }
    let body = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path))?;
    parse_response(&body)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let policy = MatchPolicy::new(args.threshold)?;

    let body = tokio::fs::read_to_string(&args.page)
        .await
        .with_context(|| format!("failed to read page {}", args.page))?;
    let conditions = PageParser::new()
        .parse(RawDocument::new(body, Utc::now()))
        .with_context(|| format!("failed to parse page {}", args.page))?;

    let index = GeoIndex::build(load_ways(&args.ways).await?);
    let batch = TrailMatcher::new(policy).enrich_all(&conditions.trails, &index);

    println!("{:<40} {:<28} {:>12} {:>6}", "trail", "entity_id", "way", "score");
    for (key, enrichment) in &batch.enrichments {
        if args.unmatched && enrichment.is_matched() {
            continue;
        }
        let way = enrichment.way_id.map(|w| w.to_string()).unwrap_or_else(|| "-".to_string());
        println!("{:<40} {:<28} {:>12} {:>6.3}", key.as_str(), enrichment.entity_id, way, enrichment.confidence);
    }

    if !batch.warnings.is_empty() {
        println!();
        println!("rejected candidates (threshold {:.2}):", policy.accept_threshold());
        for warning in &batch.warnings {
            match warning.best_candidate {
                Some((way, score)) => {
                    let name = index.get(way).map(|w| w.name.as_str()).unwrap_or("?");
                    println!("  {:<40} best {} \"{}\" at {:.3}", warning.trail_key.as_str(), way, name, score);
                }
                None => println!("  {:<40} no candidate", warning.trail_key.as_str()),
            }
        }
    }

    let total = batch.enrichments.len();
    let matched = batch.matched();
    let pct = if total > 0 { matched as f64 * 100.0 / total as f64 } else { 0.0 };
    println!();
    println!("{} of {} trails matched ({:.1}%) against {} ways", matched, total, pct, index.len());
    Ok(())
}
