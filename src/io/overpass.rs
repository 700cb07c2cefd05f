//! Map dataset acquisition from the Overpass API
//!
//! Queries named piste ways inside the configured bounding box and caches the
//! result as JSON on disk. A fresh cache skips the network entirely; a stale
//! cache is still used when the API is unreachable.

use crate::domain::geometry::{LatLon, WayId, WayRecord};
use crate::infra::config::BboxConfig;
use crate::services::geometry_provider::GeometrySource;
use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const MAX_ATTEMPTS: u32 = 2;
const RETRY_DELAY: Duration = Duration::from_secs(3);

/// `piste:type` values kept from the query result
const PISTE_TYPES: [&str; 5] = ["downhill", "nordic", "skitour", "sled", "hike"];

/// Tags tried in order for the display name
const NAME_TAGS: [&str; 3] = ["name", "piste:name", "ref"];

pub fn build_query(bbox: &BboxConfig, timeout: Duration) -> String {
    let b = format!("{},{},{},{}", bbox.south, bbox.west, bbox.north, bbox.east);
    format!(
        "[out:json][timeout:{}];(way[\"piste:type\"]({b});way[\"piste:name\"]({b}););out geom;",
        timeout.as_secs()
    )
}

#[derive(Debug, Deserialize)]
struct OverpassResponse {
    #[serde(default)]
    elements: Vec<Element>,
}

#[derive(Debug, Deserialize)]
struct Element {
    #[serde(rename = "type")]
    kind: String,
    id: u64,
    #[serde(default)]
    tags: HashMap<String, String>,
    #[serde(default)]
    geometry: Vec<Option<LatLon>>,
}

impl Element {
    fn display_name(&self) -> Option<&str> {
        NAME_TAGS
            .iter()
            .filter_map(|tag| self.tags.get(*tag))
            .map(|v| v.trim())
            .find(|v| !v.is_empty())
    }

    fn is_piste(&self) -> bool {
        self.tags.get("piste:type").is_some_and(|t| PISTE_TYPES.contains(&t.as_str()))
    }
}

/// Named piste ways from an Overpass JSON response
pub fn parse_response(body: &str) -> anyhow::Result<Vec<WayRecord>> {
    let response: OverpassResponse = serde_json::from_str(body).context("invalid Overpass response")?;
    let ways: Vec<WayRecord> = response
        .elements
        .into_iter()
        .filter(|e| e.kind == "way" && e.is_piste())
        .filter_map(|e| {
            let name = e.display_name()?.to_string();
            let reference = e.tags.get("ref").map(|r| r.trim().to_string()).filter(|r| !r.is_empty());
            Some(WayRecord { id: WayId(e.id), name, reference, nodes: e.geometry.into_iter().flatten().collect() })
        })
        .collect();
    Ok(ways)
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    saved_at: DateTime<Utc>,
    ways: Vec<WayRecord>,
}

/// JSON file holding the last dataset fetched from the API
#[derive(Debug, Clone)]
pub struct WayCache {
    path: PathBuf,
    max_age: Duration,
}

/// Cached dataset and whether it is still within its max age
pub struct CachedWays {
    pub ways: Vec<WayRecord>,
    pub saved_at: DateTime<Utc>,
    pub fresh: bool,
}

impl WayCache {
    pub fn new(path: impl Into<PathBuf>, max_age: Duration) -> Self {
        Self { path: path.into(), max_age }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read(&self, now: DateTime<Utc>) -> anyhow::Result<Option<CachedWays>> {
        let body = match tokio::fs::read_to_string(&self.path).await {
            Ok(body) => body,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read cache {}", self.path.display()))
            }
        };
        let file: CacheFile = serde_json::from_str(&body)
            .with_context(|| format!("failed to parse cache {}", self.path.display()))?;
        let age = (now - file.saved_at).to_std().unwrap_or_default();
        Ok(Some(CachedWays { fresh: age <= self.max_age, saved_at: file.saved_at, ways: file.ways }))
    }

    pub async fn write(&self, ways: &[WayRecord], now: DateTime<Utc>) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let body = serde_json::to_string(&CacheFile { saved_at: now, ways: ways.to_vec() })?;
        // Write then rename so a crash never leaves a truncated cache
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

pub struct OverpassSource {
    url: String,
    bbox: BboxConfig,
    timeout: Duration,
    client: reqwest::Client,
    cache: Option<WayCache>,
}

impl OverpassSource {
    pub fn new(
        url: &str,
        user_agent: &str,
        bbox: BboxConfig,
        timeout: Duration,
        cache: Option<WayCache>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .context("failed to build Overpass HTTP client")?;
        Ok(Self { url: url.to_string(), bbox, timeout, client, cache })
    }

    async fn query(&self) -> anyhow::Result<Vec<WayRecord>> {
        let query = build_query(&self.bbox, self.timeout);
        let body = self
            .client
            .post(&self.url)
            .form(&[("data", query.as_str())])
            .send()
            .await
            .context("Overpass request failed")?
            .error_for_status()
            .context("Overpass returned an error status")?
            .text()
            .await
            .context("failed to read Overpass response")?;
        let ways = parse_response(&body)?;
        if ways.is_empty() {
            bail!("Overpass returned no named ways");
        }
        Ok(ways)
    }

    async fn query_with_retries(&self) -> anyhow::Result<Vec<WayRecord>> {
        let mut attempt = 1;
        loop {
            match self.query().await {
                Ok(ways) => return Ok(ways),
                Err(e) if attempt < MAX_ATTEMPTS => {
                    warn!(attempt, error = %e, retry_in_secs = RETRY_DELAY.as_secs(), "overpass_query_failed");
                    tokio::time::sleep(RETRY_DELAY).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.context(format!("Overpass query failed after {} attempts", attempt))),
            }
        }
    }

    async fn read_cache(&self, now: DateTime<Utc>) -> Option<CachedWays> {
        let cache = self.cache.as_ref()?;
        match cache.read(now).await {
            Ok(cached) => cached,
            Err(e) => {
                warn!(path = %cache.path().display(), error = %e, "way_cache_unreadable");
                None
            }
        }
    }
}

#[async_trait]
impl GeometrySource for OverpassSource {
    async fn load(&self) -> anyhow::Result<Vec<WayRecord>> {
        let now = Utc::now();
        let cached = self.read_cache(now).await;
        if let Some(cached) = cached.as_ref().filter(|c| c.fresh) {
            debug!(ways = cached.ways.len(), saved_at = %cached.saved_at, "way_cache_hit");
            return Ok(cached.ways.clone());
        }

        match self.query_with_retries().await {
            Ok(ways) => {
                info!(ways = ways.len(), "overpass_ways_fetched");
                if let Some(cache) = &self.cache {
                    if let Err(e) = cache.write(&ways, now).await {
                        warn!(path = %cache.path().display(), error = %e, "way_cache_write_failed");
                    }
                }
                Ok(ways)
            }
            Err(e) => match cached {
                Some(stale) => {
                    warn!(error = %e, saved_at = %stale.saved_at, "way_cache_stale_fallback");
                    Ok(stale.ways)
                }
                None => Err(e),
            },
        }
    }

    fn name(&self) -> &str {
        &self.url
    }
}
