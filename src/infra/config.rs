//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! A missing file means defaults. A file that is present but invalid, or whose
//! values are out of range, is rejected before anything reaches the core.

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub const MIN_REFRESH_INTERVAL_MINUTES: u64 = 1;
pub const MAX_REFRESH_INTERVAL_MINUTES: u64 = 60;
pub const MIN_FETCH_TIMEOUT_SECS: u64 = 1;
pub const MAX_FETCH_TIMEOUT_SECS: u64 = 120;
pub const MAX_STALENESS_MINUTES: u64 = 24 * 60;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("refresh interval {0} min outside 1..=60")]
    IntervalOutOfRange(u64),
    #[error("fetch timeout {0} s outside 1..=120")]
    FetchTimeoutOutOfRange(u64),
    #[error("fetch timeout {timeout_secs} s must be shorter than the refresh interval")]
    FetchTimeoutExceedsInterval { timeout_secs: u64 },
    #[error("max staleness {staleness_min} min must be greater than the refresh interval {interval_min} min and at most 1440")]
    StalenessOutOfRange { staleness_min: u64, interval_min: u64 },
    #[error("match acceptance threshold {0} outside (0, 1]")]
    ThresholdOutOfRange(f64),
    #[error("invalid bounding box: {0}")]
    InvalidBbox(String),
    #[error("invalid logging format {0:?} (expected \"text\" or \"json\")")]
    InvalidLogFormat(String),
    #[error("empty {0}")]
    Empty(&'static str),
}

/// Validated timing policy for the refresh coordinator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefreshPolicy {
    interval: Duration,
    fetch_timeout: Duration,
    max_staleness: Duration,
}

impl RefreshPolicy {
    pub fn new(
        interval_minutes: u64,
        fetch_timeout_secs: u64,
        max_staleness_minutes: u64,
    ) -> Result<Self, ConfigError> {
        if !(MIN_REFRESH_INTERVAL_MINUTES..=MAX_REFRESH_INTERVAL_MINUTES).contains(&interval_minutes) {
            return Err(ConfigError::IntervalOutOfRange(interval_minutes));
        }
        if !(MIN_FETCH_TIMEOUT_SECS..=MAX_FETCH_TIMEOUT_SECS).contains(&fetch_timeout_secs) {
            return Err(ConfigError::FetchTimeoutOutOfRange(fetch_timeout_secs));
        }
        if fetch_timeout_secs >= interval_minutes * 60 {
            return Err(ConfigError::FetchTimeoutExceedsInterval { timeout_secs: fetch_timeout_secs });
        }
        if max_staleness_minutes <= interval_minutes || max_staleness_minutes > MAX_STALENESS_MINUTES {
            return Err(ConfigError::StalenessOutOfRange {
                staleness_min: max_staleness_minutes,
                interval_min: interval_minutes,
            });
        }
        Ok(Self {
            interval: Duration::from_secs(interval_minutes * 60),
            fetch_timeout: Duration::from_secs(fetch_timeout_secs),
            max_staleness: Duration::from_secs(max_staleness_minutes * 60),
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn fetch_timeout(&self) -> Duration {
        self.fetch_timeout
    }

    pub fn max_staleness(&self) -> Duration {
        self.max_staleness
    }
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(default_interval_minutes() * 60),
            fetch_timeout: Duration::from_secs(default_fetch_timeout_secs()),
            max_staleness: Duration::from_secs(default_max_staleness_minutes() * 60),
        }
    }
}

/// Validated trail matching policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchPolicy {
    accept_threshold: f64,
}

impl MatchPolicy {
    pub fn new(accept_threshold: f64) -> Result<Self, ConfigError> {
        if !(accept_threshold > 0.0 && accept_threshold <= 1.0) {
            return Err(ConfigError::ThresholdOutOfRange(accept_threshold));
        }
        Ok(Self { accept_threshold })
    }

    /// Minimum token similarity for a fuzzy match
    pub fn accept_threshold(&self) -> f64 {
        self.accept_threshold
    }
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self { accept_threshold: default_accept_threshold() }
    }
}

/// Geographic bounding box for the map dataset query
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct BboxConfig {
    pub south: f64,
    pub west: f64,
    pub north: f64,
    pub east: f64,
}

impl Default for BboxConfig {
    fn default() -> Self {
        // ~5 km around the base of the mountain
        Self { south: 45.27, west: -72.715, north: 45.36, east: -72.585 }
    }
}

impl BboxConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let lat_ok = |v: f64| (-90.0..=90.0).contains(&v);
        let lon_ok = |v: f64| (-180.0..=180.0).contains(&v);
        if !(lat_ok(self.south) && lat_ok(self.north) && lon_ok(self.west) && lon_ok(self.east)) {
            return Err(ConfigError::InvalidBbox("coordinates out of range".to_string()));
        }
        if self.south >= self.north || self.west >= self.east {
            return Err(ConfigError::InvalidBbox("south/west must be below north/east".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_url")]
    pub url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: default_source_url(),
            user_agent: default_user_agent(),
            timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

fn default_source_url() -> String {
    "https://www.bromontmontagne.com/conditions-detaillees/".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string()
}

fn default_fetch_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    /// Age past which consumers see the snapshot as unavailable
    #[serde(default = "default_max_staleness_minutes")]
    pub max_staleness_minutes: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
            max_staleness_minutes: default_max_staleness_minutes(),
        }
    }
}

fn default_interval_minutes() -> u64 {
    5
}

fn default_max_staleness_minutes() -> u64 {
    12 // two missed cycles at the default interval
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatchingConfig {
    #[serde(default = "default_accept_threshold")]
    pub accept_threshold: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self { accept_threshold: default_accept_threshold() }
    }
}

fn default_accept_threshold() -> f64 {
    0.5
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeometryConfig {
    #[serde(default = "default_overpass_url")]
    pub overpass_url: String,
    #[serde(default)]
    pub bbox: BboxConfig,
    /// JSON cache of the way dataset (empty string disables caching)
    #[serde(default = "default_cache_file")]
    pub cache_file: String,
    #[serde(default = "default_cache_max_age_hours")]
    pub cache_max_age_hours: u64,
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            overpass_url: default_overpass_url(),
            bbox: BboxConfig::default(),
            cache_file: default_cache_file(),
            cache_max_age_hours: default_cache_max_age_hours(),
            query_timeout_secs: default_query_timeout_secs(),
        }
    }
}

fn default_overpass_url() -> String {
    "https://overpass-api.de/api/interpreter".to_string()
}

fn default_cache_file() -> String {
    "cache/ways.json".to_string()
}

fn default_cache_max_age_hours() -> u64 {
    7 * 24
}

fn default_query_timeout_secs() -> u64 {
    90
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_bind_address")]
    pub bind_address: String,
    /// HTTP port for the snapshot/metrics endpoint (0 to disable)
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { bind_address: default_api_bind_address(), port: default_api_port() }
    }
}

fn default_api_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval_secs() }
    }
}

fn default_metrics_interval_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { format: default_log_format() }
    }
}

fn default_log_format() -> String {
    "text".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub geometry: GeometryConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    source_url: String,
    user_agent: String,
    refresh_policy: RefreshPolicy,
    match_policy: MatchPolicy,
    overpass_url: String,
    bbox: BboxConfig,
    geometry_cache_file: Option<String>,
    geometry_cache_max_age: Duration,
    geometry_query_timeout: Duration,
    api_bind_address: String,
    api_port: u16,
    metrics_interval_secs: u64,
    log_format: LogFormat,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        let geometry = GeometryConfig::default();
        Self {
            source_url: default_source_url(),
            user_agent: default_user_agent(),
            refresh_policy: RefreshPolicy::default(),
            match_policy: MatchPolicy::default(),
            overpass_url: geometry.overpass_url,
            bbox: geometry.bbox,
            geometry_cache_file: Some(geometry.cache_file),
            geometry_cache_max_age: Duration::from_secs(geometry.cache_max_age_hours * 3600),
            geometry_query_timeout: Duration::from_secs(geometry.query_timeout_secs),
            api_bind_address: default_api_bind_address(),
            api_port: default_api_port(),
            metrics_interval_secs: default_metrics_interval_secs(),
            log_format: LogFormat::Text,
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Determine config file path from the CLI value or environment
    pub fn resolve_config_path(cli_path: Option<&str>) -> String {
        if let Some(path) = cli_path {
            return path.to_string();
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Build a validated config from parsed TOML
    pub fn from_toml(toml_config: TomlConfig, config_file: &str) -> Result<Self, ConfigError> {
        let refresh_policy = RefreshPolicy::new(
            toml_config.refresh.interval_minutes,
            toml_config.source.timeout_secs,
            toml_config.refresh.max_staleness_minutes,
        )?;
        let match_policy = MatchPolicy::new(toml_config.matching.accept_threshold)?;
        toml_config.geometry.bbox.validate()?;

        if toml_config.source.url.trim().is_empty() {
            return Err(ConfigError::Empty("source url"));
        }
        if toml_config.geometry.overpass_url.trim().is_empty() {
            return Err(ConfigError::Empty("overpass url"));
        }

        let log_format = match toml_config.logging.format.to_ascii_lowercase().as_str() {
            "text" => LogFormat::Text,
            "json" => LogFormat::Json,
            other => return Err(ConfigError::InvalidLogFormat(other.to_string())),
        };

        let cache_file = toml_config.geometry.cache_file.trim();

        Ok(Self {
            source_url: toml_config.source.url,
            user_agent: toml_config.source.user_agent,
            refresh_policy,
            match_policy,
            overpass_url: toml_config.geometry.overpass_url,
            bbox: toml_config.geometry.bbox,
            geometry_cache_file: (!cache_file.is_empty()).then(|| cache_file.to_string()),
            geometry_cache_max_age: Duration::from_secs(toml_config.geometry.cache_max_age_hours * 3600),
            geometry_query_timeout: Duration::from_secs(toml_config.geometry.query_timeout_secs.max(1)),
            api_bind_address: toml_config.api.bind_address,
            api_port: toml_config.api.port,
            metrics_interval_secs: toml_config.metrics.interval_secs.max(1),
            log_format,
            config_file: config_file.to_string(),
        })
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Self::from_toml(toml_config, &path.display().to_string())
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Load configuration - missing file falls back to defaults, invalid file is an error
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!(config_file = %path.display(), "config_file_missing_using_defaults");
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    // Getters for all config fields
    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn refresh_policy(&self) -> RefreshPolicy {
        self.refresh_policy
    }

    pub fn match_policy(&self) -> MatchPolicy {
        self.match_policy
    }

    pub fn overpass_url(&self) -> &str {
        &self.overpass_url
    }

    pub fn bbox(&self) -> BboxConfig {
        self.bbox
    }

    pub fn geometry_cache_file(&self) -> Option<&str> {
        self.geometry_cache_file.as_deref()
    }

    pub fn geometry_cache_max_age(&self) -> Duration {
        self.geometry_cache_max_age
    }

    pub fn geometry_query_timeout(&self) -> Duration {
        self.geometry_query_timeout
    }

    pub fn api_bind_address(&self) -> &str {
        &self.api_bind_address
    }

    pub fn api_port(&self) -> u16 {
        self.api_port
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.refresh_policy().interval(), Duration::from_secs(300));
        assert_eq!(config.refresh_policy().fetch_timeout(), Duration::from_secs(10));
        assert!(config.refresh_policy().max_staleness() > config.refresh_policy().interval());
        assert_eq!(config.match_policy().accept_threshold(), 0.5);
        assert_eq!(config.geometry_cache_file(), Some("cache/ways.json"));
        assert_eq!(config.api_port(), 8080);
        assert_eq!(config.log_format(), LogFormat::Text);
    }

    #[test]
    fn test_empty_toml_matches_defaults() {
        let parsed: TomlConfig = toml::from_str("").unwrap();
        let config = Config::from_toml(parsed, "inline").unwrap();
        assert_eq!(config.refresh_policy(), RefreshPolicy::default());
        assert_eq!(config.source_url(), default_source_url());
    }

    #[test]
    fn test_refresh_interval_bounds() {
        assert!(RefreshPolicy::new(1, 10, 3).is_ok());
        assert!(RefreshPolicy::new(60, 10, 120).is_ok());
        assert_eq!(RefreshPolicy::new(0, 10, 3), Err(ConfigError::IntervalOutOfRange(0)));
        assert_eq!(RefreshPolicy::new(61, 10, 200), Err(ConfigError::IntervalOutOfRange(61)));
    }

    #[test]
    fn test_staleness_must_exceed_interval() {
        assert!(matches!(
            RefreshPolicy::new(5, 10, 5),
            Err(ConfigError::StalenessOutOfRange { .. })
        ));
        assert!(matches!(
            RefreshPolicy::new(5, 10, MAX_STALENESS_MINUTES + 1),
            Err(ConfigError::StalenessOutOfRange { .. })
        ));
    }

    #[test]
    fn test_fetch_timeout_bounds() {
        assert_eq!(RefreshPolicy::new(5, 0, 12), Err(ConfigError::FetchTimeoutOutOfRange(0)));
        assert_eq!(RefreshPolicy::new(5, 121, 12), Err(ConfigError::FetchTimeoutOutOfRange(121)));
        assert_eq!(
            RefreshPolicy::new(1, 60, 3),
            Err(ConfigError::FetchTimeoutExceedsInterval { timeout_secs: 60 })
        );
    }

    #[test]
    fn test_match_threshold_bounds() {
        assert!(MatchPolicy::new(1.0).is_ok());
        assert!(MatchPolicy::new(0.0).is_err());
        assert!(MatchPolicy::new(1.5).is_err());
        assert!(MatchPolicy::new(f64::NAN).is_err());
    }

    #[test]
    fn test_invalid_bbox_rejected() {
        let parsed: TomlConfig = toml::from_str(
            "[geometry.bbox]\nsouth = 46.0\nwest = -72.7\nnorth = 45.0\neast = -72.5\n",
        )
        .unwrap();
        assert!(matches!(Config::from_toml(parsed, "inline"), Err(ConfigError::InvalidBbox(_))));
    }

    #[test]
    fn test_empty_cache_file_disables_cache() {
        let parsed: TomlConfig = toml::from_str("[geometry]\ncache_file = \"\"\n").unwrap();
        let config = Config::from_toml(parsed, "inline").unwrap();
        assert_eq!(config.geometry_cache_file(), None);
    }

    #[test]
    fn test_resolve_config_path_from_cli() {
        assert_eq!(Config::resolve_config_path(Some("config/prod.toml")), "config/prod.toml");
    }
}
