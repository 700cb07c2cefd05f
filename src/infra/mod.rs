//! Infrastructure - configuration and metrics
//!
//! This module contains infrastructure concerns:
//! - `config` - Application configuration (TOML loading, validation, defaults)
//! - `metrics` - Lock-free refresh metrics

pub mod config;
pub mod metrics;

// Re-export commonly used types
pub use config::{Config, ConfigError, LogFormat, MatchPolicy, RefreshPolicy};
pub use metrics::Metrics;
