//! Upstream conditions page fetch
//!
//! `PageSource` is the seam the coordinator fetches through; production uses
//! `HttpPageSource`, tests inject fixtures. Every fetch is bounded by a
//! timeout, and expiry is reported as a transient failure like any transport
//! error.

use crate::domain::conditions::RawDocument;
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// Retried on the next scheduled cycle
    Transient,
    /// Still retried on schedule, but logged at error severity
    Permanent,
}

impl FetchErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchErrorKind::Transient => "transient",
            FetchErrorKind::Permanent => "permanent",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("upstream returned HTTP {code}")]
    Status { code: u16 },
}

impl FetchError {
    /// 4xx other than 408/429 means the resource moved or was removed
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::Status { code } if (400..500).contains(code) && *code != 408 && *code != 429 => {
                FetchErrorKind::Permanent
            }
            _ => FetchErrorKind::Transient,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return FetchError::Timeout(Duration::ZERO);
        }
        match e.status() {
            Some(status) => FetchError::Status { code: status.as_u16() },
            None => FetchError::Transport(e.to_string()),
        }
    }
}

/// Log a transient fetch failure (cold path)
#[cold]
pub fn log_fetch_transient(cycle_id: &uuid::Uuid, e: &FetchError) {
    warn!(cycle_id = %cycle_id, error = %e, kind = "transient", "fetch_failed");
}

/// Log a permanent fetch failure (cold path)
#[cold]
pub fn log_fetch_permanent(cycle_id: &uuid::Uuid, e: &FetchError) {
    error!(cycle_id = %cycle_id, error = %e, kind = "permanent", "fetch_failed");
}

#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self) -> Result<RawDocument, FetchError>;

    /// Short label for logs
    fn name(&self) -> &str;
}

pub struct HttpPageSource {
    url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpPageSource {
    pub fn new(url: &str, user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        // Client reused across cycles for connection pooling
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(Self { url: url.to_string(), timeout, client })
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn fetch(&self) -> Result<RawDocument, FetchError> {
        let request = async {
            let response = self.client.get(&self.url).send().await?.error_for_status()?;
            response.text().await
        };

        let body = match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(body)) => body,
            Ok(Err(e)) => {
                return Err(match FetchError::from(e) {
                    FetchError::Timeout(_) => FetchError::Timeout(self.timeout),
                    other => other,
                })
            }
            Err(_) => return Err(FetchError::Timeout(self.timeout)),
        };

        debug!(url = %self.url, bytes = body.len(), "page_fetched");
        Ok(RawDocument::new(body, Utc::now()))
    }

    fn name(&self) -> &str {
        &self.url
    }
}
