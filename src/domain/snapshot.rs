//! Consumer-facing snapshot: conditions plus enrichments plus fetch metadata

use crate::domain::conditions::{ConditionsSnapshot, TrailKey};
use crate::domain::geometry::TrailEnrichment;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchMeta {
    /// Cycle that produced this metadata
    pub cycle_id: Uuid,
    pub attempted_at: DateTime<Utc>,
    pub last_success_at: DateTime<Utc>,
    /// Outcome of the most recent attempt
    pub success: bool,
    pub consecutive_failures: u32,
}

/// The only object handed to consumers. Replaced wholesale, never mutated.
///
/// Conditions and enrichments sit behind `Arc` so a failed cycle can re-issue
/// the same data with fresh metadata without copying it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedSnapshot {
    pub conditions: Arc<ConditionsSnapshot>,
    pub enrichments: Arc<BTreeMap<TrailKey, TrailEnrichment>>,
    pub meta: FetchMeta,
}

impl EnrichedSnapshot {
    /// Time since the last successful refresh
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.meta.last_success_at
    }

    /// Same data, metadata updated for a failed attempt
    pub fn with_failed_attempt(&self, cycle_id: Uuid, attempted_at: DateTime<Utc>) -> Self {
        Self {
            conditions: Arc::clone(&self.conditions),
            enrichments: Arc::clone(&self.enrichments),
            meta: FetchMeta {
                cycle_id,
                attempted_at,
                last_success_at: self.meta.last_success_at,
                success: false,
                consecutive_failures: self.meta.consecutive_failures.saturating_add(1),
            },
        }
    }

    pub fn enrichment(&self, key: &TrailKey) -> Option<&TrailEnrichment> {
        self.enrichments.get(key)
    }

    /// Exposed trail identifiers, sorted
    pub fn entity_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.enrichments.values().map(|e| e.entity_id.as_str()).collect();
        ids.sort_unstable();
        ids
    }
}

/// What a consumer sees: the snapshot, or an explicit unavailable state once
/// the data is older than the staleness threshold.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SnapshotView {
    Available {
        snapshot: Arc<EnrichedSnapshot>,
        age_secs: i64,
    },
    Unavailable {
        last_success_at: Option<DateTime<Utc>>,
        reason: String,
    },
}

impl SnapshotView {
    pub fn is_available(&self) -> bool {
        matches!(self, SnapshotView::Available { .. })
    }

    pub fn snapshot(&self) -> Option<&Arc<EnrichedSnapshot>> {
        match self {
            SnapshotView::Available { snapshot, .. } => Some(snapshot),
            SnapshotView::Unavailable { .. } => None,
        }
    }
}
