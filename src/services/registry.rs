//! Consumer-facing entity registry
//!
//! One entry per exposed trail, keyed by stable entity id. Reconciled against
//! every published snapshot; trails that vanish upstream are marked
//! unavailable rather than removed so external references keep resolving.

use crate::domain::conditions::{TrailKey, TrailRecord};
use crate::domain::geometry::WayId;
use crate::domain::snapshot::EnrichedSnapshot;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityRecord {
    pub entity_id: String,
    pub trail_key: TrailKey,
    pub name: String,
    pub number: Option<String>,
    pub way_id: Option<WayId>,
    pub osm_url: Option<String>,
    pub available: bool,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Changes applied by one reconcile
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryDiff {
    pub added: Vec<String>,
    /// Present before, absent now; kept and marked unavailable
    pub vanished: Vec<String>,
    /// Unavailable before, present again
    pub restored: Vec<String>,
}

impl RegistryDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.vanished.is_empty() && self.restored.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct EntityRegistry {
    entries: BTreeMap<String, EntityRecord>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reconcile(&mut self, snapshot: &EnrichedSnapshot) -> RegistryDiff {
        let seen_at = snapshot.meta.last_success_at;
        let rows: FxHashMap<TrailKey, &TrailRecord> =
            snapshot.conditions.trails.iter().map(|t| (t.key(), t)).collect();
        let mut diff = RegistryDiff::default();
        let mut present: Vec<&str> = Vec::with_capacity(snapshot.enrichments.len());

        for enrichment in snapshot.enrichments.values() {
            let id = enrichment.entity_id.as_str();
            present.push(id);
            let row = rows.get(&enrichment.trail_key);
            let name = row.map(|t| t.name.clone()).unwrap_or_default();
            let number = row.and_then(|t| t.number.clone());

            match self.entries.get_mut(id) {
                Some(entry) => {
                    if !entry.available {
                        diff.restored.push(id.to_string());
                    }
                    entry.trail_key = enrichment.trail_key.clone();
                    entry.name = name;
                    entry.number = number;
                    entry.way_id = enrichment.way_id;
                    entry.osm_url = enrichment.osm_url();
                    entry.available = true;
                    entry.last_seen = seen_at;
                }
                None => {
                    diff.added.push(id.to_string());
                    self.entries.insert(
                        id.to_string(),
                        EntityRecord {
                            entity_id: id.to_string(),
                            trail_key: enrichment.trail_key.clone(),
                            name,
                            number,
                            way_id: enrichment.way_id,
                            osm_url: enrichment.osm_url(),
                            available: true,
                            first_seen: seen_at,
                            last_seen: seen_at,
                        },
                    );
                }
            }
        }

        present.sort_unstable();
        for (id, entry) in self.entries.iter_mut() {
            if entry.available && present.binary_search(&id.as_str()).is_err() {
                entry.available = false;
                diff.vanished.push(id.clone());
            }
        }
        diff
    }

    pub fn get(&self, entity_id: &str) -> Option<&EntityRecord> {
        self.entries.get(entity_id)
    }

    /// All entries in entity id order
    pub fn entities(&self) -> impl Iterator<Item = &EntityRecord> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn available(&self) -> usize {
        self.entries.values().filter(|e| e.available).count()
    }
}
