//! Domain models - conditions snapshot, map geometry and published snapshot
//!
//! This module contains the canonical data types used throughout the system:
//! - `ConditionsSnapshot` - one parsed reading of the conditions page
//! - `WayRecord` / `TrailEnrichment` - map geometry and its attachment to trails
//! - `EnrichedSnapshot` - the object published to consumers
//! - `normalize` - name canonicalization shared by parser and matcher

pub mod conditions;
pub mod geometry;
pub mod normalize;
pub mod snapshot;

pub use conditions::{ConditionsSnapshot, Field, RawDocument, SectorId, TrailKey, TrailRecord};
pub use geometry::{LatLon, TrailEnrichment, WayId, WayRecord};
pub use snapshot::{EnrichedSnapshot, FetchMeta, SnapshotView};
