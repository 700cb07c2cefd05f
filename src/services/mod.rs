//! Services - pipeline stages and the state that ties them together
//!
//! - `parser` - Conditions page to `ConditionsSnapshot`
//! - `geo_index` - Normalized-name index over map ways
//! - `geometry_provider` - Lazily loaded, reloadable geometry index
//! - `matcher` - Trail to way identity resolution and enrichment
//! - `registry` - Stable entity registry reconciled per cycle
//! - `coordinator` - Refresh cycle state machine and published snapshot

pub mod coordinator;
pub mod geo_index;
pub mod geometry_provider;
pub mod matcher;
pub mod parser;
pub mod registry;

// Re-export commonly used types
pub use coordinator::{CycleReport, CycleState, RefreshCoordinator, RefreshError, RefreshOutcome};
pub use geo_index::GeoIndex;
pub use geometry_provider::{GeometryProvider, GeometrySource, StaticWays};
pub use matcher::TrailMatcher;
pub use parser::{PageParser, ParseError};
pub use registry::EntityRegistry;
