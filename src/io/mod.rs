//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `page_source` - HTTP fetch of the upstream conditions page
//! - `overpass` - Map dataset query and on-disk way cache
//! - `http_api` - Consumer HTTP endpoint (snapshot, trails, metrics)

pub mod http_api;
pub mod overpass;
pub mod page_source;

// Re-export commonly used types
pub use http_api::start_api_server;
pub use overpass::{OverpassSource, WayCache};
pub use page_source::{FetchError, FetchErrorKind, HttpPageSource, PageSource};
