//! Tessera cache system.
//!
//! One TTL store, three shapes on top of it:
//!
//! - **Store**: generic `(scope, key)` records for application data
//! - **Files**: static asset bytes plus stat metadata
//! - **Routes**: fully rendered responses per `(pathname, content type)`
//! - **Controllers**: rendered controller fragments and their contexts

mod controllers;
mod files;
mod lock;
mod routes;
mod store;

pub use controllers::{ControllerCache, ControllerCacheKey, ControllerRecord, ControllerScope};
pub use files::{FileCache, FileReadMode, FileRecord, FileStats};
pub use routes::{RouteCache, RouteRecord};
pub use store::{CacheStore, CacheValue, Lifespan, RESERVED_SCOPES, ResetOverride};
