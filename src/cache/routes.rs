//! Rendered route cache.
//!
//! Stores fully rendered response bodies per encoding, keyed by
//! `(pathname, content type)` under the reserved `routes` scope, together
//! with the merged response context and the validator token conditional
//! GETs compare against.

use serde_json::Value;
use tracing::debug;

use crate::compress::EncodedVariants;
use crate::error::CacheError;

use super::store::{CacheStore, CacheValue, Lifespan, ROUTES_SCOPE};

/// One cached rendered route.
#[derive(Debug, Clone)]
pub struct RouteRecord {
    pub variants: EncodedVariants,
    pub context: Value,
    /// Opaque token compared against `If-None-Match` for 304 responses.
    pub last_modified: String,
}

/// Cache facade over the reserved `routes` scope.
#[derive(Clone)]
pub struct RouteCache {
    store: CacheStore,
}

impl RouteCache {
    pub fn new(store: CacheStore) -> Self {
        Self { store }
    }

    /// Cache a rendered route, replacing any prior entry for the key.
    pub fn set_route(
        &self,
        pathname: &str,
        content_type: &str,
        record: RouteRecord,
        lifespan: Lifespan,
        reset_on_access: bool,
    ) -> Result<(), CacheError> {
        let key = route_key(pathname, content_type)?;
        // Replacement is handled by the store: the old record's timer is
        // cancelled before the fresh one lands, so no stale variant set
        // accumulates under the key.
        self.store.insert(
            ROUTES_SCOPE,
            &key,
            CacheValue::Route(record),
            lifespan,
            reset_on_access,
        );
        debug!(pathname, content_type, "cached rendered route");
        Ok(())
    }

    pub fn get_route(
        &self,
        pathname: &str,
        content_type: &str,
    ) -> Result<Option<RouteRecord>, CacheError> {
        let key = route_key(pathname, content_type)?;
        Ok(self
            .store
            .get(ROUTES_SCOPE, &key)?
            .and_then(|value| match value {
                CacheValue::Route(record) => Some(record),
                _ => None,
            }))
    }

    pub fn exists_route(&self, pathname: &str, content_type: &str) -> bool {
        route_key(pathname, content_type)
            .map(|key| self.store.exists(ROUTES_SCOPE, &key))
            .unwrap_or(false)
    }

    pub fn clear_route(&self, pathname: &str, content_type: &str) -> Result<bool, CacheError> {
        let key = route_key(pathname, content_type)?;
        self.store.clear(ROUTES_SCOPE, &key)
    }
}

fn route_key(pathname: &str, content_type: &str) -> Result<String, CacheError> {
    if pathname.is_empty() || content_type.is_empty() {
        return Err(CacheError::missing_arguments(
            "both a pathname and a content type must be provided",
        ));
    }
    Ok(format!("{pathname}|{content_type}"))
}
