//! Controller fragment cache.
//!
//! Stores a controller's cacheable context subset and rendered fragment
//! under the internal `controllers` scope, keyed by
//! `(controller, action, view, route scope, content type)`.
//!
//! Writes validate the request's URL parameters against the directive's
//! allow-list first; an unlisted parameter would silently fold
//! per-parameter output variants into one shared key, so it fails the
//! write instead.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use serde_json::Value;
use tracing::debug;

use crate::chain::Directives;
use crate::error::CacheError;

use super::store::{CacheStore, CacheValue, CONTROLLERS_SCOPE, Lifespan};

/// Whether a cached fragment applies to every path or one pathname.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerScope {
    Global,
    Route(String),
}

impl fmt::Display for ControllerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerScope::Global => f.write_str("global"),
            ControllerScope::Route(pathname) => f.write_str(pathname),
        }
    }
}

/// Full identity of one cacheable controller invocation.
#[derive(Debug, Clone)]
pub struct ControllerCacheKey<'a> {
    pub controller: &'a str,
    pub action: &'a str,
    pub view: &'a str,
    pub scope: &'a ControllerScope,
    pub content_type: &'a str,
}

impl ControllerCacheKey<'_> {
    fn storage_key(&self) -> Result<String, CacheError> {
        if self.controller.is_empty()
            || self.action.is_empty()
            || self.view.is_empty()
            || self.content_type.is_empty()
        {
            return Err(CacheError::missing_arguments(
                "controller, action, view and content type must all be provided",
            ));
        }
        Ok(format!(
            "{}:{}:{}:{}:{}",
            self.controller, self.action, self.view, self.scope, self.content_type
        ))
    }
}

/// One cached controller fragment.
#[derive(Debug, Clone)]
pub struct ControllerRecord {
    /// Cacheable subset of the controller's public context.
    pub context: Value,
    /// Rendered fragment bytes.
    pub output: Bytes,
    /// Directives the controller declared, replayed on a hit so a cached
    /// link still hands off and opts into the route cache. Includes are
    /// stripped at store time; their output is baked into `output`.
    pub directives: Directives,
}

/// Cache facade over the internal `controllers` scope.
#[derive(Clone)]
pub struct ControllerCache {
    store: CacheStore,
    reserved_url_params: Vec<String>,
}

impl ControllerCache {
    pub fn new(store: CacheStore, reserved_url_params: Vec<String>) -> Self {
        Self {
            store,
            reserved_url_params,
        }
    }

    /// Cache a controller fragment.
    ///
    /// Every URL parameter present in the request must appear in the
    /// directive's `allowed_params` or be framework-reserved; otherwise
    /// the write fails with `InvalidCacheParameter` and nothing is stored.
    pub fn set_controller(
        &self,
        key: &ControllerCacheKey<'_>,
        record: ControllerRecord,
        lifespan: Lifespan,
        reset_on_access: bool,
        url_params: &BTreeMap<String, String>,
        allowed_params: &[String],
    ) -> Result<(), CacheError> {
        let storage_key = key.storage_key()?;
        for parameter in url_params.keys() {
            let allowed = allowed_params.iter().any(|name| name == parameter)
                || self.reserved_url_params.iter().any(|name| name == parameter);
            if !allowed {
                return Err(CacheError::invalid_cache_parameter(parameter));
            }
        }
        self.store.insert(
            CONTROLLERS_SCOPE,
            &storage_key,
            CacheValue::Controller(record),
            lifespan,
            reset_on_access,
        );
        debug!(
            controller = key.controller,
            action = key.action,
            scope = %key.scope,
            "cached controller fragment"
        );
        Ok(())
    }

    pub fn get_controller(
        &self,
        key: &ControllerCacheKey<'_>,
    ) -> Result<Option<ControllerRecord>, CacheError> {
        let storage_key = key.storage_key()?;
        Ok(self
            .store
            .get(CONTROLLERS_SCOPE, &storage_key)?
            .and_then(|value| match value {
                CacheValue::Controller(record) => Some(record),
                _ => None,
            }))
    }

    pub fn exists_controller(&self, key: &ControllerCacheKey<'_>) -> bool {
        key.storage_key()
            .map(|storage_key| self.store.exists(CONTROLLERS_SCOPE, &storage_key))
            .unwrap_or(false)
    }

    pub fn clear_controller(&self, key: &ControllerCacheKey<'_>) -> Result<bool, CacheError> {
        let storage_key = key.storage_key()?;
        self.store.clear(CONTROLLERS_SCOPE, &storage_key)
    }
}
