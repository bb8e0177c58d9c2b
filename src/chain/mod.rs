//! Controller chain execution.
//!
//! One request resolves to a controller graph: a primary controller, an
//! optional layout hand-off, and zero or more includes rendered in
//! parallel. The executor walks that graph, consulting the caches at every
//! step, and merges the results into a single response.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::compress::EncodedVariants;
use crate::error::ChainError;

mod directives;
mod executor;
mod link;
mod negotiate;

pub use directives::{
    CachePolicy, ControllerCacheDirective, Directives, Handoff, IncludeSpec,
};
pub use executor::ChainExecutor;
pub use link::{ChainLink, IncludeResult};
pub use negotiate::negotiate;

/// Resolved route descriptor handed in by the external router.
#[derive(Debug, Clone)]
pub struct Route {
    pub pathname: String,
    pub controller: String,
    pub action: String,
    pub url_params: BTreeMap<String, String>,
    /// Validator token from the request's `If-None-Match` header.
    pub if_none_match: Option<String>,
}

impl Route {
    pub fn new(pathname: impl Into<String>, controller: impl Into<String>) -> Self {
        Self {
            pathname: pathname.into(),
            controller: controller.into(),
            action: "handler".to_string(),
            url_params: BTreeMap::new(),
            if_none_match: None,
        }
    }
}

/// The executor's single output.
#[derive(Debug, Clone)]
pub struct ChainResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub content_type: String,
    pub variants: EncodedVariants,
}

/// Context fragment plus directives returned from a controller action.
#[derive(Debug, Clone, Default)]
pub struct ActionOutcome {
    pub context: Value,
    pub directives: Directives,
}

/// One controller action. Hosts register implementations by name.
#[async_trait]
pub trait ControllerAction: Send + Sync {
    async fn call(&self, route: &Route, context: &Value) -> Result<ActionOutcome, ChainError>;
}

/// External templating collaborator.
#[async_trait]
pub trait ViewRenderer: Send + Sync {
    async fn render(&self, view: &str, context: &Value) -> Result<Bytes, ChainError>;
}

/// Application-level error hook; invoked best-effort for 5xx responses.
pub trait ErrorHook: Send + Sync {
    fn on_error(&self, status: u16, message: &str);
}

/// Name-indexed controller actions.
#[derive(Default)]
pub struct ControllerRegistry {
    controllers: HashMap<String, HashMap<String, Arc<dyn ControllerAction>>>,
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        controller: impl Into<String>,
        action: impl Into<String>,
        handler: Arc<dyn ControllerAction>,
    ) {
        self.controllers
            .entry(controller.into())
            .or_default()
            .insert(action.into(), handler);
    }

    /// Distinguishes an unknown controller from a known controller
    /// missing the requested action.
    pub fn lookup(
        &self,
        controller: &str,
        action: &str,
    ) -> Result<Arc<dyn ControllerAction>, ChainError> {
        let actions = self
            .controllers
            .get(controller)
            .ok_or_else(|| ChainError::controller_not_found(controller))?;
        actions
            .get(action)
            .cloned()
            .ok_or_else(|| ChainError::action_not_found(controller, action))
    }
}
