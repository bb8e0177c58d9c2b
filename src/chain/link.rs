//! Per-request execution records.
//!
//! A [`ChainLink`] lives only for the request that created it; when a
//! controller opts in, its rendered output and cacheable context are
//! promoted into the controller cache, never the link itself.

use bytes::Bytes;
use serde_json::Value;

use super::directives::Directives;

/// One resolved include.
#[derive(Debug, Clone)]
pub struct IncludeResult {
    pub name: String,
    /// Public context the include produced.
    pub context: Value,
    /// Rendered fragment bytes.
    pub output: Bytes,
    /// True when the include's render was downgraded to inline error text.
    pub degraded: bool,
}

/// One controller's execution record within a request's pipeline.
#[derive(Debug, Clone)]
pub struct ChainLink {
    pub controller: String,
    pub action: String,
    /// View this link renders with, directive override applied.
    pub view: String,
    /// View name the fragment is cached under. Fixed before the
    /// controller runs, so probes and write-backs agree on the key even
    /// when the controller overrides `view`.
    pub cache_view: String,
    /// Public context fragment this controller produced (what gets
    /// promoted into the controller cache on opt-in).
    pub context: Value,
    /// Control directives; never exposed to views.
    pub directives: Directives,
    /// Rendered output, once available.
    pub output: Option<Bytes>,
    /// Include results in declaration order.
    pub includes: Vec<IncludeResult>,
    /// Whether this link was satisfied from the controller cache.
    pub from_cache: bool,
    /// Whether this link's output carries downgraded render-failure text.
    pub render_failed: bool,
}

impl ChainLink {
    pub fn new(controller: impl Into<String>, action: impl Into<String>, view: impl Into<String>) -> Self {
        let view = view.into();
        Self {
            controller: controller.into(),
            action: action.into(),
            cache_view: view.clone(),
            view,
            context: Value::Null,
            directives: Directives::default(),
            output: None,
            includes: Vec::new(),
            from_cache: false,
            render_failed: false,
        }
    }
}
