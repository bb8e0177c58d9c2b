//! Chain executor.
//!
//! Per request: Init → MainControllerLookup → {CacheHit | Execute} →
//! HandoffCheck → IncludesResolve → Render → ResponseCache → Complete,
//! with the error state reachable from anywhere. Cache probes happen
//! before any controller body runs; the route cache is consulted before
//! the chain is built at all.

use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use metrics::counter;
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{
    CacheStore, ControllerCache, ControllerCacheKey, ControllerRecord, ControllerScope,
    RouteCache, RouteRecord,
};
use crate::compress::{Compressor, EncodedVariants};
use crate::config::FrameworkConfig;
use crate::error::ChainError;
use crate::value::{deep_merge, ensure_object};

use super::directives::{CachePolicy, Directives, IncludeSpec};
use super::link::{ChainLink, IncludeResult};
use super::negotiate::negotiate;
use super::{ChainResponse, ControllerRegistry, ErrorHook, Route, ViewRenderer};

/// The next link the hand-off loop should build.
struct LinkTarget {
    controller: String,
    action: String,
    view: Option<String>,
}

/// Orchestrates one request's controller graph.
pub struct ChainExecutor {
    config: FrameworkConfig,
    registry: Arc<ControllerRegistry>,
    renderer: Arc<dyn ViewRenderer>,
    compressor: Arc<dyn Compressor>,
    routes: RouteCache,
    controllers: ControllerCache,
    error_hook: Option<Arc<dyn ErrorHook>>,
}

impl ChainExecutor {
    pub fn new(
        store: CacheStore,
        config: FrameworkConfig,
        registry: Arc<ControllerRegistry>,
        renderer: Arc<dyn ViewRenderer>,
        compressor: Arc<dyn Compressor>,
    ) -> Self {
        let routes = RouteCache::new(store.clone());
        let controllers = ControllerCache::new(store, config.chain.reserved_url_params.clone());
        Self {
            config,
            registry,
            renderer,
            compressor,
            routes,
            controllers,
            error_hook: None,
        }
    }

    pub fn with_error_hook(mut self, hook: Arc<dyn ErrorHook>) -> Self {
        self.error_hook = Some(hook);
        self
    }

    /// Resolve one request into a response.
    ///
    /// Never returns an error: unrecoverable failures collapse into a
    /// synthetic error response with the chain state discarded.
    pub async fn resolve(
        &self,
        route: &Route,
        accept: &str,
        initial_context: Value,
    ) -> ChainResponse {
        let content_type = negotiate(
            accept,
            &self.config.chain.supported_content_types,
            &self.config.chain.fallback_content_type,
        );
        match self.run(route, &content_type, initial_context).await {
            Ok(response) => response,
            Err(err) => self.error_response(&content_type, err),
        }
    }

    async fn run(
        &self,
        route: &Route,
        content_type: &str,
        initial_context: Value,
    ) -> Result<ChainResponse, ChainError> {
        // Route cache probe: a hit replies without touching the chain.
        if self.config.cache.enable_route_cache {
            if let Some(record) = self.routes.get_route(&route.pathname, content_type)? {
                if route.if_none_match.as_deref() == Some(record.last_modified.as_str()) {
                    debug!(pathname = %route.pathname, "route cache hit, not modified");
                    return Ok(ChainResponse {
                        status: 304,
                        headers: vec![("ETag".to_string(), record.last_modified)],
                        content_type: content_type.to_string(),
                        variants: EncodedVariants::default(),
                    });
                }
                debug!(pathname = %route.pathname, "route cache hit");
                return Ok(ChainResponse {
                    status: 200,
                    headers: vec![
                        ("Content-Type".to_string(), content_type.to_string()),
                        ("ETag".to_string(), record.last_modified),
                    ],
                    content_type: content_type.to_string(),
                    variants: record.variants,
                });
            }
        }

        let mut context = initial_context;
        let mut links: Vec<ChainLink> = Vec::new();
        let mut route_policy: Option<CachePolicy> = None;
        let mut target = LinkTarget {
            controller: route.controller.clone(),
            action: route.action.clone(),
            view: None,
        };

        loop {
            if links.len() >= self.config.chain.max_chain_depth {
                return Err(ChainError::DepthExceeded {
                    limit: self.config.chain.max_chain_depth,
                });
            }

            let mut link = self
                .build_link(route, content_type, &target, &mut context)
                .await?;
            if route_policy.is_none() {
                route_policy = link.directives.route_cache;
            }

            self.render_link(&mut link, &context).await;
            if !link.from_cache && !link.render_failed {
                self.store_fragment(route, content_type, &link)?;
            }

            // Expose this link's output to whatever renders next.
            if let Some(output) = &link.output {
                deep_merge(
                    &mut context,
                    serde_json::json!({
                        "main": String::from_utf8_lossy(output).into_owned()
                    }),
                );
            }

            let handoff = link.directives.handoff.clone();
            links.push(link);
            match handoff {
                Some(handoff) => {
                    // Includes, view overrides and cache directives belong
                    // to the link that declared them; only the accumulated
                    // context crosses the hand-off boundary.
                    target = LinkTarget {
                        view: handoff.view.clone(),
                        action: handoff
                            .action
                            .clone()
                            .unwrap_or_else(|| "handler".to_string()),
                        controller: handoff.controller,
                    };
                }
                None => break,
            }
        }

        let body = links
            .last()
            .and_then(|link| link.output.clone())
            .unwrap_or_default();
        let terminal_view = links
            .last()
            .map(|link| link.view.clone())
            .unwrap_or_default();
        // Downgraded render-failure text must never be served from cache.
        let degraded = links.iter().any(|link| link.render_failed);
        let variants = EncodedVariants::encode(
            body,
            self.compressor.as_ref(),
            self.config.cache.compress_variants,
        )
        .map_err(|err| {
            ChainError::render_failure(&terminal_view, format!("output encoding failed: {err}"))
        })?;

        let mut headers = vec![("Content-Type".to_string(), content_type.to_string())];
        if self.config.cache.enable_route_cache && !degraded {
            if let Some(policy) = route_policy {
                let last_modified = modified_token();
                self.routes.set_route(
                    &route.pathname,
                    content_type,
                    RouteRecord {
                        variants: variants.clone(),
                        context: context.clone(),
                        last_modified: last_modified.clone(),
                    },
                    policy.lifespan,
                    policy.reset_on_access,
                )?;
                headers.push(("ETag".to_string(), last_modified));
            }
        }

        Ok(ChainResponse {
            status: 200,
            headers,
            content_type: content_type.to_string(),
            variants,
        })
    }

    /// Build one link: probe the controller cache, execute on miss, then
    /// resolve its includes.
    async fn build_link(
        &self,
        route: &Route,
        content_type: &str,
        target: &LinkTarget,
        context: &mut Value,
    ) -> Result<ChainLink, ChainError> {
        let probe_view = target
            .view
            .clone()
            .unwrap_or_else(|| target.controller.clone());

        if self.config.cache.enable_controller_cache {
            if let Some(record) = self.probe_fragment(
                &target.controller,
                &target.action,
                &probe_view,
                &route.pathname,
                content_type,
            )? {
                debug!(
                    controller = %target.controller,
                    action = %target.action,
                    "controller cache hit, skipping execution"
                );
                deep_merge(context, record.context.clone());
                let mut link = ChainLink::new(
                    target.controller.as_str(),
                    target.action.as_str(),
                    probe_view.clone(),
                );
                link.context = record.context;
                // Replayed so the hit path still walks HandoffCheck and
                // the route-cache step exactly like the miss path.
                link.directives = record.directives;
                link.output = Some(record.output);
                link.from_cache = true;
                return Ok(link);
            }
        }

        let action = self.registry.lookup(&target.controller, &target.action)?;
        let outcome = action.call(route, context).await?;
        deep_merge(context, outcome.context.clone());

        let render_view = outcome
            .directives
            .view
            .clone()
            .unwrap_or_else(|| probe_view.clone());
        let mut link =
            ChainLink::new(target.controller.as_str(), target.action.as_str(), render_view);
        // The fragment is keyed by the view declared before the override,
        // matching the key the probe above used.
        link.cache_view = probe_view;
        link.context = outcome.context;
        link.directives = outcome.directives;

        if !link.directives.includes.is_empty() {
            let includes = self
                .resolve_includes(route, content_type, &link.directives.includes, context)
                .await?;
            link.includes = includes;
            // Splice by declared position, never completion order.
            for include in &link.includes {
                let namespace = ensure_object(context, "include");
                let mut entry = include.context.clone();
                deep_merge(
                    &mut entry,
                    serde_json::json!({
                        "output": String::from_utf8_lossy(&include.output).into_owned()
                    }),
                );
                namespace.insert(include.name.clone(), entry);
            }
            // A degraded include's error text ends up in this link's
            // rendered output; keep that output out of the caches too.
            if link.includes.iter().any(|include| include.degraded) {
                link.render_failed = true;
            }
        }

        Ok(link)
    }

    /// Fire all include resolutions concurrently and await them all.
    async fn resolve_includes(
        &self,
        route: &Route,
        content_type: &str,
        specs: &[IncludeSpec],
        context: &Value,
    ) -> Result<Vec<IncludeResult>, ChainError> {
        let futures = specs
            .iter()
            .map(|spec| self.resolve_include(route, content_type, spec, context.clone()));
        join_all(futures).await.into_iter().collect()
    }

    async fn resolve_include(
        &self,
        route: &Route,
        content_type: &str,
        spec: &IncludeSpec,
        context: Value,
    ) -> Result<IncludeResult, ChainError> {
        let view = spec
            .view
            .clone()
            .unwrap_or_else(|| spec.controller.clone());

        if self.config.cache.enable_controller_cache {
            if let Some(record) = self.probe_fragment(
                &spec.controller,
                &spec.action,
                &view,
                &route.pathname,
                content_type,
            )? {
                debug!(include = %spec.name, "include cache hit");
                return Ok(IncludeResult {
                    name: spec.name.clone(),
                    context: record.context,
                    output: record.output,
                    degraded: false,
                });
            }
        }

        let action = self
            .registry
            .lookup(&spec.controller, &spec.action)
            .map_err(|err| ChainError::include_resolution(&spec.name, err.to_string()))?;
        let outcome = action.call(route, &context).await?;

        let (output, degraded) = match self.renderer.render(&view, &outcome.context).await {
            Ok(output) => (output, false),
            Err(err) => (self.downgrade_render_failure(&view, err), true),
        };

        if !degraded
            && self.config.cache.enable_controller_cache
            && outcome.directives.controller_cache.is_cacheable()
        {
            self.cache_fragment(
                route,
                content_type,
                &spec.controller,
                &spec.action,
                &view,
                &outcome.directives.controller_cache,
                outcome.context.clone(),
                output.clone(),
                Directives {
                    includes: Vec::new(),
                    ..outcome.directives.clone()
                },
            )?;
        }

        Ok(IncludeResult {
            name: spec.name.clone(),
            context: outcome.context,
            output,
            degraded,
        })
    }

    /// Probe global first, then the pathname scope; the global entry wins
    /// when both exist.
    fn probe_fragment(
        &self,
        controller: &str,
        action: &str,
        view: &str,
        pathname: &str,
        content_type: &str,
    ) -> Result<Option<ControllerRecord>, ChainError> {
        let global_scope = ControllerScope::Global;
        let global = self.controllers.get_controller(&ControllerCacheKey {
            controller,
            action,
            view,
            scope: &global_scope,
            content_type,
        })?;
        if global.is_some() {
            return Ok(global);
        }
        let route_scope = ControllerScope::Route(pathname.to_string());
        Ok(self.controllers.get_controller(&ControllerCacheKey {
            controller,
            action,
            view,
            scope: &route_scope,
            content_type,
        })?)
    }

    /// Render a link that has no output yet. Failures are downgraded to an
    /// inline error body; the pipeline still completes.
    async fn render_link(&self, link: &mut ChainLink, context: &Value) {
        if link.output.is_some() {
            return;
        }
        link.output = Some(match self.renderer.render(&link.view, context).await {
            Ok(output) => output,
            Err(err) => {
                link.render_failed = true;
                self.downgrade_render_failure(&link.view, err)
            }
        });
    }

    fn downgrade_render_failure(&self, view: &str, err: ChainError) -> Bytes {
        warn!(view, error = %err, "render failed, serving inline error text");
        self.notify_hook(500, &err.to_string());
        Bytes::from(format!("Render failure in view `{view}`: {err}"))
    }

    /// ResponseCache step for one link's fragment.
    fn store_fragment(
        &self,
        route: &Route,
        content_type: &str,
        link: &ChainLink,
    ) -> Result<(), ChainError> {
        if !self.config.cache.enable_controller_cache
            || !link.directives.controller_cache.is_cacheable()
        {
            return Ok(());
        }
        let Some(output) = link.output.clone() else {
            return Ok(());
        };
        self.cache_fragment(
            route,
            content_type,
            &link.controller,
            &link.action,
            &link.cache_view,
            &link.directives.controller_cache,
            link.context.clone(),
            output,
            Directives {
                includes: Vec::new(),
                ..link.directives.clone()
            },
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn cache_fragment(
        &self,
        route: &Route,
        content_type: &str,
        controller: &str,
        action: &str,
        view: &str,
        directive: &super::directives::ControllerCacheDirective,
        context: Value,
        output: Bytes,
        stored_directives: Directives,
    ) -> Result<(), ChainError> {
        use super::directives::ControllerCacheDirective;

        let (scope, policy) = match directive {
            ControllerCacheDirective::NoCache => return Ok(()),
            ControllerCacheDirective::Global(policy) => (ControllerScope::Global, *policy),
            ControllerCacheDirective::RouteScoped { policy, .. } => {
                (ControllerScope::Route(route.pathname.clone()), *policy)
            }
        };
        self.controllers.set_controller(
            &ControllerCacheKey {
                controller,
                action,
                view,
                scope: &scope,
                content_type,
            },
            ControllerRecord {
                context,
                output,
                directives: stored_directives,
            },
            policy.lifespan,
            policy.reset_on_access,
            &route.url_params,
            directive.allowed_params(),
        )?;
        Ok(())
    }

    /// Error state: the chain's context and links are discarded and a
    /// single synthetic error response takes their place.
    fn error_response(&self, content_type: &str, err: ChainError) -> ChainResponse {
        let status = err.status();
        let message = err.to_string();
        counter!("tessera_chain_error_total").increment(1);
        warn!(status, error = %message, "controller chain failed");
        if status >= 500 {
            self.notify_hook(status, &message);
        }
        ChainResponse {
            status,
            headers: vec![("Content-Type".to_string(), content_type.to_string())],
            content_type: content_type.to_string(),
            variants: EncodedVariants::identity_only(Bytes::from(message)),
        }
    }

    fn notify_hook(&self, status: u16, message: &str) {
        if let Some(hook) = &self.error_hook {
            hook.on_error(status, message);
        }
    }
}

fn modified_token() -> String {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000).to_string()
}
