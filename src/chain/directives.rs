//! Control directives a controller returns alongside its context.
//!
//! Directives are typed at controller-definition time rather than sniffed
//! from context shape at runtime; the executor only has to match on them.

use crate::cache::Lifespan;

/// Expiration policy attached to a cache directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub lifespan: Lifespan,
    pub reset_on_access: bool,
}

impl CachePolicy {
    pub fn fixed(lifespan: Lifespan) -> Self {
        Self {
            lifespan,
            reset_on_access: false,
        }
    }

    pub fn sliding(lifespan: Lifespan) -> Self {
        Self {
            lifespan,
            reset_on_access: true,
        }
    }
}

/// Controller fragment caching directive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ControllerCacheDirective {
    /// Never cache this controller's fragment.
    #[default]
    NoCache,
    /// Cache once for every path that invokes this controller.
    Global(CachePolicy),
    /// Cache per pathname; the allow-list names the URL parameters that
    /// are safe to ignore when sharing the key.
    RouteScoped {
        policy: CachePolicy,
        url_params: Vec<String>,
    },
}

impl ControllerCacheDirective {
    pub fn is_cacheable(&self) -> bool {
        !matches!(self, ControllerCacheDirective::NoCache)
    }

    /// URL parameters the directive explicitly allows.
    pub fn allowed_params(&self) -> &[String] {
        match self {
            ControllerCacheDirective::RouteScoped { url_params, .. } => url_params,
            _ => &[],
        }
    }
}

/// Hand the chain off to another controller (typically a layout).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handoff {
    pub controller: String,
    /// Defaults to `handler` when absent.
    pub action: Option<String>,
    /// Defaults to the target controller's name when absent.
    pub view: Option<String>,
}

/// A sibling controller rendered in parallel and embedded by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeSpec {
    pub name: String,
    pub controller: String,
    pub action: String,
    /// Defaults to the include controller's name when absent.
    pub view: Option<String>,
}

/// Everything a controller may instruct the executor to do.
#[derive(Debug, Clone, Default)]
pub struct Directives {
    pub controller_cache: ControllerCacheDirective,
    /// Opt the whole rendered route into the route output cache.
    pub route_cache: Option<CachePolicy>,
    pub handoff: Option<Handoff>,
    /// Declaration order decides merge order, not completion order.
    pub includes: Vec<IncludeSpec>,
    /// Override of the view resolved from the controller name.
    pub view: Option<String>,
}
