use thiserror::Error;

/// Errors raised by the cache store and its specializations.
///
/// Argument errors (`MissingArguments`, `ReservedScope`,
/// `InvalidCacheParameter`) are programmer errors and propagate to the
/// caller immediately; they are never retried internally.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache call is missing required arguments: {message}")]
    MissingArguments { message: String },
    #[error("scope `{scope}` is reserved for framework use")]
    ReservedScope { scope: String },
    #[error("failed to read `{path}`: {source}")]
    ReadFailure {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("URL parameter `{parameter}` is not allowed by the cache directive")]
    InvalidCacheParameter { parameter: String },
}

impl CacheError {
    pub fn missing_arguments(message: impl Into<String>) -> Self {
        Self::MissingArguments {
            message: message.into(),
        }
    }

    pub fn reserved_scope(scope: impl Into<String>) -> Self {
        Self::ReservedScope {
            scope: scope.into(),
        }
    }

    pub fn read_failure(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::ReadFailure {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_cache_parameter(parameter: impl Into<String>) -> Self {
        Self::InvalidCacheParameter {
            parameter: parameter.into(),
        }
    }
}

/// Errors raised while resolving a controller chain.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("controller `{controller}` not found")]
    ControllerNotFound { controller: String },
    #[error("action `{action}` not found on controller `{controller}`")]
    ActionNotFound { controller: String, action: String },
    #[error("view `{view}` failed to render: {message}")]
    RenderFailure { view: String, message: String },
    #[error("include `{name}` could not be resolved: {message}")]
    IncludeResolution { name: String, message: String },
    #[error("controller chain exceeded the configured depth limit of {limit}")]
    DepthExceeded { limit: usize },
    #[error("controller `{controller}` failed: {message}")]
    Action { controller: String, message: String },
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl ChainError {
    pub fn controller_not_found(controller: impl Into<String>) -> Self {
        Self::ControllerNotFound {
            controller: controller.into(),
        }
    }

    pub fn action_not_found(controller: impl Into<String>, action: impl Into<String>) -> Self {
        Self::ActionNotFound {
            controller: controller.into(),
            action: action.into(),
        }
    }

    pub fn render_failure(view: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RenderFailure {
            view: view.into(),
            message: message.into(),
        }
    }

    pub fn include_resolution(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::IncludeResolution {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn action(controller: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Action {
            controller: controller.into(),
            message: message.into(),
        }
    }

    /// HTTP status the synthetic error response should carry.
    pub fn status(&self) -> u16 {
        match self {
            Self::ControllerNotFound { .. }
            | Self::ActionNotFound { .. }
            | Self::IncludeResolution { .. } => 404,
            Self::RenderFailure { .. }
            | Self::DepthExceeded { .. }
            | Self::Action { .. }
            | Self::Cache(_) => 500,
        }
    }
}
