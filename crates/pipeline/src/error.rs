use std::{fmt, sync::Arc};

use crate::slug::Slug;

/// Registration and resolution errors.
///
/// These are returned as `Err` from setup calls and are fatal to setup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("dependency already registered: {key}")]
    AlreadyRegistered { key: String },

    #[error("dependency not registered: {key}")]
    NotRegistered { key: String },

    #[error("invalid dependency token {key}: {reason}")]
    InvalidToken { key: String, reason: String },

    #[error("dependency {key} does not hold a {expected}")]
    TypeMismatch { key: String, expected: &'static str },

    #[error("{owner} requires unregistered dependency {key}")]
    UnknownDependency { owner: String, key: String },

    #[error("dependency {key} was not declared by this stage")]
    Undeclared { key: String },

    #[error("route already registered: {slug}")]
    DuplicateRoute { slug: String },

    #[error("invalid slug {slug:?}: expected v<integer>.<name>")]
    InvalidSlug { slug: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Where in a dispatch something happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    /// Position `index` of the flattened before-chain, registered under `slug`.
    Before { slug: Slug, index: usize },
    Handler { route: Slug },
    After { slug: Slug, index: usize },
    ErrorHandler { index: usize },
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Before { slug, index } => write!(f, "before middleware {slug}[{index}]"),
            Self::Handler { route } => write!(f, "route handler {route}"),
            Self::After { slug, index } => write!(f, "after middleware {slug}[{index}]"),
            Self::ErrorHandler { index } => write!(f, "error handler #{index}"),
        }
    }
}

/// Failures captured during a dispatch.
///
/// These never escape `Router::dispatch` as `Err`; they are carried in the
/// dispatch result and appended to the envelope's error list. Cloning is
/// cheap so the same value can live in both places.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    #[error("route not found: {slug}")]
    RouteNotFound { slug: String },

    #[error("route {route} references unknown middleware slug {slug}")]
    UnknownMiddlewareSlug { route: Slug, slug: Slug },

    #[error("continuation called more than once in {stage}")]
    DoubleContinuation { stage: Stage },

    #[error("dependency resolution failed in {stage}: {error}")]
    Resolution {
        stage: Stage,
        #[source]
        error: Error,
    },

    #[error("{stage} failed: {cause:#}")]
    HandlerFailure {
        stage: Stage,
        cause: Arc<anyhow::Error>,
    },

    #[error("error handler #{index} failed: {cause:#}")]
    ErrorHandlerFailure {
        index: usize,
        cause: Arc<anyhow::Error>,
    },
}

impl DispatchError {
    #[must_use]
    pub fn handler_failure(stage: Stage, cause: anyhow::Error) -> Self {
        Self::HandlerFailure {
            stage,
            cause: Arc::new(cause),
        }
    }

    /// The error raised by a middleware, handler or error-handler body.
    pub fn cause(&self) -> Option<&anyhow::Error> {
        match self {
            Self::HandlerFailure { cause, .. } | Self::ErrorHandlerFailure { cause, .. } => {
                Some(cause.as_ref())
            },
            _ => None,
        }
    }

    /// Short machine-readable label, used for logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RouteNotFound { .. } => "route_not_found",
            Self::UnknownMiddlewareSlug { .. } => "unknown_middleware_slug",
            Self::DoubleContinuation { .. } => "double_continuation",
            Self::Resolution { .. } => "resolution",
            Self::HandlerFailure { .. } => "handler_failure",
            Self::ErrorHandlerFailure { .. } => "error_handler_failure",
        }
    }
}
