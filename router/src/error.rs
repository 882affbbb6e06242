use crate::matching::PatternError;
use std::fmt;
use thiserror::Error;

/// Diagnostic snapshot of the resolution state at the moment of failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// The pathname the failed [`resolve`](crate::Resolver::resolve) call
    /// was working on.
    pub pathname: String,
    /// The `path` of the route under attempt when the failure occurred,
    /// if any route had been reached.
    pub route_path: Option<String>,
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.route_path {
            Some(route) => {
                write!(f, "\"{}\" (route \"{}\")", self.pathname, route)
            }
            None => write!(f, "\"{}\"", self.pathname),
        }
    }
}

/// An error produced by a route action.
///
/// The original error value is carried unchanged as the source, so callers
/// can recover it through [`std::error::Error::source`] or
/// [`get_ref`](Self::get_ref). An action that already knows its status
/// code can attach one with [`with_code`](Self::with_code); the engine
/// will not overwrite it.
#[derive(Error, Debug)]
#[error("{source}")]
pub struct ActionError {
    pub(crate) code: Option<u16>,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
}

impl ActionError {
    /// Wraps an error produced by an action.
    pub fn new(
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            code: None,
            source: source.into(),
        }
    }

    /// Wraps an error that carries its own status code.
    pub fn with_code(
        code: u16,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            code: Some(code),
            source: source.into(),
        }
    }

    /// The status code attached by the action, if any.
    pub fn code(&self) -> Option<u16> {
        self.code
    }

    /// Borrows the original error value.
    pub fn get_ref(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.source.as_ref()
    }

    /// Recovers the original error value.
    pub fn into_inner(self) -> Box<dyn std::error::Error + Send + Sync> {
        self.source
    }
}

impl From<&str> for ActionError {
    fn from(message: &str) -> Self {
        Self::new(message.to_string())
    }
}

impl From<String> for ActionError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// A failed resolution.
///
/// Every variant exposes a status [`code`](Self::code) and the
/// [`context`](Self::context) active when the failure occurred.
#[derive(Error, Debug)]
pub enum ResolveError {
    /// The match sequence was exhausted without any action producing a
    /// result.
    #[error("page not found ({})", .context.pathname)]
    NotFound {
        /// Where resolution stood when the sequence ran dry.
        context: ErrorContext,
    },
    /// An action failed while resolving.
    #[error("resolution of {context} failed: {source}")]
    Action {
        /// Where resolution stood when the action failed.
        context: ErrorContext,
        /// The action's own code, or 500.
        code: u16,
        /// The failing action's error, identity preserved.
        #[source]
        source: ActionError,
    },
    /// A route's path expression failed to compile.
    #[error("resolution of {context} failed: {source}")]
    Pattern {
        /// Where resolution stood when compilation failed.
        context: ErrorContext,
        /// The compilation failure.
        #[source]
        source: PatternError,
    },
}

impl ResolveError {
    /// The status code for this failure: 404 for an exhausted match
    /// sequence, the action's own code or 500 otherwise.
    pub fn code(&self) -> u16 {
        match self {
            ResolveError::NotFound { .. } => 404,
            ResolveError::Action { code, .. } => *code,
            ResolveError::Pattern { .. } => 500,
        }
    }

    /// The resolution state captured when the failure occurred.
    pub fn context(&self) -> &ErrorContext {
        match self {
            ResolveError::NotFound { context }
            | ResolveError::Action { context, .. }
            | ResolveError::Pattern { context, .. } => context,
        }
    }
}

/// A route definition that cannot take part in resolution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid route \"{path}\": {reason}")]
pub struct InvalidRouteError {
    /// The `path` of the offending route.
    pub path: String,
    /// Why the route was rejected.
    pub reason: &'static str,
}
