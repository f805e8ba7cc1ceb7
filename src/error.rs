//! # Error Module
//!
//! Error taxonomy of the binding engine.
//!
//! Errors fall in two groups that are never mixed:
//!
//! - **Registration time**: [`ConfigurationError`]. Raised while a route is bound,
//!   never while a request is served. A route that fails to bind must not be
//!   served at all.
//! - **Request time**: [`ValueNotFoundError`], [`ValidationError`] and the
//!   pass-through variants of [`BindError`]. These are recoverable per request
//!   and are meant to be turned into a client-facing response by the framework.
//!
//! ## Tips
//!
//! Request-time errors optionally carry a *tip*: a short sentence naming the
//! handler, parameter and request source that failed. Tips are on by default and
//! can be disabled per registry ([`RuntimeConfig::tip`](crate::runtime_config::RuntimeConfig))
//! or per route ([`BindConfig::tip`](crate::bind::BindConfig::tip)) for
//! deployments that must not leak internal field names. The structured fields
//! stay available either way.

use std::fmt;

use crate::field::FieldKind;

/// Errors detected while analysing signatures, building plans or binding routes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    /// A field descriptor was given both `default` and `default_factory`.
    #[error("field cannot have both a default value and a default factory")]
    ConflictingDefaults,

    /// A field descriptor with a default also declared a not-found handler.
    #[error("field with a default value or default factory cannot declare a not-found handler")]
    DefaultWithNotFound,

    /// A parameter has no field descriptor and is not a request or instance parameter.
    #[error("parameter `{param}` of `{callable}` has no field descriptor and cannot be resolved")]
    UnresolvableParameter { callable: String, param: String },

    /// Two parameters (or class attributes) share the same name.
    #[error("parameter `{param}` is declared twice on `{callable}`")]
    DuplicateParameter { callable: String, param: String },

    /// A request or instance parameter also carries a field descriptor.
    #[error("parameter `{param}` of `{callable}` is a {what} parameter and cannot carry a field descriptor")]
    FieldOnSpecialParameter {
        callable: String,
        param: String,
        what: &'static str,
    },

    /// The declared type cannot hold what the field's source yields, e.g. a
    /// scalar type on a multi-valued source.
    #[error("parameter `{param}` of `{callable}` declares a {kind} field with incompatible type `{ty}`")]
    InvalidFieldType {
        callable: String,
        param: String,
        kind: FieldKind,
        ty: String,
    },

    /// The dependency graph contains a cycle.
    #[error("circular dependency detected: {}", .cycle.join(" -> "))]
    DependencyCycle { cycle: Vec<String> },

    /// An asynchronous dependency was reached from a synchronous route.
    #[error("route `{route}` is synchronous but dependency `{dependency}` is asynchronous")]
    AsyncDependencyInSyncRoute { route: String, dependency: String },

    /// `sync_to_thread` was requested on a body that is not synchronous.
    #[error("`{callable}` is marked sync_to_thread but its body is not synchronous")]
    SyncToThreadOnAsync { callable: String },

    /// A route handler was declared with a scoped (acquire/release) body.
    #[error("handler `{callable}` cannot use a scoped body; scoped bodies are for dependencies")]
    ScopedHandler { callable: String },

    /// A synchronous plugin wraps an asynchronous handler.
    #[error("plugin `{plugin}` is synchronous and cannot wrap asynchronous handler `{route}`")]
    SyncPluginOnAsyncHandler { route: String, plugin: String },

    /// An asynchronous-only plugin wraps a synchronous handler.
    #[error("plugin `{plugin}` is asynchronous and cannot wrap synchronous handler `{route}`")]
    AsyncPluginOnSyncHandler { route: String, plugin: String },

    /// Class attributes or instance parameters used outside a class-based handler.
    #[error("`{callable}` uses a handler instance but is not declared as a method of a handler class")]
    NotClassBased { callable: String },

    /// A plugin that needs the resolved arguments was added as a pre plugin.
    #[error("plugin `{plugin}` reads resolved arguments and must be a post plugin of `{route}`")]
    PostPluginInPreChain { route: String, plugin: String },

    /// A plugin's registration hook rejected the route.
    #[error("plugin `{plugin}` rejected route `{route}`: {reason}")]
    PluginCheck {
        route: String,
        plugin: String,
        reason: String,
    },

    /// A validation constraint produced an invalid JSON Schema.
    #[error("invalid validation schema for `{param}`: {reason}")]
    InvalidSchema { param: String, reason: String },

    /// The route id is already registered.
    #[error("route `{route}` is already registered")]
    DuplicateRoute { route: String },
}

/// A required value had no value in the request and no default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueNotFoundError {
    /// Parameter name as declared in the signature.
    pub param: String,
    /// Request source the value was looked up in.
    pub kind: FieldKind,
    /// Key used for the lookup (alias or derived name).
    pub key: String,
    /// Enriched description, absent when tips are disabled.
    pub tip: Option<String>,
}

impl ValueNotFoundError {
    pub fn new(param: impl Into<String>, kind: FieldKind, key: impl Into<String>) -> Self {
        Self {
            param: param.into(),
            kind,
            key: key.into(),
            tip: None,
        }
    }

    #[must_use]
    pub fn with_tip(mut self, tip: Option<String>) -> Self {
        self.tip = tip;
        self
    }
}

impl fmt::Display for ValueNotFoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tip {
            Some(tip) => write!(f, "value not found: {tip}"),
            None => write!(f, "value not found"),
        }
    }
}

impl std::error::Error for ValueNotFoundError {}

/// One failing leaf of a validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Dotted location, starting with the source kind: `["query", "user", "age"]`.
    pub location: Vec<String>,
    /// Validator message.
    pub message: String,
}

impl ValidationIssue {
    pub fn new(location: Vec<String>, message: impl Into<String>) -> Self {
        ValidationIssue {
            location,
            message: message.into(),
        }
    }

    /// Location joined with dots.
    #[must_use]
    pub fn path(&self) -> String {
        self.location.join(".")
    }
}

/// Type or constraint validation failed for one or more leaf fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
    pub tip: Option<String>,
}

impl ValidationError {
    pub fn new(issues: Vec<ValidationIssue>) -> Self {
        Self { issues, tip: None }
    }

    pub fn single(location: Vec<String>, message: impl Into<String>) -> Self {
        Self::new(vec![ValidationIssue::new(location, message)])
    }

    #[must_use]
    pub fn with_tip(mut self, tip: Option<String>) -> Self {
        self.tip = tip;
        self
    }

    /// Issue paths in reporting order.
    #[must_use]
    pub fn paths(&self) -> Vec<String> {
        self.issues.iter().map(ValidationIssue::path).collect()
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(tip) = &self.tip {
            write!(f, "{tip}: ")?;
            let rendered: Vec<String> = self
                .issues
                .iter()
                .map(|i| format!("{} ({})", i.message, i.path()))
                .collect();
            return write!(f, "{}", rendered.join("; "));
        }
        let rendered: Vec<&str> = self.issues.iter().map(|i| i.message.as_str()).collect();
        write!(f, "{}", rendered.join("; "))
    }
}

impl std::error::Error for ValidationError {}

/// Any failure surfaced by a bound handler.
#[derive(Debug, thiserror::Error)]
pub enum BindError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    NotFound(#[from] ValueNotFoundError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A dependency body failed. The original error is kept as-is.
    #[error(transparent)]
    Dependency(anyhow::Error),

    /// The handler body failed. The original error is kept as-is.
    #[error(transparent)]
    Handler(anyhow::Error),

    /// A field's not-found handler replaced the value-not-found error.
    #[error(transparent)]
    Custom(anyhow::Error),

    /// The route needs a handler instance and the call did not provide one.
    #[error("handler `{route}` is class-based but was called without an instance")]
    MissingInstance { route: String },

    /// An asynchronous route was invoked through the synchronous entry point.
    #[error("handler `{route}` is asynchronous and must be called with call_async")]
    ModeMismatch { route: String },
}

impl BindError {
    /// Wrap an error raised by a dependency body. A `BindError` that travelled
    /// through user code is unwrapped rather than nested.
    pub(crate) fn dependency(err: anyhow::Error) -> Self {
        match err.downcast::<BindError>() {
            Ok(inner) => inner,
            Err(err) => BindError::Dependency(err),
        }
    }

    pub(crate) fn handler(err: anyhow::Error) -> Self {
        match err.downcast::<BindError>() {
            Ok(inner) => inner,
            Err(err) => BindError::Handler(err),
        }
    }

    /// Whether the failure is the client's (missing/invalid input).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self, BindError::NotFound(_) | BindError::Validation(_))
    }

    /// Downcast the original dependency, handler or not-found-handler error.
    #[must_use]
    pub fn source_as<E>(&self) -> Option<&E>
    where
        E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        match self {
            BindError::Dependency(e) | BindError::Handler(e) | BindError::Custom(e) => {
                e.downcast_ref::<E>()
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message() {
        let err = ConfigurationError::DependencyCycle {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "circular dependency detected: a -> b -> a");
    }

    #[test]
    fn test_validation_display_with_and_without_tip() {
        let err = ValidationError::single(
            vec!["query".into(), "age".into()],
            "-1 is less than the minimum of 0",
        );
        assert_eq!(err.to_string(), "-1 is less than the minimum of 0");

        let tipped = err.with_tip(Some("check parameter `age` of `get_user`".into()));
        assert_eq!(
            tipped.to_string(),
            "check parameter `age` of `get_user`: -1 is less than the minimum of 0 (query.age)"
        );
    }

    #[test]
    fn test_dependency_unwraps_nested_bind_error() {
        let inner = BindError::NotFound(ValueNotFoundError::new("uid", FieldKind::Query, "uid"));
        let wrapped = BindError::dependency(anyhow::Error::new(inner));
        assert!(matches!(wrapped, BindError::NotFound(ref e) if e.param == "uid"));
    }

    #[derive(Debug, thiserror::Error)]
    #[error("token expired")]
    struct TokenExpired;

    #[test]
    fn test_dependency_keeps_original_type() {
        let err = BindError::dependency(anyhow::Error::new(TokenExpired));
        assert!(err.source_as::<TokenExpired>().is_some());
        assert_eq!(err.to_string(), "token expired");
        assert!(!err.is_client_error());
    }
}
