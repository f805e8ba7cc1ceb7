//! # Bind Module
//!
//! The decoration entry point: [`BindConfig`] describes a route,
//! [`Registry::bind`](crate::registry::Registry::bind) compiles it once, and the
//! returned [`BoundHandler`] runs every call through the plugin chains and the
//! resolver.
//!
//! ## Request Flow
//!
//! ```text
//! BoundHandler::call(request, raw)
//!   └─ Context::init + install
//!      └─ pre plugins (outermost first)
//!         └─ resolve arguments (pre-depends, class attributes, parameters)
//!            └─ post plugins (outermost first, see the arguments)
//!               └─ handler(arguments)
//!            └─ release scoped dependencies (LIFO)
//! ```
//!
//! Resolution failures skip the post plugins and the handler but still release
//! whatever was acquired, then travel out through the pre plugins.
//!
//! ## Example
//!
//! ```rust,ignore
//! use brrtbind::{BindConfig, Callable, Field, ParamType, Registry, RuntimeConfig, Signature};
//! use serde_json::json;
//!
//! let registry = Registry::new(RuntimeConfig::default());
//! let handler = Callable::sync(
//!     "get_user",
//!     Signature::new().param("uid", ParamType::Integer, Field::query().ge(1).build()?),
//!     |args| Ok(json!({ "uid": args.parse::<u64>("uid")? })),
//! );
//! let bound = registry.bind("get_user", handler, BindConfig::new().tag("user"))?;
//! let out = bound.call(request, RawCall::new())?;
//! ```

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::warn;

use crate::callable::{Callable, Resolved, ScopeExit};
use crate::context::Context;
use crate::core_model::{ApiStatus, CoreModel, ResponseModel};
use crate::error::{BindError, ConfigurationError};
use crate::plugin::{AsyncNext, AsyncTerminal, Invocation, Next, PluginEntry, SyncTerminal};
use crate::request::RequestAdapter;
use crate::resolver::{asynchronous, sync, RequestScope};

/// The call exactly as the framework made it.
///
/// For class-based handlers the instance goes first in `args`.
#[derive(Debug, Clone, Default)]
pub struct RawCall {
    pub args: Vec<Resolved>,
    pub kwargs: Vec<(String, Resolved)>,
}

impl RawCall {
    pub fn new() -> Self {
        Self::default()
    }

    /// A call on a handler instance.
    pub fn with_instance(instance: Arc<crate::callable::HandlerInstance>) -> Self {
        RawCall {
            args: vec![Resolved::Instance(instance)],
            kwargs: Vec::new(),
        }
    }

    #[must_use]
    pub fn arg(mut self, value: Resolved) -> Self {
        self.args.push(value);
        self
    }

    #[must_use]
    pub fn kwarg(mut self, name: impl Into<String>, value: Resolved) -> Self {
        self.kwargs.push((name.into(), value));
        self
    }
}

/// Route options given to `bind`.
///
/// Everything is optional. Group, tags and status left empty are filled from
/// the registry defaults; `tip` falls back to the runtime configuration.
#[derive(Debug, Clone, Default)]
pub struct BindConfig {
    pub(crate) plugins: Vec<PluginEntry>,
    pub(crate) post_plugins: Vec<PluginEntry>,
    pub(crate) pre_depends: Vec<Callable>,
    pub(crate) status: Option<ApiStatus>,
    pub(crate) group: Option<String>,
    pub(crate) tags: Vec<String>,
    pub(crate) summary: Option<String>,
    pub(crate) description: Option<String>,
    pub(crate) response_models: Vec<ResponseModel>,
    pub(crate) tip: Option<bool>,
}

impl BindConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pre plugin. The first one added is the outermost.
    #[must_use]
    pub fn plugin(mut self, plugin: PluginEntry) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Append a post plugin. Post plugins run after argument resolution and
    /// see the resolved arguments.
    #[must_use]
    pub fn post_plugin(mut self, plugin: PluginEntry) -> Self {
        self.post_plugins.push(plugin);
        self
    }

    /// Append a dependency that is resolved for its side effects before any
    /// parameter.
    #[must_use]
    pub fn pre_depend(mut self, dependency: Callable) -> Self {
        self.pre_depends.push(dependency);
        self
    }

    #[must_use]
    pub fn status(mut self, status: ApiStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    #[must_use]
    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn response_model(mut self, model: ResponseModel) -> Self {
        self.response_models.push(model);
        self
    }

    /// Attach tips to request-time errors of this route, overriding the
    /// runtime default.
    #[must_use]
    pub fn tip(mut self, enabled: bool) -> Self {
        self.tip = Some(enabled);
        self
    }
}

/// Registration checks that need the complete core model.
///
/// # Errors
///
/// - [`ConfigurationError::SyncPluginOnAsyncHandler`] /
///   [`ConfigurationError::AsyncPluginOnSyncHandler`] for a plugin lacking the
///   handler's mode
/// - [`ConfigurationError::AsyncDependencyInSyncRoute`] for an async
///   dependency reachable from a sync handler
/// - [`ConfigurationError::NotClassBased`] for instance consumers on a plain
///   handler
/// - [`ConfigurationError::PostPluginInPreChain`] for a post-only plugin added
///   with [`BindConfig::plugin`]
/// - whatever a plugin's `check` hook returns
pub(crate) fn check_route(core: &CoreModel) -> Result<(), ConfigurationError> {
    let entries = || core.plugins.iter().chain(core.post_plugins.iter());
    if core.is_async() {
        if let Some(p) = entries().find(|p| !p.supports_async()) {
            return Err(ConfigurationError::SyncPluginOnAsyncHandler {
                route: core.route_id.clone(),
                plugin: p.name().to_string(),
            });
        }
    } else {
        if let Some(p) = entries().find(|p| !p.supports_sync()) {
            return Err(ConfigurationError::AsyncPluginOnSyncHandler {
                route: core.route_id.clone(),
                plugin: p.name().to_string(),
            });
        }
        if let Some(dependency) = core.plan.first_async_dependency() {
            return Err(ConfigurationError::AsyncDependencyInSyncRoute {
                route: core.route_id.clone(),
                dependency,
            });
        }
    }

    if let Some(p) = core.plugins.iter().find(|p| p.post_only()) {
        return Err(ConfigurationError::PostPluginInPreChain {
            route: core.route_id.clone(),
            plugin: p.name().to_string(),
        });
    }

    if core.func.class().is_none() {
        if let Some(callable) = core.plan.instance_consumer() {
            return Err(ConfigurationError::NotClassBased { callable });
        }
    }

    for entry in entries() {
        entry.check(core)?;
    }
    Ok(())
}

fn exit_of<T>(result: &Result<T, BindError>) -> ScopeExit {
    if result.is_ok() {
        ScopeExit::Success
    } else {
        ScopeExit::Error
    }
}

/// Innermost link of the post chain.
struct HandlerTerminal;

impl SyncTerminal for HandlerTerminal {
    fn call(&self, inv: Invocation) -> Result<Resolved, BindError> {
        sync::call_handler(&inv.core.plan, inv.arguments.unwrap_or_default())
    }
}

impl AsyncTerminal for HandlerTerminal {
    fn call<'a>(&'a self, inv: Invocation) -> BoxFuture<'a, Result<Resolved, BindError>> {
        Box::pin(async move {
            let args = inv.arguments.unwrap_or_default();
            asynchronous::call_handler(&inv.core.plan, args).await
        })
    }
}

/// Innermost link of the pre chain: resolves the arguments, runs the post
/// chain, then closes the request's exit stack.
struct ResolveTerminal<'s> {
    scope: &'s RequestScope,
}

impl SyncTerminal for ResolveTerminal<'_> {
    fn call(&self, mut inv: Invocation) -> Result<Resolved, BindError> {
        let core = Arc::clone(&inv.core);
        let result = sync::resolve(&core.plan, self.scope).and_then(|args| {
            inv.arguments = Some(args);
            Next::new(&core.chains.sync_post, &HandlerTerminal).run(inv)
        });
        self.scope.exits.close(exit_of(&result));
        result
    }
}

impl AsyncTerminal for ResolveTerminal<'_> {
    fn call<'a>(&'a self, mut inv: Invocation) -> BoxFuture<'a, Result<Resolved, BindError>> {
        Box::pin(async move {
            let core = Arc::clone(&inv.core);
            let result = match asynchronous::resolve(&core.plan, self.scope).await {
                Ok(args) => {
                    inv.arguments = Some(args);
                    AsyncNext::new(&core.chains.async_post, &HandlerTerminal)
                        .run(inv)
                        .await
                }
                Err(e) => Err(e),
            };
            self.scope.exits.close_async(exit_of(&result)).await;
            result
        })
    }
}

/// A handler wired to its plan and plugin chains.
///
/// Cheap to clone; every clone serves the same route.
#[derive(Clone, Debug)]
pub struct BoundHandler {
    core: Arc<CoreModel>,
}

impl BoundHandler {
    pub(crate) fn new(core: Arc<CoreModel>) -> Self {
        BoundHandler { core }
    }

    /// Registration record of the route.
    #[must_use]
    pub fn core(&self) -> &Arc<CoreModel> {
        &self.core
    }

    #[must_use]
    pub fn route_id(&self) -> &str {
        &self.core.route_id
    }

    #[must_use]
    pub fn is_async(&self) -> bool {
        self.core.is_async()
    }

    /// Serve one call of a synchronous handler.
    ///
    /// # Arguments
    ///
    /// * `request` - The framework request, behind the adapter interface
    /// * `raw` - The call as the framework made it
    ///
    /// # Errors
    ///
    /// - [`BindError::ModeMismatch`] when the handler is asynchronous
    /// - [`BindError::NotFound`], [`BindError::Validation`] for bad requests
    /// - [`BindError::Dependency`], [`BindError::Handler`] with the original
    ///   error of a failing callable
    pub fn call(&self, request: Arc<dyn RequestAdapter>, raw: RawCall) -> Result<Resolved, BindError> {
        if self.core.is_async() {
            return Err(BindError::ModeMismatch {
                route: self.core.route_id.clone(),
            });
        }
        let ctx = Context::init(&self.core, request, &raw);
        let _guard = ctx.enter();
        self.run_sync(ctx, raw)
    }

    /// Serve one call on the async runtime.
    ///
    /// Synchronous handlers are accepted too and run inline inside the call's
    /// task-local context.
    ///
    /// # Errors
    ///
    /// Same as [`call`](Self::call), without the mode mismatch.
    pub async fn call_async(&self, request: Arc<dyn RequestAdapter>, raw: RawCall) -> Result<Resolved, BindError> {
        let ctx = Context::init(&self.core, request, &raw);
        let core = Arc::clone(&self.core);
        let inner = ctx.clone();
        ctx.scope(async move {
            if !core.is_async() {
                return self.run_sync(inner, raw);
            }
            let scope = RequestScope::new(inner.clone(), core.tip);
            let inv = Invocation {
                core: Arc::clone(&core),
                context: inner,
                raw,
                arguments: None,
            };
            let terminal = ResolveTerminal { scope: &scope };
            let result = AsyncNext::new(&core.chains.async_pre, &terminal).run(inv).await;
            log_failure(&core, &result);
            result
        })
        .await
    }

    fn run_sync(&self, ctx: Context, raw: RawCall) -> Result<Resolved, BindError> {
        let scope = RequestScope::new(ctx.clone(), self.core.tip);
        let inv = Invocation {
            core: Arc::clone(&self.core),
            context: ctx,
            raw,
            arguments: None,
        };
        let terminal = ResolveTerminal { scope: &scope };
        let result = Next::new(&self.core.chains.sync_pre, &terminal).run(inv);
        log_failure(&self.core, &result);
        result
    }
}

fn log_failure(core: &CoreModel, result: &Result<Resolved, BindError>) {
    if let Err(e) = result {
        if !e.is_client_error() {
            warn!(route = %core.route_id, error = %e, "Bound handler failed");
        }
    }
}
