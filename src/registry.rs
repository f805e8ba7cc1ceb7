//! # Registry Module
//!
//! The composition-root object owning every bound route.
//!
//! ## Overview
//!
//! A [`Registry`] is created once at startup, handed to the code that registers
//! handlers, and cleared on shutdown. It owns:
//!
//! - the [`SignatureAnalyzer`] and [`PlanCache`] shared by all routes
//! - the [`SchemaCache`] of compiled validators
//! - the route map, route id → [`CoreModel`], read by documentation generators
//!
//! ## Concurrency
//!
//! Reads of the route map go through `ArcSwap` and never block. Registrations
//! are serialized behind a mutex and publish a new map snapshot, so readers see
//! a route either fully registered or not at all.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::info;

use crate::bind::{check_route, BindConfig, BoundHandler};
use crate::callable::Callable;
use crate::core_model::{ApiStatus, Chains, CoreModel};
use crate::error::ConfigurationError;
use crate::plan::{PlanBuilder, PlanCache};
use crate::runtime_config::RuntimeConfig;
use crate::signature::SignatureAnalyzer;
use crate::validator_cache::SchemaCache;

type RouteMap = HashMap<String, Arc<CoreModel>>;

/// Values copied into every route that leaves them empty.
#[derive(Debug, Clone, Default)]
pub struct RegistryDefaults {
    pub group: Option<String>,
    pub tags: Vec<String>,
    pub status: Option<ApiStatus>,
}

/// Owner of the bound routes and of the registration-time caches.
pub struct Registry {
    config: RuntimeConfig,
    defaults: RegistryDefaults,
    analyzer: SignatureAnalyzer,
    plans: PlanCache,
    schemas: SchemaCache,
    routes: ArcSwap<RouteMap>,
    write_lock: Mutex<()>,
}

impl Registry {
    pub fn new(config: RuntimeConfig) -> Self {
        Registry {
            analyzer: SignatureAnalyzer::new(config.plan_cache),
            plans: PlanCache::new(config.plan_cache),
            schemas: SchemaCache::new(config.schema_cache),
            config,
            defaults: RegistryDefaults::default(),
            routes: ArcSwap::from_pointee(RouteMap::new()),
            write_lock: Mutex::new(()),
        }
    }

    /// Registry configured from `BRRTR_*` environment variables.
    pub fn from_env() -> Self {
        Self::new(RuntimeConfig::from_env())
    }

    #[must_use]
    pub fn with_defaults(mut self, defaults: RegistryDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Compile `handler` and register it as `route_id`.
    ///
    /// Signature analysis, plan building and every registration check run
    /// here, once. Nothing is compiled per request.
    ///
    /// # Arguments
    ///
    /// * `route_id` - Unique route identity
    /// * `handler` - The handler callable
    /// * `config` - Plugins, pre-depends and documentation metadata
    ///
    /// # Returns
    ///
    /// The bound handler the framework calls instead of `handler`.
    ///
    /// # Errors
    ///
    /// Any [`ConfigurationError`]; the route is not registered.
    pub fn bind(
        &self,
        route_id: impl Into<String>,
        handler: Callable,
        config: BindConfig,
    ) -> Result<BoundHandler, ConfigurationError> {
        let route_id = route_id.into();
        if handler.is_scoped() {
            return Err(ConfigurationError::ScopedHandler {
                callable: handler.name().to_string(),
            });
        }

        let _write = self.write_lock.lock();
        if self.routes.load().contains_key(&route_id) {
            return Err(ConfigurationError::DuplicateRoute { route: route_id });
        }

        let plan = PlanBuilder::new(&self.analyzer, &self.schemas, &self.plans)
            .build_route(&handler, &config.pre_depends)?;
        let core = Arc::new(self.core_model(route_id, handler, plan, config));
        check_route(&core)?;

        let mut next = RouteMap::clone(&self.routes.load());
        next.insert(core.route_id.clone(), Arc::clone(&core));
        self.routes.store(Arc::new(next));

        info!(
            route = %core.route_id,
            handler_name = %core.func.name(),
            is_async = core.is_async(),
            plugins = core.plugins.len(),
            post_plugins = core.post_plugins.len(),
            pre_depends = core.pre_depends.len(),
            tip = core.tip,
            "Route bound"
        );
        Ok(BoundHandler::new(core))
    }

    fn core_model(
        &self,
        route_id: String,
        handler: Callable,
        plan: crate::plan::ResolutionPlan,
        config: BindConfig,
    ) -> CoreModel {
        let BindConfig {
            plugins,
            post_plugins,
            pre_depends,
            status,
            group,
            tags,
            summary,
            description,
            response_models,
            tip,
        } = config;
        let tags = if tags.is_empty() {
            self.defaults.tags.clone()
        } else {
            tags
        };
        CoreModel {
            chains: Chains::new(&plugins, &post_plugins),
            route_id,
            func: handler,
            plan,
            plugins,
            post_plugins,
            pre_depends,
            response_models,
            status: status.or(self.defaults.status).unwrap_or_default(),
            group: group
                .or_else(|| self.defaults.group.clone())
                .unwrap_or_default(),
            tags,
            summary,
            description,
            tip: tip.unwrap_or(self.config.tip),
        }
    }

    #[must_use]
    pub fn get(&self, route_id: &str) -> Option<Arc<CoreModel>> {
        self.routes.load().get(route_id).map(Arc::clone)
    }

    /// Snapshot of every registered route, sorted by route id.
    #[must_use]
    pub fn routes(&self) -> Vec<Arc<CoreModel>> {
        let mut all: Vec<_> = self.routes.load().values().map(Arc::clone).collect();
        all.sort_by(|a, b| a.route_id.cmp(&b.route_id));
        all
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.load().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.load().is_empty()
    }

    /// Number of compiled dependency plans.
    #[must_use]
    pub fn plan_cache_len(&self) -> usize {
        self.plans.len()
    }

    /// Number of distinct compiled validators.
    #[must_use]
    pub fn schema_cache_size(&self) -> usize {
        self.schemas.size()
    }

    /// Drop every route and cached plan. Bound handlers already handed out
    /// keep working; they hold their own core model.
    pub fn clear(&self) {
        let _write = self.write_lock.lock();
        let dropped = self.routes.load().len();
        self.routes.store(Arc::new(RouteMap::new()));
        self.plans.clear();
        self.analyzer.clear();
        self.schemas.clear();
        info!(routes = dropped, "Registry cleared");
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("config", &self.config)
            .field("defaults", &self.defaults)
            .field("routes", &self.len())
            .finish()
    }
}
