//! # Core Model Module
//!
//! Per-route registration record.
//!
//! A [`CoreModel`] is created once when a handler is bound and lives for as long
//! as the [`Registry`](crate::registry::Registry) keeps it. It ties together the
//! handler, its compiled plan, its plugin chains and the documentation metadata
//! consumed by schema generators. It is shared behind an `Arc` and never mutated
//! after registration.

use std::fmt;
use std::sync::Arc;

use http::StatusCode;
use serde::Serialize;
use serde_json::Value;

use crate::callable::Callable;
use crate::plan::ResolutionPlan;
use crate::plugin::{AsyncPlugin, Plugin, PluginEntry};
use crate::types::ParamType;

/// Lifecycle status of an API, as shown in generated documentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiStatus {
    #[default]
    Undefined,
    Design,
    Dev,
    IntegrationTesting,
    Complete,
    Test,
    PreRelease,
    Release,
    Abnormal,
    Maintenance,
    Archive,
    Abandoned,
}

impl ApiStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiStatus::Undefined => "undefined",
            ApiStatus::Design => "design",
            ApiStatus::Dev => "dev",
            ApiStatus::IntegrationTesting => "integration_testing",
            ApiStatus::Complete => "complete",
            ApiStatus::Test => "test",
            ApiStatus::PreRelease => "pre_release",
            ApiStatus::Release => "release",
            ApiStatus::Abnormal => "abnormal",
            ApiStatus::Maintenance => "maintenance",
            ApiStatus::Archive => "archive",
            ApiStatus::Abandoned => "abandoned",
        }
    }

    /// Whether generated documentation should flag the route as deprecated.
    #[must_use]
    pub fn is_deprecated(&self) -> bool {
        matches!(self, ApiStatus::Abnormal | ApiStatus::Archive | ApiStatus::Abandoned)
    }
}

impl fmt::Display for ApiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A documented response of a route.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseModel {
    pub status: StatusCode,
    pub description: String,
    pub media_type: String,
    pub schema: Option<Value>,
}

impl ResponseModel {
    /// JSON response whose body has the schema of `ty`.
    pub fn json(status: StatusCode, description: impl Into<String>, ty: &ParamType) -> Self {
        ResponseModel {
            status,
            description: description.into(),
            media_type: "application/json".to_string(),
            schema: Some(ty.schema()),
        }
    }

    /// Response without a body schema.
    pub fn empty(status: StatusCode, description: impl Into<String>) -> Self {
        ResponseModel {
            status,
            description: description.into(),
            media_type: String::new(),
            schema: None,
        }
    }
}

/// Plugin chains of one route, split by mode.
#[derive(Clone, Default)]
pub(crate) struct Chains {
    pub(crate) sync_pre: Vec<Arc<dyn Plugin>>,
    pub(crate) sync_post: Vec<Arc<dyn Plugin>>,
    pub(crate) async_pre: Vec<Arc<dyn AsyncPlugin>>,
    pub(crate) async_post: Vec<Arc<dyn AsyncPlugin>>,
}

impl Chains {
    pub(crate) fn new(pre: &[PluginEntry], post: &[PluginEntry]) -> Self {
        Chains {
            sync_pre: pre.iter().filter_map(PluginEntry::sync_plugin).collect(),
            sync_post: post.iter().filter_map(PluginEntry::sync_plugin).collect(),
            async_pre: pre.iter().filter_map(PluginEntry::async_plugin).collect(),
            async_post: post.iter().filter_map(PluginEntry::async_plugin).collect(),
        }
    }
}

/// Registration record of one route.
pub struct CoreModel {
    pub route_id: String,
    pub func: Callable,
    pub plan: ResolutionPlan,
    /// Pre plugins, outermost first. They wrap argument resolution.
    pub plugins: Vec<PluginEntry>,
    /// Post plugins, outermost first. They wrap only the handler call.
    pub post_plugins: Vec<PluginEntry>,
    pub pre_depends: Vec<Callable>,
    pub response_models: Vec<ResponseModel>,
    pub status: ApiStatus,
    pub group: String,
    pub tags: Vec<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub(crate) tip: bool,
    pub(crate) chains: Chains,
}

impl CoreModel {
    /// Operation id used by schema generators.
    #[must_use]
    pub fn operation_id(&self) -> &str {
        self.func.name()
    }

    #[must_use]
    pub fn is_async(&self) -> bool {
        self.func.is_async()
    }

    /// Whether request-time errors of this route carry tips.
    #[must_use]
    pub fn tip(&self) -> bool {
        self.tip
    }

    /// Names of the pre plugins, outermost first.
    #[must_use]
    pub fn plugin_names(&self) -> Vec<&'static str> {
        self.plugins.iter().map(PluginEntry::name).collect()
    }

    #[must_use]
    pub fn post_plugin_names(&self) -> Vec<&'static str> {
        self.post_plugins.iter().map(PluginEntry::name).collect()
    }
}

impl fmt::Debug for CoreModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreModel")
            .field("route_id", &self.route_id)
            .field("func", &self.func.name())
            .field("plugins", &self.plugin_names())
            .field("post_plugins", &self.post_plugin_names())
            .field("pre_depends", &self.pre_depends.len())
            .field("status", &self.status)
            .field("group", &self.group)
            .field("tags", &self.tags)
            .finish()
    }
}
