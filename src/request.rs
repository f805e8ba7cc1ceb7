//! # Request Module
//!
//! The interface the engine consumes from a web-framework adapter, and
//! [`SimpleRequest`], an in-memory adapter for tests and embedders that already
//! hold a parsed request.
//!
//! The adapter is responsible for parsing wire formats. The engine sees every
//! source as a [`Mapping`] of names to JSON values; multi-valued sources
//! ([`RequestAdapter::multi_query`], [`RequestAdapter::multi_form`]) map names
//! to arrays. Bodies are expected to be buffered by the adapter before the
//! request is dispatched so that reading them never suspends.

use std::any::Any;
use std::sync::Arc;

use http::Method;
use serde_json::Value;
use smallvec::SmallVec;

/// Raw name → value mapping of one request source.
pub type Mapping = serde_json::Map<String, Value>;

/// Maximum inline params/headers before heap allocation
pub const MAX_INLINE_PARAMS: usize = 16;

/// Stack-allocated name/value storage for the hot path
///
/// Names use `Arc<str>` because they are often repeated across requests
/// (Content-Type, Authorization, ...); values are per-request data.
pub type ParamVec = SmallVec<[(Arc<str>, String); MAX_INLINE_PARAMS]>;

/// Request accessors provided by a framework adapter.
pub trait RequestAdapter: Send + Sync + 'static {
    /// Query parameters, last value wins for repeated names.
    fn query(&self) -> Mapping;

    /// Query parameters with every value as an array. Defaults to wrapping
    /// [`query`](Self::query).
    fn multi_query(&self) -> Mapping {
        wrap_multi(self.query())
    }

    fn header(&self) -> Mapping;

    fn cookie(&self) -> Mapping;

    fn path(&self) -> Mapping;

    /// The buffered request body, `Value::Null` when absent.
    fn body(&self) -> Value;

    fn form(&self) -> Mapping {
        Mapping::new()
    }

    fn multi_form(&self) -> Mapping {
        wrap_multi(self.form())
    }

    fn file(&self) -> Mapping {
        Mapping::new()
    }

    /// HTTP method, for logging.
    fn method(&self) -> Method {
        Method::GET
    }

    /// Request path, for logging and cache keys.
    fn url_path(&self) -> &str {
        "/"
    }

    /// Access to the concrete framework request.
    fn as_any(&self) -> &dyn Any;
}

fn wrap_multi(single: Mapping) -> Mapping {
    single
        .into_iter()
        .map(|(k, v)| match v {
            Value::Array(_) => (k, v),
            other => (k, Value::Array(vec![other])),
        })
        .collect()
}

fn to_mapping(params: &ParamVec) -> Mapping {
    let mut out = Mapping::new();
    for (k, v) in params {
        out.insert(k.to_string(), Value::String(v.clone()));
    }
    out
}

fn to_multi_mapping(params: &ParamVec) -> Mapping {
    let mut out = Mapping::new();
    for (k, v) in params {
        let entry = out
            .entry(k.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(items) = entry {
            items.push(Value::String(v.clone()));
        }
    }
    out
}

/// An already-parsed request.
///
/// Repeated query names are kept; [`RequestAdapter::query`] returns the last
/// occurrence and [`RequestAdapter::multi_query`] all of them, in order.
#[derive(Debug, Clone, Default)]
pub struct SimpleRequest {
    pub method: Method,
    pub path: String,
    pub path_params: ParamVec,
    pub query_params: ParamVec,
    pub headers: ParamVec,
    pub cookies: ParamVec,
    pub body: Option<Value>,
    pub form: ParamVec,
    pub files: Mapping,
}

impl SimpleRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_query(mut self, name: &str, value: impl Into<String>) -> Self {
        self.query_params.push((Arc::from(name), value.into()));
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((Arc::from(name), value.into()));
        self
    }

    pub fn with_cookie(mut self, name: &str, value: impl Into<String>) -> Self {
        self.cookies.push((Arc::from(name), value.into()));
        self
    }

    pub fn with_path_param(mut self, name: &str, value: impl Into<String>) -> Self {
        self.path_params.push((Arc::from(name), value.into()));
        self
    }

    pub fn with_form(mut self, name: &str, value: impl Into<String>) -> Self {
        self.form.push((Arc::from(name), value.into()));
        self
    }

    pub fn with_file(mut self, name: &str, file: Value) -> Self {
        self.files.insert(name.to_string(), file);
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Wrap into the shared handle the engine consumes.
    pub fn into_adapter(self) -> Arc<dyn RequestAdapter> {
        Arc::new(self)
    }
}

impl RequestAdapter for SimpleRequest {
    fn query(&self) -> Mapping {
        to_mapping(&self.query_params)
    }

    fn multi_query(&self) -> Mapping {
        to_multi_mapping(&self.query_params)
    }

    fn header(&self) -> Mapping {
        to_mapping(&self.headers)
    }

    fn cookie(&self) -> Mapping {
        to_mapping(&self.cookies)
    }

    fn path(&self) -> Mapping {
        to_mapping(&self.path_params)
    }

    fn body(&self) -> Value {
        self.body.clone().unwrap_or(Value::Null)
    }

    fn form(&self) -> Mapping {
        to_mapping(&self.form)
    }

    fn multi_form(&self) -> Mapping {
        to_multi_mapping(&self.form)
    }

    fn file(&self) -> Mapping {
        self.files.clone()
    }

    fn method(&self) -> Method {
        self.method.clone()
    }

    fn url_path(&self) -> &str {
        &self.path
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
