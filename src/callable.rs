//! # Callable Module
//!
//! Handlers and dependencies are both [`Callable`]s: a name, a declared
//! [`Signature`] and a body. The body decides how the engine invokes it:
//!
//! | Body                      | Constructor                    | Notes |
//! |---------------------------|--------------------------------|-------|
//! | synchronous               | [`Callable::sync`]             | may be marked [`sync_to_thread`](Callable::sync_to_thread) |
//! | asynchronous              | [`Callable::new_async`]        | async routes only |
//! | scoped (acquire/release)  | [`Callable::scoped`]           | dependencies only |
//! | async scoped              | [`Callable::scoped_async`]     | dependencies and async routes only |
//!
//! A scoped body returns a [`Scoped`] value: the resolved value plus a release
//! function. The engine keeps the release until the whole request (remaining
//! resolution, post plugins and the handler) is over, then runs it exactly once
//! whatever the outcome.
//!
//! Every callable gets a process-unique [`CallableId`] when it is constructed.
//! Clones share the id; plans and signature analyses are cached by it.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::request::RequestAdapter;
use crate::signature::{Param, Signature};
use crate::types::ParamType;
use crate::field::Field;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Identity of a callable (and of its clones).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallableId(u64);

/// Identity of a handler class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(u64);

/// A value produced by resolution or returned by a callable.
#[derive(Clone)]
pub enum Resolved {
    Value(Value),
    Request(Arc<dyn RequestAdapter>),
    Instance(Arc<HandlerInstance>),
    /// Any shared Rust value, such as a connection handle.
    Object(Arc<dyn Any + Send + Sync>),
}

impl Resolved {
    pub fn object<T: Any + Send + Sync>(value: T) -> Self {
        Resolved::Object(Arc::new(value))
    }

    #[must_use]
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Resolved::Value(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_value(self) -> Option<Value> {
        match self {
            Resolved::Value(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            Resolved::Object(obj) => Arc::clone(obj).downcast::<T>().ok(),
            _ => None,
        }
    }

    /// Whether the value counts as provided (anything but `null`).
    #[must_use]
    pub fn is_present(&self) -> bool {
        !matches!(self, Resolved::Value(Value::Null))
    }
}

impl From<Value> for Resolved {
    fn from(v: Value) -> Self {
        Resolved::Value(v)
    }
}

impl fmt::Debug for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolved::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Resolved::Request(_) => f.write_str("Request"),
            Resolved::Instance(i) => f.debug_tuple("Instance").field(&i.class().name()).finish(),
            Resolved::Object(_) => f.write_str("Object"),
        }
    }
}

/// Arguments a callable is invoked with.
#[derive(Clone, Debug, Default)]
pub struct Arguments {
    positional: Vec<Resolved>,
    keyword: Vec<(String, Resolved)>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_positional(&mut self, value: Resolved) {
        self.positional.push(value);
    }

    /// Insert or replace a keyword argument, keeping declaration order.
    pub fn insert(&mut self, name: impl Into<String>, value: Resolved) {
        let name = name.into();
        match self.keyword.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.keyword.push((name, value)),
        }
    }

    #[must_use]
    pub fn positional(&self) -> &[Resolved] {
        &self.positional
    }

    #[must_use]
    pub fn keyword(&self) -> &[(String, Resolved)] {
        &self.keyword
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Resolved> {
        self.keyword.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    #[must_use]
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.get(name).and_then(Resolved::as_value)
    }

    /// Deserialize a keyword argument into `T`.
    ///
    /// # Errors
    ///
    /// When the argument is absent, is not a JSON value, or does not fit `T`.
    pub fn parse<T: DeserializeOwned>(&self, name: &str) -> anyhow::Result<T> {
        let value = self
            .value(name)
            .ok_or_else(|| anyhow::anyhow!("argument `{name}` is not a value"))?;
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Shared object returned by a dependency.
    ///
    /// # Errors
    ///
    /// When the argument is absent or holds another type.
    pub fn object<T: Any + Send + Sync>(&self, name: &str) -> anyhow::Result<Arc<T>> {
        self.get(name)
            .and_then(Resolved::downcast::<T>)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "argument `{name}` is not a {}",
                    std::any::type_name::<T>()
                )
            })
    }

    /// The request object passed as `name`.
    #[must_use]
    pub fn request(&self, name: &str) -> Option<&Arc<dyn RequestAdapter>> {
        match self.get(name) {
            Some(Resolved::Request(r)) => Some(r),
            _ => None,
        }
    }

    /// The handler instance, first positional argument of class-based handlers.
    #[must_use]
    pub fn instance(&self) -> Option<&Arc<HandlerInstance>> {
        self.positional.iter().find_map(|r| match r {
            Resolved::Instance(i) => Some(i),
            _ => None,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.positional.len() + self.keyword.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// How the request ended, as seen by a scoped release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeExit {
    Success,
    Error,
}

pub(crate) enum Release {
    Sync(Box<dyn FnOnce(ScopeExit) + Send>),
    Async(Box<dyn FnOnce(ScopeExit) -> BoxFuture<'static, ()> + Send>),
}

/// Value of a scoped dependency together with its release.
pub struct Scoped {
    pub(crate) value: Resolved,
    pub(crate) release: Release,
}

impl Scoped {
    pub fn new<F>(value: impl Into<Resolved>, release: F) -> Self
    where
        F: FnOnce(ScopeExit) + Send + 'static,
    {
        Scoped {
            value: value.into(),
            release: Release::Sync(Box::new(release)),
        }
    }

    pub fn new_async<F, Fut>(value: impl Into<Resolved>, release: F) -> Self
    where
        F: FnOnce(ScopeExit) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        Scoped {
            value: value.into(),
            release: Release::Async(Box::new(move |exit| Box::pin(release(exit)))),
        }
    }
}

pub(crate) type SyncFn = Arc<dyn Fn(Arguments) -> anyhow::Result<Resolved> + Send + Sync>;
pub(crate) type AsyncFn =
    Arc<dyn Fn(Arguments) -> BoxFuture<'static, anyhow::Result<Resolved>> + Send + Sync>;
pub(crate) type ScopedFn = Arc<dyn Fn(Arguments) -> anyhow::Result<Scoped> + Send + Sync>;
pub(crate) type AsyncScopedFn =
    Arc<dyn Fn(Arguments) -> BoxFuture<'static, anyhow::Result<Scoped>> + Send + Sync>;

#[derive(Clone)]
pub(crate) enum CallableBody {
    Sync(SyncFn),
    Async(AsyncFn),
    Scoped(ScopedFn),
    AsyncScoped(AsyncScopedFn),
}

impl CallableBody {
    pub(crate) fn is_async(&self) -> bool {
        matches!(self, CallableBody::Async(_) | CallableBody::AsyncScoped(_))
    }

    pub(crate) fn is_scoped(&self) -> bool {
        matches!(self, CallableBody::Scoped(_) | CallableBody::AsyncScoped(_))
    }
}

struct CallableInner {
    id: CallableId,
    name: String,
    signature: Signature,
    body: CallableBody,
    sync_to_thread: bool,
    class: Option<HandlerClass>,
}

/// A handler or dependency. Cheap to clone; clones share identity.
#[derive(Clone)]
pub struct Callable {
    inner: Arc<CallableInner>,
}

impl Callable {
    fn with_body(name: impl Into<String>, signature: Signature, body: CallableBody) -> Self {
        Callable {
            inner: Arc::new(CallableInner {
                id: CallableId(next_id()),
                name: name.into(),
                signature,
                body,
                sync_to_thread: false,
                class: None,
            }),
        }
    }

    pub fn sync<F, R>(name: impl Into<String>, signature: Signature, f: F) -> Self
    where
        F: Fn(Arguments) -> anyhow::Result<R> + Send + Sync + 'static,
        R: Into<Resolved>,
    {
        let body: SyncFn = Arc::new(move |args| f(args).map(Into::into));
        Self::with_body(name, signature, CallableBody::Sync(body))
    }

    pub fn new_async<F, Fut, R>(name: impl Into<String>, signature: Signature, f: F) -> Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<R>> + Send + 'static,
        R: Into<Resolved>,
    {
        let body: AsyncFn = Arc::new(move |args| {
            let fut = f(args);
            Box::pin(async move { fut.await.map(Into::into) })
        });
        Self::with_body(name, signature, CallableBody::Async(body))
    }

    pub fn scoped<F>(name: impl Into<String>, signature: Signature, f: F) -> Self
    where
        F: Fn(Arguments) -> anyhow::Result<Scoped> + Send + Sync + 'static,
    {
        Self::with_body(name, signature, CallableBody::Scoped(Arc::new(f)))
    }

    pub fn scoped_async<F, Fut>(name: impl Into<String>, signature: Signature, f: F) -> Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = anyhow::Result<Scoped>> + Send + 'static,
    {
        let body: AsyncScopedFn = Arc::new(move |args| Box::pin(f(args)));
        Self::with_body(name, signature, CallableBody::AsyncScoped(body))
    }

    /// Offload the synchronous body to a blocking worker in async routes.
    ///
    /// Returns a new callable with its own identity.
    #[must_use]
    pub fn sync_to_thread(self) -> Self {
        self.map_inner(|inner| inner.sync_to_thread = true)
    }

    /// Declare the callable as a method of a class-based handler.
    #[must_use]
    pub fn method_of(self, class: &HandlerClass) -> Self {
        let class = class.clone();
        self.map_inner(move |inner| inner.class = Some(class))
    }

    fn map_inner(self, f: impl FnOnce(&mut CallableInner)) -> Self {
        let shared = self.inner;
        let mut inner = CallableInner {
            id: CallableId(next_id()),
            name: shared.name.clone(),
            signature: shared.signature.clone(),
            body: shared.body.clone(),
            sync_to_thread: shared.sync_to_thread,
            class: shared.class.clone(),
        };
        f(&mut inner);
        Callable {
            inner: Arc::new(inner),
        }
    }

    #[must_use]
    pub fn id(&self) -> CallableId {
        self.inner.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn signature(&self) -> &Signature {
        &self.inner.signature
    }

    #[must_use]
    pub fn is_async(&self) -> bool {
        self.inner.body.is_async()
    }

    #[must_use]
    pub fn is_scoped(&self) -> bool {
        self.inner.body.is_scoped()
    }

    #[must_use]
    pub fn is_sync_to_thread(&self) -> bool {
        self.inner.sync_to_thread
    }

    #[must_use]
    pub fn class(&self) -> Option<&HandlerClass> {
        self.inner.class.as_ref()
    }

    pub(crate) fn body(&self) -> &CallableBody {
        &self.inner.body
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callable")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("async", &self.is_async())
            .field("scoped", &self.is_scoped())
            .field("sync_to_thread", &self.inner.sync_to_thread)
            .finish()
    }
}

struct ClassInner {
    id: ClassId,
    name: String,
    attributes: Vec<Param>,
}

/// Declaring class of class-based handlers.
///
/// Attributes are field-described values resolved once per request and
/// attached to the [`HandlerInstance`] before the handler method runs.
#[derive(Clone)]
pub struct HandlerClass {
    inner: Arc<ClassInner>,
}

impl HandlerClass {
    pub fn new(name: impl Into<String>) -> Self {
        HandlerClass {
            inner: Arc::new(ClassInner {
                id: ClassId(next_id()),
                name: name.into(),
                attributes: Vec::new(),
            }),
        }
    }

    /// Add a class attribute. Must be called before the class is cloned.
    #[must_use]
    pub fn attribute(self, name: impl Into<String>, ty: ParamType, field: Field) -> Self {
        let mut inner = match Arc::try_unwrap(self.inner) {
            Ok(inner) => inner,
            Err(shared) => ClassInner {
                id: ClassId(next_id()),
                name: shared.name.clone(),
                attributes: shared.attributes.clone(),
            },
        };
        inner.attributes.push(Param::new(name, ty, Some(field)));
        HandlerClass {
            inner: Arc::new(inner),
        }
    }

    #[must_use]
    pub fn id(&self) -> ClassId {
        self.inner.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[must_use]
    pub fn attributes(&self) -> &[Param] {
        &self.inner.attributes
    }

    /// A fresh instance carrying `state`.
    pub fn instantiate<S: Any + Send + Sync>(&self, state: S) -> Arc<HandlerInstance> {
        Arc::new(HandlerInstance {
            class: self.clone(),
            state: Arc::new(state),
            attributes: RwLock::new(Vec::new()),
        })
    }
}

impl fmt::Debug for HandlerClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerClass")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("attributes", &self.inner.attributes.len())
            .finish()
    }
}

/// Per-request instance of a [`HandlerClass`].
pub struct HandlerInstance {
    class: HandlerClass,
    state: Arc<dyn Any + Send + Sync>,
    attributes: RwLock<Vec<(String, Resolved)>>,
}

impl HandlerInstance {
    #[must_use]
    pub fn class(&self) -> &HandlerClass {
        &self.class
    }

    #[must_use]
    pub fn state<S: Any + Send + Sync>(&self) -> Option<&S> {
        self.state.downcast_ref::<S>()
    }

    /// A resolved class attribute.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<Resolved> {
        self.attributes
            .read()
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    }

    #[must_use]
    pub fn attribute_value(&self, name: &str) -> Option<Value> {
        self.attribute(name).and_then(Resolved::into_value)
    }

    pub(crate) fn set_attribute(&self, name: &str, value: Resolved) {
        let mut attrs = self.attributes.write();
        match attrs.iter_mut().find(|(k, _)| k == name) {
            Some(slot) => slot.1 = value,
            None => attrs.push((name.to_string(), value)),
        }
    }
}

impl fmt::Debug for HandlerInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerInstance")
            .field("class", &self.class.name())
            .finish()
    }
}
