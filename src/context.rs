//! # Context Module
//!
//! Per-request ambient state.
//!
//! ## Overview
//!
//! A [`Context`] is created at the start of each bound-handler call and dropped
//! when the call returns, error paths included. It carries the request adapter,
//! the class-based handler instance (when the call provides one), the route id
//! and a request id.
//!
//! Dependency bodies reach it through [`Context::current`] instead of taking it
//! as an argument, so they can be written without knowing the web framework.
//!
//! ## Storage
//!
//! - Asynchronous calls run inside a `tokio::task_local!` scope. The value moves
//!   with the task across worker threads and is invisible to other tasks.
//! - Synchronous calls, and closures offloaded with `sync_to_thread`, push the
//!   context on a thread-local stack for the duration of a [`ContextGuard`].
//!
//! Every installation takes a sequence number, and [`Context::current`]
//! returns whichever of the task-local and the top of the thread stack was
//! installed last. A synchronous call made from inside an async call's scope
//! therefore sees its own context, not the caller's. Neither store is a
//! process-wide mutable: two concurrent requests never observe each other's
//! context.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::bind::RawCall;
use crate::callable::{HandlerInstance, Resolved};
use crate::core_model::CoreModel;
use crate::ids::RequestId;
use crate::request::RequestAdapter;

static INSTALLS: AtomicU64 = AtomicU64::new(0);

/// A context together with the order in which it was installed.
#[derive(Clone)]
struct Installed {
    seq: u64,
    ctx: Context,
}

impl Installed {
    fn new(ctx: Context) -> Self {
        Installed {
            seq: INSTALLS.fetch_add(1, Ordering::Relaxed),
            ctx,
        }
    }
}

tokio::task_local! {
    static TASK_CONTEXT: Installed;
}

thread_local! {
    static THREAD_CONTEXT: RefCell<Vec<Installed>> = const { RefCell::new(Vec::new()) };
}

struct ContextInner {
    request_id: RequestId,
    route_id: String,
    request: Arc<dyn RequestAdapter>,
    instance: Option<Arc<HandlerInstance>>,
}

/// Ambient state of one request. Cheap to clone.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Build the context of one call of `core`'s handler.
    ///
    /// The first positional argument of `raw` becomes the handler instance when
    /// it is an instance of the handler's declaring class.
    pub fn init(core: &CoreModel, request: Arc<dyn RequestAdapter>, raw: &RawCall) -> Self {
        let instance = match (raw.args.first(), core.func.class()) {
            (Some(Resolved::Instance(inst)), Some(class)) if inst.class().id() == class.id() => {
                Some(Arc::clone(inst))
            }
            _ => None,
        };
        let request_id = RequestId::from_request(request.as_ref());
        Context {
            inner: Arc::new(ContextInner {
                request_id,
                route_id: core.route_id.clone(),
                request,
                instance,
            }),
        }
    }

    /// The context of the request being served on this task or thread.
    #[must_use]
    pub fn current() -> Option<Context> {
        let task = TASK_CONTEXT.try_with(Installed::clone).ok();
        let thread = THREAD_CONTEXT.with(|stack| stack.borrow().last().cloned());
        match (task, thread) {
            (Some(t), Some(h)) => Some(if h.seq > t.seq { h.ctx } else { t.ctx }),
            (t, h) => t.or(h).map(|i| i.ctx),
        }
    }

    #[must_use]
    pub fn request(&self) -> &Arc<dyn RequestAdapter> {
        &self.inner.request
    }

    #[must_use]
    pub fn instance(&self) -> Option<&Arc<HandlerInstance>> {
        self.inner.instance.as_ref()
    }

    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.inner.request_id
    }

    #[must_use]
    pub fn route_id(&self) -> &str {
        &self.inner.route_id
    }

    /// Install on the current thread until the guard is dropped.
    #[must_use = "the context is removed when the guard is dropped"]
    pub fn enter(&self) -> ContextGuard {
        let installed = Installed::new(self.clone());
        THREAD_CONTEXT.with(|stack| stack.borrow_mut().push(installed));
        ContextGuard { _private: () }
    }

    /// Run `fut` with this context installed as the task-local context.
    pub async fn scope<F: Future>(self, fut: F) -> F::Output {
        TASK_CONTEXT.scope(Installed::new(self), fut).await
    }

    #[cfg(test)]
    pub(crate) fn for_test(request: Arc<dyn RequestAdapter>, instance: Option<Arc<HandlerInstance>>) -> Self {
        Context {
            inner: Arc::new(ContextInner {
                request_id: RequestId::new(),
                route_id: "test".to_string(),
                request,
                instance,
            }),
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("request_id", &self.inner.request_id)
            .field("route_id", &self.inner.route_id)
            .field("instance", &self.inner.instance.is_some())
            .finish()
    }
}

/// Pops the thread-local context on drop.
pub struct ContextGuard {
    _private: (),
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        THREAD_CONTEXT.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}
