use std::sync::Arc;

use futures::future::BoxFuture;

use crate::bind::RawCall;
use crate::callable::{Arguments, Resolved};
use crate::context::Context;
use crate::core_model::CoreModel;
use crate::error::{BindError, ConfigurationError};

/// One call flowing through a plugin chain.
pub struct Invocation {
    pub core: Arc<CoreModel>,
    pub context: Context,
    /// The call as the framework made it, untouched.
    pub raw: RawCall,
    /// Resolved arguments. Only set for post plugins.
    pub arguments: Option<Arguments>,
}

/// Synchronous plugin.
///
/// `call` runs the rest of the chain through `next`; returning without calling
/// it short-circuits the handler.
pub trait Plugin: Send + Sync + 'static {
    /// Registration hook. An error rejects the route.
    fn check(&self, _core: &CoreModel) -> Result<(), ConfigurationError> {
        Ok(())
    }

    /// The plugin reads [`Invocation::arguments`] and only works in the post
    /// chain.
    fn post_only(&self) -> bool {
        false
    }

    fn call(&self, inv: Invocation, next: Next<'_>) -> Result<Resolved, BindError>;
}

/// Asynchronous plugin.
pub trait AsyncPlugin: Send + Sync + 'static {
    /// Registration hook. An error rejects the route.
    fn check(&self, _core: &CoreModel) -> Result<(), ConfigurationError> {
        Ok(())
    }

    fn post_only(&self) -> bool {
        false
    }

    fn call<'a>(&'a self, inv: Invocation, next: AsyncNext<'a>) -> BoxFuture<'a, Result<Resolved, BindError>>;
}

/// Innermost link of a synchronous chain.
pub(crate) trait SyncTerminal {
    fn call(&self, inv: Invocation) -> Result<Resolved, BindError>;
}

/// Innermost link of an asynchronous chain.
pub(crate) trait AsyncTerminal: Send + Sync {
    fn call<'a>(&'a self, inv: Invocation) -> BoxFuture<'a, Result<Resolved, BindError>>;
}

/// Remaining links of a synchronous chain.
pub struct Next<'a> {
    plugins: &'a [Arc<dyn Plugin>],
    terminal: &'a dyn SyncTerminal,
}

impl<'a> Next<'a> {
    pub(crate) fn new(plugins: &'a [Arc<dyn Plugin>], terminal: &'a dyn SyncTerminal) -> Self {
        Next { plugins, terminal }
    }

    /// Call the next plugin, or the terminal when none is left.
    pub fn run(self, inv: Invocation) -> Result<Resolved, BindError> {
        match self.plugins.split_first() {
            Some((plugin, rest)) => plugin.call(inv, Next::new(rest, self.terminal)),
            None => self.terminal.call(inv),
        }
    }

    /// Plugins left before the terminal.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.plugins.len()
    }
}

/// Remaining links of an asynchronous chain.
pub struct AsyncNext<'a> {
    plugins: &'a [Arc<dyn AsyncPlugin>],
    terminal: &'a dyn AsyncTerminal,
}

impl<'a> AsyncNext<'a> {
    pub(crate) fn new(plugins: &'a [Arc<dyn AsyncPlugin>], terminal: &'a dyn AsyncTerminal) -> Self {
        AsyncNext { plugins, terminal }
    }

    pub fn run(self, inv: Invocation) -> BoxFuture<'a, Result<Resolved, BindError>> {
        match self.plugins.split_first() {
            Some((plugin, rest)) => plugin.call(inv, AsyncNext::new(rest, self.terminal)),
            None => self.terminal.call(inv),
        }
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.plugins.len()
    }
}

/// A configured plugin, usable in sync routes, async routes, or both.
#[derive(Clone)]
pub struct PluginEntry {
    name: &'static str,
    sync: Option<Arc<dyn Plugin>>,
    asynchronous: Option<Arc<dyn AsyncPlugin>>,
}

impl PluginEntry {
    pub fn sync<P: Plugin>(plugin: P) -> Self {
        Self::sync_arc(Arc::new(plugin))
    }

    pub fn sync_arc<P: Plugin>(plugin: Arc<P>) -> Self {
        PluginEntry {
            name: std::any::type_name::<P>(),
            sync: Some(plugin),
            asynchronous: None,
        }
    }

    pub fn asynchronous<P: AsyncPlugin>(plugin: P) -> Self {
        Self::asynchronous_arc(Arc::new(plugin))
    }

    pub fn asynchronous_arc<P: AsyncPlugin>(plugin: Arc<P>) -> Self {
        PluginEntry {
            name: std::any::type_name::<P>(),
            sync: None,
            asynchronous: Some(plugin),
        }
    }

    /// A plugin implementing both traits.
    pub fn dual<P: Plugin + AsyncPlugin>(plugin: P) -> Self {
        Self::dual_arc(Arc::new(plugin))
    }

    /// Shared form of [`dual`](Self::dual), for plugins the caller keeps a
    /// handle to (counters, caches).
    pub fn dual_arc<P: Plugin + AsyncPlugin>(plugin: Arc<P>) -> Self {
        let sync: Arc<dyn Plugin> = Arc::clone(&plugin) as Arc<dyn Plugin>;
        PluginEntry {
            name: std::any::type_name::<P>(),
            sync: Some(sync),
            asynchronous: Some(plugin),
        }
    }

    /// Type name of the plugin.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn supports_sync(&self) -> bool {
        self.sync.is_some()
    }

    #[must_use]
    pub fn supports_async(&self) -> bool {
        self.asynchronous.is_some()
    }

    /// Run the registration hook.
    ///
    /// # Errors
    ///
    /// Whatever the plugin's `check` returns.
    pub fn check(&self, core: &CoreModel) -> Result<(), ConfigurationError> {
        match (&self.sync, &self.asynchronous) {
            (Some(p), _) => p.check(core),
            (None, Some(p)) => p.check(core),
            (None, None) => Ok(()),
        }
    }

    /// Whether either implementation is restricted to the post chain.
    #[must_use]
    pub fn post_only(&self) -> bool {
        self.sync.as_ref().is_some_and(|p| p.post_only())
            || self.asynchronous.as_ref().is_some_and(|p| p.post_only())
    }

    pub(crate) fn sync_plugin(&self) -> Option<Arc<dyn Plugin>> {
        self.sync.as_ref().map(Arc::clone)
    }

    pub(crate) fn async_plugin(&self) -> Option<Arc<dyn AsyncPlugin>> {
        self.asynchronous.as_ref().map(Arc::clone)
    }
}

impl std::fmt::Debug for PluginEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginEntry")
            .field("name", &self.name)
            .field("sync", &self.supports_sync())
            .field("async", &self.supports_async())
            .finish()
    }
}
