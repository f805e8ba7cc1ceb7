use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::callable::{Release, ScopeExit};

struct Entry {
    owner: String,
    release: Release,
}

/// Releases of the scoped dependencies acquired during one request.
///
/// Releases run once, last acquired first. [`close`](Self::close) and
/// [`close_async`](Self::close_async) run them on the normal exit paths; if
/// the request is abandoned (a cancelled future) the remaining ones run from
/// `Drop` with [`ScopeExit::Error`].
#[derive(Default)]
pub(crate) struct ExitStack {
    entries: Mutex<Vec<Entry>>,
}

impl ExitStack {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, owner: &str, release: Release) {
        self.entries.lock().push(Entry {
            owner: owner.to_string(),
            release,
        });
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    fn pop(&self) -> Option<Entry> {
        self.entries.lock().pop()
    }

    /// Run every release inline. Async releases are driven to completion on
    /// the calling thread.
    pub(crate) fn close(&self, exit: ScopeExit) {
        while let Some(entry) = self.pop() {
            debug!(dependency = %entry.owner, exit = ?exit, "Releasing scoped dependency");
            match entry.release {
                Release::Sync(f) => f(exit),
                Release::Async(f) => futures::executor::block_on(f(exit)),
            }
        }
    }

    pub(crate) async fn close_async(&self, exit: ScopeExit) {
        while let Some(entry) = self.pop() {
            debug!(dependency = %entry.owner, exit = ?exit, "Releasing scoped dependency");
            match entry.release {
                Release::Sync(f) => f(exit),
                Release::Async(f) => f(exit).await,
            }
        }
    }
}

impl Drop for ExitStack {
    fn drop(&mut self) {
        let entries = std::mem::take(self.entries.get_mut());
        for entry in entries.into_iter().rev() {
            warn!(dependency = %entry.owner, "Releasing scoped dependency of an abandoned request");
            match entry.release {
                Release::Sync(f) => f(ScopeExit::Error),
                Release::Async(f) => match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        handle.spawn(f(ScopeExit::Error));
                    }
                    Err(_) => futures::executor::block_on(f(ScopeExit::Error)),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&'static str) -> Release) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let l = Arc::clone(&log);
        let make = move |name: &'static str| {
            let l = Arc::clone(&l);
            Release::Sync(Box::new(move |exit| l.lock().push(format!("{name}:{exit:?}"))))
        };
        (log, make)
    }

    #[test]
    fn test_close_is_lifo_and_once() {
        let (log, make) = recorder();
        let stack = ExitStack::new();
        stack.push("a", make("a"));
        stack.push("b", make("b"));
        stack.close(ScopeExit::Success);
        stack.close(ScopeExit::Error);
        assert_eq!(*log.lock(), vec!["b:Success", "a:Success"]);
        assert_eq!(stack.len(), 0);
    }

    #[test]
    fn test_drop_releases_with_error() {
        let (log, make) = recorder();
        {
            let stack = ExitStack::new();
            stack.push("a", make("a"));
            stack.push("b", make("b"));
        }
        assert_eq!(*log.lock(), vec!["b:Error", "a:Error"]);
    }
}
