use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::future::BoxFuture;

use super::core::{AsyncNext, AsyncPlugin, Invocation, Next, Plugin};
use crate::callable::Resolved;
use crate::error::BindError;

#[derive(Default)]
struct Counters {
    calls: AtomicU64,
    client_errors: AtomicU64,
    errors: AtomicU64,
    total_latency_ns: AtomicU64,
}

impl Counters {
    fn record(&self, latency: Duration, result: &Result<Resolved, BindError>) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ns
            .fetch_add(latency.as_nanos() as u64, Ordering::Relaxed);
        match result {
            Ok(_) => {}
            Err(e) if e.is_client_error() => {
                self.client_errors.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn snapshot(&self) -> CallStats {
        let calls = self.calls.load(Ordering::Relaxed);
        let total = self.total_latency_ns.load(Ordering::Relaxed);
        CallStats {
            calls,
            client_errors: self.client_errors.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            average_latency: if calls == 0 {
                Duration::from_nanos(0)
            } else {
                Duration::from_nanos(total / calls)
            },
        }
    }
}

/// Point-in-time view of the counters of one route (or all of them).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallStats {
    pub calls: u64,
    /// Value-not-found and validation failures.
    pub client_errors: u64,
    /// Dependency, handler and other failures.
    pub errors: u64,
    pub average_latency: Duration,
}

/// Plugin collecting call counts, failures and latency
///
/// All counters use atomic operations for thread-safe updates without locks.
/// Keep an `Arc` and register it with
/// [`PluginEntry::dual_arc`](super::PluginEntry::dual_arc) to read the numbers.
#[derive(Default)]
pub struct MetricsPlugin {
    total: Counters,
    per_route: DashMap<String, Arc<Counters>>,
}

impl MetricsPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Totals across every route the plugin is attached to.
    #[must_use]
    pub fn stats(&self) -> CallStats {
        self.total.snapshot()
    }

    #[must_use]
    pub fn route_stats(&self, route: &str) -> Option<CallStats> {
        self.per_route.get(route).map(|c| c.snapshot())
    }

    fn record(&self, route: &str, latency: Duration, result: &Result<Resolved, BindError>) {
        self.total.record(latency, result);
        // The read guard must be gone before `entry` takes the shard write lock
        let existing = self.per_route.get(route).map(|c| Arc::clone(c.value()));
        let counters = existing.unwrap_or_else(|| {
            Arc::clone(self.per_route.entry(route.to_string()).or_default().value())
        });
        counters.record(latency, result);
    }
}

impl Plugin for MetricsPlugin {
    fn call(&self, inv: Invocation, next: Next<'_>) -> Result<Resolved, BindError> {
        let route = inv.core.route_id.clone();
        let start = Instant::now();
        let result = next.run(inv);
        self.record(&route, start.elapsed(), &result);
        result
    }
}

impl AsyncPlugin for MetricsPlugin {
    fn call<'a>(&'a self, inv: Invocation, next: AsyncNext<'a>) -> BoxFuture<'a, Result<Resolved, BindError>> {
        Box::pin(async move {
            let route = inv.core.route_id.clone();
            let start = Instant::now();
            let result = next.run(inv).await;
            self.record(&route, start.elapsed(), &result);
            result
        })
    }
}
