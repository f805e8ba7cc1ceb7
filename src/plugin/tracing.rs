use std::time::Instant;

use futures::future::BoxFuture;
use tracing::{info, info_span, warn, Instrument};

use super::core::{AsyncNext, AsyncPlugin, Invocation, Next, Plugin};
use crate::callable::Resolved;
use crate::error::BindError;

/// Opens a span per call and logs the outcome with its latency.
///
/// Works as a pre plugin (spans argument resolution too) or a post plugin.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingPlugin;

fn log_outcome(route: &str, latency_ms: u64, result: &Result<Resolved, BindError>) {
    match result {
        Ok(_) => info!(route = %route, latency_ms, "Handler call completed"),
        Err(e) if e.is_client_error() => {
            warn!(route = %route, latency_ms, error = %e, "Handler call rejected")
        }
        Err(e) => warn!(route = %route, latency_ms, error = %e, "Handler call failed"),
    }
}

impl Plugin for TracingPlugin {
    fn call(&self, inv: Invocation, next: Next<'_>) -> Result<Resolved, BindError> {
        let route = inv.core.route_id.clone();
        let span = info_span!(
            "bind_call",
            route = %route,
            request_id = %inv.context.request_id(),
            method = %inv.context.request().method(),
            path = %inv.context.request().url_path()
        );
        let _entered = span.enter();
        let start = Instant::now();
        let result = next.run(inv);
        log_outcome(&route, start.elapsed().as_millis() as u64, &result);
        result
    }
}

impl AsyncPlugin for TracingPlugin {
    fn call<'a>(&'a self, inv: Invocation, next: AsyncNext<'a>) -> BoxFuture<'a, Result<Resolved, BindError>> {
        let route = inv.core.route_id.clone();
        let span = info_span!(
            "bind_call",
            route = %route,
            request_id = %inv.context.request_id(),
            method = %inv.context.request().method(),
            path = %inv.context.request().url_path()
        );
        Box::pin(
            async move {
                let start = Instant::now();
                let result = next.run(inv).await;
                log_outcome(&route, start.elapsed().as_millis() as u64, &result);
                result
            }
            .instrument(span),
        )
    }
}
