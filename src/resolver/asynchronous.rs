use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use super::{value, RequestScope};
use crate::callable::{Arguments, CallableBody, Resolved};
use crate::error::BindError;
use crate::plan::{ParamRule, ResolutionPlan, SubPlan};

/// Asynchronous counterpart of [`super::sync::resolve`], same order.
///
/// Siblings are resolved one after the other, never concurrently.
pub(crate) fn resolve<'a>(
    plan: &'a ResolutionPlan,
    scope: &'a RequestScope,
) -> BoxFuture<'a, Result<Arguments, BindError>> {
    Box::pin(async move {
        for pre in &plan.pre_depends {
            invoke(pre, scope).await?;
        }

        let mut args = Arguments::new();
        if plan.target.class().is_some() {
            let instance = scope.require_instance()?;
            for rule in &plan.class_attributes {
                let value = resolve_rule(rule, plan, scope).await?;
                instance.set_attribute(&rule.name, value);
            }
            args.push_positional(Resolved::Instance(instance));
        }

        for rule in &plan.rules {
            let value = resolve_rule(rule, plan, scope).await?;
            args.insert(rule.name.clone(), value);
        }
        Ok(args)
    })
}

async fn resolve_rule(
    rule: &ParamRule,
    plan: &ResolutionPlan,
    scope: &RequestScope,
) -> Result<Resolved, BindError> {
    match &rule.sub_plan {
        Some(SubPlan::Callable(sub)) => invoke(sub, scope).await,
        _ => value::resolve_leaf(rule, plan.target.name(), scope),
    }
}

/// Resolve and call a dependency.
///
/// A `sync_to_thread` body runs on tokio's blocking pool with the request
/// context installed on the worker thread, and is awaited in place.
pub(crate) fn invoke<'a>(
    plan: &'a ResolutionPlan,
    scope: &'a RequestScope,
) -> BoxFuture<'a, Result<Resolved, BindError>> {
    Box::pin(async move {
        let args = resolve(plan, scope).await?;
        let target = &plan.target;
        debug!(
            dependency = %target.name(),
            route = %scope.ctx.route_id(),
            offloaded = target.is_sync_to_thread(),
            "Invoking dependency"
        );
        match target.body() {
            CallableBody::Sync(f) if target.is_sync_to_thread() => {
                let f = Arc::clone(f);
                let ctx = scope.ctx.clone();
                let joined = tokio::task::spawn_blocking(move || {
                    let _guard = ctx.enter();
                    f(args)
                })
                .await
                .map_err(|e| BindError::Dependency(anyhow::Error::new(e)))?;
                joined.map_err(BindError::dependency)
            }
            CallableBody::Sync(f) => f(args).map_err(BindError::dependency),
            CallableBody::Async(f) => f(args).await.map_err(BindError::dependency),
            CallableBody::Scoped(f) => {
                let scoped = f(args).map_err(BindError::dependency)?;
                scope.exits.push(target.name(), scoped.release);
                Ok(scoped.value)
            }
            CallableBody::AsyncScoped(f) => {
                let scoped = f(args).await.map_err(BindError::dependency)?;
                scope.exits.push(target.name(), scoped.release);
                Ok(scoped.value)
            }
        }
    })
}

/// Call the route handler itself with resolved arguments.
pub(crate) async fn call_handler(plan: &ResolutionPlan, args: Arguments) -> Result<Resolved, BindError> {
    match plan.target.body() {
        CallableBody::Async(f) => f(args).await.map_err(BindError::handler),
        CallableBody::Sync(f) => f(args).map_err(BindError::handler),
        CallableBody::Scoped(_) | CallableBody::AsyncScoped(_) => Err(BindError::ModeMismatch {
            route: plan.target.name().to_string(),
        }),
    }
}
