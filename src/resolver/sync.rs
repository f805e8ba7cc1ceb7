use tracing::debug;

use super::{value, RequestScope};
use crate::callable::{Arguments, CallableBody, Resolved};
use crate::error::BindError;
use crate::plan::{ParamRule, ResolutionPlan, SubPlan};

/// Resolve the arguments of `plan`'s target.
///
/// Pre-depends first, then class attributes, then parameters in declaration
/// order. Every dependency is fully resolved and invoked before the value that
/// consumes it.
pub(crate) fn resolve(plan: &ResolutionPlan, scope: &RequestScope) -> Result<Arguments, BindError> {
    for pre in &plan.pre_depends {
        invoke(pre, scope)?;
    }

    let mut args = Arguments::new();
    if plan.target.class().is_some() {
        let instance = scope.require_instance()?;
        for rule in &plan.class_attributes {
            let value = resolve_rule(rule, plan, scope)?;
            instance.set_attribute(&rule.name, value);
        }
        args.push_positional(Resolved::Instance(instance));
    }

    for rule in &plan.rules {
        let value = resolve_rule(rule, plan, scope)?;
        args.insert(rule.name.clone(), value);
    }
    Ok(args)
}

fn resolve_rule(rule: &ParamRule, plan: &ResolutionPlan, scope: &RequestScope) -> Result<Resolved, BindError> {
    match &rule.sub_plan {
        Some(SubPlan::Callable(sub)) => invoke(sub, scope),
        _ => value::resolve_leaf(rule, plan.target.name(), scope),
    }
}

/// Resolve and call a dependency. `sync_to_thread` has no effect here: the
/// body already runs off any event loop.
pub(crate) fn invoke(plan: &ResolutionPlan, scope: &RequestScope) -> Result<Resolved, BindError> {
    let args = resolve(plan, scope)?;
    let target = &plan.target;
    debug!(dependency = %target.name(), route = %scope.ctx.route_id(), "Invoking dependency");
    match target.body() {
        CallableBody::Sync(f) => f(args).map_err(BindError::dependency),
        CallableBody::Scoped(f) => {
            let scoped = f(args).map_err(BindError::dependency)?;
            scope.exits.push(target.name(), scoped.release);
            Ok(scoped.value)
        }
        CallableBody::Async(_) | CallableBody::AsyncScoped(_) => Err(BindError::ModeMismatch {
            route: scope.ctx.route_id().to_string(),
        }),
    }
}

/// Call the route handler itself with resolved arguments.
pub(crate) fn call_handler(plan: &ResolutionPlan, args: Arguments) -> Result<Resolved, BindError> {
    match plan.target.body() {
        CallableBody::Sync(f) => f(args).map_err(BindError::handler),
        _ => Err(BindError::ModeMismatch {
            route: plan.target.name().to_string(),
        }),
    }
}
