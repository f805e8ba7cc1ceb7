use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use super::RequestScope;
use crate::callable::Resolved;
use crate::error::{BindError, ConfigurationError, ValidationError, ValidationIssue, ValueNotFoundError};
use crate::field::{Field, FieldKind, Lookup};
use crate::plan::{ParamRule, RuleResolver, SubPlan};
use crate::request::{Mapping, RequestAdapter};
use crate::types::ParamType;

const NOT_FOUND: &str = "value not found";

/// Source values fetched from the adapter, at most once per kind per request.
#[derive(Default)]
pub(crate) struct Sources {
    fetched: Mutex<HashMap<FieldKind, Arc<Value>>>,
}

impl Sources {
    pub(crate) fn get(&self, kind: FieldKind, request: &dyn RequestAdapter) -> Arc<Value> {
        let mut fetched = self.fetched.lock();
        Arc::clone(
            fetched
                .entry(kind)
                .or_insert_with(|| Arc::new(fetch(kind, request))),
        )
    }
}

fn fetch(kind: FieldKind, request: &dyn RequestAdapter) -> Value {
    match kind {
        FieldKind::Query => Value::Object(request.query()),
        FieldKind::MultiQuery => Value::Object(request.multi_query()),
        FieldKind::Header => Value::Object(request.header()),
        FieldKind::Cookie => Value::Object(request.cookie()),
        FieldKind::Path => Value::Object(request.path()),
        FieldKind::Form => Value::Object(request.form()),
        FieldKind::MultiForm => Value::Object(request.multi_form()),
        FieldKind::File => Value::Object(request.file()),
        FieldKind::Body => request.body(),
        FieldKind::Depends => Value::Null,
    }
}

fn as_mapping(value: &Value) -> Mapping {
    match value {
        Value::Object(m) => m.clone(),
        _ => Mapping::new(),
    }
}

/// Resolve a rule that needs no callable invocation.
///
/// `owner` is the name of the callable the rule belongs to, used in tips.
pub(crate) fn resolve_leaf(rule: &ParamRule, owner: &str, scope: &RequestScope) -> Result<Resolved, BindError> {
    match &rule.resolver {
        RuleResolver::Request => Ok(Resolved::Request(Arc::clone(scope.ctx.request()))),
        RuleResolver::HandlerInstance => scope
            .ctx
            .instance()
            .map(|i| Resolved::Instance(Arc::clone(i)))
            .ok_or_else(|| BindError::MissingInstance {
                route: scope.ctx.route_id().to_string(),
            }),
        RuleResolver::Scalar { field, key, .. } => {
            let source = scope.sources.get(field.kind(), scope.ctx.request().as_ref());
            match lookup(field, &source, key) {
                Lookup::Missing => Err(missing(rule, field, key, owner, scope.tip)),
                Lookup::Default(v) => Ok(Resolved::Value(v)),
                Lookup::Value(v) => checked(rule, v)
                    .map(Resolved::Value)
                    .map_err(|issues| invalid(rule, owner, issues, scope.tip)),
            }
        }
        // Callers invoke dependency sub-plans themselves
        RuleResolver::Depends => Err(BindError::Configuration(ConfigurationError::UnresolvableParameter {
            callable: owner.to_string(),
            param: rule.name.clone(),
        })),
        _ => pure(rule, scope)
            .map(Resolved::Value)
            .map_err(|issues| invalid(rule, owner, issues, scope.tip)),
    }
}

/// Value of a non-callable rule, or the issues that prevented it.
///
/// Missing nested leaves are reported as issues so one model can report every
/// failing field at once.
fn pure(rule: &ParamRule, scope: &RequestScope) -> Result<Value, Vec<ValidationIssue>> {
    let request = scope.ctx.request().as_ref();
    match (&rule.resolver, &rule.sub_plan) {
        (RuleResolver::Scalar { field, key, .. }, _) => {
            let source = scope.sources.get(field.kind(), request);
            match lookup(field, &source, key) {
                Lookup::Missing => Err(vec![ValidationIssue::new(rule.loc.clone(), NOT_FOUND)]),
                Lookup::Default(v) => Ok(v),
                Lookup::Value(v) => checked(rule, v),
            }
        }
        (RuleResolver::RawMapping { field, .. }, _) => {
            let source = scope.sources.get(field.kind(), request);
            checked(rule, source.as_ref().clone())
        }
        (RuleResolver::RawModel { field, model }, _) => {
            let source = scope.sources.get(field.kind(), request);
            model
                .construct(as_mapping(&source))
                .map_err(|e| vec![ValidationIssue::new(rule.loc.clone(), e.to_string())])
        }
        (RuleResolver::NestedModel { field, model }, Some(SubPlan::Model(fields))) => {
            if !fields.iter().any(|nested| is_supplied(nested, scope)) {
                if let Some(default) = field.default_value() {
                    return Ok(default);
                }
                if matches!(rule.declared, ParamType::Optional(_)) {
                    return Ok(Value::Null);
                }
            }
            let mut values = Mapping::new();
            let mut issues = Vec::new();
            for nested in fields {
                if is_absent_optional(nested, scope) {
                    continue;
                }
                match pure(nested, scope) {
                    Ok(v) => {
                        values.insert(nested.name.clone(), v);
                    }
                    Err(mut found) => issues.append(&mut found),
                }
            }
            if !issues.is_empty() {
                return Err(issues);
            }
            model
                .construct(values)
                .map_err(|e| vec![ValidationIssue::new(rule.loc.clone(), e.to_string())])
        }
        _ => Err(vec![ValidationIssue::new(
            rule.loc.clone(),
            "parameter cannot be resolved from the request",
        )]),
    }
}

fn is_absent_optional(rule: &ParamRule, scope: &RequestScope) -> bool {
    match (&rule.resolver, &rule.declared) {
        (RuleResolver::Scalar { field, key, .. }, ParamType::Optional(_)) => {
            let source = scope.sources.get(field.kind(), scope.ctx.request().as_ref());
            lookup(field, &source, key).is_missing()
        }
        _ => false,
    }
}

/// Whether the request carries a value for a nested model field. Defaults do
/// not count; rules other than plain lookups always do.
fn is_supplied(rule: &ParamRule, scope: &RequestScope) -> bool {
    match &rule.resolver {
        RuleResolver::Scalar { field, key, .. } => {
            let source = scope.sources.get(field.kind(), scope.ctx.request().as_ref());
            match source.as_ref() {
                Value::Object(m) => field.raw_value(m, key).is_some(),
                _ => false,
            }
        }
        _ => true,
    }
}

fn lookup(field: &Field, source: &Value, key: &str) -> Lookup {
    match source {
        Value::Object(m) => field.request_value_handle(m, key),
        _ => field.request_value_handle(&Mapping::new(), key),
    }
}

/// Coerce a present value to the declared type and validate it.
fn checked(rule: &ParamRule, value: Value) -> Result<Value, Vec<ValidationIssue>> {
    let value = rule.declared.coerce(value);
    let schema = match &rule.resolver {
        RuleResolver::Scalar { schema, .. } | RuleResolver::RawMapping { schema, .. } => schema,
        _ => return Ok(value),
    };
    let issues = schema.issues(&value, &rule.loc);
    if issues.is_empty() {
        Ok(value)
    } else {
        Err(issues)
    }
}

fn missing(rule: &ParamRule, field: &Field, key: &str, owner: &str, tip: bool) -> BindError {
    if let Some(handler) = field.not_found_handler() {
        return BindError::Custom(handler(&rule.name, field.kind()));
    }
    let tip = tip.then(|| {
        format!(
            "parameter `{}` of `{}` was not found in {} under key `{}`",
            rule.name,
            owner,
            field.kind(),
            key
        )
    });
    BindError::NotFound(ValueNotFoundError::new(rule.name.clone(), field.kind(), key).with_tip(tip))
}

fn invalid(rule: &ParamRule, owner: &str, issues: Vec<ValidationIssue>, tip: bool) -> BindError {
    let source = rule.loc.first().map_or("request", String::as_str);
    let tip = tip.then(|| format!("invalid parameter `{}` of `{}` in {}", rule.name, owner, source));
    BindError::Validation(ValidationError::new(issues).with_tip(tip))
}
