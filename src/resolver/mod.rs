//! # Resolver Module
//!
//! Request-time engine that walks a [`ResolutionPlan`](crate::plan::ResolutionPlan)
//! against the current [`Context`] and produces the call [`Arguments`](crate::callable::Arguments).
//!
//! ## Order
//!
//! For one request:
//!
//! 1. pre-depends, in declaration order
//! 2. class attributes, attached to the handler instance
//! 3. parameters, in declaration order
//!
//! Each step is post-order: a dependency's own arguments are resolved, then the
//! dependency is called, then its value is used. Siblings never run
//! concurrently.
//!
//! ## Sync and Async
//!
//! [`sync`] and [`asynchronous`] share the same structure. The only suspension
//! points of the async walk are awaiting an async dependency, awaiting a
//! `sync_to_thread` body on the blocking pool, and the plugin chain around it.
//! Lookups, coercion and validation ([`value`]) are synchronous in both.
//!
//! ## Scoped Dependencies
//!
//! Releases of scoped dependencies go on the request's [`ExitStack`]. The
//! bound handler closes the stack after the handler (and post plugins) return,
//! or as soon as resolution fails, so releases bracket the whole remaining
//! request. The order is LIFO over the combined acquisition order of
//! pre-depends and ordinary dependencies.

pub(crate) mod asynchronous;
mod scope;
pub(crate) mod sync;
mod value;

use std::sync::Arc;

pub(crate) use scope::ExitStack;

use crate::callable::HandlerInstance;
use crate::context::Context;
use crate::error::BindError;
use value::Sources;

/// Request-local resolution state.
pub(crate) struct RequestScope {
    pub(crate) ctx: Context,
    pub(crate) exits: ExitStack,
    pub(crate) tip: bool,
    sources: Sources,
}

impl RequestScope {
    pub(crate) fn new(ctx: Context, tip: bool) -> Self {
        RequestScope {
            ctx,
            exits: ExitStack::new(),
            tip,
            sources: Sources::default(),
        }
    }

    fn require_instance(&self) -> Result<Arc<HandlerInstance>, BindError> {
        self.ctx
            .instance()
            .map(Arc::clone)
            .ok_or_else(|| BindError::MissingInstance {
                route: self.ctx.route_id().to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callable::{Callable, HandlerClass, Resolved, ScopeExit, Scoped};
    use crate::error::ValidationError;
    use crate::field::Field;
    use crate::plan::{PlanBuilder, PlanCache, ResolutionPlan};
    use crate::request::SimpleRequest;
    use crate::signature::{Signature, SignatureAnalyzer};
    use crate::types::{Model, ParamType};
    use crate::validator_cache::SchemaCache;
    use http::Method;
    use parking_lot::Mutex;
    use serde_json::json;

    fn plan(handler: &Callable, pre: &[Callable]) -> ResolutionPlan {
        let analyzer = SignatureAnalyzer::default();
        let schemas = SchemaCache::default();
        let cache = PlanCache::default();
        PlanBuilder::new(&analyzer, &schemas, &cache)
            .build_route(handler, pre)
            .unwrap()
    }

    fn scope(req: SimpleRequest) -> RequestScope {
        RequestScope::new(Context::for_test(req.into_adapter(), None), true)
    }

    fn noop(sig: Signature) -> Callable {
        Callable::sync("handler", sig, |_| Ok(json!(null)))
    }

    #[test]
    fn test_scalar_coerced_and_validated() {
        let h = noop(Signature::new().param("uid", ParamType::Integer, Field::query().ge(1).build().unwrap()));
        let p = plan(&h, &[]);

        let ok = sync::resolve(&p, &scope(SimpleRequest::new(Method::GET, "/").with_query("uid", "7"))).unwrap();
        assert_eq!(ok.value("uid"), Some(&json!(7)));

        let err = sync::resolve(&p, &scope(SimpleRequest::new(Method::GET, "/").with_query("uid", "0"))).unwrap_err();
        match err {
            BindError::Validation(v) => assert_eq!(v.paths(), vec!["query.uid"]),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_nested_model_reports_every_failure() {
        let model = Model::new("User")
            .field("name", ParamType::String)
            .field_with("age", ParamType::Integer, Field::query().ge(0).build().unwrap())
            .field("nick", ParamType::optional(ParamType::String))
            .build();
        let h = noop(Signature::new().param("user", ParamType::Model(model), Field::query().build().unwrap()));
        let p = plan(&h, &[]);

        let ok = sync::resolve(
            &p,
            &scope(SimpleRequest::new(Method::GET, "/").with_query("name", "ann").with_query("age", "3")),
        )
        .unwrap();
        assert_eq!(ok.value("user"), Some(&json!({"name": "ann", "age": 3})));

        let err = sync::resolve(&p, &scope(SimpleRequest::new(Method::GET, "/").with_query("age", "-1"))).unwrap_err();
        let BindError::Validation(ValidationError { issues, .. }) = err else {
            panic!("expected validation error");
        };
        let paths: Vec<String> = issues.iter().map(|i| i.path()).collect();
        assert_eq!(paths, vec!["query.user.name", "query.user.age"]);
        assert_eq!(issues[0].message, "value not found");
    }

    #[test]
    fn test_scoped_release_registered_on_stack() {
        let released = std::sync::Arc::new(Mutex::new(None));
        let r = std::sync::Arc::clone(&released);
        let conn = Callable::scoped("conn", Signature::new(), move |_| {
            let r = std::sync::Arc::clone(&r);
            Ok(Scoped::new(json!("db"), move |exit| *r.lock() = Some(exit)))
        });
        let h = noop(Signature::new().param("db", ParamType::Any, Field::depends(&conn)));
        let p = plan(&h, &[]);
        let s = scope(SimpleRequest::new(Method::GET, "/"));
        let args = sync::resolve(&p, &s).unwrap();
        assert_eq!(args.value("db"), Some(&json!("db")));
        assert!(released.lock().is_none());
        s.exits.close(ScopeExit::Success);
        assert_eq!(*released.lock(), Some(ScopeExit::Success));
    }

    #[test]
    fn test_class_attributes_attached_to_instance() {
        let class = HandlerClass::new("UserView").attribute(
            "uid",
            ParamType::Integer,
            Field::query().build().unwrap(),
        );
        let h = noop(Signature::new()).method_of(&class);
        let p = plan(&h, &[]);
        let instance = class.instantiate(());
        let req = SimpleRequest::new(Method::GET, "/").with_query("uid", "5");
        let s = RequestScope::new(Context::for_test(req.into_adapter(), Some(std::sync::Arc::clone(&instance))), true);
        let args = sync::resolve(&p, &s).unwrap();
        assert!(matches!(args.positional().first(), Some(Resolved::Instance(_))));
        assert_eq!(instance.attribute_value("uid"), Some(json!(5)));

        let without = sync::resolve(&p, &scope(SimpleRequest::new(Method::GET, "/"))).unwrap_err();
        assert!(matches!(without, BindError::MissingInstance { .. }));
    }
}
