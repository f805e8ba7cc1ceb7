use brrtbind::{
    BindConfig, BindError, Callable, ConfigurationError, Context, Field, HandlerClass, ParamType,
    RawCall, Registry, Resolved, Scoped, Signature,
};
use serde_json::{json, Value};
use std::sync::OnceLock;

mod common;
use common::recorder::Recorder;
use common::{fields, requests};

fn recording(name: &'static str, rec: &Recorder) -> Callable {
    let rec = rec.clone();
    Callable::sync(name, Signature::new(), move |_| {
        rec.push(name);
        Ok(json!(name))
    })
}

fn scoped(name: &'static str, rec: &Recorder) -> Callable {
    let rec = rec.clone();
    Callable::scoped(name, Signature::new(), move |_| {
        rec.push(format!("{name}.acquire"));
        let rec = rec.clone();
        Ok(Scoped::new(json!(name), move |exit| {
            rec.push(format!("{name}.release.{exit:?}"));
        }))
    })
}

#[test]
fn test_pre_depends_then_depends_then_handler() {
    let _tracing = common::test_tracing::init();
    let rec = Recorder::new();
    let c = recording("C", &rec);
    let handler_rec = rec.clone();
    let handler = Callable::sync(
        "handler",
        Signature::new().param("c", ParamType::Any, Field::depends(&c)),
        move |args| {
            handler_rec.push("handler");
            Ok(args.value("c").cloned().unwrap_or(Value::Null))
        },
    );
    let registry = Registry::default();
    let bound = registry
        .bind(
            "ordered",
            handler,
            BindConfig::new()
                .pre_depend(recording("A", &rec))
                .pre_depend(recording("B", &rec)),
        )
        .unwrap();

    for _ in 0..3 {
        let out = bound.call(requests::query(&[]), RawCall::new()).unwrap();
        assert_eq!(out.into_value(), Some(json!("C")));
    }
    assert_eq!(rec.events().len(), 12);
    for chunk in rec.events().chunks(4) {
        assert_eq!(chunk, ["A", "B", "C", "handler"]);
    }
}

#[test]
fn test_dependency_arguments_resolved_first() {
    let token = Callable::sync(
        "token",
        Signature::new().param(
            "authorization",
            ParamType::String,
            Field::header().build().unwrap(),
        ),
        |args| {
            let raw: String = args.parse("authorization")?;
            Ok(json!(raw.trim_start_matches("Bearer ")))
        },
    );
    let handler = Callable::sync(
        "whoami",
        Signature::new().param("token", ParamType::String, Field::depends(&token)),
        |args| Ok(args.value("token").cloned().unwrap_or(Value::Null)),
    );
    let registry = Registry::default();
    let bound = registry.bind("whoami", handler, BindConfig::new()).unwrap();

    let req = requests::get("/").with_header("Authorization", "Bearer abc").into_adapter();
    assert_eq!(bound.call(req, RawCall::new()).unwrap().into_value(), Some(json!("abc")));

    let err = bound.call(requests::query(&[]), RawCall::new()).unwrap_err();
    assert!(matches!(err, BindError::NotFound(ref e) if e.param == "authorization"));
}

#[test]
fn test_scoped_release_runs_once_when_sibling_fails() {
    let rec = Recorder::new();
    let conn = scoped("conn", &rec);
    let handler_rec = rec.clone();
    let handler = Callable::sync(
        "handler",
        Signature::new()
            .param("db", ParamType::Any, Field::depends(&conn))
            .param("uid", ParamType::Integer, Field::query().ge(1).build().unwrap()),
        move |_| {
            handler_rec.push("handler");
            Ok(json!(null))
        },
    );
    let registry = Registry::default();
    let bound = registry.bind("scoped", handler, BindConfig::new()).unwrap();

    let err = bound.call(requests::query(&[("uid", "0")]), RawCall::new()).unwrap_err();
    assert!(matches!(err, BindError::Validation(_)));
    assert_eq!(rec.events(), vec!["conn.acquire", "conn.release.Error"]);
    assert_eq!(rec.count("handler"), 0);
}

#[test]
fn test_scoped_release_after_handler() {
    let rec = Recorder::new();
    let conn = scoped("conn", &rec);
    let handler_rec = rec.clone();
    let handler = Callable::sync(
        "handler",
        Signature::new().param("db", ParamType::Any, Field::depends(&conn)),
        move |_| {
            handler_rec.push("handler");
            Ok(json!(null))
        },
    );
    let registry = Registry::default();
    let bound = registry.bind("scoped", handler, BindConfig::new()).unwrap();
    bound.call(requests::query(&[]), RawCall::new()).unwrap();
    assert_eq!(
        rec.events(),
        vec!["conn.acquire", "handler", "conn.release.Success"]
    );
}

#[test]
fn test_release_is_lifo_across_pre_depends_and_depends() {
    let rec = Recorder::new();
    let outer = scoped("outer", &rec);
    let inner = scoped("inner", &rec);
    let handler = Callable::sync(
        "handler",
        Signature::new().param("inner", ParamType::Any, Field::depends(&inner)),
        |_| -> anyhow::Result<Value> { Err(anyhow::anyhow!("boom")) },
    );
    let registry = Registry::default();
    let bound = registry
        .bind("lifo", handler, BindConfig::new().pre_depend(outer))
        .unwrap();

    let err = bound.call(requests::query(&[]), RawCall::new()).unwrap_err();
    assert!(matches!(err, BindError::Handler(_)));
    assert_eq!(
        rec.events(),
        vec![
            "outer.acquire",
            "inner.acquire",
            "inner.release.Error",
            "outer.release.Error",
        ]
    );
}

#[derive(Debug, thiserror::Error)]
#[error("token expired")]
struct TokenExpired;

#[test]
fn test_dependency_error_passes_through_unchanged() {
    let auth = Callable::sync("auth", Signature::new(), |_| -> anyhow::Result<Value> {
        Err(TokenExpired.into())
    });
    let handler = Callable::sync(
        "handler",
        Signature::new().param("user", ParamType::Any, Field::depends(&auth)),
        |_| Ok(json!(null)),
    );
    let registry = Registry::default();
    let bound = registry.bind("auth", handler, BindConfig::new()).unwrap();

    let err = bound.call(requests::query(&[]), RawCall::new()).unwrap_err();
    assert!(matches!(err, BindError::Dependency(_)));
    assert!(err.source_as::<TokenExpired>().is_some());
    assert_eq!(err.to_string(), "token expired");
}

static CYCLE_A: OnceLock<Callable> = OnceLock::new();
static CYCLE_B: OnceLock<Callable> = OnceLock::new();

fn cycle_a() -> Callable {
    CYCLE_A
        .get_or_init(|| {
            Callable::sync(
                "a",
                Signature::new().param("b", ParamType::Any, Field::depends_lazy(cycle_b)),
                |_| Ok(json!(null)),
            )
        })
        .clone()
}

fn cycle_b() -> Callable {
    CYCLE_B
        .get_or_init(|| {
            Callable::sync(
                "b",
                Signature::new().param("a", ParamType::Any, Field::depends_lazy(cycle_a)),
                |_| Ok(json!(null)),
            )
        })
        .clone()
}

#[test]
fn test_dependency_cycle_rejected_at_bind() {
    let handler = Callable::sync(
        "handler",
        Signature::new().param("a", ParamType::Any, Field::depends_lazy(cycle_a)),
        |_| Ok(json!(null)),
    );
    let registry = Registry::default();
    let err = registry.bind("cycle", handler, BindConfig::new()).unwrap_err();
    assert_eq!(
        err,
        ConfigurationError::DependencyCycle {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        }
    );
    assert!(registry.is_empty());
}

#[test]
fn test_dependency_reads_ambient_context() {
    let path = Callable::sync("path", Signature::new(), |_| {
        let ctx = Context::current().ok_or_else(|| anyhow::anyhow!("no context"))?;
        Ok(json!({"path": ctx.request().url_path(), "route": ctx.route_id()}))
    });
    let handler = Callable::sync(
        "handler",
        Signature::new().param("info", ParamType::Any, Field::depends(&path)),
        |args| Ok(args.value("info").cloned().unwrap_or(Value::Null)),
    );
    let registry = Registry::default();
    let bound = registry.bind("ctx_route", handler, BindConfig::new()).unwrap();

    let out = bound.call(requests::get("/users/7").into_adapter(), RawCall::new()).unwrap();
    assert_eq!(out.into_value(), Some(json!({"path": "/users/7", "route": "ctx_route"})));
    assert!(Context::current().is_none());
}

#[test]
fn test_request_id_taken_from_header() {
    let rid = Callable::sync("rid", Signature::new(), |_| {
        let ctx = Context::current().ok_or_else(|| anyhow::anyhow!("no context"))?;
        Ok(json!(ctx.request_id().to_string()))
    });
    let handler = Callable::sync(
        "handler",
        Signature::new().param("rid", ParamType::String, Field::depends(&rid)),
        |args| Ok(args.value("rid").cloned().unwrap_or(Value::Null)),
    );
    let registry = Registry::default();
    let bound = registry.bind("rid", handler, BindConfig::new()).unwrap();

    let id = brrtbind::RequestId::new().to_string();
    let req = requests::get("/").with_header("X-Request-ID", id.clone()).into_adapter();
    assert_eq!(bound.call(req, RawCall::new()).unwrap().into_value(), Some(json!(id)));
}

struct ViewState {
    prefix: String,
}

#[test]
fn test_class_based_handler_gets_instance_and_attributes() {
    let class = HandlerClass::new("UserView").attribute("uid", ParamType::Integer, fields::query());
    let handler = Callable::sync(
        "get",
        Signature::new().param("verbose", ParamType::Boolean, Field::query().default(json!(false)).build().unwrap()),
        |args| {
            let view = args.instance().ok_or_else(|| anyhow::anyhow!("no instance"))?;
            let prefix = view
                .state::<ViewState>()
                .map(|s| s.prefix.clone())
                .unwrap_or_default();
            Ok(json!({
                "prefix": prefix,
                "uid": view.attribute_value("uid"),
                "verbose": args.value("verbose"),
            }))
        },
    )
    .method_of(&class);
    let registry = Registry::default();
    let bound = registry.bind("user_view", handler, BindConfig::new()).unwrap();

    let instance = class.instantiate(ViewState {
        prefix: "u-".to_string(),
    });
    let out = bound
        .call(requests::query(&[("uid", "9")]), RawCall::with_instance(instance))
        .unwrap();
    assert_eq!(
        out.into_value(),
        Some(json!({"prefix": "u-", "uid": 9, "verbose": false}))
    );

    let err = bound.call(requests::query(&[("uid", "9")]), RawCall::new()).unwrap_err();
    assert!(matches!(err, BindError::MissingInstance { .. }));
}

#[test]
fn test_dependency_reads_instance_of_class_handler() {
    let class = HandlerClass::new("TenantView");
    let tenant = Callable::sync("tenant", Signature::new().instance("view"), |args| {
        let present = matches!(args.get("view"), Some(Resolved::Instance(_)));
        Ok(json!(present))
    });
    let handler = Callable::sync(
        "get",
        Signature::new().param("tenant", ParamType::Boolean, Field::depends(&tenant)),
        |args| Ok(args.value("tenant").cloned().unwrap_or(Value::Null)),
    )
    .method_of(&class);
    let registry = Registry::default();
    let bound = registry.bind("tenant", handler, BindConfig::new()).unwrap();
    let out = bound
        .call(requests::query(&[]), RawCall::with_instance(class.instantiate(())))
        .unwrap();
    assert_eq!(out.into_value(), Some(json!(true)));
}
