use brrtbind::{
    BindConfig, BindError, BoundHandler, Callable, Field, FieldKind, Model, ParamType, RawCall,
    Registry, Signature,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

mod common;
use common::requests;

fn bind(handler: Callable, config: BindConfig) -> BoundHandler {
    let registry = Registry::default();
    registry.bind(handler.name().to_string(), handler, config).unwrap()
}

fn echo(name: &str, sig: Signature, param: &'static str) -> Callable {
    Callable::sync(name, sig, move |args| {
        Ok(args.value(param).cloned().unwrap_or(Value::Null))
    })
}

fn value(result: Result<brrtbind::Resolved, BindError>) -> Value {
    result.unwrap().into_value().unwrap()
}

#[test]
fn test_missing_query_value_raises_not_found() {
    let _tracing = common::test_tracing::init();
    let sig = Signature::new().param("page", ParamType::Integer, Field::query().build().unwrap());
    let bound = bind(echo("list_items", sig, "page"), BindConfig::new());

    let err = bound.call(requests::query(&[]), RawCall::new()).unwrap_err();
    match err {
        BindError::NotFound(e) => {
            assert_eq!(e.param, "page");
            assert_eq!(e.kind, FieldKind::Query);
            assert_eq!(e.key, "page");
        }
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[test]
fn test_missing_query_value_uses_default() {
    let sig = Signature::new().param(
        "page",
        ParamType::Integer,
        Field::query().default(json!(5)).build().unwrap(),
    );
    let bound = bind(echo("list_items", sig, "page"), BindConfig::new());
    assert_eq!(value(bound.call(requests::query(&[]), RawCall::new())), json!(5));
    assert_eq!(value(bound.call(requests::query(&[("page", "2")]), RawCall::new())), json!(2));
}

#[test]
fn test_null_default_models_optional_value() {
    let sig = Signature::new().param(
        "nick",
        ParamType::optional(ParamType::String),
        Field::query().default(Value::Null).build().unwrap(),
    );
    let bound = bind(echo("get_nick", sig, "nick"), BindConfig::new());
    assert_eq!(value(bound.call(requests::query(&[]), RawCall::new())), Value::Null);
    assert_eq!(
        value(bound.call(requests::query(&[("nick", "ann")]), RawCall::new())),
        json!("ann")
    );
}

#[test]
fn test_constraint_violation_reports_location() {
    let sig = Signature::new().param(
        "uid",
        ParamType::Integer,
        Field::query().ge(1).le(100).build().unwrap(),
    );
    let bound = bind(echo("get_user", sig, "uid"), BindConfig::new());

    let err = bound.call(requests::query(&[("uid", "500")]), RawCall::new()).unwrap_err();
    let BindError::Validation(v) = err else {
        panic!("expected validation error");
    };
    assert_eq!(v.paths(), vec!["query.uid"]);

    let err = bound.call(requests::query(&[("uid", "abc")]), RawCall::new()).unwrap_err();
    assert!(err.is_client_error());
}

#[test]
fn test_tip_names_handler_and_parameter() {
    let sig = Signature::new().param("uid", ParamType::Integer, Field::query().build().unwrap());
    let bound = bind(echo("get_user", sig.clone(), "uid"), BindConfig::new());
    let err = bound.call(requests::query(&[]), RawCall::new()).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("`uid`"), "{msg}");
    assert!(msg.contains("`get_user`"), "{msg}");
    assert!(msg.contains("query"), "{msg}");

    let quiet = bind(echo("get_user", sig, "uid"), BindConfig::new().tip(false));
    let err = quiet.call(requests::query(&[]), RawCall::new()).unwrap_err();
    assert_eq!(err.to_string(), "value not found");
    // Structured fields survive without the tip
    assert!(matches!(err, BindError::NotFound(ref e) if e.param == "uid" && e.tip.is_none()));
}

#[test]
fn test_not_found_handler_replaces_error() {
    let sig = Signature::new().param(
        "token",
        ParamType::String,
        Field::header().not_found_message("token header required").build().unwrap(),
    );
    let bound = bind(echo("secure", sig, "token"), BindConfig::new());
    let err = bound.call(requests::query(&[]), RawCall::new()).unwrap_err();
    assert!(matches!(err, BindError::Custom(_)));
    assert_eq!(err.to_string(), "token header required");
}

#[test]
fn test_header_key_derived_from_name() {
    let sig = Signature::new()
        .param("user_agent", ParamType::String, Field::header().build().unwrap())
        .param(
            "token",
            ParamType::String,
            Field::header().alias("X-Token").build().unwrap(),
        );
    let handler = Callable::sync("headers", sig, |args| {
        Ok(json!([args.value("user_agent"), args.value("token")]))
    });
    let bound = bind(handler, BindConfig::new());
    let req = requests::get("/")
        .with_header("User-Agent", "curl")
        .with_header("x-token", "t1")
        .into_adapter();
    assert_eq!(value(bound.call(req, RawCall::new())), json!(["curl", "t1"]));
}

#[test]
fn test_multi_query_collects_every_value() {
    let sig = Signature::new().param(
        "tags",
        ParamType::array(ParamType::String),
        Field::multi_query().alias("tag").build().unwrap(),
    );
    let bound = bind(echo("search", sig, "tags"), BindConfig::new());
    let req = requests::query(&[("tag", "a"), ("tag", "b")]);
    assert_eq!(value(bound.call(req, RawCall::new())), json!(["a", "b"]));
}

#[test]
fn test_body_fields_and_raw_body() {
    let sig = Signature::new()
        .param("name", ParamType::String, Field::body().build().unwrap())
        .param("raw", ParamType::Map, Field::body().raw_return().build().unwrap());
    let handler = Callable::sync("create", sig, |args| {
        Ok(json!({"name": args.value("name"), "raw": args.value("raw")}))
    });
    let bound = bind(handler, BindConfig::new());
    let req = requests::post("/items", json!({"name": "pen", "qty": 2})).into_adapter();
    assert_eq!(
        value(bound.call(req, RawCall::new())),
        json!({"name": "pen", "raw": {"name": "pen", "qty": 2}})
    );
}

#[test]
fn test_nested_model_reports_all_failures() {
    let user = Model::new("User")
        .field("name", ParamType::String)
        .field_with("age", ParamType::Integer, Field::query().ge(0).build().unwrap())
        .build();
    let sig = Signature::new().param("user", ParamType::Model(user), Field::query().build().unwrap());
    let bound = bind(echo("create_user", sig, "user"), BindConfig::new());

    let err = bound.call(requests::query(&[("age", "-3")]), RawCall::new()).unwrap_err();
    let BindError::Validation(v) = err else {
        panic!("expected validation error");
    };
    assert_eq!(v.paths(), vec!["query.user.name", "query.user.age"]);

    let ok = bound.call(requests::query(&[("name", "ann"), ("age", "30")]), RawCall::new());
    assert_eq!(value(ok), json!({"name": "ann", "age": 30}));
}

#[test]
fn test_absent_optional_model_resolves_to_null_or_default() {
    let user = || Model::new("User").field("uid", ParamType::Integer).build();
    let sig = Signature::new().param(
        "user",
        ParamType::optional(ParamType::Model(user())),
        Field::query().build().unwrap(),
    );
    let bound = bind(echo("maybe_user", sig, "user"), BindConfig::new());
    assert_eq!(value(bound.call(requests::query(&[]), RawCall::new())), Value::Null);
    assert_eq!(
        value(bound.call(requests::query(&[("uid", "4")]), RawCall::new())),
        json!({"uid": 4})
    );

    let sig = Signature::new().param(
        "user",
        ParamType::Model(user()),
        Field::query().default(json!({"uid": 0})).build().unwrap(),
    );
    let bound = bind(echo("default_user", sig, "user"), BindConfig::new());
    assert_eq!(value(bound.call(requests::query(&[]), RawCall::new())), json!({"uid": 0}));

    // A required model still reports its missing fields
    let sig = Signature::new().param("user", ParamType::Model(user()), Field::query().build().unwrap());
    let bound = bind(echo("required_user", sig, "user"), BindConfig::new());
    let err = bound.call(requests::query(&[]), RawCall::new()).unwrap_err();
    let BindError::Validation(v) = err else {
        panic!("expected validation error");
    };
    assert_eq!(v.paths(), vec!["query.user.uid"]);
}

#[test]
fn test_raw_return_model_constructed_once_from_mapping() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    let user = Model::new("User")
        .field("uid", ParamType::String)
        .field("age", ParamType::String)
        .constructor(move |raw| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Object(raw))
        })
        .build();
    let sig = Signature::new().param(
        "user",
        ParamType::Model(user),
        Field::query().raw_return().build().unwrap(),
    );
    let bound = bind(echo("raw_user", sig, "user"), BindConfig::new());

    let out = value(bound.call(requests::query(&[("uid", "1"), ("age", "2")]), RawCall::new()));
    assert_eq!(out, json!({"uid": "1", "age": "2"}));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_request_parameter_passed_verbatim() {
    let sig = Signature::new().request("req");
    let handler = Callable::sync("path_of", sig, |args| {
        let req = args
            .request("req")
            .ok_or_else(|| anyhow::anyhow!("no request"))?;
        Ok(json!(req.url_path()))
    });
    let bound = bind(handler, BindConfig::new());
    let out = value(bound.call(requests::get("/users/1").into_adapter(), RawCall::new()));
    assert_eq!(out, json!("/users/1"));
}
