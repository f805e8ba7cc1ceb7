use brrtbind::{
    BindConfig, Callable, Field, Model, ParamType, RawCall, Registry, Signature, SimpleRequest,
};
use criterion::{criterion_group, criterion_main, Criterion};
use http::Method;
use serde_json::json;
use std::hint::black_box;

fn user_route(registry: &Registry) -> brrtbind::BoundHandler {
    let token = Callable::sync(
        "token",
        Signature::new().param(
            "authorization",
            ParamType::String,
            Field::header().build().expect("field"),
        ),
        |args| Ok(json!(args.parse::<String>("authorization")?)),
    );
    let filter = Model::new("Filter")
        .field("name", ParamType::String)
        .field_with("age", ParamType::Integer, Field::query().ge(0).build().expect("field"))
        .build();
    let handler = Callable::sync(
        "get_user",
        Signature::new()
            .param("uid", ParamType::Integer, Field::query().ge(1).build().expect("field"))
            .param("filter", ParamType::Model(filter), Field::query().build().expect("field"))
            .param("token", ParamType::String, Field::depends(&token)),
        |args| Ok(json!({"uid": args.value("uid"), "token": args.value("token")})),
    );
    registry
        .bind("get_user", handler, BindConfig::new())
        .expect("bind")
}

fn bench_resolve_throughput(c: &mut Criterion) {
    let registry = Registry::default();
    let bound = user_route(&registry);
    let request = SimpleRequest::new(Method::GET, "/users")
        .with_query("uid", "7")
        .with_query("name", "ann")
        .with_query("age", "30")
        .with_header("Authorization", "abc")
        .into_adapter();

    c.bench_function("resolve_and_call", |b| {
        b.iter(|| {
            let res = bound.call(std::sync::Arc::clone(&request), RawCall::new());
            black_box(&res);
        })
    });
}

fn bench_bind(c: &mut Criterion) {
    c.bench_function("bind_route", |b| {
        b.iter(|| {
            let registry = Registry::default();
            black_box(user_route(&registry));
        })
    });
}

criterion_group!(benches, bench_resolve_throughput, bench_bind);
criterion_main!(benches);
