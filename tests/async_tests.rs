use brrtbind::{
    BindConfig, BindError, Callable, ConfigurationError, Context, Field, ParamType, RawCall,
    Registry, Scoped, Signature,
};
use serde_json::{json, Value};
use std::time::Duration;

mod common;
use common::recorder::Recorder;
use common::{fields, requests};

fn route_and_uid() -> Callable {
    Callable::sync(
        "route_and_uid",
        Signature::new().param("uid", ParamType::Integer, fields::query()),
        |args| {
            let ctx = Context::current().ok_or_else(|| anyhow::anyhow!("no context"))?;
            Ok(json!({"route": ctx.route_id(), "uid": args.value("uid")}))
        },
    )
}

fn async_echo(name: &str, dep: &Callable) -> Callable {
    Callable::new_async(
        name,
        Signature::new().param("info", ParamType::Any, Field::depends(dep)),
        |args| async move { Ok::<_, anyhow::Error>(args.value("info").cloned().unwrap_or(Value::Null)) },
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn test_async_handler_with_async_dependency() {
    let double = Callable::new_async(
        "double",
        Signature::new().param("uid", ParamType::Integer, fields::query()),
        |args| async move {
            let uid: i64 = args.parse("uid")?;
            Ok::<_, anyhow::Error>(json!(uid * 2))
        },
    );
    let registry = Registry::default();
    let bound = registry
        .bind("double", async_echo("double_handler", &double), BindConfig::new())
        .unwrap();
    assert!(bound.is_async());

    let out = bound
        .call_async(requests::query(&[("uid", "21")]), RawCall::new())
        .await
        .unwrap();
    assert_eq!(out.into_value(), Some(json!(42)));

    let err = bound
        .call_async(requests::query(&[]), RawCall::new())
        .await
        .unwrap_err();
    assert!(matches!(err, BindError::NotFound(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_sync_to_thread_matches_inline_dependency() {
    let registry = Registry::default();
    let inline = registry
        .bind("inline", async_echo("inline", &route_and_uid()), BindConfig::new())
        .unwrap();
    let threaded = registry
        .bind(
            "threaded",
            async_echo("threaded", &route_and_uid().sync_to_thread()),
            BindConfig::new(),
        )
        .unwrap();

    let a = inline
        .call_async(requests::query(&[("uid", "3")]), RawCall::new())
        .await
        .unwrap()
        .into_value();
    let b = threaded
        .call_async(requests::query(&[("uid", "3")]), RawCall::new())
        .await
        .unwrap()
        .into_value();
    assert_eq!(a, Some(json!({"route": "inline", "uid": 3})));
    assert_eq!(b, Some(json!({"route": "threaded", "uid": 3})));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_context_propagates_into_blocking_pool() {
    let thread_of = Callable::sync("thread_of", Signature::new(), |_| {
        let ctx = Context::current().ok_or_else(|| anyhow::anyhow!("no context"))?;
        Ok(json!({
            "path": ctx.request().url_path(),
            "thread": format!("{:?}", std::thread::current().id()),
        }))
    })
    .sync_to_thread();
    let registry = Registry::default();
    let bound = registry
        .bind("blocking", async_echo("blocking", &thread_of), BindConfig::new())
        .unwrap();

    let out = bound
        .call_async(requests::get("/pool").into_adapter(), RawCall::new())
        .await
        .unwrap()
        .into_value()
        .unwrap();
    assert_eq!(out["path"], json!("/pool"));
    let here = format!("{:?}", std::thread::current().id());
    assert_ne!(out["thread"], json!(here));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_calls_see_their_own_context() {
    let check = Callable::new_async(
        "check",
        Signature::new().param("uid", ParamType::Integer, fields::query()),
        |args| async move {
            let before = Context::current().map(|c| c.request_id());
            tokio::time::sleep(Duration::from_millis(5)).await;
            let ctx = Context::current().ok_or_else(|| anyhow::anyhow!("no context"))?;
            anyhow::ensure!(before == Some(ctx.request_id()), "context changed across await");
            let seen = ctx.request().query().get("uid").cloned();
            anyhow::ensure!(seen == args.value("uid").map(|v| json!(v.to_string())), "request mixed up");
            Ok::<_, anyhow::Error>(args.value("uid").cloned().unwrap_or(Value::Null))
        },
    );
    let registry = Registry::default();
    let bound = registry
        .bind("isolated", async_echo("isolated", &check), BindConfig::new())
        .unwrap();

    let mut tasks = Vec::new();
    for i in 0..32_i64 {
        let bound = bound.clone();
        tasks.push(tokio::spawn(async move {
            let uid = i.to_string();
            let out = bound
                .call_async(requests::query(&[("uid", uid.as_str())]), RawCall::new())
                .await;
            (i, out)
        }));
    }
    for task in tasks {
        let (i, out) = task.await.unwrap();
        assert_eq!(out.unwrap().into_value(), Some(json!(i)));
    }
    assert!(Context::current().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_async_scoped_release_after_handler() {
    let rec = Recorder::new();
    let acquire_rec = rec.clone();
    let session = Callable::scoped_async("session", Signature::new(), move |_| {
        let rec = acquire_rec.clone();
        async move {
            rec.push("acquire");
            let release_rec = rec.clone();
            Ok::<_, anyhow::Error>(Scoped::new_async(json!("s1"), move |exit| async move {
                release_rec.push(format!("release.{exit:?}"));
            }))
        }
    });
    let handler_rec = rec.clone();
    let handler = Callable::new_async(
        "handler",
        Signature::new().param("session", ParamType::String, Field::depends(&session)),
        move |args| {
            let rec = handler_rec.clone();
            async move {
                rec.push("handler");
                Ok::<_, anyhow::Error>(args.value("session").cloned().unwrap_or(Value::Null))
            }
        },
    );
    let registry = Registry::default();
    let bound = registry.bind("session", handler, BindConfig::new()).unwrap();

    let out = bound
        .call_async(requests::query(&[]), RawCall::new())
        .await
        .unwrap();
    assert_eq!(out.into_value(), Some(json!("s1")));
    assert_eq!(rec.events(), vec!["acquire", "handler", "release.Success"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_sync_call_on_async_handler_is_mode_mismatch() {
    let registry = Registry::default();
    let bound = registry
        .bind("async_only", async_echo("async_only", &route_and_uid()), BindConfig::new())
        .unwrap();
    let err = bound
        .call(requests::query(&[("uid", "1")]), RawCall::new())
        .unwrap_err();
    assert!(matches!(err, BindError::ModeMismatch { ref route } if route == "async_only"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_sync_handler_served_from_async_runtime() {
    let handler = Callable::sync(
        "sync_handler",
        Signature::new().param("info", ParamType::Any, Field::depends(&route_and_uid().sync_to_thread())),
        |args| Ok(args.value("info").cloned().unwrap_or(Value::Null)),
    );
    let registry = Registry::default();
    let bound = registry.bind("sync_route", handler, BindConfig::new()).unwrap();

    let via_async = bound
        .call_async(requests::query(&[("uid", "5")]), RawCall::new())
        .await
        .unwrap()
        .into_value();
    let via_sync = bound
        .call(requests::query(&[("uid", "5")]), RawCall::new())
        .unwrap()
        .into_value();
    assert_eq!(via_async, Some(json!({"route": "sync_route", "uid": 5})));
    assert_eq!(via_async, via_sync);
}

#[test]
fn test_async_dependency_rejected_on_sync_route() {
    let fetch = Callable::new_async("fetch", Signature::new(), |_| async {
        Ok::<_, anyhow::Error>(json!(1))
    });
    let handler = Callable::sync(
        "handler",
        Signature::new().param("v", ParamType::Integer, Field::depends(&fetch)),
        |_| Ok(json!(null)),
    );
    let registry = Registry::default();
    let err = registry.bind("mixed", handler, BindConfig::new()).unwrap_err();
    assert_eq!(
        err,
        ConfigurationError::AsyncDependencyInSyncRoute {
            route: "mixed".into(),
            dependency: "fetch".into(),
        }
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_sync_call_nested_in_async_call_sees_own_context() {
    let registry = Registry::default();
    let inner = registry
        .bind(
            "inner",
            Callable::sync(
                "inner_handler",
                Signature::new().param("info", ParamType::Any, Field::depends(&route_and_uid())),
                |args| Ok(args.value("info").cloned().unwrap_or(Value::Null)),
            ),
            BindConfig::new(),
        )
        .unwrap();
    let outer = Callable::new_async("outer_handler", Signature::new(), move |_| {
        let inner = inner.clone();
        async move {
            let nested = inner
                .call(requests::query(&[("uid", "9")]), RawCall::new())
                .map_err(|e| anyhow::anyhow!(e.to_string()))?
                .into_value();
            let own = Context::current().map(|c| c.route_id().to_string());
            Ok::<_, anyhow::Error>(json!({"nested": nested, "own": own}))
        }
    });
    let bound = registry.bind("outer", outer, BindConfig::new()).unwrap();

    let out = bound
        .call_async(requests::query(&[]), RawCall::new())
        .await
        .unwrap()
        .into_value();
    assert_eq!(
        out,
        Some(json!({"nested": {"route": "inner", "uid": 9}, "own": "outer"}))
    );
}
