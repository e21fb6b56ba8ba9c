//! 路由引擎端到端行为：版本解析、故障恢复、事件应用与上下文池的归还语义。

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::{HeaderValue, StatusCode};
use serde_json::Value;
use spark_gateway::error::codes;
use spark_gateway::filter::{Filter, FilterHandler};
use spark_gateway::registry::{EndpointRegistry, MemoryRegistry};
use spark_gateway::{Context, EndpointEvent, EventOutcome, ServeError};
use tracing_test::traced_test;

use common::{
    EchoTransporter, HangingTransporter, added, body_text, endpoint, engine_with, request,
};

/// 请求携带 `x-explode` 时在链路中 panic。
struct ExplodingFilter;

struct ExplodingHandler {
    next: Arc<dyn FilterHandler>,
}

impl Filter for ExplodingFilter {
    fn type_key(&self) -> &str {
        "exploding"
    }

    fn do_filter(&self, next: Arc<dyn FilterHandler>) -> Arc<dyn FilterHandler> {
        Arc::new(ExplodingHandler { next })
    }
}

#[async_trait]
impl FilterHandler for ExplodingHandler {
    async fn handle(&self, ctx: &mut Context) -> Result<(), ServeError> {
        if ctx.request().headers().contains_key("x-explode") {
            panic!("filter exploded");
        }
        self.next.handle(ctx).await
    }
}

fn error_body(response: &http::Response<bytes::Bytes>) -> Value {
    serde_json::from_slice(response.body()).expect("错误响应体应为 JSON")
}

#[tokio::test(flavor = "multi_thread")]
async fn dispatches_to_requested_version() {
    let (engine, table) = engine_with(EchoTransporter, |_| {});
    assert_eq!(engine.apply_event(added("get", "/users", "v1")), EventOutcome::Registered);
    assert_eq!(engine.apply_event(added("GET", "/users", "v2")), EventOutcome::VersionAdded);

    let route = table.lookup("GET", "/users").expect("路由应已注册");
    let response = engine.handle(&route, request("GET", "/users", Some("v2"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(&response), "v2|none");
    assert!(response.headers().contains_key("x-request-id"));
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_version_is_not_found_without_running_chain() {
    let (engine, table) = engine_with(EchoTransporter, |builder| {
        builder.add_filter(Arc::new(ExplodingFilter));
    });
    engine.apply_event(added("GET", "/users", "v1"));
    let route = table.lookup("GET", "/users").expect("路由应已注册");

    let mut inbound = request("GET", "/users", Some("v9"));
    inbound.headers_mut().insert("x-explode", "1".parse().expect("header"));
    inbound.headers_mut().insert("x-request-id", "req-404".parse().expect("header"));
    let response = engine.handle(&route, inbound).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = error_body(&response);
    assert_eq!(body["error_code"], codes::ENDPOINT_VERSION_NOT_FOUND);
    assert_eq!(body["request_id"], "req-404");
    assert_eq!(engine.pool().idle(), 0, "版本未命中时不应借出上下文");
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_version_header_matches_empty_version() {
    let (engine, table) = engine_with(EchoTransporter, |_| {});
    engine.apply_event(added("GET", "/health", ""));
    let route = table.lookup("GET", "/health").expect("路由应已注册");

    let response = engine.handle(&route, request("GET", "/health", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(&response), "|none");
}

#[tokio::test(flavor = "multi_thread")]
async fn non_ascii_version_matches_exactly_and_never_falls_back() {
    let (engine, table) = engine_with(EchoTransporter, |_| {});
    engine.apply_event(added("GET", "/users", ""));
    engine.apply_event(added("GET", "/users", "v测试"));
    let route = table.lookup("GET", "/users").expect("路由应已注册");

    let mut utf8 = request("GET", "/users", None);
    utf8.headers_mut().insert(
        "x-version",
        HeaderValue::from_bytes("v测试".as_bytes()).expect("header"),
    );
    let response = engine.handle(&route, utf8).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(&response), "v测试|none");

    let mut undecodable = request("GET", "/users", None);
    undecodable
        .headers_mut()
        .insert("x-version", HeaderValue::from_bytes(b"v\xff").expect("header"));
    let response = engine.handle(&route, undecodable).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND, "无法解码的版本不得回退到空串版本");
    assert_eq!(error_body(&response)["error_code"], codes::ENDPOINT_VERSION_NOT_FOUND);
}

#[tokio::test(flavor = "multi_thread")]
async fn panicking_hook_yields_critical_response() {
    let (engine, table) = engine_with(EchoTransporter, |builder| {
        builder.context_hook(Arc::new(|ctx: &mut Context| {
            if ctx.request().headers().contains_key("x-explode") {
                panic!("hook exploded");
            }
        }));
    });
    engine.apply_event(added("GET", "/users", "v1"));
    let route = table.lookup("GET", "/users").expect("路由应已注册");

    let mut inbound = request("GET", "/users", Some("v1"));
    inbound.headers_mut().insert("x-explode", HeaderValue::from_static("1"));
    let response = engine.handle(&route, inbound).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error_body(&response)["error_code"], codes::INTERNAL_CRITICAL);
    assert_eq!(engine.pool().idle(), 1);

    let response = engine.handle(&route, request("GET", "/users", Some("v1"))).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[test]
fn unmatched_route_gets_fixed_not_found() {
    let (engine, _) = engine_with(EchoTransporter, |_| {});
    let response = engine.route_not_found(&request("GET", "/nowhere", None));
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = error_body(&response);
    assert_eq!(body["error_code"], codes::ROUTE_NOT_FOUND);
    assert_eq!(body["message"], "ROUTE:NOT_FOUND");
}

#[tokio::test(flavor = "multi_thread")]
async fn panic_becomes_single_critical_response_and_server_keeps_serving() {
    let (engine, table) = engine_with(EchoTransporter, |builder| {
        builder.add_filter(Arc::new(ExplodingFilter));
    });
    engine.apply_event(added("GET", "/users", "v1"));
    let route = table.lookup("GET", "/users").expect("路由应已注册");

    let mut inbound = request("GET", "/users", Some("v1"));
    inbound.headers_mut().insert("x-explode", "1".parse().expect("header"));
    let response = engine.handle(&route, inbound).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = error_body(&response);
    assert_eq!(body["error_code"], codes::INTERNAL_CRITICAL);
    assert_eq!(body["message"], "SERVER:CRITICAL:UNEXPECTED_FAULT");
    assert!(!body_text(&response).contains("filter exploded"), "panic 信息不得写给调用方");
    assert_eq!(engine.pool().idle(), 1, "故障恢复后上下文必须归还");

    let response = engine.handle(&route, request("GET", "/users", Some("v1"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(&response), "v1|none");
    assert_eq!(engine.pool().idle(), 1);
}

#[test]
fn registration_happens_once_per_route() {
    let (engine, table) = engine_with(EchoTransporter, |_| {});
    assert_eq!(engine.apply_event(added("GET", "/a", "v1")), EventOutcome::Registered);
    assert_eq!(engine.apply_event(added("GET", "/a", "v1")), EventOutcome::VersionAdded);
    assert_eq!(engine.apply_event(added("POST", "/a", "v1")), EventOutcome::Registered);
    assert_eq!(table.len(), 2);
    assert_eq!(engine.store().len(), 2);
}

#[test]
#[traced_test]
fn unsupported_method_is_rejected_with_warning() {
    let (engine, table) = engine_with(EchoTransporter, |_| {});
    assert_eq!(engine.apply_event(added("CONNECT", "/debug", "v1")), EventOutcome::Rejected);
    assert!(table.is_empty());
    assert!(engine.store().is_empty());
    assert!(logs_contain("unsupported http method"));
}

#[tokio::test(flavor = "multi_thread")]
async fn removing_last_version_keeps_registration() {
    let (engine, table) = engine_with(EchoTransporter, |_| {});
    engine.apply_event(added("GET", "/users", "v1"));
    let outcome = engine.apply_event(EndpointEvent::removed(endpoint("GET", "/users", "v1")));
    assert_eq!(outcome, EventOutcome::Removed);

    let route = table.lookup("GET", "/users").expect("删除版本后路由注册仍保留");
    assert!(route.is_empty());
    let response = engine.handle(&route, request("GET", "/users", Some("v1"))).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_body(&response)["error_code"], codes::ENDPOINT_VERSION_NOT_FOUND);

    assert_eq!(engine.apply_event(added("GET", "/users", "v2")), EventOutcome::VersionAdded);
    assert_eq!(table.len(), 1);
}

#[test]
fn update_and_remove_for_unknown_route_are_ignored() {
    let (engine, table) = engine_with(EchoTransporter, |_| {});
    let updated = engine.apply_event(EndpointEvent::updated(endpoint("GET", "/ghost", "v1")));
    let removed = engine.apply_event(EndpointEvent::removed(endpoint("GET", "/ghost", "v1")));
    assert_eq!(updated, EventOutcome::Ignored);
    assert_eq!(removed, EventOutcome::Ignored);
    assert!(table.is_empty());
    assert!(engine.store().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn update_replaces_version_in_place() {
    let (engine, table) = engine_with(EchoTransporter, |_| {});
    engine.apply_event(added("GET", "/users", "v1"));
    let mut changed = endpoint("GET", "/users", "v1");
    changed.upstream_uri = "/v1/users".to_owned();
    assert_eq!(engine.apply_event(EndpointEvent::updated(changed)), EventOutcome::Updated);

    let route = table.lookup("GET", "/users").expect("路由应已注册");
    let current = route.find_by_version("v1").expect("版本应存在");
    assert_eq!(current.upstream_uri, "/v1/users");
}

#[tokio::test(flavor = "multi_thread")]
async fn dropped_request_future_returns_context() {
    let (engine, table) = engine_with(HangingTransporter, |_| {});
    engine.apply_event(added("GET", "/slow", "v1"));
    let route = table.lookup("GET", "/slow").expect("路由应已注册");

    let outcome = tokio::time::timeout(
        Duration::from_millis(50),
        engine.handle(&route, request("GET", "/slow", Some("v1"))),
    )
    .await;
    assert!(outcome.is_err(), "后端挂起时请求应超时");
    assert_eq!(engine.pool().idle(), 1, "被取消的请求也必须归还上下文");
}

#[tokio::test(flavor = "multi_thread")]
async fn pooled_context_does_not_leak_attributes() {
    let (engine, table) = engine_with(EchoTransporter, |builder| {
        builder.context_hook(Arc::new(|ctx: &mut Context| {
            let trace = ctx
                .request()
                .headers()
                .get("x-trace")
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned);
            if let Some(trace) = trace {
                ctx.set_attribute("trace", trace);
            }
        }));
    });
    engine.apply_event(added("GET", "/users", "v1"));
    let route = table.lookup("GET", "/users").expect("路由应已注册");

    let mut first = request("GET", "/users", Some("v1"));
    first.headers_mut().insert("x-trace", "alpha".parse().expect("header"));
    let response = engine.handle(&route, first).await;
    assert_eq!(body_text(&response), "v1|alpha");

    let response = engine.handle(&route, request("GET", "/users", Some("v1"))).await;
    assert_eq!(body_text(&response), "v1|none", "上一请求的属性不得出现在下一请求中");
    assert_eq!(engine.pool().idle(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn request_id_header_is_propagated() {
    let (engine, table) = engine_with(EchoTransporter, |_| {});
    engine.apply_event(added("GET", "/users", "v1"));
    let route = table.lookup("GET", "/users").expect("路由应已注册");

    let mut inbound = request("GET", "/users", Some("v1"));
    inbound.headers_mut().insert("x-request-id", "req-42".parse().expect("header"));
    let response = engine.handle(&route, inbound).await;
    assert_eq!(response.headers().get("x-request-id").map(|v| v.as_bytes()), Some(&b"req-42"[..]));
}

#[tokio::test(flavor = "multi_thread")]
async fn event_loop_consumes_registry_stream_in_order() {
    let (engine, table) = engine_with(EchoTransporter, |_| {});
    let registry = MemoryRegistry::with_events([added("GET", "/users", "v1")]);
    let events = registry.watch().expect("订阅注册中心");
    let worker = engine.spawn_event_loop(events);

    registry.publish(added("GET", "/users", "v2")).await;
    registry
        .publish(EndpointEvent::removed(endpoint("GET", "/users", "v1")))
        .await;
    registry.close();
    worker.await.expect("事件任务应正常退出");

    let route = table.lookup("GET", "/users").expect("路由应已注册");
    assert_eq!(route.versions(), vec!["v2".to_owned()]);
    let response = engine.handle(&route, request("GET", "/users", Some("v2"))).await;
    assert_eq!(body_text(&response), "v2|none");
}
