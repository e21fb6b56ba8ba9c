//! 过滤器管线：包装顺序、短路、选择器按请求拼接与 Host 回退。

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use http::{HeaderValue, StatusCode};
use parking_lot::Mutex;
use serde_json::{Value, json};
use spark_gateway::config::FilterConfig;
use spark_gateway::endpoint::Endpoint;
use spark_gateway::error::{GatewayError, InvokeError};
use spark_gateway::exchange::{ResponseBody, Transporter};
use spark_gateway::filter::{Filter, FilterHandler, FilterSelector};
use spark_gateway::{Context, GatewayConfig, InboundRequest, ServeError};

use common::{added, body_text, engine_with, engine_with_config, request};

type Journal = Arc<Mutex<Vec<String>>>;

/// 在调用内层前后各记录一次 `name`。
struct Recording {
    name: &'static str,
    journal: Journal,
}

struct RecordingHandler {
    name: &'static str,
    journal: Journal,
    next: Arc<dyn FilterHandler>,
}

impl Filter for Recording {
    fn type_key(&self) -> &str {
        self.name
    }

    fn do_filter(&self, next: Arc<dyn FilterHandler>) -> Arc<dyn FilterHandler> {
        Arc::new(RecordingHandler {
            name: self.name,
            journal: Arc::clone(&self.journal),
            next,
        })
    }
}

#[async_trait]
impl FilterHandler for RecordingHandler {
    async fn handle(&self, ctx: &mut Context) -> Result<(), ServeError> {
        self.journal.lock().push(format!("{}:pre", self.name));
        let result = self.next.handle(ctx).await;
        self.journal.lock().push(format!("{}:post", self.name));
        result
    }
}

/// 写入一个响应 Header 后拒绝请求，不调用内层。
struct Denying;

struct DenyingHandler;

impl Filter for Denying {
    fn type_key(&self) -> &str {
        "denying"
    }

    fn do_filter(&self, _next: Arc<dyn FilterHandler>) -> Arc<dyn FilterHandler> {
        Arc::new(DenyingHandler)
    }
}

#[async_trait]
impl FilterHandler for DenyingHandler {
    async fn handle(&self, ctx: &mut Context) -> Result<(), ServeError> {
        ctx.response_mut()
            .headers
            .insert("x-denied-by", HeaderValue::from_static("denying"));
        Err(ServeError::filter_rejected(
            StatusCode::FORBIDDEN,
            "TEST:DENIED",
            "ACCESS:DENIED",
        ))
    }
}

/// 记录调用次数的后端。
#[derive(Clone, Default)]
struct CountingTransporter {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Transporter for CountingTransporter {
    type Outbound = ();
    type Raw = ();

    fn assemble(&self, _endpoint: &Endpoint, _inbound: &InboundRequest) -> Result<(), InvokeError> {
        Ok(())
    }

    async fn invoke(&self, _endpoint: &Endpoint, _ctx: &Context) -> Result<(), InvokeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn decode(&self, _raw: ()) -> Result<ResponseBody, InvokeError> {
        Ok(ResponseBody::new(StatusCode::OK, Bytes::from_static(b"upstream")))
    }
}

/// 请求携带 `x-select` 时激活，贡献一个记录过滤器。
struct HeaderSelector {
    filter: Arc<dyn Filter>,
}

impl FilterSelector for HeaderSelector {
    fn activate(&self, ctx: &Context) -> bool {
        ctx.request().headers().contains_key("x-select")
    }

    fn do_select(&self, _ctx: &Context) -> Vec<Arc<dyn Filter>> {
        vec![Arc::clone(&self.filter)]
    }
}

fn recording(name: &'static str, journal: &Journal) -> Arc<dyn Filter> {
    Arc::new(Recording {
        name,
        journal: Arc::clone(journal),
    })
}

fn selector(name: &'static str, journal: &Journal) -> Arc<dyn FilterSelector> {
    Arc::new(HeaderSelector {
        filter: recording(name, journal),
    })
}

fn error_body(response: &http::Response<Bytes>) -> Value {
    serde_json::from_slice(response.body()).expect("错误响应体应为 JSON")
}

#[tokio::test(flavor = "multi_thread")]
async fn first_filter_wraps_outermost() {
    let journal = Journal::default();
    let (engine, table) = engine_with(CountingTransporter::default(), |builder| {
        builder
            .add_filter(recording("f1", &journal))
            .add_filter(recording("f2", &journal))
            .add_filter(recording("f3", &journal));
    });
    assert_eq!(engine.pipeline().static_types(), ["f1", "f2", "f3"]);
    engine.apply_event(added("GET", "/users", "v1"));
    let route = table.lookup("GET", "/users").expect("路由应已注册");

    let response = engine.handle(&route, request("GET", "/users", Some("v1"))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(&response), "upstream");
    assert_eq!(
        *journal.lock(),
        ["f1:pre", "f2:pre", "f3:pre", "f3:post", "f2:post", "f1:post"]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn rejecting_filter_short_circuits_chain() {
    let journal = Journal::default();
    let transporter = CountingTransporter::default();
    let calls = Arc::clone(&transporter.calls);
    let (engine, table) = engine_with(transporter, |builder| {
        builder
            .add_filter(recording("outer", &journal))
            .add_filter(Arc::new(Denying))
            .add_filter(recording("inner", &journal));
    });
    engine.apply_event(added("GET", "/users", "v1"));
    let route = table.lookup("GET", "/users").expect("路由应已注册");

    let response = engine.handle(&route, request("GET", "/users", Some("v1"))).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = error_body(&response);
    assert_eq!(body["error_code"], "TEST:DENIED");
    assert_eq!(body["message"], "ACCESS:DENIED");
    assert_eq!(
        response.headers().get("x-denied-by"),
        Some(&HeaderValue::from_static("denying")),
        "拒绝前累积的响应 Header 应随错误写出"
    );
    assert_eq!(*journal.lock(), ["outer:pre", "outer:post"], "内层过滤器不得运行");
    assert_eq!(calls.load(Ordering::SeqCst), 0, "交换层不得被调用");
}

#[tokio::test(flavor = "multi_thread")]
async fn selected_filters_apply_only_to_activating_request() {
    let journal = Journal::default();
    let (engine, table) = engine_with(CountingTransporter::default(), |builder| {
        builder.add_filter(recording("static", &journal));
        let selected = selector("selected", &journal);
        builder.configure_selectors(|selectors| selectors.add(selected));
    });
    engine.apply_event(added("GET", "/users", "v1"));
    let route = table.lookup("GET", "/users").expect("路由应已注册");

    let mut activating = request("GET", "/users", Some("v1"));
    activating.headers_mut().insert("x-select", HeaderValue::from_static("1"));
    engine.handle(&route, activating).await;
    assert_eq!(
        *journal.lock(),
        ["selected:pre", "static:pre", "static:post", "selected:post"],
        "选择器贡献的过滤器位于静态链外层"
    );

    journal.lock().clear();
    engine.handle(&route, request("GET", "/users", Some("v1"))).await;
    assert_eq!(*journal.lock(), ["static:pre", "static:post"], "未激活的请求不受影响");
}

#[tokio::test(flavor = "multi_thread")]
async fn host_selectors_replace_global_ones() {
    let journal = Journal::default();
    let (engine, table) = engine_with(CountingTransporter::default(), |builder| {
        let hosted = selector("hosted", &journal);
        let global = selector("global", &journal);
        builder.configure_selectors(|selectors| {
            selectors.add_hosted("api.example.com", hosted);
            selectors.add(global);
        });
    });
    engine.apply_event(added("GET", "/users", "v1"));
    let route = table.lookup("GET", "/users").expect("路由应已注册");

    let mut on_host = request("GET", "/users", Some("v1"));
    on_host.headers_mut().insert("x-select", HeaderValue::from_static("1"));
    on_host
        .headers_mut()
        .insert("host", HeaderValue::from_static("api.example.com:8080"));
    engine.handle(&route, on_host).await;
    assert_eq!(*journal.lock(), ["hosted:pre", "hosted:post"]);

    journal.lock().clear();
    let mut elsewhere = request("GET", "/users", Some("v1"));
    elsewhere.headers_mut().insert("x-select", HeaderValue::from_static("1"));
    elsewhere
        .headers_mut()
        .insert("host", HeaderValue::from_static("other.example.com"));
    engine.handle(&route, elsewhere).await;
    assert_eq!(*journal.lock(), ["global:pre", "global:post"], "无专属选择器的 Host 回退到全局");
}

#[tokio::test(flavor = "multi_thread")]
async fn configured_basic_auth_guards_routes() {
    let config = GatewayConfig {
        filters: vec![
            FilterConfig::new("auth", "basic-auth")
                .with_option("realm", "Gateway")
                .with_option("users", json!({ "alice": "secret" })),
            FilterConfig::new("log", "access-log"),
        ],
        ..GatewayConfig::default()
    };
    let transporter = CountingTransporter::default();
    let calls = Arc::clone(&transporter.calls);
    let (engine, table) = engine_with_config(config, transporter, |_| {});
    assert_eq!(engine.pipeline().static_types(), ["basic-auth", "access-log"]);
    engine.apply_event(added("GET", "/users", "v1"));
    let route = table.lookup("GET", "/users").expect("路由应已注册");

    let response = engine.handle(&route, request("GET", "/users", Some("v1"))).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers().get(WWW_AUTHENTICATE),
        Some(&HeaderValue::from_static("basic realm=\"Gateway\""))
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    let mut authorized = request("GET", "/users", Some("v1"));
    authorized
        .headers_mut()
        .insert(AUTHORIZATION, HeaderValue::from_static("Basic YWxpY2U6c2VjcmV0"));
    let response = engine.handle(&route, authorized).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn unknown_filter_type_fails_build() {
    let config = GatewayConfig {
        filters: vec![FilterConfig::new("rate", "rate-limit")],
        ..GatewayConfig::default()
    };
    let mut builder = spark_gateway::GatewayBuilder::new(config);
    builder.without_default_exchanges();
    match builder.build() {
        Err(GatewayError::FilterFactoryNotFound { id, type_id }) => {
            assert_eq!(id, "rate");
            assert_eq!(type_id, "rate-limit");
        }
        other => panic!("expected FilterFactoryNotFound, got {other:?}"),
    }
}
