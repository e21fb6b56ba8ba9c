//! 集成测试共享夹具：内存交换实现与装配辅助函数，不访问网络。

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, StatusCode};
use spark_gateway::context::{Context, InboundRequest};
use spark_gateway::endpoint::{Endpoint, EndpointEvent};
use spark_gateway::error::InvokeError;
use spark_gateway::exchange::{ResponseBody, Transporter};
use spark_gateway::router::MemoryRouteTable;
use spark_gateway::{GatewayBuilder, GatewayConfig, RouterEngine};

/// 测试使用的协议名。
pub const STUB_PROTOCOL: &str = "stub";

/// 把命中的版本与 `trace` 属性写回响应体：`version|trace`。
#[derive(Clone, Copy, Debug, Default)]
pub struct EchoTransporter;

#[async_trait]
impl Transporter for EchoTransporter {
    type Outbound = ();
    type Raw = String;

    fn assemble(&self, _endpoint: &Endpoint, _inbound: &InboundRequest) -> Result<(), InvokeError> {
        Ok(())
    }

    async fn invoke(&self, endpoint: &Endpoint, ctx: &Context) -> Result<String, InvokeError> {
        let trace = ctx
            .attribute("trace")
            .and_then(|value| value.as_str())
            .unwrap_or("none");
        Ok(format!("{}|{}", endpoint.version, trace))
    }

    async fn decode(&self, raw: String) -> Result<ResponseBody, InvokeError> {
        Ok(ResponseBody::new(StatusCode::OK, Bytes::from(raw)))
    }
}

/// 永不返回的后端，用于验证请求 future 被丢弃时的资源归还。
#[derive(Clone, Copy, Debug, Default)]
pub struct HangingTransporter;

#[async_trait]
impl Transporter for HangingTransporter {
    type Outbound = ();
    type Raw = ();

    fn assemble(&self, _endpoint: &Endpoint, _inbound: &InboundRequest) -> Result<(), InvokeError> {
        Ok(())
    }

    async fn invoke(&self, _endpoint: &Endpoint, _ctx: &Context) -> Result<(), InvokeError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }

    async fn decode(&self, _raw: ()) -> Result<ResponseBody, InvokeError> {
        Ok(ResponseBody::new(StatusCode::OK, Bytes::new()))
    }
}

/// 以 `stub` 协议注册 `transporter`，并返回引擎与其路由表。
pub fn engine_with<T: Transporter>(
    transporter: T,
    configure: impl FnOnce(&mut GatewayBuilder),
) -> (Arc<RouterEngine>, Arc<MemoryRouteTable>) {
    engine_with_config(GatewayConfig::default(), transporter, configure)
}

pub fn engine_with_config<T: Transporter>(
    config: GatewayConfig,
    transporter: T,
    configure: impl FnOnce(&mut GatewayBuilder),
) -> (Arc<RouterEngine>, Arc<MemoryRouteTable>) {
    let table = Arc::new(MemoryRouteTable::new());
    let mut builder = GatewayBuilder::new(config);
    builder
        .without_default_exchanges()
        .route_registrar(Arc::clone(&table) as _)
        .configure_exchanges(|exchanges| exchanges.register_transporter(STUB_PROTOCOL, transporter))
        .expect("注册测试交换实现");
    configure(&mut builder);
    let engine = builder.build().expect("装配路由引擎");
    (Arc::new(engine), table)
}

pub fn endpoint(method: &str, pattern: &str, version: &str) -> Endpoint {
    Endpoint {
        application: "demo".to_owned(),
        version: version.to_owned(),
        protocol: STUB_PROTOCOL.to_owned(),
        http_method: method.to_owned(),
        http_pattern: pattern.to_owned(),
        upstream_method: "GET".to_owned(),
        upstream_host: "backend.local".to_owned(),
        upstream_uri: pattern.to_owned(),
        ..Endpoint::default()
    }
}

pub fn added(method: &str, pattern: &str, version: &str) -> EndpointEvent {
    EndpointEvent::added(endpoint(method, pattern, version))
}

pub fn request(method: &str, path: &str, version: Option<&str>) -> InboundRequest {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(version) = version {
        builder = builder.header("x-version", version);
    }
    builder.body(Bytes::new()).expect("构造入站请求")
}

pub fn body_text(response: &http::Response<Bytes>) -> String {
    String::from_utf8_lossy(response.body()).into_owned()
}
