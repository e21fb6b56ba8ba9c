//! # exchange 模块说明
//!
//! ## 角色定位（Why）
//! - 交换层是过滤器链的终端：把网关请求转换为后端协议调用，再把后端结果归一化为统一响应；
//! - 每种后端协议只需实现 [`Transporter`] 的 `assemble`/`invoke`/`decode` 三个步骤，
//!   路由引擎与过滤器管线对协议一无所知。
//!
//! ## 架构嵌入（Where）
//! - `http` 子模块（`http-exchange` 特性）基于 `reqwest` 转发 HTTP 请求；
//! - `rpc` 子模块把调用委托给可插拔的 [`rpc::RpcClient`]，并按附件约定解码结果；
//! - [`ExchangeRegistry`] 以小写协议名索引交换实现，[`ExchangeHandler`] 把它接入过滤器链。
//!
//! ## 行为契约（What）
//! - 交换层从不重试，超时即终态失败；
//! - 请求 future 被丢弃时，进行中的出站调用随之取消。

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use ::http::{HeaderMap, StatusCode};
use serde_json::Value;
use tracing::debug;

use crate::context::{Context, InboundRequest};
use crate::endpoint::Endpoint;
use crate::error::{GatewayError, InvokeError, ServeError};
use crate::filter::FilterHandler;

#[cfg(feature = "http-exchange")]
pub mod http;
pub mod rpc;

/// HTTP 协议的注册名。
pub const PROTOCOL_HTTP: &str = "http";

/// 归一化后的后端响应。
#[derive(Clone, Debug)]
pub struct ResponseBody {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub attachments: BTreeMap<String, Value>,
    pub body: Bytes,
}

impl ResponseBody {
    pub fn new(status: StatusCode, body: Bytes) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            attachments: BTreeMap::new(),
            body,
        }
    }
}

/// 统一交换契约：过滤器链的终端步骤。
#[async_trait]
pub trait Exchange: Send + Sync + 'static {
    async fn exchange(&self, ctx: &mut Context) -> Result<(), InvokeError>;
}

/// 单个后端协议的 {Assemble, Invoke, Decode} 实现。
///
/// # 教案式说明
/// - **意图 (Why)**：把协议差异收敛在三个步骤中，新增协议不需要改动路由引擎；
/// - **契约 (What)**：
///   - `assemble`：依据 Endpoint 与入站请求构造出站调用，失败属于本地错误；
///   - `invoke`：执行调用，必须区分本地失败（[`InvokeError::Local`]）与远端失败；
///   - `decode`：把协议原生结果归一化为 [`ResponseBody`]；
/// - **风险提示 (Trade-offs)**：`invoke` 内部负责施加超时，调用方不会再额外包裹 deadline。
#[async_trait]
pub trait Transporter: Send + Sync + 'static {
    type Outbound: Send;
    type Raw: Send;

    fn assemble(
        &self,
        endpoint: &Endpoint,
        inbound: &InboundRequest,
    ) -> Result<Self::Outbound, InvokeError>;

    async fn invoke(&self, endpoint: &Endpoint, ctx: &Context) -> Result<Self::Raw, InvokeError>;

    async fn decode(&self, raw: Self::Raw) -> Result<ResponseBody, InvokeError>;
}

/// 把 [`Transporter`] 适配为 [`Exchange`]：依次执行 invoke 与 decode，并写入响应累加器。
pub struct TransportExchange<T> {
    transporter: T,
}

impl<T: Transporter> TransportExchange<T> {
    pub fn new(transporter: T) -> Self {
        Self { transporter }
    }

    pub fn transporter(&self) -> &T {
        &self.transporter
    }
}

#[async_trait]
impl<T: Transporter> Exchange for TransportExchange<T> {
    async fn exchange(&self, ctx: &mut Context) -> Result<(), InvokeError> {
        let endpoint = ctx.endpoint().cloned().ok_or_else(|| {
            InvokeError::local(
                "EXCHANGE:ENDPOINT_UNBOUND",
                "context is not bound to an endpoint",
            )
        })?;
        let raw = self.transporter.invoke(&endpoint, ctx).await?;
        let decoded = self.transporter.decode(raw).await?;

        let response = ctx.response_mut();
        response.status = decoded.status;
        for (name, value) in &decoded.headers {
            response.headers.append(name.clone(), value.clone());
        }
        response.attachments.extend(decoded.attachments);
        response.body = decoded.body;
        Ok(())
    }
}

/// 以协议名索引的交换实现注册表。
#[derive(Default)]
pub struct ExchangeRegistry {
    exchanges: HashMap<String, Arc<dyn Exchange>>,
}

impl ExchangeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册交换实现，协议名大小写不敏感，同一协议只允许注册一次。
    pub fn register(
        &mut self,
        protocol: &str,
        exchange: Arc<dyn Exchange>,
    ) -> Result<(), GatewayError> {
        let protocol = protocol.to_ascii_lowercase();
        if self.exchanges.contains_key(&protocol) {
            return Err(GatewayError::DuplicateExchange { protocol });
        }
        self.exchanges.insert(protocol, exchange);
        Ok(())
    }

    /// 注册 [`Transporter`] 实现。
    pub fn register_transporter<T: Transporter>(
        &mut self,
        protocol: &str,
        transporter: T,
    ) -> Result<(), GatewayError> {
        self.register(protocol, Arc::new(TransportExchange::new(transporter)))
    }

    pub fn lookup(&self, protocol: &str) -> Option<&Arc<dyn Exchange>> {
        self.exchanges.get(&protocol.to_ascii_lowercase())
    }

    pub fn protocols(&self) -> Vec<&str> {
        let mut protocols: Vec<&str> = self.exchanges.keys().map(String::as_str).collect();
        protocols.sort_unstable();
        protocols
    }
}

impl fmt::Debug for ExchangeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeRegistry")
            .field("protocols", &self.protocols())
            .finish()
    }
}

/// 过滤器链的终端处理器：按 Endpoint 协议分派到交换实现。
pub struct ExchangeHandler {
    registry: Arc<ExchangeRegistry>,
}

impl ExchangeHandler {
    pub fn new(registry: Arc<ExchangeRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl FilterHandler for ExchangeHandler {
    async fn handle(&self, ctx: &mut Context) -> Result<(), ServeError> {
        let protocol = ctx
            .endpoint()
            .map(|endpoint| endpoint.protocol.clone())
            .unwrap_or_default();
        let Some(exchange) = self.registry.lookup(&protocol) else {
            debug!(request_id = %ctx.request_id(), protocol = %protocol, "no exchange for protocol");
            return Err(ServeError::protocol_unsupported(&protocol));
        };
        exchange.exchange(ctx).await.map_err(ServeError::from)
    }
}
