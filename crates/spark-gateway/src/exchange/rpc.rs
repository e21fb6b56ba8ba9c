//! # RPC 风格交换实现
//!
//! ## 核心意图（Why）
//! - 网关不绑定任何具体 RPC 框架：调用委托给可插拔的 [`RpcClient`]，交换层只负责装配调用描述、
//!   施加超时与解码结果；
//! - 解码遵循附件约定：两个保留键分别承载 HTTP 状态码与 Header，其余附件作为元数据透传。
//!
//! ## 行为契约（What）
//! - [`RpcResult::error`] 非空即硬失败，本层不重试；
//! - 状态码附件可以是数字或数字字符串，取值非法时解码失败；
//! - Header 附件必须是对象，值为字符串或字符串数组。

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};
use url::form_urlencoded;

use crate::config::{RpcExchangeConfig, parse_duration};
use crate::context::{Context, InboundRequest, attribute_to_string};
use crate::endpoint::{Argument, Endpoint};
use crate::error::{BoxError, InvokeError};

use super::{ResponseBody, Transporter};

/// 本地装配失败的消息。
pub const MSG_INVALID_REQUEST: &str = "RPC:INVALID_REQUEST";
/// 远端返回错误或传输失败的消息。
pub const MSG_REMOTE_ERROR: &str = "RPC:REMOTE_ERROR";
/// 结果无法解码的消息。
pub const MSG_DECODE_ERROR: &str = "RPC:DECODE_ERROR";
/// 调用超时的消息。
pub const MSG_REMOTE_TIMEOUT: &str = "RPC:REMOTE_TIMEOUT";
/// 调用附件中携带请求 ID 的键。
pub const ATTACHMENT_REQUEST_ID: &str = "X-Request-Id";

/// 一次 RPC 调用的协议无关描述。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RpcCall {
    /// 服务地址，取自 `upstream_host`。
    pub host: String,
    /// 服务接口，取自 `upstream_uri`。
    pub interface: String,
    /// 方法名，取自 `upstream_method`。
    pub method: String,
    /// 调用参数；Endpoint 未声明参数时取入站查询串。
    pub arguments: Vec<Argument>,
    /// 隐式附件：请求 ID 与上下文属性。
    pub attachments: BTreeMap<String, String>,
    /// 入站 Body，原样透传。
    pub body: Bytes,
    pub timeout: Duration,
}

/// RPC 框架返回的原生结果。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RpcResult {
    pub error: Option<String>,
    pub value: Value,
    pub attachments: BTreeMap<String, Value>,
}

/// 可插拔的 RPC 客户端。
#[async_trait]
pub trait RpcClient: Send + Sync + 'static {
    async fn call(&self, call: RpcCall) -> Result<RpcResult, BoxError>;
}

/// 按附件约定把 [`RpcResult`] 解码为 [`ResponseBody`]。
#[derive(Clone, Debug)]
pub struct RpcCodec {
    status_key: String,
    headers_key: String,
}

impl Default for RpcCodec {
    fn default() -> Self {
        Self::from_config(&RpcExchangeConfig::default())
    }
}

impl RpcCodec {
    pub fn new(status_key: impl Into<String>, headers_key: impl Into<String>) -> Self {
        Self {
            status_key: status_key.into(),
            headers_key: headers_key.into(),
        }
    }

    pub fn from_config(config: &RpcExchangeConfig) -> Self {
        Self::new(config.status_key.clone(), config.headers_key.clone())
    }

    /// 解码原生结果。
    ///
    /// # 教案式说明
    /// - **契约 (What)**：
    ///   - `error` 非空：返回 [`InvokeError::Remote`]；
    ///   - 状态码键：解析为 HTTP 状态码，缺省 200；
    ///   - Header 键：展开为响应 Header；
    ///   - 其余键：进入 `attachments`；
    ///   - `value`：`Null` 视为空 Body，其余序列化为 JSON 并补充 `Content-Type`。
    pub fn decode(&self, raw: RpcResult) -> Result<ResponseBody, InvokeError> {
        if let Some(error) = raw.error {
            return Err(InvokeError::remote(MSG_REMOTE_ERROR, error));
        }
        let mut status = StatusCode::OK;
        let mut headers = HeaderMap::new();
        let mut attachments = BTreeMap::new();
        for (key, value) in raw.attachments {
            if key == self.status_key {
                status = decode_status(&value)?;
            } else if key == self.headers_key {
                decode_headers(&value, &mut headers)?;
            } else {
                attachments.insert(key, value);
            }
        }

        let body = match &raw.value {
            Value::Null => Bytes::new(),
            value => {
                let encoded = serde_json::to_vec(value)
                    .map_err(|err| InvokeError::remote(MSG_DECODE_ERROR, err))?;
                if !headers.contains_key(CONTENT_TYPE) {
                    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                }
                Bytes::from(encoded)
            }
        };
        Ok(ResponseBody {
            status,
            headers,
            attachments,
            body,
        })
    }
}

fn decode_status(value: &Value) -> Result<StatusCode, InvokeError> {
    let code = match value {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => text.trim().parse::<u64>().ok(),
        _ => None,
    };
    code.and_then(|code| u16::try_from(code).ok())
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or_else(|| InvokeError::remote(MSG_DECODE_ERROR, format!("illegal status attachment: {value}")))
}

fn decode_headers(value: &Value, headers: &mut HeaderMap) -> Result<(), InvokeError> {
    let Value::Object(entries) = value else {
        return Err(InvokeError::remote(
            MSG_DECODE_ERROR,
            format!("header attachment must be an object: {value}"),
        ));
    };
    for (name, values) in entries {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|err| InvokeError::remote(MSG_DECODE_ERROR, err))?;
        let texts: Vec<String> = match values {
            Value::Array(items) => items.iter().map(attribute_to_string).collect(),
            other => vec![attribute_to_string(other)],
        };
        for text in texts {
            let value = HeaderValue::from_str(&text)
                .map_err(|err| InvokeError::remote(MSG_DECODE_ERROR, err))?;
            headers.append(name.clone(), value);
        }
    }
    Ok(())
}

/// 基于 [`RpcClient`] 的交换实现。
#[derive(Debug)]
pub struct RpcTransporter<C> {
    client: C,
    codec: RpcCodec,
    default_timeout: Duration,
}

impl<C: RpcClient> RpcTransporter<C> {
    pub fn new(client: C, config: &RpcExchangeConfig) -> Self {
        Self {
            client,
            codec: RpcCodec::from_config(config),
            default_timeout: config.default_timeout(),
        }
    }

    fn timeout_of(&self, endpoint: &Endpoint) -> Duration {
        if endpoint.rpc_timeout.is_empty() {
            return self.default_timeout;
        }
        parse_duration(&endpoint.rpc_timeout).unwrap_or_else(|| {
            warn!(rpc_timeout = %endpoint.rpc_timeout, "illegal endpoint rpc-timeout");
            self.default_timeout
        })
    }
}

#[async_trait]
impl<C: RpcClient> Transporter for RpcTransporter<C> {
    type Outbound = RpcCall;
    type Raw = RpcResult;

    fn assemble(&self, endpoint: &Endpoint, inbound: &InboundRequest) -> Result<RpcCall, InvokeError> {
        if endpoint.upstream_uri.is_empty() || endpoint.upstream_method.is_empty() {
            return Err(InvokeError::local(
                MSG_INVALID_REQUEST,
                "endpoint must declare upstream interface and method",
            ));
        }
        let arguments = if endpoint.has_arguments() {
            endpoint.arguments.clone()
        } else {
            inbound
                .uri()
                .query()
                .map(|query| {
                    form_urlencoded::parse(query.as_bytes())
                        .map(|(name, value)| Argument::new(name, value))
                        .collect()
                })
                .unwrap_or_default()
        };
        Ok(RpcCall {
            host: endpoint.upstream_host.clone(),
            interface: endpoint.upstream_uri.clone(),
            method: endpoint.upstream_method.clone(),
            arguments,
            attachments: BTreeMap::new(),
            body: inbound.body().clone(),
            timeout: self.timeout_of(endpoint),
        })
    }

    async fn invoke(&self, endpoint: &Endpoint, ctx: &Context) -> Result<RpcResult, InvokeError> {
        let mut call = self.assemble(endpoint, ctx.request())?;
        call.attachments
            .insert(ATTACHMENT_REQUEST_ID.to_owned(), ctx.request_id().to_owned());
        for (key, value) in ctx.attributes() {
            call.attachments.insert(key.clone(), attribute_to_string(value));
        }
        let timeout = call.timeout;
        debug!(
            request_id = %ctx.request_id(),
            interface = %call.interface,
            method = %call.method,
            "rpc exchange: dispatching"
        );
        match tokio::time::timeout(timeout, self.client.call(call)).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(err)) => Err(InvokeError::remote(MSG_REMOTE_ERROR, err)),
            Err(_elapsed) => Err(InvokeError::timeout(MSG_REMOTE_TIMEOUT, timeout)),
        }
    }

    async fn decode(&self, raw: RpcResult) -> Result<ResponseBody, InvokeError> {
        self.codec.decode(raw)
    }
}
