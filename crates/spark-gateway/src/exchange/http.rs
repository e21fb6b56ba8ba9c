//! # HTTP 交换实现
//!
//! ## 核心意图（Why）
//! - 把入站请求改写为发往 Endpoint 上游主机/路径的 HTTP 请求，并把响应原样归一化；
//! - Endpoint 声明固定参数时只传递这些参数：GET 追加到查询串，其它方法作为表单 Body。
//!
//! ## 行为契约（What）
//! - 出站 Host/Path 来自 Endpoint，而非入站 URL；入站查询串原样保留在前；
//! - 入站 Header 被克隆到出站请求（去除 `Host` 与 `Content-Length`），随后写入请求 ID 与全部上下文属性，
//!   因此属性可以覆盖透传的 Header；
//! - 超时取自 `rpc_timeout`，解析失败时回退到默认值并记录告警；超时表现为 [`InvokeError::Timeout`]。
//!
//! ## 风险提示（Trade-offs）
//! - 入站 Body 以 `Bytes` 形式整体持有，大文件上传场景需要监听器侧限制 Body 大小。

use std::time::Duration;

use async_trait::async_trait;
use http::header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST, TRANSFER_ENCODING, USER_AGENT};
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use reqwest::{Client, Request, Response, Url};
use tracing::{debug, warn};
use url::form_urlencoded;

use crate::config::{HttpExchangeConfig, parse_duration};
use crate::context::{Context, InboundRequest, REQUEST_ID_HEADER, attribute_to_string};
use crate::endpoint::{Argument, Endpoint};
use crate::error::{GatewayError, InvokeError};

use super::{PROTOCOL_HTTP, ResponseBody, Transporter};

/// 本地装配失败的消息。
pub const MSG_INVALID_REQUEST: &str = "HTTP:INVALID_REQUEST";
/// 传输或后端失败的消息。
pub const MSG_REMOTE_ERROR: &str = "HTTP:REMOTE_ERROR";
/// 调用超时的消息。
pub const MSG_REMOTE_TIMEOUT: &str = "HTTP:REMOTE_TIMEOUT";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// 按参数名排序后进行表单编码，同名参数保持声明顺序。
pub fn encode_arguments(arguments: &[Argument]) -> String {
    let mut sorted: Vec<&Argument> = arguments.iter().collect();
    sorted.sort_by(|left, right| left.name.cmp(&right.name));
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(sorted.iter().map(|arg| (arg.name.as_str(), arg.value.as_str())))
        .finish()
}

/// 基于 `reqwest` 的 HTTP 交换实现。
#[derive(Clone, Debug)]
pub struct HttpTransporter {
    client: Client,
    user_agent: HeaderValue,
    default_timeout: Duration,
}

impl HttpTransporter {
    /// 以外部提供的客户端构造，便于宿主共享连接池。
    pub fn new(client: Client, config: &HttpExchangeConfig) -> Result<Self, GatewayError> {
        let user_agent =
            HeaderValue::from_str(&config.user_agent).map_err(|err| GatewayError::ExchangeInit {
                protocol: PROTOCOL_HTTP.to_owned(),
                detail: format!("invalid user_agent: {err}"),
            })?;
        Ok(Self {
            client,
            user_agent,
            default_timeout: config.default_timeout(),
        })
    }

    /// 以默认客户端构造。
    pub fn from_config(config: &HttpExchangeConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .build()
            .map_err(|err| GatewayError::ExchangeInit {
                protocol: PROTOCOL_HTTP.to_owned(),
                detail: err.to_string(),
            })?;
        Self::new(client, config)
    }

    fn timeout_of(&self, endpoint: &Endpoint) -> Duration {
        if endpoint.rpc_timeout.is_empty() {
            return self.default_timeout;
        }
        parse_duration(&endpoint.rpc_timeout).unwrap_or_else(|| {
            warn!(
                rpc_timeout = %endpoint.rpc_timeout,
                fallback = ?self.default_timeout,
                "illegal endpoint rpc-timeout"
            );
            self.default_timeout
        })
    }

    fn upstream_url(endpoint: &Endpoint, inbound: &InboundRequest, query: &str) -> Result<Url, InvokeError> {
        let base = if endpoint.upstream_host.contains("://") {
            endpoint.upstream_host.clone()
        } else {
            let scheme = inbound.uri().scheme_str().unwrap_or("http");
            format!("{scheme}://{}", endpoint.upstream_host)
        };
        let mut url = Url::parse(&base).map_err(|err| InvokeError::local(MSG_INVALID_REQUEST, err))?;
        url.set_path(&endpoint.upstream_uri);
        url.set_query((!query.is_empty()).then_some(query));
        Ok(url)
    }

    fn passthrough_headers(&self, inbound: &InboundRequest) -> HeaderMap {
        let mut headers = inbound.headers().clone();
        headers.remove(HOST);
        headers.remove(CONTENT_LENGTH);
        headers
    }
}

#[async_trait]
impl Transporter for HttpTransporter {
    type Outbound = Request;
    type Raw = (Response, Duration);

    fn assemble(&self, endpoint: &Endpoint, inbound: &InboundRequest) -> Result<Request, InvokeError> {
        let method = Method::from_bytes(endpoint.upstream_method.to_ascii_uppercase().as_bytes())
            .map_err(|err| InvokeError::local(MSG_INVALID_REQUEST, err))?;
        let mut query = inbound.uri().query().unwrap_or_default().to_owned();
        let mut body = inbound.body().clone();
        let mut headers = self.passthrough_headers(inbound);

        if endpoint.has_arguments() {
            let encoded = encode_arguments(&endpoint.arguments);
            if method == Method::GET {
                if !query.is_empty() {
                    query.push('&');
                }
                query.push_str(&encoded);
            } else {
                body = encoded.into_bytes().into();
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE));
            }
        }
        headers.insert(USER_AGENT, self.user_agent.clone());

        let url = Self::upstream_url(endpoint, inbound, &query)?;
        let mut request = Request::new(method, url);
        *request.headers_mut() = headers;
        *request.body_mut() = Some(body.into());
        *request.timeout_mut() = Some(self.timeout_of(endpoint));
        Ok(request)
    }

    async fn invoke(&self, endpoint: &Endpoint, ctx: &Context) -> Result<Self::Raw, InvokeError> {
        let mut request = self.assemble(endpoint, ctx.request())?;
        let timeout = request.timeout().copied().unwrap_or(self.default_timeout);
        let headers = request.headers_mut();
        if let Ok(value) = HeaderValue::from_str(ctx.request_id()) {
            headers.insert(REQUEST_ID_HEADER, value);
        }
        for (key, value) in ctx.attributes() {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|err| InvokeError::local(MSG_INVALID_REQUEST, err))?;
            let value = HeaderValue::from_str(&attribute_to_string(value))
                .map_err(|err| InvokeError::local(MSG_INVALID_REQUEST, err))?;
            headers.insert(name, value);
        }

        debug!(
            request_id = %ctx.request_id(),
            url = %request.url(),
            method = %request.method(),
            "http exchange: dispatching"
        );
        match self.client.execute(request).await {
            Ok(response) => Ok((response, timeout)),
            Err(err) if err.is_timeout() => Err(InvokeError::timeout(MSG_REMOTE_TIMEOUT, timeout)),
            Err(err) => Err(InvokeError::remote(MSG_REMOTE_ERROR, err)),
        }
    }

    async fn decode(&self, raw: Self::Raw) -> Result<ResponseBody, InvokeError> {
        let (response, timeout) = raw;
        let status = response.status();
        let mut headers = response.headers().clone();
        headers.remove(CONTENT_LENGTH);
        headers.remove(TRANSFER_ENCODING);
        headers.remove(CONNECTION);
        let body = response.bytes().await.map_err(|err| {
            if err.is_timeout() {
                InvokeError::timeout(MSG_REMOTE_TIMEOUT, timeout)
            } else {
                InvokeError::remote(MSG_REMOTE_ERROR, err)
            }
        })?;
        let mut decoded = ResponseBody::new(status, body);
        decoded.headers = headers;
        Ok(decoded)
    }
}
