//! # context 模块说明
//!
//! ## 角色定位（Why）
//! - [`Context`] 是单个请求在网关内的全部可变状态：请求 ID、已解析的 Endpoint、入站请求、
//!   开放式属性表与响应累加器；
//! - 过滤器链与交换层只通过 `&mut Context` 协作，因此同一时刻只有一个在途请求拥有它。
//!
//! ## 行为契约（What）
//! - [`Context::reset`] 必须清空全部请求态，包括属性、Header 与 Body 缓冲；
//! - 池化复用由 [`crate::pool`] 负责，这里只定义“什么算作请求态”。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, Request, StatusCode};
use serde_json::Value;

use crate::endpoint::Endpoint;

/// 入站请求的统一表示：Body 已由监听器完整读取。
pub type InboundRequest = Request<Bytes>;

/// 请求 ID 在响应与上游调用中使用的 Header。
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// 把属性值转换成可以写入 Header 的文本。
///
/// 字符串原样输出，其余类型使用 JSON 文本形式。
/// 去掉 `host[:port]` 中的端口；IPv6 字面量保留方括号，与 `Uri::host` 的形态一致。
fn strip_port(authority: &str) -> &str {
    if authority.starts_with('[') {
        return match authority.find(']') {
            Some(end) => &authority[..=end],
            None => authority,
        };
    }
    authority.split_once(':').map_or(authority, |(host, _port)| host)
}

pub fn attribute_to_string(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// 响应累加器。
///
/// - **契约 (What)**：交换层把后端响应归一化后写入此处，路由引擎在链路结束后统一写出；
/// - **默认值**：状态码 200，Header、附件与 Body 为空。
#[derive(Debug, Clone)]
pub struct ResponseState {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub attachments: BTreeMap<String, Value>,
    pub body: Bytes,
}

impl Default for ResponseState {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            attachments: BTreeMap::new(),
            body: Bytes::new(),
        }
    }
}

impl ResponseState {
    fn reset(&mut self) {
        self.status = StatusCode::OK;
        self.headers.clear();
        self.attachments.clear();
        self.body = Bytes::new();
    }
}

/// 请求级上下文。
///
/// # 教案式说明
/// - **意图 (Why)**：在入站传输请求与出站协议调用之间架桥，避免各阶段各自传递零散参数；
/// - **契约 (What)**：
///   - `bind` 把上下文绑定到新请求，调用前上下文必须处于重置状态；
///   - 属性表对过滤器开放读写，HTTP 交换层会把每个属性写成出站 Header；
///   - `response` 是唯一的响应累加器；
/// - **风险 (Trade-offs)**：上下文会被池化复用，遗漏重置字段会造成跨请求数据泄露。
#[derive(Debug)]
pub struct Context {
    request_id: String,
    endpoint: Option<Arc<Endpoint>>,
    request: InboundRequest,
    attributes: HashMap<String, Value>,
    response: ResponseState,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            request_id: String::new(),
            endpoint: None,
            request: Request::new(Bytes::new()),
            attributes: HashMap::new(),
            response: ResponseState::default(),
        }
    }
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// 绑定到新的请求。
    pub fn bind(&mut self, request_id: String, endpoint: Arc<Endpoint>, request: InboundRequest) {
        self.request_id = request_id;
        self.endpoint = Some(endpoint);
        self.request = request;
    }

    /// 清空全部请求态。
    pub fn reset(&mut self) {
        self.request_id.clear();
        self.endpoint = None;
        self.request = Request::new(Bytes::new());
        self.attributes.clear();
        self.response.reset();
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// 已解析的 Endpoint。
    ///
    /// 只有在 `bind` 之后才会返回 `Some`；过滤器与交换层运行时一定已绑定。
    pub fn endpoint(&self) -> Option<&Arc<Endpoint>> {
        self.endpoint.as_ref()
    }

    pub fn request(&self) -> &InboundRequest {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut InboundRequest {
        &mut self.request
    }

    /// 入站请求的 Host，优先取 URI authority，其次取 `Host` Header，并去掉端口。
    pub fn host(&self) -> Option<&str> {
        let raw = self
            .request
            .uri()
            .host()
            .or_else(|| {
                self.request
                    .headers()
                    .get(http::header::HOST)
                    .and_then(|value| value.to_str().ok())
            })?;
        Some(strip_port(raw))
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn remove_attribute(&mut self, key: &str) -> Option<Value> {
        self.attributes.remove(key)
    }

    pub fn attributes(&self) -> &HashMap<String, Value> {
        &self.attributes
    }

    pub fn response(&self) -> &ResponseState {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut ResponseState {
        &mut self.response
    }
}
