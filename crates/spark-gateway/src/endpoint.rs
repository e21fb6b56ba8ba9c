//! # endpoint 模块说明
//!
//! ## 角色定位（Why）
//! - 定义注册中心推送的 [`Endpoint`] 与 [`EndpointEvent`] 数据模型；
//! - 提供路由键 [`RouteKey`]（`METHOD#pattern`）的规范化构造，保证同一路由在全局唯一。
//!
//! ## 行为契约（What）
//! - `Endpoint` 为不可变值：创建后只会被整体替换，不会原地修改；
//! - JSON 字段名采用 camelCase，与注册中心事件格式一致；
//! - HTTP 方法只接受固定白名单，见 [`is_allowed_method`]。

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// 允许注册的 HTTP 方法白名单。
pub const ALLOWED_HTTP_METHODS: [&str; 8] = [
    "GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS", "PATCH", "TRACE",
];

/// 判断方法是否位于白名单内，大小写不敏感。
pub fn is_allowed_method(method: &str) -> bool {
    ALLOWED_HTTP_METHODS
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(method))
}

/// Endpoint 声明的固定参数。
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Argument {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

impl Argument {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// 单个版本的后端目标定义。
///
/// # 教案式说明
/// - **意图 (Why)**：描述“对外暴露的 HTTP 路由”与“后端协议调用”之间的映射；
/// - **契约 (What)**：
///   - `http_method`/`http_pattern`：对外路由，组合成 [`RouteKey`]；
///   - `protocol`：后端协议标识，交换层按小写形式查找实现；
///   - `upstream_*`：后端方法、主机与路径；
///   - `rpc_timeout`：时长字符串，例如 `"3s"`、`"500ms"`，非法时由交换层回退为默认值；
///   - `arguments`：非空即表示“限定参数传递”。
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Endpoint {
    pub application: String,
    pub version: String,
    pub protocol: String,
    pub http_method: String,
    pub http_pattern: String,
    pub upstream_method: String,
    pub upstream_host: String,
    pub upstream_uri: String,
    pub rpc_timeout: String,
    pub arguments: Vec<Argument>,
}

impl Endpoint {
    /// 该 Endpoint 所属的路由键。
    pub fn route_key(&self) -> RouteKey {
        RouteKey::new(&self.http_method, &self.http_pattern)
    }

    /// 是否声明了固定参数。
    pub fn has_arguments(&self) -> bool {
        !self.arguments.is_empty()
    }
}

/// 注册中心事件类型。
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum EndpointEventType {
    Added,
    Updated,
    Removed,
}

impl EndpointEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EndpointEventType::Added => "added",
            EndpointEventType::Updated => "updated",
            EndpointEventType::Removed => "removed",
        }
    }
}

/// 注册中心推送的 Endpoint 变更事件。
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointEvent {
    pub event_type: EndpointEventType,
    pub endpoint: Endpoint,
}

impl EndpointEvent {
    pub fn added(endpoint: Endpoint) -> Self {
        Self {
            event_type: EndpointEventType::Added,
            endpoint,
        }
    }

    pub fn updated(endpoint: Endpoint) -> Self {
        Self {
            event_type: EndpointEventType::Updated,
            endpoint,
        }
    }

    pub fn removed(endpoint: Endpoint) -> Self {
        Self {
            event_type: EndpointEventType::Removed,
            endpoint,
        }
    }
}

/// 对外路由的唯一标识：`METHOD#pattern`。
///
/// - **契约 (What)**：方法统一转为大写，pattern 原样保留；
/// - **实现 (How)**：内部以 `Arc<str>` 持有，克隆只增加引用计数，可直接作为 `DashMap` 的 Key。
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RouteKey(Arc<str>);

impl RouteKey {
    pub fn new(method: &str, pattern: &str) -> Self {
        Self(Arc::from(format!(
            "{}#{}",
            method.to_ascii_uppercase(),
            pattern
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 拆分为 `(method, pattern)`。
    pub fn parts(&self) -> (&str, &str) {
        self.0.split_once('#').unwrap_or((&self.0, ""))
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RouteKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
