//! # 检视查询
//!
//! 供调试端点使用的只读查询：按应用、协议、HTTP pattern 或上游 URI 过滤在线路由。
//! 只依赖存储的读契约（路由枚举与 `random_version`），不持有任何锁跨越序列化。
//!
//! - 没有任何过滤条件时返回 `{route_key: {version: endpoint}}` 对象；
//! - 存在过滤条件时返回数组，任一条件命中即选中该路由；
//! - 协议比较大小写不敏感，其余条件精确匹配。

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};
use url::form_urlencoded;

use crate::endpoint::Endpoint;
use crate::store::{EndpointStore, MultiVersionEndpoint};

/// 查询条件，字段名与调试端点的查询参数一致。
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct EndpointQuery {
    pub application: Option<String>,
    pub protocol: Option<String>,
    pub http_pattern: Option<String>,
    pub upstream_uri: Option<String>,
}

impl EndpointQuery {
    /// 从 URL 查询串解析，空值视为未设置。
    pub fn from_query_string(query: &str) -> Self {
        let mut parsed = Self::default();
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            if value.is_empty() {
                continue;
            }
            let slot = match key.as_ref() {
                "application" => &mut parsed.application,
                "protocol" => &mut parsed.protocol,
                "http-pattern" => &mut parsed.http_pattern,
                "upstream-uri" => &mut parsed.upstream_uri,
                _ => continue,
            };
            *slot = Some(value.into_owned());
        }
        parsed
    }

    pub fn is_empty(&self) -> bool {
        self.application.is_none()
            && self.protocol.is_none()
            && self.http_pattern.is_none()
            && self.upstream_uri.is_none()
    }

    fn matches(&self, sample: &Endpoint) -> bool {
        self.application
            .as_deref()
            .is_some_and(|app| app == sample.application)
            || self
                .protocol
                .as_deref()
                .is_some_and(|proto| proto.eq_ignore_ascii_case(&sample.protocol))
            || self
                .http_pattern
                .as_deref()
                .is_some_and(|pattern| pattern == sample.http_pattern)
            || self
                .upstream_uri
                .as_deref()
                .is_some_and(|uri| uri == sample.upstream_uri)
    }
}

/// 多版本集合的可序列化视图：`{version: endpoint}`，按版本排序。
pub fn to_serializable_map(route: &MultiVersionEndpoint) -> Value {
    let versions: BTreeMap<String, Value> = route
        .snapshot()
        .into_iter()
        .map(|(version, endpoint)| {
            let value = serde_json::to_value(endpoint.as_ref()).unwrap_or(Value::Null);
            (version, value)
        })
        .collect();
    Value::Object(versions.into_iter().collect())
}

/// 执行检视查询。
pub fn query_endpoints(store: &EndpointStore, query: &EndpointQuery) -> Value {
    let routes = store.routes();
    if query.is_empty() {
        let all: Map<String, Value> = routes
            .iter()
            .map(|(key, route)| (key.to_string(), to_serializable_map(route)))
            .collect();
        return Value::Object(all);
    }
    let selected = routes
        .iter()
        .filter(|(_, route)| {
            route
                .random_version()
                .is_some_and(|sample| query.matches(&sample))
        })
        .map(|(_, route)| to_serializable_map(route))
        .collect();
    Value::Array(selected)
}
