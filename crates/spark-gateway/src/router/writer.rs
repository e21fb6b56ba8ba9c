//! # 响应写出
//!
//! 路由引擎的全部出口都经过 [`ResponseWriter`]：成功时写出响应累加器，失败时写出结构化错误。
//! 默认实现 [`JsonResponseWriter`] 的错误体为
//! `{"request_id","status":"error","error_code","message"}`，内部原因与扩展信息从不进入响应。

use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, Response};
use serde::Serialize;

use crate::context::{REQUEST_ID_HEADER, ResponseState};
use crate::error::ServeError;

/// 网关写回监听器的响应。
pub type GatewayResponse = Response<Bytes>;

/// 统一的响应写出接口。
///
/// # 教案式说明
/// - **意图 (Why)**：宿主可以替换错误体格式（例如对接既有的错误协议），而不改动路由引擎；
/// - **契约 (What)**：
///   - `write_body`：写出成功响应，`request_id` 需回写到响应 Header；
///   - `write_error`：`headers` 为链路中已累积的响应 Header，实现需与错误自带的 Header 片段合并；
///     只允许输出状态码、错误码与客户端安全消息。
pub trait ResponseWriter: Send + Sync + 'static {
    fn write_body(&self, request_id: &str, response: &ResponseState) -> GatewayResponse;

    fn write_error(&self, request_id: &str, headers: &HeaderMap, error: &ServeError) -> GatewayResponse;
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    request_id: &'a str,
    status: &'static str,
    error_code: &'a str,
    message: &'a str,
}

/// 默认 JSON 错误体写出器。
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonResponseWriter;

fn insert_request_id(headers: &mut HeaderMap, request_id: &str) {
    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(REQUEST_ID_HEADER, value);
    }
}

impl ResponseWriter for JsonResponseWriter {
    fn write_body(&self, request_id: &str, state: &ResponseState) -> GatewayResponse {
        let mut response = Response::new(state.body.clone());
        *response.status_mut() = state.status;
        *response.headers_mut() = state.headers.clone();
        insert_request_id(response.headers_mut(), request_id);
        response
    }

    fn write_error(&self, request_id: &str, headers: &HeaderMap, error: &ServeError) -> GatewayResponse {
        let body = ErrorBody {
            request_id,
            status: "error",
            error_code: error.error_code(),
            message: error.message(),
        };
        let encoded = serde_json::to_vec(&body).unwrap_or_default();

        let mut merged = headers.clone();
        for (name, value) in error.headers() {
            merged.append(name.clone(), value.clone());
        }
        merged.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        insert_request_id(&mut merged, request_id);

        let mut response = Response::new(Bytes::from(encoded));
        *response.status_mut() = error.status();
        *response.headers_mut() = merged;
        response
    }
}
