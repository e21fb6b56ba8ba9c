//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为网关请求链路提供统一的结构化错误 [`ServeError`]：过滤器、交换层与路由引擎都以它作为终态错误；
//! - 将协议交换阶段的失败细分为 [`InvokeError`]，区分“请求从未离开网关”与“后端拒绝或失败”；
//! - 启动装配阶段（配置解析、过滤器工厂解析、注册中心监听）的失败统一归入 [`GatewayError`]。
//!
//! ## 设计要求（What）
//! - `ServeError` 的内部原因（`cause`）与扩展信息（`extras`）只用于日志，绝不序列化给调用方；
//! - 每个终态错误都必须携带稳定错误码，见 [`codes`]；
//! - 所有错误类型实现 `std::error::Error`，并通过 `source()` 暴露底层原因。

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde_json::Value;
use thiserror::Error;

/// 类型擦除后的底层错误。
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// 稳定错误码常量。
///
/// 错误码属于对外契约，调用方可能据此做分支处理；新增可以，修改既有取值需要走兼容流程。
pub mod codes {
    /// 请求数据不合法。
    pub const REQUEST_INVALID: &str = "GATEWAY:REQUEST_INVALID";
    /// 路由命中但版本不存在。
    pub const ENDPOINT_VERSION_NOT_FOUND: &str = "GATEWAY:ENDPOINT_VERSION_NOT_FOUND";
    /// 监听器层面未匹配到任何路由。
    pub const ROUTE_NOT_FOUND: &str = "GATEWAY:ROUTE_NOT_FOUND";
    /// 过滤器拒绝请求的默认错误码。
    pub const FILTER_REJECTED: &str = "GATEWAY:FILTER_REJECTED";
    /// 交换层在本地装配阶段失败。
    pub const INVOKE_LOCAL: &str = "GATEWAY:INVOKE_LOCAL";
    /// 后端调用失败。
    pub const INVOKE_REMOTE: &str = "GATEWAY:INVOKE_REMOTE";
    /// 后端调用超时。
    pub const INVOKE_TIMEOUT: &str = "GATEWAY:INVOKE_TIMEOUT";
    /// Endpoint 声明的协议没有对应的交换实现。
    pub const PROTOCOL_UNSUPPORTED: &str = "GATEWAY:PROTOCOL_UNSUPPORTED";
    /// 非预期故障（panic）被恢复边界捕获。
    pub const INTERNAL_CRITICAL: &str = "GATEWAY:INTERNAL_CRITICAL";
}

/// `extras` 中记录请求 ID 的键。
pub const EXTRA_REQUEST_ID: &str = "request.id";
/// `extras` 中记录交换失败来源（`local`/`remote`）的键。
pub const EXTRA_INVOKE_ORIGIN: &str = "invoke.origin";
/// `extras` 中记录恢复边界捕获的调用栈的键。
pub const EXTRA_STACK_TRACE: &str = "error.stack";

/// 终态错误的分类。
///
/// # 教案式说明
/// - **意图 (Why)**：为日志、指标与响应写出路径提供粗粒度分类，路由引擎不解读业务错误，只按分类记录；
/// - **契约 (What)**：
///   - `BadRequest`：入站数据不合法；
///   - `VersionNotFound`：路由存在但没有匹配版本，对应 HTTP 404；
///   - `FilterRejected`：过滤器拒绝请求（例如鉴权失败）；
///   - `RemoteInvoke`：交换阶段失败，细分来源见 [`EXTRA_INVOKE_ORIGIN`]；
///   - `InternalCritical`：恢复边界捕获的非预期故障。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorKind {
    BadRequest,
    VersionNotFound,
    FilterRejected,
    RemoteInvoke,
    InternalCritical,
}

impl ErrorKind {
    /// 低基数的分类标签，用于日志字段。
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::VersionNotFound => "version_not_found",
            ErrorKind::FilterRejected => "filter_rejected",
            ErrorKind::RemoteInvoke => "remote_invoke",
            ErrorKind::InternalCritical => "internal_critical",
        }
    }
}

/// 网关处理请求时的结构化服务错误。
///
/// # 教案式说明
/// - **意图 (Why)**：过滤器、交换层与恢复边界产生的所有终态错误都收敛为同一形状，
///   使路由引擎只需一条响应写出路径；
/// - **契约 (What)**：
///   - `status`/`error_code`/`message`：会写给调用方的三元组，`message` 必须是客户端安全文本；
///   - `cause`：内部原因，只出现在日志与 `source()` 链中；
///   - `headers`：需要合并进响应的 Header 片段（例如 `WWW-Authenticate`）；
///   - `extras`：追踪用的扩展键值，不会输出给调用方。
/// - **风险提示 (Trade-offs)**：`cause` 为 `Box<dyn Error>`，因此 `ServeError` 不实现 `Clone`；
///   需要复制时请重新构造。
#[derive(Debug, Error)]
#[error("serve error [{}] status={status}, code={error_code}: {message}", .kind.as_str())]
pub struct ServeError {
    kind: ErrorKind,
    status: StatusCode,
    error_code: Cow<'static, str>,
    message: Cow<'static, str>,
    #[source]
    cause: Option<BoxError>,
    headers: HeaderMap,
    extras: BTreeMap<String, Value>,
}

impl ServeError {
    /// 以分类、状态码、错误码与客户端消息构造错误。
    pub fn new(
        kind: ErrorKind,
        status: StatusCode,
        error_code: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            kind,
            status,
            error_code: error_code.into(),
            message: message.into(),
            cause: None,
            headers: HeaderMap::new(),
            extras: BTreeMap::new(),
        }
    }

    /// 入站数据不合法（400）。
    pub fn bad_request(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(
            ErrorKind::BadRequest,
            StatusCode::BAD_REQUEST,
            codes::REQUEST_INVALID,
            message,
        )
    }

    /// 过滤器拒绝请求。
    pub fn filter_rejected(
        status: StatusCode,
        error_code: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::new(ErrorKind::FilterRejected, status, error_code, message)
    }

    /// 路由已注册但请求版本不存在，固定为 404 + `ENDPOINT_VERSION_NOT_FOUND`。
    pub fn version_not_found() -> Self {
        Self::new(
            ErrorKind::VersionNotFound,
            StatusCode::NOT_FOUND,
            codes::ENDPOINT_VERSION_NOT_FOUND,
            "ENDPOINT_VERSION_NOT_FOUND",
        )
    }

    /// 监听器未匹配到路由，固定为 404 + `ROUTE:NOT_FOUND`。
    pub fn route_not_found() -> Self {
        Self::new(
            ErrorKind::BadRequest,
            StatusCode::NOT_FOUND,
            codes::ROUTE_NOT_FOUND,
            "ROUTE:NOT_FOUND",
        )
    }

    /// Endpoint 声明的协议未注册交换实现。
    pub fn protocol_unsupported(protocol: &str) -> Self {
        Self::new(
            ErrorKind::InternalCritical,
            StatusCode::INTERNAL_SERVER_ERROR,
            codes::PROTOCOL_UNSUPPORTED,
            "ENDPOINT:PROTOCOL_UNSUPPORTED",
        )
        .with_extra("endpoint.protocol", protocol)
    }

    /// 恢复边界捕获的非预期故障。
    ///
    /// # 教案式说明
    /// - **契约 (What)**：状态码固定 500，错误码固定 [`codes::INTERNAL_CRITICAL`]，
    ///   客户端只会看到通用文本；故障描述进入 `cause`，请求 ID 与调用栈进入 `extras`；
    /// - **前置条件**：只应由链路恢复边界调用，业务错误请使用其他构造器。
    pub fn critical(request_id: &str, fault: impl Into<String>, stack: impl Into<String>) -> Self {
        let fault: String = fault.into();
        Self::new(
            ErrorKind::InternalCritical,
            StatusCode::INTERNAL_SERVER_ERROR,
            codes::INTERNAL_CRITICAL,
            "SERVER:CRITICAL:UNEXPECTED_FAULT",
        )
        .with_cause(fault)
        .with_extra(EXTRA_REQUEST_ID, request_id)
        .with_extra(EXTRA_STACK_TRACE, stack.into())
    }

    /// 附加内部原因。
    pub fn with_cause(mut self, cause: impl Into<BoxError>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// 附加一个响应 Header，已存在的同名值会保留，新值追加在后。
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    /// 合并一组 Header 片段，语义同 [`Self::with_header`]。
    pub fn merge_headers(mut self, headers: &HeaderMap) -> Self {
        for (name, value) in headers {
            self.headers.append(name.clone(), value.clone());
        }
        self
    }

    /// 写入一条追踪用扩展信息，同名键后写覆盖先写。
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extras.insert(key.into(), value.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn error_code(&self) -> &str {
        &self.error_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// 内部原因，仅供日志使用。
    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.extras.get(key)
    }

    pub fn extras(&self) -> &BTreeMap<String, Value> {
        &self.extras
    }
}

/// 协议交换阶段的错误。
///
/// # 教案式说明
/// - **意图 (Why)**：`Assemble`/`Invoke`/`Decode` 的失败需要区分来源，日志与调用方才能分辨
///   “请求从未离开网关”与“后端拒绝或失败”；
/// - **契约 (What)**：
///   - `Local`：本地装配或准备阶段失败，后端从未收到请求；
///   - `Remote`：传输失败、后端返回显式错误或响应无法解码；
///   - `Timeout`：超出 Endpoint 声明的超时时间，属于远端失败的特例；
///   - `message` 为稳定的协议前缀消息，例如 `HTTP:REMOTE_ERROR`，会原样写给调用方。
/// - **转换 (How)**：通过 `From<InvokeError> for ServeError` 统一落入 [`ErrorKind::RemoteInvoke`]，
///   并在 `extras` 中记录 [`EXTRA_INVOKE_ORIGIN`]。
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("{message}: {source}")]
    Local {
        message: Cow<'static, str>,
        source: BoxError,
    },
    #[error("{message}: {source}")]
    Remote {
        message: Cow<'static, str>,
        source: BoxError,
    },
    #[error("{message}: deadline of {timeout:?} exceeded")]
    Timeout {
        message: Cow<'static, str>,
        timeout: Duration,
    },
}

impl InvokeError {
    pub fn local(message: impl Into<Cow<'static, str>>, source: impl Into<BoxError>) -> Self {
        InvokeError::Local {
            message: message.into(),
            source: source.into(),
        }
    }

    pub fn remote(message: impl Into<Cow<'static, str>>, source: impl Into<BoxError>) -> Self {
        InvokeError::Remote {
            message: message.into(),
            source: source.into(),
        }
    }

    pub fn timeout(message: impl Into<Cow<'static, str>>, timeout: Duration) -> Self {
        InvokeError::Timeout {
            message: message.into(),
            timeout,
        }
    }

    /// 是否为“从未离开网关”的本地失败。
    pub fn is_local(&self) -> bool {
        matches!(self, InvokeError::Local { .. })
    }

    /// 稳定的协议前缀消息。
    pub fn message(&self) -> &str {
        match self {
            InvokeError::Local { message, .. }
            | InvokeError::Remote { message, .. }
            | InvokeError::Timeout { message, .. } => message,
        }
    }
}

impl From<InvokeError> for ServeError {
    fn from(value: InvokeError) -> Self {
        match value {
            InvokeError::Local { message, source } => ServeError::new(
                ErrorKind::RemoteInvoke,
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::INVOKE_LOCAL,
                message,
            )
            .with_cause(source)
            .with_extra(EXTRA_INVOKE_ORIGIN, "local"),
            InvokeError::Remote { message, source } => ServeError::new(
                ErrorKind::RemoteInvoke,
                StatusCode::BAD_GATEWAY,
                codes::INVOKE_REMOTE,
                message,
            )
            .with_cause(source)
            .with_extra(EXTRA_INVOKE_ORIGIN, "remote"),
            InvokeError::Timeout { message, timeout } => ServeError::new(
                ErrorKind::RemoteInvoke,
                StatusCode::GATEWAY_TIMEOUT,
                codes::INVOKE_TIMEOUT,
                message,
            )
            .with_cause(format!("deadline of {timeout:?} exceeded"))
            .with_extra(EXTRA_INVOKE_ORIGIN, "remote"),
        }
    }
}

/// 启动装配阶段的错误。
///
/// 这些错误出现在请求链路之外，直接返回给宿主，由宿主决定是否中止启动。
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("filter `{id}` references unregistered factory type `{type_id}`")]
    FilterFactoryNotFound { id: String, type_id: String },
    #[error("filter `{id}` rejected its options: {detail}")]
    FilterOptions { id: String, detail: String },
    #[error("filter factory type `{type_id}` already registered")]
    DuplicateFilterFactory { type_id: String },
    #[error("exchange for protocol `{protocol}` already registered")]
    DuplicateExchange { protocol: String },
    #[error("failed to initialize exchange for protocol `{protocol}`: {detail}")]
    ExchangeInit { protocol: String, detail: String },
    #[error("failed to read config file `{}`", .path.display())]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config value `{key}`: {detail}")]
    InvalidConfig { key: String, detail: String },
    #[error("failed to parse gateway config")]
    ConfigParse(#[from] toml::de::Error),
    #[error("endpoint registry watch failed: {detail}")]
    RegistryWatch { detail: String },
    #[error("tracing subscriber already installed")]
    TracingAlreadyInstalled,
    #[error("failed to install tracing subscriber: {0}")]
    TracingInstall(String),
}
