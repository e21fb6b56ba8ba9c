//! # config 模块说明
//!
//! ## 角色定位（Why）
//! - 描述网关内核的全部可调参数：版本 Header、请求 ID Header、上下文池容量、交换层默认值与过滤器列表；
//! - 路由引擎只接收已解析的 [`GatewayConfig`]，文件读取属于宿主职责，这里仅提供便利的加载函数。
//!
//! ## 行为契约（What）
//! - 所有字段均有默认值，空 TOML 文档即可得到可运行配置；
//! - [`GatewayConfig::load`] 的路径优先级：环境变量 `SPARK_GATEWAY_CONF` > 显式路径 > `conf.d/gateway.toml`；
//! - 时长字段采用 `"10s"`、`"1m30s"`、`"500ms"` 形式的字符串，由 [`parse_duration`] 解析。

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use crate::error::GatewayError;

/// 指定配置文件路径的环境变量。
pub const ENV_CONFIG_PATH: &str = "SPARK_GATEWAY_CONF";
/// 默认配置文件路径。
pub const DEFAULT_CONFIG_PATH: &str = "conf.d/gateway.toml";
/// 默认版本 Header。
pub const DEFAULT_VERSION_HEADER: &str = "X-Version";
/// 默认请求 ID Header。
pub const DEFAULT_REQUEST_ID_HEADER: &str = "X-Request-Id";
/// 交换层默认超时。
pub const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);
/// HTTP 交换层默认 User-Agent。
pub const DEFAULT_USER_AGENT: &str = "SparkGateway/Exchange/v1";
/// RPC 附件中承载 HTTP 状态码的保留键。
pub const DEFAULT_RPC_STATUS_KEY: &str = "@spark.gateway.http-status";
/// RPC 附件中承载 HTTP Header 的保留键。
pub const DEFAULT_RPC_HEADERS_KEY: &str = "@spark.gateway.http-headers";

/// 网关配置根节点。
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub http_server: HttpServerConfig,
    pub context_pool: ContextPoolConfig,
    pub exchange: ExchangeConfig,
    pub filters: Vec<FilterConfig>,
}

impl GatewayConfig {
    /// 解析 TOML 文本。
    pub fn from_toml_str(text: &str) -> Result<Self, GatewayError> {
        Ok(toml::from_str(text)?)
    }

    /// 按优先级解析配置文件路径并加载。
    pub fn load(explicit: Option<&Path>) -> Result<Self, GatewayError> {
        let path = resolve_config_path(std::env::var_os(ENV_CONFIG_PATH).map(PathBuf::from), explicit);
        info!(path = %path.display(), "loading gateway config");
        let text = std::fs::read_to_string(&path)
            .map_err(|source| GatewayError::ConfigRead { path, source })?;
        Self::from_toml_str(&text)
    }
}

/// 配置路径解析：环境变量 > 显式路径 > 默认路径；空值视为未设置。
pub fn resolve_config_path(env: Option<PathBuf>, explicit: Option<&Path>) -> PathBuf {
    env.filter(|path| !path.as_os_str().is_empty())
        .or_else(|| {
            explicit
                .filter(|path| !path.as_os_str().is_empty())
                .map(Path::to_path_buf)
        })
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// 入站 HTTP 相关配置。
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct HttpServerConfig {
    /// 决定 `FindByVersion` 查找键的 Header 名称。
    pub version_header: String,
    /// 依次尝试读取请求 ID 的 Header 列表，全部缺失时生成 UUID。
    pub request_id_headers: Vec<String>,
    /// 是否输出逐请求的路由日志。
    pub request_log_enable: bool,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            version_header: DEFAULT_VERSION_HEADER.to_owned(),
            request_id_headers: vec![DEFAULT_REQUEST_ID_HEADER.to_owned()],
            request_log_enable: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct ContextPoolConfig {
    /// 池中最多保留的空闲上下文数量。
    pub capacity: usize,
}

impl Default for ContextPoolConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub http: HttpExchangeConfig,
    pub rpc: RpcExchangeConfig,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct HttpExchangeConfig {
    /// Endpoint 超时缺失或非法时使用的默认值。
    pub default_timeout: String,
    pub user_agent: String,
}

impl HttpExchangeConfig {
    /// 解析后的默认超时，非法时回退到 10 秒。
    pub fn default_timeout(&self) -> Duration {
        parse_duration(&self.default_timeout).unwrap_or(DEFAULT_EXCHANGE_TIMEOUT)
    }
}

impl Default for HttpExchangeConfig {
    fn default() -> Self {
        Self {
            default_timeout: "10s".to_owned(),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct RpcExchangeConfig {
    pub status_key: String,
    pub headers_key: String,
    pub default_timeout: String,
}

impl RpcExchangeConfig {
    pub fn default_timeout(&self) -> Duration {
        parse_duration(&self.default_timeout).unwrap_or(DEFAULT_EXCHANGE_TIMEOUT)
    }
}

impl Default for RpcExchangeConfig {
    fn default() -> Self {
        Self {
            status_key: DEFAULT_RPC_STATUS_KEY.to_owned(),
            headers_key: DEFAULT_RPC_HEADERS_KEY.to_owned(),
            default_timeout: "10s".to_owned(),
        }
    }
}

/// 单个过滤器的配置项。
///
/// - `id`：实例标识，仅用于日志与错误信息；
/// - `type_id`：工厂注册名；
/// - `disable`：为 `true` 时跳过装配；
/// - `options`：交给工厂解释的开放式参数。
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct FilterConfig {
    pub id: String,
    pub type_id: String,
    #[serde(default)]
    pub disable: bool,
    #[serde(default)]
    pub options: Map<String, Value>,
}

impl FilterConfig {
    pub fn new(id: impl Into<String>, type_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_id: type_id.into(),
            ..Self::default()
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    /// 把 `options` 反序列化为工厂自己的参数结构。
    pub fn options_as<T: DeserializeOwned>(&self) -> Result<T, GatewayError> {
        serde_json::from_value(Value::Object(self.options.clone())).map_err(|err| {
            GatewayError::FilterOptions {
                id: self.id.clone(),
                detail: err.to_string(),
            }
        })
    }
}

/// 解析 `"1h2m3.5s"`、`"500ms"`、`"10us"` 形式的时长字符串。
///
/// # 教案式说明
/// - **契约 (What)**：由若干 `数字[.小数]单位` 片段组成，单位取 `ns`、`us`/`µs`、`ms`、`s`、`m`、`h`；
///   单独的 `"0"` 合法；空串、缺失单位、负值或溢出返回 `None`；
/// - **实现 (How)**：逐段累加纳秒数，使用 `checked_*` 防止溢出。
pub fn parse_duration(text: &str) -> Option<Duration> {
    let text = text.trim();
    if text == "0" {
        return Some(Duration::ZERO);
    }
    if text.is_empty() {
        return None;
    }
    let mut rest = text;
    let mut total_nanos: u128 = 0;
    while !rest.is_empty() {
        let number_len = rest
            .find(|ch: char| !(ch.is_ascii_digit() || ch == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_len);
        if number.is_empty() || number == "." {
            return None;
        }
        let unit_len = tail
            .find(|ch: char| ch.is_ascii_digit() || ch == '.')
            .unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_len);
        let scale: u128 = match unit {
            "ns" => 1,
            "us" | "µs" | "μs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60 * 1_000_000_000,
            "h" => 3_600 * 1_000_000_000,
            _ => return None,
        };
        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        let whole: u128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
        let mut segment = whole.checked_mul(scale)?;
        if !fraction.is_empty() {
            let digits = u32::try_from(fraction.len()).ok()?;
            let divisor = 10_u128.checked_pow(digits)?;
            let fraction: u128 = fraction.parse().ok()?;
            segment = segment.checked_add(fraction.checked_mul(scale)? / divisor)?;
        }
        total_nanos = total_nanos.checked_add(segment)?;
        rest = next;
    }
    let secs = u64::try_from(total_nanos / 1_000_000_000).ok()?;
    let nanos = u32::try_from(total_nanos % 1_000_000_000).ok()?;
    Some(Duration::new(secs, nanos))
}
