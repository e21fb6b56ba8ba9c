//! # spark-gateway
//!
//! ## 定位与职责（Why）
//! - 微服务 API 网关的请求分发内核：把入站 HTTP 请求按 `METHOD#pattern` 路由与 `X-Version`
//!   版本解析到一个 [`endpoint::Endpoint`]，经过可插拔的过滤器链后交给协议交换层调用上游；
//! - 注册中心推送的 Endpoint 事件由 [`RouterEngine`] 串行消费，保持多版本存储与监听器路由表同步。
//!
//! ## 架构嵌入（Where）
//! - `store`：多版本 Endpoint 存储，读多写一；
//! - `filter`：过滤器、选择器与带故障恢复边界的管线；
//! - `exchange`：协议交换层，`Assemble → Invoke → Decode` 三段式，内置 HTTP 与 RPC；
//! - `router`：路由引擎、上下文池、响应写出与路由注册接口；
//! - `config`/`observability`：TOML 配置与可选的 `tracing` Subscriber 安装。
//!
//! ## Feature 策略（Trade-offs）
//! - `http-exchange`（默认开启）引入 `reqwest` 作为 HTTP 上游客户端；关闭后仅保留协议无关内核，
//!   宿主需自行注册交换实现。
//! - 监听器、TLS 与进程引导不在本 crate 内，由宿主通过 [`router::RouteRegistrar`] 对接。

pub mod builder;
pub mod config;
pub mod context;
pub mod endpoint;
pub mod error;
pub mod exchange;
pub mod filter;
pub mod inspect;
pub mod observability;
pub mod pool;
pub mod registry;
pub mod router;
pub mod store;

pub use builder::GatewayBuilder;
pub use config::{FilterConfig, GatewayConfig};
pub use context::{Context, InboundRequest};
pub use endpoint::{Argument, Endpoint, EndpointEvent, EndpointEventType, RouteKey};
pub use error::{ErrorKind, GatewayError, InvokeError, ServeError};
pub use exchange::{Exchange, ExchangeRegistry, ResponseBody, Transporter};
pub use filter::{Filter, FilterHandler, FilterSelector};
pub use registry::{EndpointRegistry, MemoryRegistry};
pub use router::{EventOutcome, GatewayResponse, RouterEngine};
pub use store::{EndpointStore, MultiVersionEndpoint};
