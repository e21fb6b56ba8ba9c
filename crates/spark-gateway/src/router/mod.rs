//! # router 模块说明
//!
//! ## 角色定位（Why）
//! - [`RouterEngine`] 把版本解析、上下文借出、过滤器链执行与响应写出串成一条请求路径；
//! - 同时是注册中心事件的唯一消费者与 [`EndpointStore`] 的唯一写者。
//!
//! ## 请求状态机（How）
//! `RECEIVED → VERSION_RESOLVED（否则 NOT_FOUND 终态）→ CONTEXT_BOUND → CHAIN_RUNNING →
//! {EXCHANGED | FILTER_REJECTED | FAULT_RECOVERED} → RESPONSE_WRITTEN`
//!
//! ## 行为契约（What）
//! - 版本取自可配置 Header（默认 `X-Version`），缺失即空字符串版本；Header 无法按 UTF-8 解码时视为未命中；
//! - 版本未命中时直接写出固定的 NOT_FOUND 错误，不运行过滤器链；
//! - 上下文在所有退出路径上都会重置并归还，包括故障恢复与请求 future 被取消；
//! - 事件处理：`Added` 只在路由首次出现时注册处理器，`Updated` 只更新版本，`Removed` 只删除版本；
//!   白名单之外的 HTTP 方法被拒绝并记录告警。

use std::fmt;
use std::sync::Arc;

use http::{HeaderMap, HeaderName};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::HttpServerConfig;
use crate::context::{Context, InboundRequest};
use crate::endpoint::{EndpointEvent, EndpointEventType, is_allowed_method};
use crate::error::{ErrorKind, GatewayError, ServeError};
use crate::filter::FilterPipeline;
use crate::pool::ContextPool;
use crate::store::{EndpointStore, MultiVersionEndpoint};

pub mod registrar;
pub mod writer;

pub use registrar::{MemoryRouteTable, RouteRegistrar};
pub use writer::{GatewayResponse, JsonResponseWriter, ResponseWriter};

/// 上下文绑定后、链路执行前调用的桥接钩子。
///
/// 钩子与过滤器链处于同一个恢复边界内，钩子中的 panic 同样被转换为 `InternalCritical` 响应。
///
/// 用于把入站传输的特有信息（客户端地址、认证票据等）写入上下文属性。
pub trait ContextExchangeHook: Send + Sync + 'static {
    fn exchange(&self, ctx: &mut Context);
}

impl<F> ContextExchangeHook for F
where
    F: Fn(&mut Context) + Send + Sync + 'static,
{
    fn exchange(&self, ctx: &mut Context) {
        (self)(ctx)
    }
}

/// 单个事件的处理结果。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EventOutcome {
    /// 路由首次出现，已注册处理器并写入版本。
    Registered,
    /// 路由已存在，仅写入版本。
    VersionAdded,
    /// 版本已更新。
    Updated,
    /// 版本已删除，路由注册保留。
    Removed,
    /// 事件指向未知路由或不存在的版本，未产生任何变更。
    Ignored,
    /// HTTP 方法不在白名单内，事件被拒绝。
    Rejected,
}

/// 从 [`HttpServerConfig`] 解析出的请求路径参数。
#[derive(Clone, Debug)]
pub struct RouterSettings {
    pub version_header: HeaderName,
    pub request_id_headers: Vec<HeaderName>,
    pub request_log_enable: bool,
}

impl RouterSettings {
    pub fn from_config(config: &HttpServerConfig) -> Result<Self, GatewayError> {
        let parse = |key: &str, raw: &str| {
            HeaderName::from_bytes(raw.as_bytes()).map_err(|err| GatewayError::InvalidConfig {
                key: key.to_owned(),
                detail: format!("`{raw}` is not a valid header name: {err}"),
            })
        };
        let version_header = parse("http_server.version_header", &config.version_header)?;
        let request_id_headers = config
            .request_id_headers
            .iter()
            .map(|raw| parse("http_server.request_id_headers", raw))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            version_header,
            request_id_headers,
            request_log_enable: config.request_log_enable,
        })
    }
}

/// 网关路由引擎。
///
/// # 教案式说明
/// - **意图 (Why)**：请求路径与事件路径共享同一个 [`EndpointStore`]，但只有事件路径写入，
///   请求路径只在一次版本查找期间持有读锁；
/// - **契约 (What)**：
///   - [`Self::handle`]：处理已匹配到路由的请求，总是返回一个响应；
///   - [`Self::route_not_found`]：监听器未匹配到路由时的固定响应；
///   - [`Self::apply_event`]：应用单个注册中心事件，调用方必须保证串行；
///   - [`Self::spawn_event_loop`]：启动唯一的事件消费任务；
/// - **构造 (How)**：通过 [`crate::GatewayBuilder`] 装配，构造后所有注册表只读。
pub struct RouterEngine {
    settings: RouterSettings,
    store: Arc<EndpointStore>,
    pool: ContextPool,
    pipeline: FilterPipeline,
    hooks: Vec<Arc<dyn ContextExchangeHook>>,
    writer: Arc<dyn ResponseWriter>,
    registrar: Arc<dyn RouteRegistrar>,
}

impl RouterEngine {
    pub(crate) fn new(
        settings: RouterSettings,
        store: Arc<EndpointStore>,
        pool: ContextPool,
        pipeline: FilterPipeline,
        hooks: Vec<Arc<dyn ContextExchangeHook>>,
        writer: Arc<dyn ResponseWriter>,
        registrar: Arc<dyn RouteRegistrar>,
    ) -> Self {
        Self {
            settings,
            store,
            pool,
            pipeline,
            hooks,
            writer,
            registrar,
        }
    }

    pub fn settings(&self) -> &RouterSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<EndpointStore> {
        &self.store
    }

    pub fn pool(&self) -> &ContextPool {
        &self.pool
    }

    pub fn pipeline(&self) -> &FilterPipeline {
        &self.pipeline
    }

    /// 请求 ID：依次读取配置的 Header，全部缺失时生成 UUID v4。
    pub fn request_id_of(&self, request: &InboundRequest) -> String {
        self.settings
            .request_id_headers
            .iter()
            .filter_map(|name| request.headers().get(name))
            .filter_map(|value| value.to_str().ok())
            .map(str::trim)
            .find(|value| !value.is_empty())
            .map(str::to_owned)
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    }

    /// 请求版本：Header 缺失时为空串；Header 存在但不是合法 UTF-8 时为 `None`，不会回退到空串版本。
    fn version_of<'r>(&self, request: &'r InboundRequest) -> Option<&'r str> {
        match request.headers().get(&self.settings.version_header) {
            None => Some(""),
            Some(value) => std::str::from_utf8(value.as_bytes()).ok(),
        }
    }

    /// 处理一个已匹配路由的请求。
    ///
    /// # 教案式说明
    /// - **前置条件**：`route` 是监听器通过 [`RouteRegistrar`] 拿到的多版本集合；
    /// - **后置条件**：返回的响应已经过 [`ResponseWriter`]；借出的上下文已重置并归还；
    /// - **取消语义**：丢弃返回的 future 会丢弃进行中的出站调用，上下文守卫在析构时归还。
    pub async fn handle(&self, route: &MultiVersionEndpoint, request: InboundRequest) -> GatewayResponse {
        let request_id = self.request_id_of(&request);
        let version = self.version_of(&request).map(str::to_owned);

        let Some(endpoint) = version
            .as_deref()
            .and_then(|version| route.find_by_version(version))
        else {
            if self.settings.request_log_enable {
                info!(
                    request_id = %request_id,
                    method = %request.method(),
                    path = %request.uri().path(),
                    version = ?version,
                    "routing: ENDPOINT_NOT_FOUND"
                );
            }
            return self.writer.write_error(
                &request_id,
                &HeaderMap::new(),
                &ServeError::version_not_found(),
            );
        };

        if self.settings.request_log_enable {
            info!(
                request_id = %request_id,
                method = %request.method(),
                path = %request.uri().path(),
                version = %endpoint.version,
                endpoint = %format!("{}:{}", endpoint.upstream_method, endpoint.upstream_uri),
                "routing: DISPATCHING"
            );
        }

        let mut ctx = self.pool.acquire();
        ctx.bind(request_id, endpoint, request);
        let hooks = &self.hooks;
        let outcome = self
            .pipeline
            .execute_with(&mut ctx, |ctx| {
                for hook in hooks {
                    hook.exchange(ctx);
                }
            })
            .await;

        match outcome {
            Ok(()) => self.writer.write_body(ctx.request_id(), ctx.response()),
            Err(err) => {
                log_serve_error(&ctx, &err);
                self.writer
                    .write_error(ctx.request_id(), &ctx.response().headers, &err)
            }
        }
    }

    /// 监听器未匹配到任何路由时的固定响应。
    pub fn route_not_found(&self, request: &InboundRequest) -> GatewayResponse {
        let request_id = self.request_id_of(request);
        if self.settings.request_log_enable {
            info!(
                request_id = %request_id,
                method = %request.method(),
                path = %request.uri().path(),
                "routing: ROUTE_NOT_FOUND"
            );
        }
        self.writer
            .write_error(&request_id, &HeaderMap::new(), &ServeError::route_not_found())
    }

    /// 应用单个注册中心事件。
    ///
    /// # 教案式说明
    /// - **前置条件**：调用方保证串行执行，通常由 [`Self::spawn_event_loop`] 驱动；
    /// - **契约 (What)**：
    ///   - `Added`：首次出现的路由先写入版本，再注册处理器，保证监听器看到的集合非空；
    ///   - `Updated`：只更新已存在路由的版本，未知路由忽略并告警；
    ///   - `Removed`：只删除版本，路由注册永久保留。
    pub fn apply_event(&self, event: EndpointEvent) -> EventOutcome {
        let EndpointEvent {
            event_type,
            endpoint,
        } = event;
        let method = endpoint.http_method.to_ascii_uppercase();
        let pattern = endpoint.http_pattern.clone();
        if !is_allowed_method(&method) {
            warn!(
                method = %method,
                pattern = %pattern,
                event = event_type.as_str(),
                "unsupported http method, endpoint event rejected"
            );
            return EventOutcome::Rejected;
        }

        let key = endpoint.route_key();
        let version = endpoint.version.clone();
        match event_type {
            EndpointEventType::Added => {
                let (route, created) = self.store.select_or_insert(key.clone());
                info!(method = %method, pattern = %pattern, version = %version, "new endpoint");
                route.update(&version, endpoint);
                if created {
                    info!(route_key = %key, "register http route");
                    self.registrar.register(&key, route);
                    EventOutcome::Registered
                } else {
                    EventOutcome::VersionAdded
                }
            }
            EndpointEventType::Updated => match self.store.get(&key) {
                Some(route) => {
                    info!(method = %method, pattern = %pattern, version = %version, "update endpoint");
                    route.update(&version, endpoint);
                    EventOutcome::Updated
                }
                None => {
                    warn!(route_key = %key, version = %version, "update for unknown route ignored");
                    EventOutcome::Ignored
                }
            },
            EndpointEventType::Removed => {
                let removed = self
                    .store
                    .get(&key)
                    .and_then(|route| route.delete(&version));
                match removed {
                    Some(_) => {
                        info!(method = %method, pattern = %pattern, version = %version, "delete endpoint");
                        EventOutcome::Removed
                    }
                    None => {
                        warn!(route_key = %key, version = %version, "remove for unknown endpoint ignored");
                        EventOutcome::Ignored
                    }
                }
            }
        }
    }

    /// 按到达顺序消费事件直到通道关闭。
    pub async fn run_event_loop(&self, mut events: mpsc::Receiver<EndpointEvent>) {
        while let Some(event) = events.recv().await {
            self.apply_event(event);
        }
        info!("endpoint event stream closed");
    }

    /// 启动唯一的事件消费任务。
    pub fn spawn_event_loop(self: &Arc<Self>, events: mpsc::Receiver<EndpointEvent>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.run_event_loop(events).await })
    }
}

impl fmt::Debug for RouterEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterEngine")
            .field("settings", &self.settings)
            .field("routes", &self.store.len())
            .field("pool", &self.pool)
            .field("pipeline", &self.pipeline)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

/// 记录终态错误：内部原因与扩展信息只进入日志。
fn log_serve_error(ctx: &Context, err: &ServeError) {
    let cause = err.cause().map(ToString::to_string).unwrap_or_default();
    match err.kind() {
        ErrorKind::InternalCritical => error!(
            request_id = %ctx.request_id(),
            status = err.status().as_u16(),
            error_code = %err.error_code(),
            cause = %cause,
            "routing: request failed"
        ),
        ErrorKind::RemoteInvoke => warn!(
            request_id = %ctx.request_id(),
            status = err.status().as_u16(),
            error_code = %err.error_code(),
            cause = %cause,
            extras = ?err.extras(),
            "routing: remote invoke failed"
        ),
        ErrorKind::BadRequest | ErrorKind::VersionNotFound | ErrorKind::FilterRejected => info!(
            request_id = %ctx.request_id(),
            status = err.status().as_u16(),
            error_code = %err.error_code(),
            cause = %cause,
            "routing: request rejected"
        ),
    }
}
