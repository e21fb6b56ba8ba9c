//! # GatewayBuilder：启动阶段的装配入口
//!
//! ## 核心意图（Why）
//! - 过滤器工厂、选择器、交换实现都是启动阶段一次性注册、之后只读的注册表；
//!   Builder 负责把它们与配置组合成 [`RouterEngine`]，取代进程级全局表；
//! - 所有 `configure_*` 步骤同步执行闭包，失败以 [`GatewayError`] 返回给宿主。
//!
//! ## 关键流程（How）
//! 1. `configure_filters`：登记自定义过滤器工厂（内置工厂已预先注册）；
//! 2. `configure_selectors`：登记全局或按 Host 的选择器；
//! 3. `configure_exchanges`：登记协议交换实现；启用 `http-exchange` 特性时默认注册 `http` 协议；
//! 4. `build`：解析配置、实例化静态过滤器链并构造引擎。

use std::fmt;
use std::sync::Arc;

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::exchange::{ExchangeHandler, ExchangeRegistry};
use crate::filter::{Filter, FilterPipeline, FilterRegistry, SelectorRegistry};
use crate::pool::ContextPool;
use crate::router::{
    ContextExchangeHook, JsonResponseWriter, MemoryRouteTable, ResponseWriter, RouteRegistrar,
    RouterEngine, RouterSettings,
};
use crate::store::EndpointStore;

/// 路由引擎装配器。
pub struct GatewayBuilder {
    config: GatewayConfig,
    filters: FilterRegistry,
    extra_filters: Vec<Arc<dyn Filter>>,
    selectors: SelectorRegistry,
    exchanges: ExchangeRegistry,
    default_exchanges: bool,
    hooks: Vec<Arc<dyn ContextExchangeHook>>,
    writer: Arc<dyn ResponseWriter>,
    registrar: Option<Arc<dyn RouteRegistrar>>,
    store: Option<Arc<EndpointStore>>,
}

impl GatewayBuilder {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            filters: FilterRegistry::with_builtin(),
            extra_filters: Vec::new(),
            selectors: SelectorRegistry::new(),
            exchanges: ExchangeRegistry::new(),
            default_exchanges: true,
            hooks: Vec::new(),
            writer: Arc::new(JsonResponseWriter),
            registrar: None,
            store: None,
        }
    }

    pub fn configure_filters<F>(&mut self, configure: F) -> Result<&mut Self, GatewayError>
    where
        F: FnOnce(&mut FilterRegistry) -> Result<(), GatewayError>,
    {
        configure(&mut self.filters)?;
        Ok(self)
    }

    /// 追加一个已构造的过滤器，位于配置声明的过滤器之后（更靠内层）。
    pub fn add_filter(&mut self, filter: Arc<dyn Filter>) -> &mut Self {
        self.extra_filters.push(filter);
        self
    }

    pub fn configure_selectors<F>(&mut self, configure: F) -> &mut Self
    where
        F: FnOnce(&mut SelectorRegistry),
    {
        configure(&mut self.selectors);
        self
    }

    pub fn configure_exchanges<F>(&mut self, configure: F) -> Result<&mut Self, GatewayError>
    where
        F: FnOnce(&mut ExchangeRegistry) -> Result<(), GatewayError>,
    {
        configure(&mut self.exchanges)?;
        Ok(self)
    }

    /// 关闭默认交换实现的自动注册。
    pub fn without_default_exchanges(&mut self) -> &mut Self {
        self.default_exchanges = false;
        self
    }

    pub fn context_hook(&mut self, hook: Arc<dyn ContextExchangeHook>) -> &mut Self {
        self.hooks.push(hook);
        self
    }

    pub fn response_writer(&mut self, writer: Arc<dyn ResponseWriter>) -> &mut Self {
        self.writer = writer;
        self
    }

    /// 指定监听器侧的路由注册接口，缺省时使用内部的 [`MemoryRouteTable`]。
    pub fn route_registrar(&mut self, registrar: Arc<dyn RouteRegistrar>) -> &mut Self {
        self.registrar = Some(registrar);
        self
    }

    /// 与其他组件共享同一个存储。
    pub fn store(&mut self, store: Arc<EndpointStore>) -> &mut Self {
        self.store = Some(store);
        self
    }

    /// 完成装配。
    ///
    /// - **契约 (What)**：配置中引用的过滤器类型必须已注册；Header 名必须合法；
    ///   `http` 协议在启用特性且未被自定义注册时自动注册；
    /// - **后置条件**：返回的引擎持有全部注册表，之后不可再修改。
    pub fn build(self) -> Result<RouterEngine, GatewayError> {
        let Self {
            config,
            filters,
            extra_filters,
            selectors,
            mut exchanges,
            default_exchanges,
            hooks,
            writer,
            registrar,
            store,
        } = self;

        let settings = RouterSettings::from_config(&config.http_server)?;
        if default_exchanges {
            register_default_exchanges(&mut exchanges, &config)?;
        }

        let mut chain = filters.instantiate(&config.filters)?;
        chain.extend(extra_filters);
        let terminal = Arc::new(ExchangeHandler::new(Arc::new(exchanges)));
        let pipeline = FilterPipeline::new(chain, selectors, terminal);

        Ok(RouterEngine::new(
            settings,
            store.unwrap_or_default(),
            ContextPool::new(config.context_pool.capacity),
            pipeline,
            hooks,
            writer,
            registrar.unwrap_or_else(|| Arc::new(MemoryRouteTable::new())),
        ))
    }
}

#[cfg(feature = "http-exchange")]
fn register_default_exchanges(
    exchanges: &mut ExchangeRegistry,
    config: &GatewayConfig,
) -> Result<(), GatewayError> {
    use crate::exchange::PROTOCOL_HTTP;
    use crate::exchange::http::HttpTransporter;

    if exchanges.lookup(PROTOCOL_HTTP).is_none() {
        let transporter = HttpTransporter::from_config(&config.exchange.http)?;
        exchanges.register_transporter(PROTOCOL_HTTP, transporter)?;
    }
    Ok(())
}

#[cfg(not(feature = "http-exchange"))]
fn register_default_exchanges(
    _exchanges: &mut ExchangeRegistry,
    _config: &GatewayConfig,
) -> Result<(), GatewayError> {
    Ok(())
}

impl fmt::Debug for GatewayBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayBuilder")
            .field("config", &self.config)
            .field("filters", &self.filters)
            .field("selectors", &self.selectors)
            .field("exchanges", &self.exchanges)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}
