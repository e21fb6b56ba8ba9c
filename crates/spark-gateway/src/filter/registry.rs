//! # 过滤器与选择器注册表
//!
//! ## 核心意图（Why）
//! - 以显式的注册表对象取代进程级可变全局表：启动阶段构造，注入到需要查找的组件中，之后只读；
//! - [`FilterRegistry`] 按类型标识解析过滤器工厂，把配置中的过滤器列表实例化为有序的静态链；
//! - [`SelectorRegistry`] 按 Host 保存选择器列表，查找时“Host 专属列表或全局列表”二选一，从不合并。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::info;

use crate::config::FilterConfig;
use crate::error::GatewayError;

use super::{Filter, FilterSelector};

/// 全局选择器使用的 Host 键。
pub const ANY_HOST: &str = "*";

/// 过滤器工厂：根据配置项构造过滤器实例。
pub trait FilterFactory: Send + Sync + 'static {
    fn create(&self, config: &FilterConfig) -> Result<Arc<dyn Filter>, GatewayError>;
}

impl<F> FilterFactory for F
where
    F: Fn(&FilterConfig) -> Result<Arc<dyn Filter>, GatewayError> + Send + Sync + 'static,
{
    fn create(&self, config: &FilterConfig) -> Result<Arc<dyn Filter>, GatewayError> {
        (self)(config)
    }
}

/// 过滤器工厂注册表。
///
/// # 教案式说明
/// - **意图 (Why)**：配置只声明 `type_id`，具体实现由注册在此处的工厂提供，便于插件化扩展；
/// - **契约 (What)**：
///   - `register`：同一类型标识只允许注册一次；
///   - `instantiate`：按配置顺序构造过滤器，`disable = true` 的条目被跳过；
///     任何未注册的类型标识都会使整个装配失败；
/// - **风险提示 (Trade-offs)**：注册表本身不加锁，只应在启动阶段以 `&mut` 构造。
#[derive(Default)]
pub struct FilterRegistry {
    factories: HashMap<String, Arc<dyn FilterFactory>>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册内置过滤器工厂（`basic-auth`、`access-log`）后的注册表。
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.factories.insert(
            super::basic_auth::TYPE_ID.to_owned(),
            Arc::new(super::basic_auth::BasicAuthFactory),
        );
        registry.factories.insert(
            super::access_log::TYPE_ID.to_owned(),
            Arc::new(super::access_log::AccessLogFactory),
        );
        registry
    }

    pub fn register(
        &mut self,
        type_id: impl Into<String>,
        factory: impl FilterFactory,
    ) -> Result<(), GatewayError> {
        let type_id = type_id.into();
        if self.factories.contains_key(&type_id) {
            return Err(GatewayError::DuplicateFilterFactory { type_id });
        }
        self.factories.insert(type_id, Arc::new(factory));
        Ok(())
    }

    pub fn factory(&self, type_id: &str) -> Option<&Arc<dyn FilterFactory>> {
        self.factories.get(type_id)
    }

    /// 按配置顺序实例化过滤器。
    pub fn instantiate(
        &self,
        configs: &[FilterConfig],
    ) -> Result<Vec<Arc<dyn Filter>>, GatewayError> {
        let mut filters = Vec::with_capacity(configs.len());
        for config in configs {
            if config.disable {
                info!(filter_id = %config.id, type_id = %config.type_id, "filter disabled, skipped");
                continue;
            }
            let factory = self.factory(&config.type_id).ok_or_else(|| {
                GatewayError::FilterFactoryNotFound {
                    id: config.id.clone(),
                    type_id: config.type_id.clone(),
                }
            })?;
            let filter = factory.create(config)?;
            info!(filter_id = %config.id, type_id = %config.type_id, "filter loaded");
            filters.push(filter);
        }
        Ok(filters)
    }
}

impl fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.factories.keys().collect();
        types.sort();
        f.debug_struct("FilterRegistry")
            .field("types", &types)
            .finish()
    }
}

/// 按 Host 组织的选择器注册表。
#[derive(Default)]
pub struct SelectorRegistry {
    hosted: HashMap<String, Vec<Arc<dyn FilterSelector>>>,
}

impl SelectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册全局选择器。
    pub fn add(&mut self, selector: Arc<dyn FilterSelector>) {
        self.add_hosted(ANY_HOST, selector);
    }

    /// 注册 Host 专属选择器，同一 Host 下按注册顺序保存。
    pub fn add_hosted(&mut self, host: impl Into<String>, selector: Arc<dyn FilterSelector>) {
        self.hosted.entry(host.into()).or_default().push(selector);
    }

    /// 查找 Host 适用的选择器。
    ///
    /// - 存在 Host 专属列表时只返回该列表；
    /// - 否则返回全局列表，两者从不合并；
    /// - 都不存在时返回空切片。
    pub fn find(&self, host: &str) -> &[Arc<dyn FilterSelector>] {
        self.hosted
            .get(host)
            .or_else(|| self.hosted.get(ANY_HOST))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.hosted.is_empty()
    }
}

impl fmt::Debug for SelectorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut hosts: Vec<_> = self
            .hosted
            .iter()
            .map(|(host, selectors)| (host.as_str(), selectors.len()))
            .collect();
        hosts.sort();
        f.debug_struct("SelectorRegistry")
            .field("hosts", &hosts)
            .finish()
    }
}
