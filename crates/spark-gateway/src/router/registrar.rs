//! # 路由注册接缝
//!
//! `Added` 事件首次出现某个路由键时，路由引擎通过 [`RouteRegistrar`] 把该路由交给监听器。
//! 注册是永久的：之后删除该路由的所有版本也不会注销，请求会得到 `VersionNotFound`。

use std::sync::Arc;

use dashmap::DashMap;

use crate::endpoint::RouteKey;
use crate::store::MultiVersionEndpoint;

/// 监听器侧的路由注册接口。
pub trait RouteRegistrar: Send + Sync + 'static {
    /// 为 `key` 注册处理器；同一路由键只会被调用一次。
    fn register(&self, key: &RouteKey, route: Arc<MultiVersionEndpoint>);
}

/// 精确匹配的内存路由表。
///
/// 适用于测试与不需要路径参数的简单监听器；`lookup` 以 `METHOD#path` 精确查找。
#[derive(Debug, Default)]
pub struct MemoryRouteTable {
    routes: DashMap<RouteKey, Arc<MultiVersionEndpoint>>,
}

impl MemoryRouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, method: &str, path: &str) -> Option<Arc<MultiVersionEndpoint>> {
        self.routes
            .get(&RouteKey::new(method, path))
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl RouteRegistrar for MemoryRouteTable {
    fn register(&self, key: &RouteKey, route: Arc<MultiVersionEndpoint>) {
        self.routes.insert(key.clone(), route);
    }
}
