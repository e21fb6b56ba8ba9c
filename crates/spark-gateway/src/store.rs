//! # store 模块说明
//!
//! ## 核心意图（Why）
//! - [`MultiVersionEndpoint`] 保存同一路由下所有版本的 [`Endpoint`]，每个请求都要读取一次；
//! - [`EndpointStore`] 以路由键索引全部 `MultiVersionEndpoint`，供路由引擎与检视查询共享。
//!
//! ## 行为契约（What）
//! - `update`：插入或替换指定版本，后写覆盖先写；
//! - `delete`：只移除指定版本，路由条目本身永久保留；
//! - `find_by_version`：精确字符串匹配，不做默认版本回退；空字符串是合法的版本键；
//! - `random_version`：返回任意一个版本，仅用于展示与检视，不得参与路由决策。
//!
//! ## 并发策略（Trade-offs）
//! - 每个路由的版本表使用 `parking_lot::RwLock`，读锁只覆盖一次哈希查找，返回 `Arc<Endpoint>` 后立即释放；
//! - 外层 `DashMap` 分片加锁，事件消费者是唯一写者，写路径最多阻塞读路径一次锁获取。

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;

use crate::endpoint::{Endpoint, RouteKey};

/// 同一路由下的多版本 Endpoint 集合。
///
/// # 教案式说明
/// - **意图 (Why)**：把“版本 → Endpoint”映射封装在读多写少的锁之后，请求路径只需一次短暂读锁；
/// - **契约 (What)**：所有读取返回 `Arc<Endpoint>` 快照，调用方持有期间不受后续写入影响；
/// - **风险 (Trade-offs)**：不提供遍历期间的一致视图，`versions()` 返回的是调用瞬间的快照。
#[derive(Debug, Default)]
pub struct MultiVersionEndpoint {
    versions: RwLock<HashMap<String, Arc<Endpoint>>>,
}

impl MultiVersionEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入或替换指定版本。
    pub fn update(&self, version: &str, endpoint: Endpoint) {
        self.versions
            .write()
            .insert(version.to_owned(), Arc::new(endpoint));
    }

    /// 删除指定版本，返回被删除的 Endpoint。
    pub fn delete(&self, version: &str) -> Option<Arc<Endpoint>> {
        self.versions.write().remove(version)
    }

    /// 按版本精确查找。
    pub fn find_by_version(&self, version: &str) -> Option<Arc<Endpoint>> {
        self.versions.read().get(version).cloned()
    }

    /// 返回任意一个版本，仅用于展示。
    pub fn random_version(&self) -> Option<Arc<Endpoint>> {
        self.versions.read().values().next().cloned()
    }

    /// 当前全部版本号的快照，按字典序排列。
    pub fn versions(&self) -> Vec<String> {
        let mut versions: Vec<String> = self.versions.read().keys().cloned().collect();
        versions.sort();
        versions
    }

    /// 当前全部版本的快照。
    pub fn snapshot(&self) -> HashMap<String, Arc<Endpoint>> {
        self.versions.read().clone()
    }

    pub fn len(&self) -> usize {
        self.versions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.read().is_empty()
    }
}

/// 路由键到多版本集合的并发索引。
#[derive(Debug, Default)]
pub struct EndpointStore {
    routes: DashMap<RouteKey, Arc<MultiVersionEndpoint>>,
}

impl EndpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 查找路由对应的多版本集合。
    pub fn get(&self, key: &RouteKey) -> Option<Arc<MultiVersionEndpoint>> {
        self.routes.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// 查找或创建路由条目。
    ///
    /// # 教案式说明
    /// - **意图 (Why)**：`Added` 事件需要原子地判断“路由是否首次出现”，以决定是否注册处理器；
    /// - **契约 (What)**：返回 `(集合, 是否新建)`；同一路由键只会新建一次；
    /// - **前置条件**：调用方应是事件消费者本身，请求路径只使用 [`Self::get`]。
    pub fn select_or_insert(&self, key: RouteKey) -> (Arc<MultiVersionEndpoint>, bool) {
        match self.routes.entry(key) {
            Entry::Occupied(occupied) => (Arc::clone(occupied.get()), false),
            Entry::Vacant(vacant) => {
                let created = Arc::new(MultiVersionEndpoint::new());
                vacant.insert(Arc::clone(&created));
                (created, true)
            }
        }
    }

    /// 全部路由的快照，按路由键排序。
    pub fn routes(&self) -> Vec<(RouteKey, Arc<MultiVersionEndpoint>)> {
        let mut routes: Vec<_> = self
            .routes
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        routes.sort_by(|left, right| left.0.cmp(&right.0));
        routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
