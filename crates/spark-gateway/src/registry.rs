//! # 注册中心抽象
//!
//! ## 核心意图（Why）
//! - 网关不绑定具体注册中心：[`EndpointRegistry::watch`] 只需返回一个按到达顺序推送
//!   [`EndpointEvent`] 的通道，由 [`crate::RouterEngine::spawn_event_loop`] 串行消费；
//! - [`MemoryRegistry`] 是基于 `tokio::sync::mpsc` 的内存实现，供测试与静态配置场景使用。
//!
//! ## 行为契约（What）
//! - 每次 `watch` 都会先回放当前快照，再接收后续发布的事件；
//! - 快照按 `(RouteKey, version)` 压缩：只保留每个存活 Endpoint 的最新内容并以 `Added` 回放，
//!   `Removed` 直接剔除条目，因此快照大小只与存活 Endpoint 数量有关；
//! - `publish` 保证单个订阅者内的事件顺序与发布顺序一致。

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::endpoint::{EndpointEvent, EndpointEventType};
use crate::error::GatewayError;

/// 默认通道容量。
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Endpoint 注册中心。
pub trait EndpointRegistry: Send + Sync + 'static {
    /// 订阅事件流。
    fn watch(&self) -> Result<mpsc::Receiver<EndpointEvent>, GatewayError>;
}

/// 内存注册中心。
#[derive(Debug)]
pub struct MemoryRegistry {
    buffer: usize,
    snapshot: Mutex<Vec<EndpointEvent>>,
    watchers: Mutex<Vec<mpsc::Sender<EndpointEvent>>>,
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER)
    }
}

impl MemoryRegistry {
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer: buffer.max(1),
            snapshot: Mutex::new(Vec::new()),
            watchers: Mutex::new(Vec::new()),
        }
    }

    /// 以初始事件快照构造。
    pub fn with_events(events: impl IntoIterator<Item = EndpointEvent>) -> Self {
        let registry = Self::default();
        {
            let mut snapshot = registry.snapshot.lock();
            for event in events {
                fold_into(&mut snapshot, event);
            }
        }
        registry
    }

    /// 发布事件，返回成功送达的订阅者数量；已关闭的订阅者会被移除。
    pub async fn publish(&self, event: EndpointEvent) -> usize {
        fold_into(&mut self.snapshot.lock(), event.clone());
        let watchers: Vec<_> = self.watchers.lock().clone();
        let mut delivered = 0;
        for watcher in &watchers {
            if watcher.send(event.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        self.watchers.lock().retain(|watcher| !watcher.is_closed());
        delivered
    }

    /// 关闭全部订阅通道；订阅者消费完剩余事件后退出。
    pub fn close(&self) {
        self.watchers.lock().clear();
    }
}

/// 把事件折叠进快照：同一 Endpoint 的旧条目先被移除，非删除事件再以 `Added` 追加到末尾。
fn fold_into(snapshot: &mut Vec<EndpointEvent>, event: EndpointEvent) {
    let key = event.endpoint.route_key();
    snapshot.retain(|kept| {
        kept.endpoint.version != event.endpoint.version || kept.endpoint.route_key() != key
    });
    if event.event_type != EndpointEventType::Removed {
        snapshot.push(EndpointEvent::added(event.endpoint));
    }
}

impl EndpointRegistry for MemoryRegistry {
    fn watch(&self) -> Result<mpsc::Receiver<EndpointEvent>, GatewayError> {
        let snapshot = self.snapshot.lock().clone();
        let (sender, receiver) = mpsc::channel(self.buffer.max(snapshot.len() + 1));
        for event in snapshot {
            sender
                .try_send(event)
                .map_err(|err| GatewayError::RegistryWatch {
                    detail: err.to_string(),
                })?;
        }
        debug!(buffer = self.buffer, "memory registry watcher attached");
        self.watchers.lock().push(sender);
        Ok(receiver)
    }
}
