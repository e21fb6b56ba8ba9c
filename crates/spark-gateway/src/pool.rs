//! # pool 模块说明
//!
//! ## 核心意图（Why）
//! - 复用 [`Context`] 的堆分配（属性表、HeaderMap 容量），降低高并发下的分配压力；
//! - 借出与归还都强制执行重置，杜绝前一个请求的属性、Header 或缓冲被下一个请求观察到。
//!
//! ## 行为契约（What）
//! - [`ContextPool::acquire`] 返回 RAII 守卫 [`PooledContext`]；
//! - 守卫在 `Drop` 时重置并归还上下文，因此正常返回、提前返回、panic 展开与 future 被取消
//!   这几条退出路径都会归还；
//! - 空闲数量超过 `capacity` 时直接丢弃，池不会无限增长。

use std::fmt;
use std::ops::{Deref, DerefMut};

use parking_lot::Mutex;

use crate::context::Context;

/// 上下文对象池。
pub struct ContextPool {
    idle: Mutex<Vec<Box<Context>>>,
    capacity: usize,
}

impl ContextPool {
    /// 创建容量为 `capacity` 的空池。
    pub fn new(capacity: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::with_capacity(capacity.min(64))),
            capacity,
        }
    }

    /// 借出一个已重置的上下文。
    pub fn acquire(&self) -> PooledContext<'_> {
        let mut context = self.idle.lock().pop().unwrap_or_default();
        context.reset();
        PooledContext {
            context: Some(context),
            pool: self,
        }
    }

    fn release(&self, mut context: Box<Context>) {
        context.reset();
        let mut idle = self.idle.lock();
        if idle.len() < self.capacity {
            idle.push(context);
        }
    }

    /// 当前空闲上下文数量。
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl fmt::Debug for ContextPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextPool")
            .field("idle", &self.idle())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// 借出的上下文守卫。
///
/// - **契约 (What)**：通过 `Deref`/`DerefMut` 访问 [`Context`]；
/// - **后置条件**：守卫销毁后上下文已重置并回到池中（或因超出容量被丢弃）。
pub struct PooledContext<'a> {
    context: Option<Box<Context>>,
    pool: &'a ContextPool,
}

impl Deref for PooledContext<'_> {
    type Target = Context;

    fn deref(&self) -> &Self::Target {
        // `context` 只在 Drop 中被取走。
        self.context.as_deref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledContext<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.context.as_deref_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledContext<'_> {
    fn drop(&mut self) {
        if let Some(context) = self.context.take() {
            self.pool.release(context);
        }
    }
}
