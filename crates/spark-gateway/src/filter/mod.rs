//! # filter 模块说明
//!
//! ## 角色定位（Why）
//! - 定义请求处理阶段的可组合抽象：[`FilterHandler`] 是“处理一个请求”的异步函数对象，
//!   [`Filter`] 把一个处理器包装成新的处理器（责任链）；
//! - [`FilterSelector`] 在每个请求上动态追加过滤器，可以全局注册，也可以按 Host 注册。
//!
//! ## 架构嵌入（Where）
//! - `registry` 子模块保存过滤器工厂与选择器，启动阶段构造完成后只读；
//! - `pipeline` 子模块负责静态链装配、按请求拼接选择器过滤器以及故障恢复边界；
//! - `basic_auth` 与 `access_log` 是随网关内核提供的内置过滤器。
//!
//! ## 行为契约（What）
//! - 先注册的过滤器位于最外层，`next` 向内推进；
//! - 过滤器不调用 `next` 即视为短路，下游过滤器与交换层都不会执行。

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::Context;
use crate::error::ServeError;

pub mod access_log;
pub mod basic_auth;
pub mod pipeline;
pub mod registry;

pub use pipeline::FilterPipeline;
pub use registry::{FilterFactory, FilterRegistry, SelectorRegistry, ANY_HOST};

/// 处理单个请求的异步处理器。
///
/// # 教案式说明
/// - **意图 (Why)**：交换层与每一层过滤器包装后的结果都是 `FilterHandler`，路由引擎只与它交互；
/// - **契约 (What)**：返回 `Ok(())` 表示响应已写入 `ctx.response_mut()`；返回 `Err` 表示终态错误，
///   由路由引擎统一写出；
/// - **前置条件**：调用时 `ctx` 已绑定 Endpoint。
#[async_trait]
pub trait FilterHandler: Send + Sync + 'static {
    async fn handle(&self, ctx: &mut Context) -> Result<(), ServeError>;
}

/// 可组合的请求处理阶段。
///
/// # 教案式说明
/// - **意图 (Why)**：鉴权、日志、限流等横切逻辑以包装器形式叠加在交换层之外；
/// - **契约 (What)**：
///   - `type_key`：稳定的类型标识，与工厂注册名一致；
///   - `do_filter`：接收内层处理器 `next`，返回包装后的处理器；实现可以在调用 `next` 前修改请求，
///     在返回后观察响应或错误，也可以不调用 `next` 直接返回错误；
/// - **风险提示 (Trade-offs)**：过滤器在启动后视为不可变，实现内部若持有可变状态需自行保证并发安全。
pub trait Filter: Send + Sync + 'static {
    fn type_key(&self) -> &str;

    fn do_filter(&self, next: Arc<dyn FilterHandler>) -> Arc<dyn FilterHandler>;
}

/// 按请求动态选择过滤器的策略。
pub trait FilterSelector: Send + Sync + 'static {
    /// 当前请求是否激活该选择器。
    fn activate(&self, ctx: &Context) -> bool;

    /// 返回本次请求需要追加的过滤器，顺序即包装顺序（先返回者在外层）。
    fn do_select(&self, ctx: &Context) -> Vec<Arc<dyn Filter>>;
}

/// 以 `filters` 包装 `terminal`，第一个过滤器位于最外层。
pub fn build_chain(
    filters: &[Arc<dyn Filter>],
    terminal: Arc<dyn FilterHandler>,
) -> Arc<dyn FilterHandler> {
    filters
        .iter()
        .rev()
        .fold(terminal, |next, filter| filter.do_filter(next))
}
