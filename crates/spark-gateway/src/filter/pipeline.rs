//! # FilterPipeline：静态链、选择器拼接与恢复边界
//!
//! ## 核心意图（Why）
//! - 静态过滤器链在启动时一次性装配，请求路径上不再分配；
//! - 选择器追加的过滤器只对当前请求生效，包装在静态链之外；
//! - 链路入口是唯一的故障恢复边界：任何 panic 都在这里被转换为 `InternalCritical` 错误，
//!   不会越过边界终止服务任务。
//!
//! ## 风险提示（Trade-offs）
//! - panic 现场的调用栈依赖 [`crate::observability`] 安装的链式 panic hook；宿主替换 hook 后，
//!   错误中的调用栈记为不可用。

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::error;

use crate::context::Context;
use crate::error::ServeError;
use crate::observability;

use super::{Filter, FilterHandler, SelectorRegistry, build_chain};

/// 过滤器管线。
pub struct FilterPipeline {
    static_chain: Arc<dyn FilterHandler>,
    static_types: Vec<String>,
    selectors: SelectorRegistry,
}

impl FilterPipeline {
    /// 以有序过滤器、选择器注册表与终端处理器（交换层）构造管线。
    pub fn new(
        filters: Vec<Arc<dyn Filter>>,
        selectors: SelectorRegistry,
        terminal: Arc<dyn FilterHandler>,
    ) -> Self {
        let static_types = filters
            .iter()
            .map(|filter| filter.type_key().to_owned())
            .collect();
        observability::install_panic_capture();
        Self {
            static_chain: build_chain(&filters, terminal),
            static_types,
            selectors,
        }
    }

    /// 静态链中过滤器的类型标识，按包装顺序（外层在前）。
    pub fn static_types(&self) -> &[String] {
        &self.static_types
    }

    /// 为当前请求构造处理链。
    ///
    /// # 教案式说明
    /// - **契约 (What)**：依次评估 Host 适用的选择器，被激活者贡献的过滤器按选择器注册顺序
    ///   拼接在静态链外层；没有选择器被激活时直接返回静态链；
    /// - **后置条件**：返回的链只属于本次请求，不会回写到管线。
    pub fn chain_for(&self, ctx: &Context) -> Arc<dyn FilterHandler> {
        let host = ctx.host().unwrap_or_default();
        let selected: Vec<Arc<dyn Filter>> = self
            .selectors
            .find(host)
            .iter()
            .filter(|selector| selector.activate(ctx))
            .flat_map(|selector| selector.do_select(ctx))
            .collect();
        if selected.is_empty() {
            return Arc::clone(&self.static_chain);
        }
        build_chain(&selected, Arc::clone(&self.static_chain))
    }

    /// 在恢复边界内执行处理链。
    pub async fn execute(&self, ctx: &mut Context) -> Result<(), ServeError> {
        self.execute_with(ctx, |_| {}).await
    }

    /// 在恢复边界内先执行 `prepare`，再执行处理链。
    ///
    /// # 教案式说明
    /// - **意图 (Why)**：上下文桥接钩子、过滤器与交换层中的非预期故障都不能终止服务任务，
    ///   也不能让请求得不到响应；
    /// - **契约 (What)**：结构化错误原样返回；panic 被捕获并转换为 [`ServeError::critical`]，
    ///   其中携带请求 ID 与 panic 现场的调用栈，并以 `error` 级别记录故障描述；
    /// - **后置条件**：无论链路如何退出，`ctx` 都仍然可用，调用方可继续写出响应并归还上下文。
    pub async fn execute_with<F>(&self, ctx: &mut Context, prepare: F) -> Result<(), ServeError>
    where
        F: FnOnce(&mut Context) + Send,
    {
        let request_id = ctx.request_id().to_owned();
        let outcome = AssertUnwindSafe(async {
            prepare(ctx);
            let chain = self.chain_for(ctx);
            chain.handle(ctx).await
        })
        .catch_unwind()
        .await;

        match outcome {
            Ok(result) => result,
            Err(payload) => {
                let fault = panic_message(payload.as_ref());
                let stack = observability::take_panic_backtrace()
                    .unwrap_or_else(|| "<backtrace unavailable>".to_owned());
                error!(
                    request_id = %request_id,
                    fault = %fault,
                    stack = %stack,
                    "filter chain: unexpected fault recovered"
                );
                Err(ServeError::critical(&request_id, fault, stack))
            }
        }
    }
}

impl fmt::Debug for FilterPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterPipeline")
            .field("static_types", &self.static_types)
            .field("selectors", &self.selectors)
            .finish()
    }
}

/// 提取 panic 负载中的文本描述。
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
