//! # observability 模块说明
//!
//! 网关内核只通过 `tracing` 宏输出结构化日志，字段统一为 `request_id`、`method`、`pattern`、
//! `version`、`route_key`。是否安装全局 Subscriber 由宿主决定；[`install_tracing`] 是可选的便捷入口，
//! 路由引擎从不调用它。
//!
//! 恢复边界需要 panic 现场的调用栈：[`install_panic_capture`] 以链式 panic hook 在现场捕获调用栈，
//! 暂存在线程本地槽位中，由边界通过 [`take_panic_backtrace`] 取走。原有 hook 仍会被调用。

use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::panic;
use std::sync::{Once, OnceLock};

use tracing::dispatcher;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

use crate::error::GatewayError;

static INSTALLED: OnceLock<()> = OnceLock::new();
static PANIC_CAPTURE: Once = Once::new();

thread_local! {
    static LAST_PANIC_BACKTRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// 安装 `fmt + EnvFilter` 全局 Subscriber。
///
/// # 教案式说明
/// - **逻辑（How）**：过滤规则取自 `RUST_LOG`，缺失或非法时回退为 `info`；
/// - **契约（What）**：重复调用返回 [`GatewayError::TracingAlreadyInstalled`]；
///   外部已设置全局 Subscriber 时返回 [`GatewayError::TracingInstall`]，不会覆盖宿主的选择。
pub fn install_tracing() -> Result<(), GatewayError> {
    if INSTALLED.get().is_some() {
        return Err(GatewayError::TracingAlreadyInstalled);
    }
    if dispatcher::has_been_set() {
        return Err(GatewayError::TracingInstall(
            "a global subscriber has already been set".to_owned(),
        ));
    }
    let subscriber = tracing_subscriber::registry()
        .with(build_env_filter())
        .with(tracing_subscriber::fmt::layer());
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|err| GatewayError::TracingInstall(err.to_string()))?;
    INSTALLED
        .set(())
        .map_err(|_| GatewayError::TracingAlreadyInstalled)
}

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// 安装链式 panic hook，进程内只生效一次。
///
/// - **契约 (What)**：每次 panic 都在 panic 所在线程记录一份调用栈，随后调用先前的 hook；
/// - **前置条件**：宿主若在之后替换 panic hook，[`take_panic_backtrace`] 将返回 `None`。
pub(crate) fn install_panic_capture() {
    PANIC_CAPTURE.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let stack = Backtrace::force_capture().to_string();
            LAST_PANIC_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(stack));
            previous(info);
        }));
    });
}

/// 取走当前线程最近一次 panic 的调用栈。
pub(crate) fn take_panic_backtrace() -> Option<String> {
    LAST_PANIC_BACKTRACE.with(|slot| slot.borrow_mut().take())
}
