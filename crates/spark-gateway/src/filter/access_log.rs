//! # access-log 过滤器
//!
//! ## 核心意图（Why）
//! - 在 `next` 返回后记录一条结构化访问日志：请求 ID、路由、版本、状态码、错误码与耗时；
//! - 以过滤器形式提供，使是否记录访问日志、放在链路哪一层都由配置决定。
//!
//! ## 配置（What）
//! - `options.target`：日志 target 名称，仅作为字段输出，默认 `spark.gateway.access`；
//! - 成功请求以 `info` 级别输出，失败请求以 `warn` 级别输出。

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use crate::config::FilterConfig;
use crate::context::Context;
use crate::error::{GatewayError, ServeError};

use super::{Filter, FilterFactory, FilterHandler};

/// 工厂注册名。
pub const TYPE_ID: &str = "access-log";

const DEFAULT_TARGET: &str = "spark.gateway.access";

/// 访问日志过滤器。
#[derive(Clone, Debug)]
pub struct AccessLogFilter {
    target: Arc<str>,
}

impl AccessLogFilter {
    pub fn new(target: Option<&str>) -> Self {
        Self {
            target: Arc::from(target.unwrap_or(DEFAULT_TARGET)),
        }
    }
}

impl Default for AccessLogFilter {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Filter for AccessLogFilter {
    fn type_key(&self) -> &str {
        TYPE_ID
    }

    fn do_filter(&self, next: Arc<dyn FilterHandler>) -> Arc<dyn FilterHandler> {
        Arc::new(AccessLogHandler {
            target: Arc::clone(&self.target),
            next,
        })
    }
}

struct AccessLogHandler {
    target: Arc<str>,
    next: Arc<dyn FilterHandler>,
}

#[async_trait]
impl FilterHandler for AccessLogHandler {
    async fn handle(&self, ctx: &mut Context) -> Result<(), ServeError> {
        let started = Instant::now();
        let result = self.next.handle(ctx).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let (route, version) = ctx
            .endpoint()
            .map(|endpoint| {
                (
                    endpoint.route_key().to_string(),
                    endpoint.version.clone(),
                )
            })
            .unwrap_or_default();
        match &result {
            Ok(()) => info!(
                log_target = %self.target,
                request_id = %ctx.request_id(),
                route_key = %route,
                version = %version,
                status = ctx.response().status.as_u16(),
                elapsed_ms,
                "access"
            ),
            Err(err) => warn!(
                log_target = %self.target,
                request_id = %ctx.request_id(),
                route_key = %route,
                version = %version,
                status = err.status().as_u16(),
                error_code = %err.error_code(),
                elapsed_ms,
                "access"
            ),
        }
        result
    }
}

#[derive(Debug, Default, Deserialize)]
struct AccessLogOptions {
    #[serde(default)]
    target: Option<String>,
}

/// `access-log` 工厂。
#[derive(Clone, Copy, Debug, Default)]
pub struct AccessLogFactory;

impl FilterFactory for AccessLogFactory {
    fn create(&self, config: &FilterConfig) -> Result<Arc<dyn Filter>, GatewayError> {
        let options: AccessLogOptions = config.options_as()?;
        Ok(Arc::new(AccessLogFilter::new(options.target.as_deref())))
    }
}
