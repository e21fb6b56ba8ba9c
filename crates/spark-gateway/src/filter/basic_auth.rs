//! # basic-auth 过滤器
//!
//! ## 核心意图（Why）
//! - 为未接入统一鉴权的路由提供 `Authorization: Basic` 校验；
//! - 校验失败时短路链路，返回 `FilterRejected` 401，并携带 `WWW-Authenticate` Header 片段，
//!   由路由引擎合并进响应。
//!
//! ## 配置（What）
//! ```toml
//! [[filters]]
//! id = "auth"
//! type_id = "basic-auth"
//! options = { realm = "Restricted", users = { alice = "secret" } }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use http::{HeaderValue, StatusCode};
use serde::Deserialize;

use crate::config::FilterConfig;
use crate::context::Context;
use crate::error::{GatewayError, ServeError};

use super::{Filter, FilterFactory, FilterHandler};

/// 工厂注册名。
pub const TYPE_ID: &str = "basic-auth";
/// 鉴权失败的错误码。
pub const ERROR_CODE_UNAUTHORIZED: &str = "GATEWAY:AUTH_UNAUTHORIZED";

const DEFAULT_REALM: &str = "Restricted";
const SCHEME: &str = "basic";

/// 凭证校验器。
pub trait CredentialValidator: Send + Sync + 'static {
    fn validate(&self, username: &str, password: &str, ctx: &Context) -> bool;
}

impl<F> CredentialValidator for F
where
    F: Fn(&str, &str, &Context) -> bool + Send + Sync + 'static,
{
    fn validate(&self, username: &str, password: &str, ctx: &Context) -> bool {
        (self)(username, password, ctx)
    }
}

/// 基于静态用户表的校验器。
#[derive(Clone, Debug, Default)]
pub struct StaticUsers {
    users: HashMap<String, String>,
}

impl StaticUsers {
    pub fn new(users: HashMap<String, String>) -> Self {
        Self { users }
    }
}

impl CredentialValidator for StaticUsers {
    fn validate(&self, username: &str, password: &str, _ctx: &Context) -> bool {
        self.users
            .get(username)
            .is_some_and(|expected| expected == password)
    }
}

/// Basic 鉴权过滤器。
#[derive(Clone)]
pub struct BasicAuthFilter {
    realm: Arc<str>,
    validator: Arc<dyn CredentialValidator>,
}

impl BasicAuthFilter {
    pub fn new(realm: Option<&str>, validator: Arc<dyn CredentialValidator>) -> Self {
        let realm = realm.filter(|realm| !realm.is_empty()).unwrap_or(DEFAULT_REALM);
        Self {
            realm: Arc::from(realm),
            validator,
        }
    }
}

impl Filter for BasicAuthFilter {
    fn type_key(&self) -> &str {
        TYPE_ID
    }

    fn do_filter(&self, next: Arc<dyn FilterHandler>) -> Arc<dyn FilterHandler> {
        Arc::new(BasicAuthHandler {
            filter: self.clone(),
            next,
        })
    }
}

struct BasicAuthHandler {
    filter: BasicAuthFilter,
    next: Arc<dyn FilterHandler>,
}

impl BasicAuthHandler {
    fn unauthorized(&self) -> ServeError {
        let challenge = format!("{SCHEME} realm=\"{}\"", self.filter.realm);
        let error = ServeError::filter_rejected(
            StatusCode::UNAUTHORIZED,
            ERROR_CODE_UNAUTHORIZED,
            "AUTH:UNAUTHORIZED",
        );
        match HeaderValue::from_str(&challenge) {
            Ok(value) => error.with_header(WWW_AUTHENTICATE, value),
            Err(_) => error,
        }
    }

    /// 解析 `Authorization` Header，返回 `(username, password)`。
    fn credentials(ctx: &Context) -> Result<Option<(String, String)>, ServeError> {
        let Some(raw) = ctx
            .request()
            .headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
        else {
            return Ok(None);
        };
        let Some((scheme, encoded)) = raw.split_once(' ') else {
            return Ok(None);
        };
        if !scheme.eq_ignore_ascii_case(SCHEME) {
            return Ok(None);
        }
        let decoded = STANDARD
            .decode(encoded.trim())
            .map_err(|err| ServeError::bad_request("AUTH:MALFORMED_CREDENTIALS").with_cause(err))?;
        let text = String::from_utf8(decoded)
            .map_err(|err| ServeError::bad_request("AUTH:MALFORMED_CREDENTIALS").with_cause(err))?;
        Ok(text
            .split_once(':')
            .map(|(user, password)| (user.to_owned(), password.to_owned())))
    }
}

#[async_trait]
impl FilterHandler for BasicAuthHandler {
    async fn handle(&self, ctx: &mut Context) -> Result<(), ServeError> {
        match Self::credentials(ctx)? {
            Some((user, password)) if self.filter.validator.validate(&user, &password, ctx) => {
                self.next.handle(ctx).await
            }
            _ => Err(self.unauthorized()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct BasicAuthOptions {
    #[serde(default)]
    realm: Option<String>,
    #[serde(default)]
    users: HashMap<String, String>,
}

/// `basic-auth` 工厂：从 `options.users` 构造静态用户表。
#[derive(Clone, Copy, Debug, Default)]
pub struct BasicAuthFactory;

impl FilterFactory for BasicAuthFactory {
    fn create(&self, config: &FilterConfig) -> Result<Arc<dyn Filter>, GatewayError> {
        let options: BasicAuthOptions = config.options_as()?;
        if options.users.is_empty() {
            return Err(GatewayError::FilterOptions {
                id: config.id.clone(),
                detail: "options.users must not be empty".to_owned(),
            });
        }
        Ok(Arc::new(BasicAuthFilter::new(
            options.realm.as_deref(),
            Arc::new(StaticUsers::new(options.users)),
        )))
    }
}
