//! 管理后台登录
//!
//! 校验密码前先经过登录防爆破检查；校验结果确定后更新防爆破状态。

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::info;

use crate::client_ip::client_identity;
use crate::i18n::Locale;
use crate::login_guard::FailureOutcome;
use crate::state::AppState;

pub const ADMIN_LOGIN_PATH: &str = "/api/admin/login";

pub fn auth_routes() -> Router<AppState> {
    Router::new().route(ADMIN_LOGIN_PATH, post(admin_login))
}

/// 凭证校验
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, password: &str) -> bool;
}

/// 与配置中的管理员密码比较
///
/// 只保存密码的 SHA-256 摘要，比较耗时与匹配位置无关。
/// 未配置密码时所有校验均失败。
pub struct StaticPasswordVerifier {
    digest: Option<[u8; 32]>,
}

impl StaticPasswordVerifier {
    pub fn new(password: Option<&Secret<String>>) -> Self {
        Self {
            digest: password.map(|p| sha256(p.expose_secret())),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.digest.is_some()
    }
}

#[async_trait]
impl CredentialVerifier for StaticPasswordVerifier {
    async fn verify(&self, password: &str) -> bool {
        let Some(expected) = &self.digest else {
            return false;
        };
        let actual = sha256(password);
        expected.as_slice().ct_eq(actual.as_slice()).into()
    }
}

fn sha256(input: &str) -> [u8; 32] {
    Sha256::digest(input.as_bytes()).into()
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

async fn admin_login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> Response {
    let identity = client_identity(&headers);
    let locale = Locale::from_headers(&headers);

    let status = state.login_guard.check(&identity);
    if status.limited {
        return locked_out(locale, status.retry_after.unwrap_or(1));
    }

    if state.verifier.verify(&req.password).await {
        state.login_guard.clear(&identity);
        info!(identifier = %identity, "Admin login succeeded");
        return (
            StatusCode::OK,
            Json(LoginResponse {
                success: true,
                error: None,
                remaining_attempts: None,
                retry_after: None,
            }),
        )
            .into_response();
    }

    match state.login_guard.record_failure(&identity) {
        FailureOutcome::Counted { remaining } => invalid_password(locale, remaining),
        FailureOutcome::LockedOut { .. } => invalid_password(locale, 0),
        FailureOutcome::AlreadyBlocked { retry_after } => locked_out(locale, retry_after),
    }
}

fn locked_out(locale: Locale, retry_after: u64) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(LoginResponse {
            success: false,
            error: Some(locale.too_many_login_attempts(retry_after)),
            remaining_attempts: Some(0),
            retry_after: Some(retry_after),
        }),
    )
        .into_response();
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
    response
}

fn invalid_password(locale: Locale, remaining: u32) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(LoginResponse {
            success: false,
            error: Some(locale.invalid_password(remaining)),
            remaining_attempts: Some(remaining),
            retry_after: None,
        }),
    )
        .into_response()
}
