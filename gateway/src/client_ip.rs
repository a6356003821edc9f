//! 客户端标识提取
//!
//! 优先级：`X-Forwarded-For` 的第一个地址 → `X-Real-IP` → 回环地址。
//!
//! 这些头可以被客户端伪造。只有当上游反向代理负责剥离并重写它们时，
//! 提取出的地址才可信；否则限流只是尽力而为，不是安全边界。

use axum::http::HeaderMap;

/// 缺少转发头时使用的标识
pub const LOOPBACK_IDENTITY: &str = "127.0.0.1";

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// 从请求头提取客户端标识，结果永不为空
pub fn client_identity(headers: &HeaderMap) -> String {
    headers
        .get(X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .or_else(|| {
            headers
                .get(X_REAL_IP)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|s| !s.is_empty())
        })
        .unwrap_or(LOOPBACK_IDENTITY)
        .to_string()
}
