//! 限流中间件
//!
//! 集成路由分类、客户端标识提取和限流检查

use crate::client_ip::client_identity;
use crate::i18n::Locale;
use crate::problem::problem_response;
use crate::rate_limit::classifier::{RouteClassifier, is_ambiguous_path};
use crate::rate_limit::limiter::TieredRateLimiter;
use crate::rate_limit::types::{AdmissionResult, Tier};
use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, header},
    middleware::Next,
    response::Response,
};
use civic_errors::AppError;
use std::sync::Arc;
use tracing::{debug, warn};

/// 限流中间件状态
#[derive(Clone)]
pub struct RateLimitMiddleware {
    /// 路由分类器
    pub classifier: Arc<RouteClassifier>,
    /// 限流器
    pub rate_limiter: Arc<TieredRateLimiter>,
}

impl RateLimitMiddleware {
    /// 创建新的限流中间件
    pub fn new(classifier: Arc<RouteClassifier>, rate_limiter: Arc<TieredRateLimiter>) -> Self {
        Self {
            classifier,
            rate_limiter,
        }
    }

    /// 处理限流检查
    ///
    /// 返回 `None` 表示该路径不受限流保护。
    pub async fn check_rate_limit(
        &self,
        path: &str,
        headers: &HeaderMap,
    ) -> Option<(Tier, String, AdmissionResult)> {
        let tier = self.classifier.classify(path)?;
        let identity = client_identity(headers);
        let result = self.rate_limiter.check(tier, &identity).await;
        Some((tier, identity, result))
    }

    /// 为响应添加限流相关头
    fn add_rate_limit_headers(headers: &mut HeaderMap, result: &AdmissionResult) {
        // X-RateLimit-Limit: 限制的最大请求数
        headers.insert("x-ratelimit-limit", HeaderValue::from(result.limit));

        // X-RateLimit-Remaining: 剩余请求数
        headers.insert("x-ratelimit-remaining", HeaderValue::from(result.remaining));

        // X-RateLimit-Reset: 窗口重置时间
        headers.insert("x-ratelimit-reset", HeaderValue::from(result.reset_at));

        // Retry-After: 建议重试等待时间（仅在拒绝时）
        if let Some(retry_after) = result.retry_after {
            headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        }
    }
}

/// Axum 中间件函数
pub async fn rate_limit_middleware(
    State(state): State<Arc<RateLimitMiddleware>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    // 点段和反斜杠会被上游解析成另一个路径，无法可靠分类
    if is_ambiguous_path(&path) {
        warn!(endpoint = %path, "Rejected ambiguous request path");
        return problem_response(
            AppError::validation("Request path must not contain dot segments or backslashes"),
            &path,
        );
    }

    let Some((tier, identity, result)) = state.check_rate_limit(&path, request.headers()).await
    else {
        return next.run(request).await;
    };

    if !result.admitted {
        warn!(
            identifier = %identity,
            tier = tier.as_str(),
            endpoint = %path,
            method = %request.method(),
            "Rate limit exceeded"
        );

        let locale = Locale::from_headers(request.headers());
        let mut response = problem_response(
            AppError::resource_exhausted(locale.too_many_requests()),
            &path,
        );
        RateLimitMiddleware::add_rate_limit_headers(response.headers_mut(), &result);
        return response;
    }

    debug!(
        identifier = %identity,
        tier = tier.as_str(),
        endpoint = %path,
        remaining = result.remaining,
        "Request allowed"
    );

    let mut response = next.run(request).await;
    RateLimitMiddleware::add_rate_limit_headers(response.headers_mut(), &result);
    response
}
