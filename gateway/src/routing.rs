//! 路由组装

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use civic_errors::AppError;
use civic_telemetry::HealthStatus;
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::auth::auth_routes;
use crate::problem::problem_response;
use crate::proxy;
use crate::rate_limit::rate_limit_middleware;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let rate_limit = state.rate_limit.clone();

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .merge(auth_routes())
        .fallback(proxy::forward)
        .layer(middleware::from_fn_with_state(
            rate_limit,
            rate_limit_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// 计数存储和上游都只作参考：存储不可用时限流放行，不影响就绪状态
async fn readiness_check(State(state): State<AppState>) -> Response {
    let mut status = HealthStatus::new();

    match state.rate_limit.rate_limiter.store_health().await {
        None => status.add_advisory(
            "counter-store",
            false,
            Some("not configured, rate limiting fails open".to_string()),
        ),
        Some(Ok(())) => status.add_advisory("counter-store", true, None),
        Some(Err(e)) => status.add_advisory("counter-store", false, Some(e.to_string())),
    }

    status.add_advisory(
        "upstream",
        state.upstream.is_some(),
        state
            .upstream
            .is_none()
            .then(|| "not configured".to_string()),
    );

    let code = if status.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status)).into_response()
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            handle.render(),
        )
            .into_response(),
        None => problem_response(AppError::not_found("Metrics recorder not installed"), "/metrics"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{CredentialVerifier, StaticPasswordVerifier};
    use crate::login_guard::LoginGuard;
    use crate::proxy::Upstream;
    use crate::rate_limit::memory_store::{MemoryCounterStore, UnreachableStore};
    use crate::rate_limit::{RateLimitMiddleware, RouteClassifier, TierPolicies, TieredRateLimiter};
    use axum::{
        body::Body,
        http::{Method, Request, Uri},
    };
    use civic_config::UpstreamConfig;
    use civic_ports::CounterStore;
    use secrecy::Secret;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    const PASSWORD: &str = "s3cret-admin";

    fn state_with(store: Option<Arc<dyn CounterStore>>) -> AppState {
        let limiter = TieredRateLimiter::new(
            store,
            TierPolicies::default(),
            "ratelimit",
            Duration::from_millis(500),
        );
        let verifier: Arc<dyn CredentialVerifier> = Arc::new(StaticPasswordVerifier::new(Some(
            &Secret::new(PASSWORD.to_string()),
        )));

        AppState {
            rate_limit: Arc::new(RateLimitMiddleware::new(
                Arc::new(RouteClassifier::default()),
                Arc::new(limiter),
            )),
            login_guard: Arc::new(LoginGuard::new()),
            verifier,
            upstream: None,
            metrics: None,
        }
    }

    /// 回显收到的路径
    async fn spawn_echo_upstream() -> Arc<Upstream> {
        async fn echo(uri: Uri) -> String {
            uri.path().to_string()
        }

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, Router::new().fallback(echo)).await.unwrap();
        });

        let config = UpstreamConfig {
            url: format!("http://{}", addr),
            timeout_secs: 5,
        };
        Arc::new(Upstream::new(&config, 1024).unwrap())
    }

    fn get_request(path: &str, ip: &str) -> Request<Body> {
        Request::get(path)
            .header("x-forwarded-for", ip)
            .body(Body::empty())
            .unwrap()
    }

    fn login(password: &str, ip: &str, language: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/api/admin/login")
            .header("content-type", "application/json")
            .header("x-forwarded-for", ip)
            .header("accept-language", language)
            .body(Body::from(
                serde_json::json!({ "password": password }).to_string(),
            ))
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = build_router(state_with(None));
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_ready_reports_store_outage_without_failing() {
        let app = build_router(state_with(Some(Arc::new(UnreachableStore))));
        let response = app
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["healthy"], true);
        assert_eq!(body["checks"][0]["name"], "counter-store");
        assert_eq!(body["checks"][0]["healthy"], false);
    }

    #[tokio::test]
    async fn test_metrics_without_recorder() {
        let app = build_router(state_with(None));
        let response = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_path_without_upstream_is_404_with_quota_headers() {
        let app = build_router(state_with(Some(Arc::new(MemoryCounterStore::new()))));
        let response = app
            .oneshot(
                Request::get("/api/politicians/42")
                    .header("x-real-ip", "198.51.100.4")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()["x-ratelimit-limit"], "60");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "59");
    }

    #[tokio::test]
    async fn test_export_quota_enforced_through_proxy() {
        let mut state = state_with(Some(Arc::new(MemoryCounterStore::new())));
        state.upstream = Some(spawn_echo_upstream().await);
        let app = build_router(state);

        for _ in 0..5 {
            let response = app
                .clone()
                .oneshot(get_request("/api/export/votes.csv", "203.0.113.7"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
            assert_eq!(&body[..], b"/api/export/votes.csv");
        }

        let response = app
            .oneshot(get_request("/api/export/votes.csv", "203.0.113.7"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().get("retry-after").is_some());
    }

    #[tokio::test]
    async fn test_dot_segments_cannot_reach_export_upstream() {
        let store = Arc::new(MemoryCounterStore::new());
        let mut state = state_with(Some(store.clone()));
        state.upstream = Some(spawn_echo_upstream().await);
        let app = build_router(state);

        for path in [
            "/api/admin/../export/votes.csv",
            "/api/x/%2e%2e/export/votes.csv",
        ] {
            for _ in 0..10 {
                let response = app.clone().oneshot(get_request(path, "203.0.113.7")).await.unwrap();
                assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{path}");
                assert_eq!(
                    response.headers()["content-type"],
                    "application/problem+json"
                );
            }
        }
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn test_admin_login_is_not_tier_limited() {
        let app = build_router(state_with(Some(Arc::new(MemoryCounterStore::new()))));
        let response = app.oneshot(login(PASSWORD, "1.2.3.4", "de")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("x-ratelimit-limit").is_none());
        assert_eq!(json_body(response).await["success"], true);
    }

    #[tokio::test(start_paused = true)]
    async fn test_admin_login_lockout_flow() {
        let state = state_with(None);
        let app = build_router(state.clone());

        for remaining in [4, 3, 2, 1] {
            let response = app
                .clone()
                .oneshot(login("wrong", "203.0.113.7", "en-US"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            let body = json_body(response).await;
            assert_eq!(body["remaining_attempts"], remaining);
            assert_eq!(
                body["error"],
                format!("Invalid password. {} attempts remaining.", remaining)
                    .replace("1 attempts", "1 attempt")
            );
        }

        // 第 5 次失败触发锁定，本次仍返回 401
        let response = app
            .clone()
            .oneshot(login("wrong", "203.0.113.7", "en-US"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["remaining_attempts"], 0);

        // 锁定期间即使密码正确也返回 429
        let response = app
            .clone()
            .oneshot(login(PASSWORD, "203.0.113.7", "de-DE"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["retry-after"], "1800");
        let body = json_body(response).await;
        assert_eq!(body["retry_after"], 1800);
        assert!(body["error"].as_str().unwrap().contains("1800 Sekunden"));

        // 其他地址不受影响
        let response = app
            .clone()
            .oneshot(login(PASSWORD, "198.51.100.4", "de"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // 锁定结束后可以登录，成功后状态清空
        tokio::time::advance(Duration::from_secs(30 * 60)).await;
        let response = app
            .clone()
            .oneshot(login(PASSWORD, "203.0.113.7", "de"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(state.login_guard.is_empty());
    }

    #[tokio::test]
    async fn test_successful_login_clears_failures() {
        let state = state_with(None);
        let app = build_router(state.clone());

        for _ in 0..3 {
            app.clone()
                .oneshot(login("wrong", "203.0.113.7", "de"))
                .await
                .unwrap();
        }
        assert_eq!(state.login_guard.check("203.0.113.7").remaining, 2);

        let response = app
            .clone()
            .oneshot(login(PASSWORD, "203.0.113.7", "de"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.login_guard.check("203.0.113.7").remaining, 5);
    }

    #[tokio::test]
    async fn test_german_invalid_password_message() {
        let app = build_router(state_with(None));
        let response = app.oneshot(login("wrong", "203.0.113.7", "de")).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            json_body(response).await["error"],
            "Ungültiges Passwort. Noch 4 Versuche."
        );
    }
}
