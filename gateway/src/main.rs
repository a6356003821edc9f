//! Civic Watch 准入网关
//!
//! 站点前的分级限流和管理后台登录防爆破，其余请求转发给站点应用。

mod auth;
mod client_ip;
mod config;
mod i18n;
mod login_guard;
mod problem;
mod proxy;
mod rate_limit;
mod routing;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use civic_adapter_redis::{RedisCounterStore, create_connection_manager};
use civic_config::{AppConfig, RedisConfig};
use civic_ports::CounterStore;
use civic_telemetry::{init_metrics, init_tracing, init_tracing_json};
use secrecy::ExposeSecret;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::auth::{CredentialVerifier, StaticPasswordVerifier};
use crate::login_guard::{LoginGuard, SWEEP_INTERVAL};
use crate::proxy::Upstream;
use crate::rate_limit::{RateLimitMiddleware, RouteClassifier, Tier, TierPolicies, TieredRateLimiter};
use crate::state::AppState;

/// 启动时连接 Redis 的最长等待时间
const REDIS_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // 加载配置
    let config = config::load()?;

    if config.telemetry.json {
        init_tracing_json(&config.telemetry.log_level);
    } else {
        init_tracing(&config.telemetry.log_level);
    }

    info!(
        app_name = %config.app_name,
        app_env = %config.app_env,
        "Starting gateway"
    );

    let metrics = match init_metrics() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Failed to install metrics recorder, /metrics disabled");
            None
        }
    };

    let state = build_state(&config, metrics).await?;

    // 登录防爆破的后台清理任务
    let sweep_period = Duration::from_secs(config.login_guard.sweep_interval_secs);
    if sweep_period != SWEEP_INTERVAL {
        info!(?sweep_period, "Login guard sweep interval overridden");
    }
    let shutdown = CancellationToken::new();
    let sweeper = state
        .login_guard
        .clone()
        .spawn_sweeper(sweep_period, shutdown.clone());

    let app = routing::build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Gateway listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        error!(error = %e, "Login guard sweeper terminated abnormally");
    }

    info!("Gateway stopped");
    Ok(())
}

async fn build_state(
    config: &AppConfig,
    metrics: Option<metrics_exporter_prometheus::PrometheusHandle>,
) -> Result<AppState, Box<dyn std::error::Error>> {
    let store = match &config.redis {
        Some(redis) => connect_counter_store(redis).await,
        None => None,
    };

    let timeout = config
        .redis
        .as_ref()
        .map(|r| Duration::from_millis(r.timeout_ms))
        .unwrap_or(Duration::from_millis(500));

    let rate_limiter = TieredRateLimiter::new(
        store,
        TierPolicies::from(&config.rate_limit),
        config.rate_limit.key_prefix.clone(),
        timeout,
    );
    if !rate_limiter.is_configured() {
        warn!("No counter store available, rate limiting fails open");
    }
    for tier in [Tier::General, Tier::Search, Tier::Export] {
        let policy = rate_limiter.policy(tier);
        info!(
            tier = tier.as_str(),
            capacity = policy.capacity,
            window = ?policy.window,
            "Rate limit tier configured"
        );
    }

    let rate_limit = RateLimitMiddleware::new(
        Arc::new(RouteClassifier::default()),
        Arc::new(rate_limiter),
    );

    let verifier = StaticPasswordVerifier::new(config.admin.password.as_ref());
    if !verifier.is_configured() {
        warn!("Admin password not configured, all admin logins will be rejected");
    }
    let verifier: Arc<dyn CredentialVerifier> = Arc::new(verifier);

    let upstream = match &config.upstream {
        Some(upstream) => {
            info!(url = %upstream.url, "Forwarding unmatched requests upstream");
            Some(Arc::new(Upstream::new(
                upstream,
                config.server.body_limit_bytes,
            )?))
        }
        None => {
            warn!("Upstream not configured, unmatched requests return 404");
            None
        }
    };

    Ok(AppState {
        rate_limit: Arc::new(rate_limit),
        login_guard: Arc::new(LoginGuard::new()),
        verifier,
        upstream,
        metrics,
    })
}

/// 连接共享计数存储
///
/// 连接失败不阻止启动，限流器在没有存储时放行所有请求。
async fn connect_counter_store(config: &RedisConfig) -> Option<Arc<dyn CounterStore>> {
    let token = config.token.as_ref().map(|t| t.expose_secret().as_str());
    let connect = create_connection_manager(config.url.expose_secret(), token);

    match tokio::time::timeout(REDIS_CONNECT_TIMEOUT, connect).await {
        Ok(Ok(conn)) => {
            info!("Connected to Redis counter store");
            Some(Arc::new(RedisCounterStore::new(conn)))
        }
        Ok(Err(e)) => {
            error!(error = %e, "Failed to connect to Redis, rate limiting fails open");
            None
        }
        Err(_) => {
            error!(
                timeout = ?REDIS_CONNECT_TIMEOUT,
                "Timed out connecting to Redis, rate limiting fails open"
            );
            None
        }
    }
}

/// 等待关闭信号
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
