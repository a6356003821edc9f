//! 网关共享状态

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use crate::auth::CredentialVerifier;
use crate::login_guard::LoginGuard;
use crate::proxy::Upstream;
use crate::rate_limit::RateLimitMiddleware;

/// 进程启动时构造一次，克隆后交给各个处理器
#[derive(Clone)]
pub struct AppState {
    pub rate_limit: Arc<RateLimitMiddleware>,
    pub login_guard: Arc<LoginGuard>,
    pub verifier: Arc<dyn CredentialVerifier>,
    pub upstream: Option<Arc<Upstream>>,
    pub metrics: Option<PrometheusHandle>,
}
