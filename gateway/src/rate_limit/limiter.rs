//! 分级限流器
//!
//! 固定窗口计数：每次检查对 `(等级, 客户端)` 键做一次原子递增，键的过期时间等于窗口大小。
//! 窗口边界处短时间内最多可能放行约 2 倍配额，这是固定窗口的已知近似。

use std::sync::Arc;
use std::time::Duration;

use civic_errors::{AppError, AppResult};
use civic_ports::CounterStore;
use civic_telemetry::RATE_LIMIT_DECISIONS;
use tracing::{debug, warn};

use crate::rate_limit::types::{AdmissionResult, Tier, TierPolicies, TierPolicy};

/// 分级限流器
///
/// 计数存储在构造时确定；`None` 表示未配置，所有检查直接放行。
#[derive(Clone)]
pub struct TieredRateLimiter {
    store: Option<Arc<dyn CounterStore>>,
    policies: TierPolicies,
    key_prefix: String,
    timeout: Duration,
}

impl TieredRateLimiter {
    /// 创建新的限流器
    pub fn new(
        store: Option<Arc<dyn CounterStore>>,
        policies: TierPolicies,
        key_prefix: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            policies,
            key_prefix: key_prefix.into(),
            timeout,
        }
    }

    /// 是否配置了共享计数存储
    pub fn is_configured(&self) -> bool {
        self.store.is_some()
    }

    pub fn policy(&self, tier: Tier) -> TierPolicy {
        self.policies.get(tier)
    }

    /// 检查是否允许请求
    ///
    /// 不会返回错误：存储不可用、超时或未配置时一律放行（fail-open）。
    pub async fn check(&self, tier: Tier, identity: &str) -> AdmissionResult {
        let policy = self.policies.get(tier);
        let now = chrono::Utc::now().timestamp();

        let Some(store) = &self.store else {
            record_decision(tier, "fail_open");
            return AdmissionResult::fail_open(policy, now);
        };

        let key = self.key(tier, identity);
        match self.incr(store.as_ref(), &key, policy.window).await {
            Ok(window) => {
                let result = AdmissionResult::from_count(policy, window, now);
                debug!(
                    key = %key,
                    count = window.count,
                    admitted = result.admitted,
                    remaining = result.remaining,
                    "Rate limit check result"
                );
                record_decision(tier, if result.admitted { "admitted" } else { "denied" });
                result
            }
            Err(e) => {
                warn!(error = %e, key = %key, "Rate limit check failed, allowing request (fail-open)");
                record_decision(tier, "fail_open");
                AdmissionResult::fail_open(policy, now)
            }
        }
    }

    /// 检查计数存储的可达性；未配置时返回 `None`
    pub async fn store_health(&self) -> Option<AppResult<()>> {
        let store = self.store.as_ref()?;
        let result = tokio::time::timeout(self.timeout, store.ping())
            .await
            .unwrap_or_else(|_| Err(AppError::timeout("counter store ping")));
        Some(result)
    }

    async fn incr(
        &self,
        store: &dyn CounterStore,
        key: &str,
        window: Duration,
    ) -> AppResult<civic_ports::WindowCount> {
        tokio::time::timeout(self.timeout, store.incr_window(key, window))
            .await
            .map_err(|_| AppError::timeout(format!("counter store call exceeded {:?}", self.timeout)))?
    }

    /// 构建计数键：`{prefix}:{tier}:{identity}`
    fn key(&self, tier: Tier, identity: &str) -> String {
        let identity = if identity.is_empty() {
            crate::client_ip::LOOPBACK_IDENTITY
        } else {
            identity
        };
        format!("{}:{}:{}", self.key_prefix, tier.as_str(), identity)
    }
}

fn record_decision(tier: Tier, outcome: &'static str) {
    metrics::counter!(RATE_LIMIT_DECISIONS, "tier" => tier.as_str(), "outcome" => outcome)
        .increment(1);
}
