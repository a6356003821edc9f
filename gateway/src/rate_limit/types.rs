//! 数据结构定义

use civic_config::{RateLimitSettings, TierSettings};
use civic_ports::WindowCount;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 流量等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// 普通 API 请求（最宽松）
    General,
    /// 搜索接口
    Search,
    /// 数据导出接口（最严格）
    Export,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Search => "search",
            Self::Export => "export",
        }
    }
}

/// 单个等级的配额策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierPolicy {
    /// 时间窗口内的最大请求数
    pub capacity: u64,
    /// 时间窗口
    pub window: Duration,
}

impl From<TierSettings> for TierPolicy {
    fn from(settings: TierSettings) -> Self {
        Self {
            capacity: settings.capacity,
            window: Duration::from_secs(settings.window_secs),
        }
    }
}

/// 全部等级的配额策略，进程启动时确定，之后不可变
#[derive(Debug, Clone)]
pub struct TierPolicies {
    general: TierPolicy,
    search: TierPolicy,
    export: TierPolicy,
}

impl TierPolicies {
    pub fn new(general: TierPolicy, search: TierPolicy, export: TierPolicy) -> Self {
        Self {
            general,
            search,
            export,
        }
    }

    pub fn get(&self, tier: Tier) -> TierPolicy {
        match tier {
            Tier::General => self.general,
            Tier::Search => self.search,
            Tier::Export => self.export,
        }
    }
}

impl From<&RateLimitSettings> for TierPolicies {
    fn from(settings: &RateLimitSettings) -> Self {
        Self::new(
            settings.general.into(),
            settings.search.into(),
            settings.export.into(),
        )
    }
}

impl Default for TierPolicies {
    fn default() -> Self {
        Self::from(&RateLimitSettings::default())
    }
}

/// 限流检查结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionResult {
    /// 是否允许请求
    pub admitted: bool,
    /// 限制的最大请求数
    pub limit: u64,
    /// 剩余可用请求数
    pub remaining: u64,
    /// 窗口重置时间（Unix 时间戳，秒）
    pub reset_at: i64,
    /// 建议重试等待时间（秒，仅在拒绝时有效）
    pub retry_after: Option<u64>,
}

impl AdmissionResult {
    /// 根据存储返回的计数计算结果
    pub fn from_count(policy: TierPolicy, window: WindowCount, now_unix: i64) -> Self {
        let admitted = window.count <= policy.capacity;
        let reset_secs = ceil_secs(window.reset_after);

        Self {
            admitted,
            limit: policy.capacity,
            remaining: policy.capacity.saturating_sub(window.count),
            reset_at: now_unix + reset_secs as i64,
            retry_after: (!admitted).then_some(reset_secs.max(1)),
        }
    }

    /// 计数存储不可用时的放行结果
    pub fn fail_open(policy: TierPolicy, now_unix: i64) -> Self {
        Self {
            admitted: true,
            limit: policy.capacity,
            remaining: policy.capacity,
            reset_at: now_unix + policy.window.as_secs() as i64,
            retry_after: None,
        }
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 { secs + 1 } else { secs }
}
