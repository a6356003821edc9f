//! 共享计数存储 trait 定义

use async_trait::async_trait;
use civic_errors::AppResult;
use std::time::Duration;

/// 一次窗口计数的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// 递增后的计数
    pub count: u64,
    /// 计数键的剩余存活时间，即窗口重置前的等待时间
    pub reset_after: Duration,
}

/// 共享计数存储
///
/// 多个网关实例通过同一个存储观察一致的计数。
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// 原子递增计数键；键为新建时将其过期时间设为 `window`
    async fn incr_window(&self, key: &str, window: Duration) -> AppResult<WindowCount>;

    /// 检查存储是否可达
    async fn ping(&self) -> AppResult<()>;
}
