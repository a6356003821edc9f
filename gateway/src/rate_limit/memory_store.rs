//! 进程内计数存储，供测试使用
//!
//! 过期时间基于 `tokio::time::Instant`，可以配合 `tokio::time::pause` 模拟时间流逝。

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use civic_errors::{AppError, AppResult};
use civic_ports::{CounterStore, WindowCount};
use parking_lot::Mutex;
use tokio::time::Instant;

#[derive(Default)]
pub struct MemoryCounterStore {
    entries: Mutex<HashMap<String, (u64, Instant)>>,
    calls: AtomicUsize,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// `incr_window` 被调用的次数
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr_window(&self, key: &str, window: Duration) -> AppResult<WindowCount> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let entry = entries
            .entry(key.to_string())
            .or_insert((0, now + window));
        if now >= entry.1 {
            *entry = (0, now + window);
        }
        entry.0 += 1;

        Ok(WindowCount {
            count: entry.0,
            reset_after: entry.1 - now,
        })
    }

    async fn ping(&self) -> AppResult<()> {
        Ok(())
    }
}

/// 永远失败的存储，模拟连接中断
pub struct UnreachableStore;

#[async_trait]
impl CounterStore for UnreachableStore {
    async fn incr_window(&self, _key: &str, _window: Duration) -> AppResult<WindowCount> {
        Err(AppError::external_service("connection refused"))
    }

    async fn ping(&self) -> AppResult<()> {
        Err(AppError::external_service("connection refused"))
    }
}

/// 永不返回的存储，模拟网络挂起
pub struct StalledStore;

#[async_trait]
impl CounterStore for StalledStore {
    async fn incr_window(&self, _key: &str, _window: Duration) -> AppResult<WindowCount> {
        std::future::pending().await
    }

    async fn ping(&self) -> AppResult<()> {
        std::future::pending().await
    }
}
