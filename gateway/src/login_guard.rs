//! 登录防爆破
//!
//! 按客户端标识记录失败的登录尝试，达到阈值后锁定一段固定时间。
//! 状态只存在于本进程内存中，重启后清空。
//!
//! 每个标识的状态：无记录 → 累积中（窗口内 1..MAX_ATTEMPTS-1 次失败）→ 锁定 → 无记录。
//! 窗口或锁定过期后的记录视为不存在，检查时惰性清除；后台清理任务只负责回收内存。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use civic_telemetry::LOGIN_GUARD_EVENTS;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 锁定前允许的失败次数
pub const MAX_ATTEMPTS: u32 = 5;

/// 失败计数窗口
pub const WINDOW_DURATION: Duration = Duration::from_secs(15 * 60);

/// 锁定时长
pub const BLOCK_DURATION: Duration = Duration::from_secs(30 * 60);

/// 后台清理间隔
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// 检查结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GuardStatus {
    pub limited: bool,
    pub remaining: u32,
    /// 距离解锁的秒数，仅在锁定时存在
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl GuardStatus {
    fn clean() -> Self {
        Self {
            limited: false,
            remaining: MAX_ATTEMPTS,
            retry_after: None,
        }
    }

    fn blocked(retry_after: u64) -> Self {
        Self {
            limited: true,
            remaining: 0,
            retry_after: Some(retry_after),
        }
    }
}

/// 记录一次失败后的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// 计入窗口，尚未达到阈值
    Counted { remaining: u32 },
    /// 本次失败触发了锁定
    LockedOut { retry_after: u64 },
    /// 已处于锁定状态，不再累计
    AlreadyBlocked { retry_after: u64 },
}

#[derive(Debug, Clone)]
struct AttemptEntry {
    failure_count: u32,
    window_started_at: Instant,
    blocked_until: Option<Instant>,
}

enum EntryState {
    Accumulating,
    Blocked(Instant),
    Stale,
}

impl AttemptEntry {
    fn new(now: Instant) -> Self {
        Self {
            failure_count: 1,
            window_started_at: now,
            blocked_until: None,
        }
    }

    fn state(&self, now: Instant) -> EntryState {
        match self.blocked_until {
            Some(until) if now < until => EntryState::Blocked(until),
            Some(_) => EntryState::Stale,
            None if now.duration_since(self.window_started_at) >= WINDOW_DURATION => {
                EntryState::Stale
            }
            None => EntryState::Accumulating,
        }
    }
}

/// 登录防爆破守卫
///
/// 进程启动时构造一次，以 `Arc` 共享给请求处理器。
/// 同一标识的“读取-修改-写入”全部在一把锁内完成，并发请求不会丢失计数。
#[derive(Debug, Default)]
pub struct LoginGuard {
    entries: Mutex<HashMap<String, AttemptEntry>>,
}

impl LoginGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// 检查标识当前是否被锁定
    pub fn check(&self, identity: &str) -> GuardStatus {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let Some(entry) = entries.get(identity) else {
            return GuardStatus::clean();
        };

        match entry.state(now) {
            EntryState::Blocked(until) => GuardStatus::blocked(retry_after_secs(until, now)),
            EntryState::Stale => {
                entries.remove(identity);
                GuardStatus::clean()
            }
            EntryState::Accumulating => GuardStatus {
                limited: entry.failure_count >= MAX_ATTEMPTS,
                remaining: MAX_ATTEMPTS.saturating_sub(entry.failure_count),
                retry_after: None,
            },
        }
    }

    /// 记录一次失败的登录尝试
    pub fn record_failure(&self, identity: &str) -> FailureOutcome {
        let now = Instant::now();
        let mut entries = self.entries.lock();

        let outcome = match entries.get_mut(identity) {
            Some(entry) => match entry.state(now) {
                EntryState::Blocked(until) => FailureOutcome::AlreadyBlocked {
                    retry_after: retry_after_secs(until, now),
                },
                EntryState::Stale => {
                    *entry = AttemptEntry::new(now);
                    FailureOutcome::Counted {
                        remaining: MAX_ATTEMPTS - 1,
                    }
                }
                EntryState::Accumulating => {
                    entry.failure_count += 1;
                    if entry.failure_count >= MAX_ATTEMPTS {
                        let until = now + BLOCK_DURATION;
                        entry.blocked_until = Some(until);
                        FailureOutcome::LockedOut {
                            retry_after: retry_after_secs(until, now),
                        }
                    } else {
                        FailureOutcome::Counted {
                            remaining: MAX_ATTEMPTS - entry.failure_count,
                        }
                    }
                }
            },
            None => {
                entries.insert(identity.to_string(), AttemptEntry::new(now));
                FailureOutcome::Counted {
                    remaining: MAX_ATTEMPTS - 1,
                }
            }
        };
        drop(entries);

        match outcome {
            FailureOutcome::Counted { remaining } => {
                debug!(identity, remaining, "Failed login attempt recorded");
                record_event("failure");
            }
            FailureOutcome::LockedOut { retry_after } => {
                warn!(identity, retry_after, "Too many failed login attempts, identity locked");
                record_event("lockout");
            }
            FailureOutcome::AlreadyBlocked { .. } => record_event("rejected"),
        }

        outcome
    }

    /// 登录成功后清除记录
    pub fn clear(&self, identity: &str) {
        if self.entries.lock().remove(identity).is_some() {
            debug!(identity, "Login attempts cleared");
            record_event("clear");
        }
    }

    /// 清除窗口或锁定已过期的记录，返回清除数量
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !matches!(entry.state(now), EntryState::Stale));
        before - entries.len()
    }

    /// 当前记录数
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 启动后台清理任务，`shutdown` 取消后退出
    pub fn spawn_sweeper(self: Arc<Self>, period: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(?period, "Login guard sweeper started");
            let mut ticker = interval_at(Instant::now() + period, period);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = self.sweep();
                        debug!(removed, remaining = self.len(), "Login guard sweep finished");
                    }
                    _ = shutdown.cancelled() => {
                        info!("Login guard sweeper received shutdown signal");
                        break;
                    }
                }
            }
        })
    }
}

fn retry_after_secs(until: Instant, now: Instant) -> u64 {
    let left = until.saturating_duration_since(now);
    let secs = left.as_secs() + u64::from(left.subsec_nanos() > 0);
    secs.max(1)
}

fn record_event(event: &'static str) {
    metrics::counter!(LOGIN_GUARD_EVENTS, "event" => event).increment(1);
}
