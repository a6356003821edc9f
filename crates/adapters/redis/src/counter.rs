//! 基于 Redis 的共享窗口计数

use std::time::Duration;

use async_trait::async_trait;
use civic_errors::{AppError, AppResult};
use civic_ports::{CounterStore, WindowCount};
use redis::Script;
use redis::aio::ConnectionManager;
use tracing::debug;

use crate::connection::check_connection;

/// Lua 脚本：固定窗口计数
///
/// # 参数
/// - KEYS[1]: 计数键
/// - ARGV[1]: 窗口大小（毫秒）
///
/// # 返回值
/// - array[0]: 递增后的计数
/// - array[1]: 键剩余存活时间（毫秒）
///
/// 键没有过期时间时（例如 EXPIRE 之前进程崩溃）重新设置，避免计数永不重置。
static FIXED_WINDOW_SCRIPT: &str = r#"
local current = redis.call('INCR', KEYS[1])
local ttl = redis.call('PTTL', KEYS[1])

if current == 1 or ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end

return {current, ttl}
"#;

/// Redis 共享计数存储
#[derive(Clone)]
pub struct RedisCounterStore {
    conn: ConnectionManager,
    script: Script,
}

impl RedisCounterStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            script: Script::new(FIXED_WINDOW_SCRIPT),
        }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn incr_window(&self, key: &str, window: Duration) -> AppResult<WindowCount> {
        let mut conn = self.conn.clone();
        let window_ms = window.as_millis().max(1) as u64;

        let values: Vec<i64> = self
            .script
            .key(key)
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| AppError::external_service(format!("Rate limit script failed: {}", e)))?;

        let [count, ttl_ms] = values[..] else {
            return Err(AppError::external_service(format!(
                "Unexpected script result length: {}",
                values.len()
            )));
        };

        debug!(key, count, ttl_ms, "Counter incremented");

        Ok(WindowCount {
            count: count.max(0) as u64,
            reset_after: Duration::from_millis(ttl_ms.max(0) as u64),
        })
    }

    async fn ping(&self) -> AppResult<()> {
        let mut conn = self.conn.clone();
        check_connection(&mut conn).await
    }
}
