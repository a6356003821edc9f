//! Redis 连接管理

use civic_errors::{AppError, AppResult};
use redis::aio::ConnectionManager;
use redis::{Client, IntoConnectionInfo};

/// 创建 Redis 连接管理器
///
/// `token` 存在时覆盖 URL 中的密码。
pub async fn create_connection_manager(
    url: &str,
    token: Option<&str>,
) -> AppResult<ConnectionManager> {
    let mut info = url
        .into_connection_info()
        .map_err(|e| AppError::config(format!("Invalid Redis URL: {}", e)))?;

    if let Some(token) = token {
        info.redis.password = Some(token.to_string());
    }

    let client = Client::open(info)
        .map_err(|e| AppError::external_service(format!("Failed to create Redis client: {}", e)))?;

    ConnectionManager::new(client).await.map_err(|e| {
        AppError::external_service(format!("Failed to create Redis connection manager: {}", e))
    })
}

/// 检查 Redis 连接
pub async fn check_connection(conn: &mut ConnectionManager) -> AppResult<()> {
    redis::cmd("PING")
        .query_async::<String>(conn)
        .await
        .map_err(|e| AppError::external_service(format!("Redis health check failed: {}", e)))?;
    Ok(())
}
