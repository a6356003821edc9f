//! civic-config - 配置加载库
//!
//! 加载顺序：`default.toml` → `{APP_ENV}.toml` → `CIVIC_` 前缀的环境变量
//! （嵌套字段用 `__` 分隔，例如 `CIVIC_REDIS__URL`）

use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use thiserror::Error;

use secrecy::Secret;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Load(Box::new(err))
    }
}

/// 服务器配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// 转发给上游的请求体大小上限
    pub body_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            body_limit_bytes: 2 * 1024 * 1024,
        }
    }
}

/// Redis 配置（共享计数存储）
///
/// 整个段缺失表示分布式限流未配置，限流器放行所有请求。
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: Secret<String>,
    /// 访问凭证，存在时作为连接密码
    #[serde(default)]
    pub token: Option<Secret<String>>,
    /// 单次计数调用的超时（毫秒）
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_redis_timeout_ms() -> u64 {
    500
}

/// 单个等级的配额
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TierSettings {
    pub capacity: u64,
    pub window_secs: u64,
}

/// 分级限流配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Redis 键前缀
    pub key_prefix: String,
    pub general: TierSettings,
    pub search: TierSettings,
    pub export: TierSettings,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            key_prefix: "ratelimit".to_string(),
            general: TierSettings {
                capacity: 60,
                window_secs: 60,
            },
            search: TierSettings {
                capacity: 30,
                window_secs: 60,
            },
            export: TierSettings {
                capacity: 5,
                window_secs: 60,
            },
        }
    }
}

/// 登录防爆破配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoginGuardSettings {
    pub sweep_interval_secs: u64,
}

impl Default for LoginGuardSettings {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 600,
        }
    }
}

/// 管理后台配置
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub password: Option<Secret<String>>,
}

/// 上游站点配置
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    pub url: String,
    #[serde(default = "default_upstream_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_upstream_timeout_secs() -> u64 {
    30
}

/// 遥测配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
    /// 生产环境输出 JSON 日志
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app_name: String,
    pub app_env: String,
    pub server: ServerConfig,
    pub redis: Option<RedisConfig>,
    pub rate_limit: RateLimitSettings,
    pub login_guard: LoginGuardSettings,
    pub admin: AdminConfig,
    pub upstream: Option<UpstreamConfig>,
    pub telemetry: TelemetryConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_name: "civic-gateway".to_string(),
            app_env: "development".to_string(),
            server: ServerConfig::default(),
            redis: None,
            rate_limit: RateLimitSettings::default(),
            login_guard: LoginGuardSettings::default(),
            admin: AdminConfig::default(),
            upstream: None,
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    pub fn load(config_dir: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let figment = Figment::new()
            .merge(Toml::file(format!("{}/default.toml", config_dir)))
            .merge(Toml::file(format!("{}/{}.toml", config_dir, env)))
            .merge(Env::prefixed("CIVIC_").split("__"));

        Self::from_figment(figment)
    }

    /// 从已组装的 Figment 中提取并校验配置
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let tiers = [
            ("general", &self.rate_limit.general),
            ("search", &self.rate_limit.search),
            ("export", &self.rate_limit.export),
        ];
        for (name, tier) in tiers {
            if tier.capacity == 0 || tier.window_secs == 0 {
                return Err(ConfigError::Invalid(format!(
                    "rate_limit.{name}: capacity and window_secs must be greater than zero"
                )));
            }
        }

        if self.login_guard.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "login_guard.sweep_interval_secs must be greater than zero".to_string(),
            ));
        }

        if self.redis.as_ref().is_some_and(|r| r.timeout_ms == 0) {
            return Err(ConfigError::Invalid(
                "redis.timeout_ms must be greater than zero".to_string(),
            ));
        }

        if self.rate_limit.key_prefix.is_empty() {
            return Err(ConfigError::Invalid(
                "rate_limit.key_prefix must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }
}

#[cfg(test)]
mod tests;
