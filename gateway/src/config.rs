//! Gateway 配置

use civic_config::{AppConfig, ConfigError};

/// 配置目录，可由 `CIVIC_CONFIG_DIR` 覆盖
const DEFAULT_CONFIG_DIR: &str = "config";

pub fn load() -> Result<AppConfig, ConfigError> {
    let dir = std::env::var("CIVIC_CONFIG_DIR").unwrap_or_else(|_| DEFAULT_CONFIG_DIR.to_string());
    AppConfig::load(&dir)
}
