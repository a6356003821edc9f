use crate::{AppConfig, ConfigError, RedisConfig};
use figment::{
    Figment, Jail,
    providers::{Format, Toml},
};
use secrecy::{ExposeSecret, Secret};

#[test]
fn test_secret_redaction() {
    let secret = Secret::new("my_secret_password".to_string());
    let debug_output = format!("{:?}", secret);
    assert!(debug_output.contains("Secret([REDACTED"));
    assert!(!debug_output.contains("my_secret_password"));
}

#[test]
fn test_config_struct_redaction() {
    let config = RedisConfig {
        url: Secret::new("redis://:hunter2@localhost:6379".to_string()),
        token: Some(Secret::new("hunter2".to_string())),
        timeout_ms: 500,
    };
    let debug_output = format!("{:?}", config);
    assert!(!debug_output.contains("hunter2"));
    assert!(debug_output.contains("Secret([REDACTED"));
}

#[test]
fn test_empty_config_uses_defaults() {
    let config = AppConfig::from_figment(Figment::new()).unwrap();

    assert!(config.redis.is_none());
    assert!(config.upstream.is_none());
    assert!(config.admin.password.is_none());
    assert_eq!(config.server.port, 8080);
    assert_eq!(config.rate_limit.key_prefix, "ratelimit");
    assert_eq!(config.rate_limit.general.capacity, 60);
    assert_eq!(config.rate_limit.search.capacity, 30);
    assert_eq!(config.rate_limit.export.capacity, 5);
    assert_eq!(config.rate_limit.export.window_secs, 60);
    assert_eq!(config.login_guard.sweep_interval_secs, 600);
}

#[test]
fn test_toml_overrides() {
    let figment = Figment::new().merge(Toml::string(
        r#"
        app_env = "production"

        [redis]
        url = "redis://cache.internal:6379"
        timeout_ms = 250

        [rate_limit.search]
        capacity = 10
        window_secs = 30
        "#,
    ));

    let config = AppConfig::from_figment(figment).unwrap();
    assert!(config.is_production());

    let redis = config.redis.unwrap();
    assert_eq!(redis.url.expose_secret(), "redis://cache.internal:6379");
    assert!(redis.token.is_none());
    assert_eq!(redis.timeout_ms, 250);

    assert_eq!(config.rate_limit.search.capacity, 10);
    assert_eq!(config.rate_limit.search.window_secs, 30);
    // 未覆盖的等级保持默认值
    assert_eq!(config.rate_limit.export.capacity, 5);
}

#[test]
fn test_zero_capacity_rejected() {
    let figment = Figment::new().merge(Toml::string(
        r#"
        [rate_limit.export]
        capacity = 0
        window_secs = 60
        "#,
    ));

    let err = AppConfig::from_figment(figment).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("rate_limit.export")));
}

#[test]
fn test_zero_redis_timeout_rejected() {
    let figment = Figment::new().merge(Toml::string(
        r#"
        [redis]
        url = "redis://127.0.0.1:6379"
        timeout_ms = 0
        "#,
    ));

    let err = AppConfig::from_figment(figment).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("redis.timeout_ms")));
}

#[test]
fn test_env_overrides_file() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "default.toml",
            r#"
            [server]
            port = 3000

            [upstream]
            url = "http://localhost:3001"
            "#,
        )?;
        jail.set_env("APP_ENV", "test");
        jail.set_env("CIVIC_SERVER__PORT", "9090");
        jail.set_env("CIVIC_REDIS__URL", "redis://127.0.0.1:6379");
        jail.set_env("CIVIC_REDIS__TOKEN", "s3cret");

        let config = AppConfig::load(".").map_err(|e| e.to_string())?;

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.upstream.unwrap().url, "http://localhost:3001");
        let redis = config.redis.unwrap();
        assert_eq!(redis.url.expose_secret(), "redis://127.0.0.1:6379");
        assert_eq!(redis.token.unwrap().expose_secret(), "s3cret");
        Ok(())
    });
}
