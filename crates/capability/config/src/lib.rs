//! 网关运行配置加载。
//!
//! 所有键均带 `EMS_` 前缀，缺省时使用内置默认值。

use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://data/gateway.db?mode=rwc";

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 网关运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub collect_interval_ms: u64,
    pub history_retention_days: u32,
    pub max_concurrent_devices: usize,
    pub shutdown_timeout_ms: u64,
    pub default_device_timeout_ms: u64,
    pub event_channel_capacity: usize,
    pub connect_on_startup: bool,
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// 从任意键值来源读取配置（`None` 表示未设置）。
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = read_optional(&lookup, "EMS_DATABASE_URL")
            .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());
        let collect_interval_ms =
            read_positive_with_default(&lookup, "EMS_COLLECT_INTERVAL_MS", 5000)?;
        let history_retention_days =
            read_with_default(&lookup, "EMS_HISTORY_RETENTION_DAYS", 90u32)?;
        let max_concurrent_devices =
            read_positive_with_default(&lookup, "EMS_MAX_CONCURRENT_DEVICES", 16)?;
        let shutdown_timeout_ms =
            read_with_default(&lookup, "EMS_SHUTDOWN_TIMEOUT_MS", 10_000u64)?;
        let default_device_timeout_ms =
            read_positive_with_default(&lookup, "EMS_DEFAULT_DEVICE_TIMEOUT_MS", 3000)?;
        let event_channel_capacity =
            read_positive_with_default(&lookup, "EMS_EVENT_CHANNEL_CAPACITY", 1024)?;
        let connect_on_startup = read_bool_with_default(&lookup, "EMS_CONNECT_ON_STARTUP", true);

        Ok(Self {
            database_url,
            collect_interval_ms,
            history_retention_days,
            max_concurrent_devices,
            shutdown_timeout_ms,
            default_device_timeout_ms,
            event_channel_capacity,
            connect_on_startup,
        })
    }

    pub fn collect_interval(&self) -> Duration {
        Duration::from_millis(self.collect_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn default_device_timeout(&self) -> Duration {
        Duration::from_millis(self.default_device_timeout_ms)
    }

    /// SQLite 文件路径；内存库返回 `None`。
    pub fn database_file(&self) -> Option<PathBuf> {
        let rest = self
            .database_url
            .strip_prefix("sqlite://")
            .or_else(|| self.database_url.strip_prefix("sqlite:"))?;
        let path = rest.split('?').next().unwrap_or_default();
        if path.is_empty() || path.contains(":memory:") {
            return None;
        }
        Some(PathBuf::from(path))
    }
}

fn read_optional<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).filter(|value| !value.trim().is_empty())
}

fn read_with_default<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let Some(value) = read_optional(lookup, key) else {
        return Ok(default);
    };
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

/// 读取必须大于 0 的数值。
fn read_positive_with_default<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + PartialOrd + Default,
{
    let value = read_with_default(lookup, key, default)?;
    if value <= T::default() {
        return Err(ConfigError::Invalid(key.to_string(), "must be > 0".to_string()));
    }
    Ok(value)
}

fn read_bool_with_default<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    match read_optional(lookup, key) {
        Some(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "on"),
        None => default,
    }
}
