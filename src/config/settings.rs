use std::env;
use std::str::FromStr;
use std::time::Duration;

use chrono::TimeDelta;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub store: StoreSettings,
    pub redis_uri: Option<String>,
    pub cache_ttl_secs: u64,
    pub cache_timeout: Duration,
    pub retention_days: i64,
    pub retention: TimeDelta,
    pub sweep_interval: Option<Duration>,
    pub llm: LlmSettings,
    pub auth_tokens: String,
}

/// Durable store location and pool sizing.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub url: String,
    /// Size of the read-only pool. Writes always go through one connection.
    pub read_connections: u32,
    pub busy_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub default_model: String,
    pub system_prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

pub const DEFAULT_CACHE_TTL_SECS: u64 = 60 * 60 * 2;
pub const DEFAULT_RETENTION_DAYS: i64 = 30;
pub const DEFAULT_READ_CONNECTIONS: u32 = 8;

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let sweep_secs: u64 = parse_or("SWEEP_INTERVAL_SECS", 3600)?;
        let retention_days: i64 = parse_or("SESSION_RETENTION_DAYS", DEFAULT_RETENTION_DAYS)?;

        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_or("PORT", 8000)?,
            store: StoreSettings::from_env()?,
            redis_uri: non_empty("REDIS_URI"),
            cache_ttl_secs: parse_or("SESSION_CACHE_TTL_SECS", DEFAULT_CACHE_TTL_SECS)?,
            cache_timeout: Duration::from_millis(parse_or("CACHE_TIMEOUT_MS", 500)?),
            retention: retention_window("SESSION_RETENTION_DAYS", retention_days)?,
            retention_days,
            sweep_interval: (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs)),
            llm: LlmSettings::from_env()?,
            auth_tokens: env::var("AUTH_TOKENS").unwrap_or_default(),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl StoreSettings {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            read_connections: DEFAULT_READ_CONNECTIONS,
            busy_timeout: Duration::from_secs(5),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let read_connections: u32 = parse_or("DB_READ_CONNECTIONS", DEFAULT_READ_CONNECTIONS)?;
        if read_connections == 0 {
            return Err(ConfigError::Invalid {
                key: "DB_READ_CONNECTIONS",
                value: read_connections.to_string(),
            });
        }

        Ok(Self {
            url: env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://chatline.db".to_string()),
            read_connections,
            busy_timeout: Duration::from_millis(parse_or("DB_BUSY_TIMEOUT_MS", 5000)?),
        })
    }
}

impl LlmSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "https://openrouter.ai/api/v1".to_string()),
            api_key: non_empty("LLM_API_KEY"),
            default_model: env::var("DEFAULT_MODEL")
                .unwrap_or_else(|_| "xiaomi/mimo-v2-flash:free".to_string()),
            system_prompt: env::var("SYSTEM_PROMPT").unwrap_or_else(|_| {
                "You are a helpful assistant. Provide concise, helpful responses.".to_string()
            }),
            max_tokens: parse_or("LLM_MAX_TOKENS", 1000)?,
            temperature: parse_or("LLM_TEMPERATURE", 0.7)?,
        })
    }
}

/// Idle window after which sessions are swept. Negative or out-of-range day
/// counts are configuration errors.
fn retention_window(key: &'static str, days: i64) -> Result<TimeDelta, ConfigError> {
    TimeDelta::try_days(days)
        .filter(|window| *window >= TimeDelta::zero())
        .ok_or_else(|| ConfigError::Invalid {
            key,
            value: days.to_string(),
        })
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_or_falls_back_when_unset() {
        let value: u64 = parse_or("CHATLINE_TEST_UNSET_KEY", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_parse_or_rejects_garbage() {
        env::set_var("CHATLINE_TEST_BAD_PORT", "eighty");
        let result: Result<u16, _> = parse_or("CHATLINE_TEST_BAD_PORT", 8000);
        assert!(matches!(
            result,
            Err(ConfigError::Invalid { key: "CHATLINE_TEST_BAD_PORT", .. })
        ));
    }

    #[test]
    fn test_parse_or_reads_value() {
        env::set_var("CHATLINE_TEST_TTL", " 120 ");
        let value: u64 = parse_or("CHATLINE_TEST_TTL", 7200).unwrap();
        assert_eq!(value, 120);
    }

    #[test]
    fn test_retention_window() {
        assert_eq!(
            retention_window("SESSION_RETENTION_DAYS", 30).unwrap(),
            TimeDelta::days(30)
        );
        assert_eq!(
            retention_window("SESSION_RETENTION_DAYS", 0).unwrap(),
            TimeDelta::zero()
        );
    }

    #[test]
    fn test_retention_window_rejects_negative_and_huge() {
        assert!(matches!(
            retention_window("SESSION_RETENTION_DAYS", -1),
            Err(ConfigError::Invalid { key: "SESSION_RETENTION_DAYS", .. })
        ));
        assert!(retention_window("SESSION_RETENTION_DAYS", i64::MAX).is_err());
    }

    #[test]
    fn test_store_settings_defaults() {
        let store = StoreSettings::new("sqlite://x.db");
        assert_eq!(store.read_connections, DEFAULT_READ_CONNECTIONS);
        assert_eq!(store.busy_timeout, Duration::from_secs(5));
    }
}
