use std::str::FromStr;
use std::time::Duration;

use crate::notification::dispatcher::DispatchSettings;

const DEFAULT_PORT: u16 = 9500;
const DEFAULT_VAPID_SUBJECT: &str = "mailto:admin@localhost";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Process configuration read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub redis_url: Option<String>,
    pub port: u16,
    pub db_max_connections: u32,
    pub vapid_subject: String,
    pub push_timeout: Duration,
    pub push_concurrency: usize,
    pub push_ttl_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        Ok(Self {
            database_url,
            redis_url: lookup("REDIS_URL").filter(|v| !v.trim().is_empty()),
            port: parse_or(&lookup, "PORT", DEFAULT_PORT)?,
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 5)?,
            vapid_subject: lookup("VAPID_SUBJECT")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_VAPID_SUBJECT.to_string()),
            push_timeout: Duration::from_secs(parse_or(&lookup, "PUSH_TIMEOUT_SECS", 5)?),
            push_concurrency: parse_or(&lookup, "PUSH_CONCURRENCY", 16)?,
            push_ttl_secs: parse_or(&lookup, "PUSH_TTL_SECS", 3600)?,
        })
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            push_timeout: self.push_timeout,
            push_concurrency: self.push_concurrency,
        }
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        Some(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[("DATABASE_URL", "postgres://localhost/app")]).unwrap();
        assert_eq!(config.port, 9500);
        assert_eq!(config.db_max_connections, 5);
        assert_eq!(config.vapid_subject, "mailto:admin@localhost");
        assert_eq!(config.push_timeout, Duration::from_secs(5));
        assert_eq!(config.push_concurrency, 16);
        assert_eq!(config.push_ttl_secs, 3600);
        assert!(config.redis_url.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("DATABASE_URL", "postgres://localhost/app"),
            ("REDIS_URL", "redis://localhost"),
            ("PORT", "8080"),
            ("PUSH_TIMEOUT_SECS", "2"),
        ])
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.redis_url.as_deref(), Some("redis://localhost"));
        assert_eq!(config.dispatch_settings().push_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            config(&[]),
            Err(ConfigError::Missing("DATABASE_URL"))
        ));
        assert!(matches!(
            config(&[("DATABASE_URL", "postgres://x"), ("PORT", "ninety")]),
            Err(ConfigError::Invalid { name: "PORT", .. })
        ));
    }
}
