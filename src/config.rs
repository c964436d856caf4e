use std::time::Duration;

use anyhow::{bail, Context};

use crate::repository::retry::RetryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    Postgres,
    /// Process-local store; data is lost on restart.
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub storage: StorageKind,
    pub database_url: Option<String>,
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub max_connections: u32,
    pub retry: RetryConfig,
    pub cors_allowed_origins: Vec<String>,
    pub request_timeout: Duration,
    pub default_min_stock_level: i64,
    pub attention_days: i64,
    pub conflict_retries: u32,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let storage = match var("STORAGE", "postgres").to_ascii_lowercase().as_str() {
            "postgres" => StorageKind::Postgres,
            "memory" => StorageKind::Memory,
            other => bail!("STORAGE must be 'postgres' or 'memory', got '{}'", other),
        };

        let database_url = lookup("DATABASE_URL");
        if storage == StorageKind::Postgres && database_url.is_none() {
            bail!("DATABASE_URL must be set when STORAGE=postgres");
        }

        let retry = RetryConfig::new(
            var("DB_RETRY_ATTEMPTS", "3")
                .parse()
                .context("DB_RETRY_ATTEMPTS must be a valid number")?,
            Duration::from_millis(
                var("DB_RETRY_INITIAL_DELAY_MS", "100")
                    .parse()
                    .context("DB_RETRY_INITIAL_DELAY_MS must be a valid number")?,
            ),
            Duration::from_millis(
                var("DB_RETRY_MAX_DELAY_MS", "2000")
                    .parse()
                    .context("DB_RETRY_MAX_DELAY_MS must be a valid number")?,
            ),
        );

        let cors_allowed_origins = lookup("CORS_ALLOWED_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let default_min_stock_level: i64 = var("DEFAULT_MIN_STOCK_LEVEL", "5")
            .parse()
            .context("DEFAULT_MIN_STOCK_LEVEL must be a valid number")?;
        if default_min_stock_level < 0 {
            bail!("DEFAULT_MIN_STOCK_LEVEL must be >= 0");
        }

        Ok(Self {
            storage,
            database_url,
            host: var("HOST", "127.0.0.1"),
            port: var("PORT", "3000")
                .parse()
                .context("PORT must be a valid number")?,
            environment: var("APP_ENV", "development"),
            max_connections: var("DB_MAX_CONNECTIONS", "10")
                .parse()
                .context("DB_MAX_CONNECTIONS must be a valid number")?,
            retry,
            cors_allowed_origins,
            request_timeout: Duration::from_secs(
                var("REQUEST_TIMEOUT_SECS", "30")
                    .parse()
                    .context("REQUEST_TIMEOUT_SECS must be a valid number")?,
            ),
            default_min_stock_level,
            attention_days: var("ATTENTION_DAYS", "30")
                .parse()
                .context("ATTENTION_DAYS must be a valid number")?,
            conflict_retries: var("CONFLICT_RETRIES", "5")
                .parse()
                .context("CONFLICT_RETRIES must be a valid number")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn memory_storage_needs_no_database_url() {
        let config = Config::from_lookup(lookup(&[("STORAGE", "memory")])).unwrap();
        assert_eq!(config.storage, StorageKind::Memory);
        assert_eq!(config.port, 3000);
        assert_eq!(config.default_min_stock_level, 5);
        assert_eq!(config.attention_days, 30);
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.cors_allowed_origins.is_empty());
    }

    #[test]
    fn postgres_without_url_is_fatal() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn cors_origins_are_split_and_trimmed() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/inventory"),
            ("CORS_ALLOWED_ORIGINS", "http://localhost:3001, https://erp.example.it ,"),
        ]))
        .unwrap();
        assert_eq!(
            config.cors_allowed_origins,
            vec!["http://localhost:3001", "https://erp.example.it"]
        );
    }

    #[test]
    fn bad_port_is_rejected() {
        let err = Config::from_lookup(lookup(&[("STORAGE", "memory"), ("PORT", "eighty")]))
            .unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn unknown_storage_is_rejected() {
        assert!(Config::from_lookup(lookup(&[("STORAGE", "sqlite")])).is_err());
    }
}
