use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mongo_uri: String,
    pub redis_uri: String,
    pub mongo_database: String,
    /// Fixed offset from UTC, in minutes, that defines the ledger's calendar day.
    pub ledger_utc_offset_minutes: i32,
    pub max_conflict_retries: usize,
    pub operation_timeout_ms: u64,
    pub catalog_cache_ttl_seconds: u64,
    pub lock_ttl_ms: u64,
    /// JSON array of achievement definitions for `seed-achievements`.
    pub catalog_seed_file: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mongo_uri: "mongodb://localhost:27017".to_string(),
            redis_uri: "redis://127.0.0.1:6379/0".to_string(),
            mongo_database: "progression".to_string(),
            ledger_utc_offset_minutes: 0,
            max_conflict_retries: 5,
            operation_timeout_ms: 5_000,
            catalog_cache_ttl_seconds: 300,
            lock_ttl_ms: 10_000,
            catalog_seed_file: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Root .env first, then the local one
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/{env}.toml, then APP__SECTION__KEY overrides
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let defaults = Config::default();

        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .unwrap_or_else(|_| {
                match (env::var("MONGO_USER"), env::var("MONGO_PASSWORD")) {
                    (Ok(user), Ok(password)) => {
                        tracing::warn!("Building MongoDB URI from MONGO_USER/MONGO_PASSWORD env vars");
                        format!(
                            "mongodb://{}:{}@localhost:27017/?authSource=admin",
                            user, password
                        )
                    }
                    _ => defaults.mongo_uri.clone(),
                }
            });

        let redis_uri = settings
            .get_string("redis.uri")
            .or_else(|_| env::var("REDIS_URI"))
            .unwrap_or_else(|_| {
                let host = env::var("REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
                let port = env::var("REDIS_PORT").unwrap_or_else(|_| "6379".to_string());
                match env::var("REDIS_PASSWORD") {
                    Ok(password) => format!("redis://:{}@{}:{}/0", password, host, port),
                    Err(_) => format!("redis://{}:{}/0", host, port),
                }
            });

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or(defaults.mongo_database);

        let ledger_utc_offset_minutes = match settings.get_int("ledger.utc_offset_minutes") {
            Ok(minutes) => i32::try_from(minutes)
                .ok()
                .filter(|m| m.abs() < 24 * 60)
                .ok_or_else(|| {
                    config::ConfigError::Message(format!(
                        "ledger.utc_offset_minutes {} is outside (-1440, 1440)",
                        minutes
                    ))
                })?,
            Err(_) => defaults.ledger_utc_offset_minutes,
        };

        let max_conflict_retries = settings
            .get_int("engine.max_conflict_retries")
            .map(|v| v.max(1) as usize)
            .unwrap_or(defaults.max_conflict_retries);

        let operation_timeout_ms = settings
            .get_int("engine.operation_timeout_ms")
            .map(|v| v.max(1) as u64)
            .unwrap_or(defaults.operation_timeout_ms);

        let catalog_cache_ttl_seconds = settings
            .get_int("engine.catalog_cache_ttl_seconds")
            .map(|v| v.max(0) as u64)
            .unwrap_or(defaults.catalog_cache_ttl_seconds);

        let lock_ttl_ms = settings
            .get_int("redis.lock_ttl_ms")
            .map(|v| v.max(1) as u64)
            .unwrap_or(defaults.lock_ttl_ms);

        let catalog_seed_file = settings
            .get_string("catalog.seed_file")
            .or_else(|_| env::var("ACHIEVEMENT_CATALOG_FILE"))
            .ok()
            .filter(|path| !path.is_empty());

        Ok(Config {
            mongo_uri,
            redis_uri,
            mongo_database,
            ledger_utc_offset_minutes,
            max_conflict_retries,
            operation_timeout_ms,
            catalog_cache_ttl_seconds,
            lock_ttl_ms,
            catalog_seed_file,
        })
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn catalog_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.catalog_cache_ttl_seconds)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "APP__LEDGER__UTC_OFFSET_MINUTES",
        "APP__ENGINE__MAX_CONFLICT_RETRIES",
        "APP__ENGINE__OPERATION_TIMEOUT_MS",
        "APP__DATABASE__MONGO_DATABASE",
        "ACHIEVEMENT_CATALOG_FILE",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
        env::set_var("SKIP_ROOT_ENV", "1");
        env::set_var("APP_ENV", "test-missing");
    }

    #[test]
    #[serial]
    fn defaults_apply_without_sources() {
        clear_env();
        let config = Config::load().unwrap();
        assert_eq!(config.ledger_utc_offset_minutes, 0);
        assert_eq!(config.max_conflict_retries, 5);
        assert_eq!(config.operation_timeout(), Duration::from_secs(5));
    }

    #[test]
    #[serial]
    fn env_overrides_are_applied() {
        clear_env();
        env::set_var("APP__LEDGER__UTC_OFFSET_MINUTES", "180");
        env::set_var("APP__ENGINE__MAX_CONFLICT_RETRIES", "2");
        env::set_var("APP__DATABASE__MONGO_DATABASE", "progression_test");
        env::set_var("ACHIEVEMENT_CATALOG_FILE", "catalog.json");

        let config = Config::load().unwrap();
        clear_env();

        assert_eq!(config.ledger_utc_offset_minutes, 180);
        assert_eq!(config.max_conflict_retries, 2);
        assert_eq!(config.mongo_database, "progression_test");
        assert_eq!(config.catalog_seed_file.as_deref(), Some("catalog.json"));
    }

    #[test]
    #[serial]
    fn out_of_range_offset_is_rejected() {
        clear_env();
        env::set_var("APP__LEDGER__UTC_OFFSET_MINUTES", "1500");
        let result = Config::load();
        clear_env();
        assert!(result.is_err());
    }
}
