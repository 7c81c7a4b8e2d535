use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Redis,
    Memory,
}

impl std::str::FromStr for StoreBackend {
    type Err = config::ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => Err(config::ConfigError::Message(format!(
                "Unknown store.backend '{}', expected 'redis' or 'memory'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub store_backend: StoreBackend,
    pub mongo_uri: String,
    pub redis_uri: String,
    pub mongo_database: String,
    pub jwt_secret: String,
    pub drift_threshold_seconds: u64,
    pub max_arbiter_retries: usize,
    pub tick_interval_ms: u64,
    pub bind_addr: String,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Root .env first (two levels up), then the local one
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        // Determine environment (defaults to dev)
        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/*.toml + ENV overrides (prefix: APP__)
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let store_backend = settings
            .get_string("store.backend")
            .or_else(|_| env::var("STORE_BACKEND"))
            .unwrap_or_else(|_| "redis".to_string())
            .parse::<StoreBackend>()?;

        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .unwrap_or_else(|_| "mongodb://localhost:27017".to_string());

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
            .unwrap_or_else(|_| "assessments".to_string());

        let jwt_secret = match settings
            .get_string("auth.jwt_secret")
            .or_else(|_| env::var("JWT_SECRET"))
        {
            Ok(secret) => secret,
            Err(_) if env == "prod" => {
                return Err(config::ConfigError::Message(
                    "JWT_SECRET must be set in production".to_string(),
                ));
            }
            Err(_) => {
                eprintln!("WARNING: Using default JWT_SECRET (dev mode only!)");
                "dev-secret-only-for-local-testing".to_string()
            }
        };

        let drift_threshold_seconds = read_u64(&settings, "engine.drift_threshold_seconds", 2)?;
        let max_arbiter_retries = read_u64(&settings, "engine.max_arbiter_retries", 5)? as usize;
        let tick_interval_ms = read_u64(&settings, "stream.tick_interval_ms", 1000)?;

        let bind_addr = settings
            .get_string("server.bind_addr")
            .or_else(|_| env::var("BIND_ADDR"))
            .unwrap_or_else(|_| "0.0.0.0:8081".to_string());

        Ok(Config {
            store_backend,
            mongo_uri,
            redis_uri,
            mongo_database,
            jwt_secret,
            drift_threshold_seconds,
            max_arbiter_retries,
            tick_interval_ms,
            bind_addr,
        })
    }

    /// In-memory store with default engine settings; no network backends.
    pub fn for_memory_backend(jwt_secret: &str) -> Self {
        Config {
            store_backend: StoreBackend::Memory,
            mongo_uri: "mongodb://localhost:27017".to_string(),
            redis_uri: "redis://127.0.0.1:6379/0".to_string(),
            mongo_database: "assessments".to_string(),
            jwt_secret: jwt_secret.to_string(),
            drift_threshold_seconds: 2,
            max_arbiter_retries: 5,
            tick_interval_ms: 1000,
            bind_addr: "127.0.0.1:0".to_string(),
        }
    }
}

fn read_u64(settings: &config::Config, key: &str, default: u64) -> Result<u64, config::ConfigError> {
    match settings.get_int(key) {
        Ok(value) if value >= 0 => Ok(value as u64),
        Ok(value) => Err(config::ConfigError::Message(format!(
            "{} must not be negative (got {})",
            key, value
        ))),
        Err(config::ConfigError::NotFound(_)) => Ok(default),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_store_backend_parsing() {
        assert_eq!("redis".parse::<StoreBackend>().unwrap(), StoreBackend::Redis);
        assert_eq!(" Memory ".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert!("postgres".parse::<StoreBackend>().is_err());
    }

    #[test]
    #[serial]
    fn test_load_reads_env_overrides() {
        env::set_var("SKIP_ROOT_ENV", "1");
        env::set_var("APP__STORE__BACKEND", "memory");
        env::set_var("APP__ENGINE__DRIFT_THRESHOLD_SECONDS", "4");
        env::set_var("APP__SERVER__BIND_ADDR", "127.0.0.1:9000");

        let config = Config::load().unwrap();

        env::remove_var("APP__STORE__BACKEND");
        env::remove_var("APP__ENGINE__DRIFT_THRESHOLD_SECONDS");
        env::remove_var("APP__SERVER__BIND_ADDR");
        env::remove_var("SKIP_ROOT_ENV");

        assert_eq!(config.store_backend, StoreBackend::Memory);
        assert_eq!(config.drift_threshold_seconds, 4);
        assert_eq!(config.max_arbiter_retries, 5);
        assert_eq!(config.tick_interval_ms, 1000);
        assert_eq!(config.bind_addr, "127.0.0.1:9000");
    }
}
