use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageBackend,
    pub ephemeral: EphemeralBackend,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub minio: MinioConfig,
    pub chat: ChatConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
}

/// Where conversations and messages live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Postgres,
}

/// Where typing indicators and presence records live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EphemeralBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub ssl_mode: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: i64,
}

#[derive(Debug, Clone)]
pub struct MinioConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    pub attachments_bucket: String,
    pub public_url: Option<String>,
}

/// Timing and paging knobs of the conversation engine.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Client-side debounce before an automatic "stopped typing".
    pub typing_debounce: Duration,
    /// Absolute expiry stamped on every stored typing record.
    pub typing_expiry: Duration,
    pub heartbeat_interval: Duration,
    pub presence_ttl: Duration,
    /// Zero disables the expired-record sweep.
    pub ephemeral_sweep: Duration,
    pub default_page_size: usize,
    pub max_page_size: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            typing_debounce: Duration::from_secs(3),
            typing_expiry: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            presence_ttl: Duration::from_secs(60),
            ephemeral_sweep: Duration::ZERO,
            default_page_size: 50,
            max_page_size: 200,
        }
    }
}

impl ChatConfig {
    pub fn validate(&self) -> AppResult<()> {
        if self.presence_ttl < self.heartbeat_interval * 2 {
            return Err(AppError::validation(format!(
                "presence TTL {:?} must be at least twice the heartbeat interval {:?}",
                self.presence_ttl, self.heartbeat_interval
            )));
        }
        if self.typing_expiry <= self.typing_debounce {
            return Err(AppError::validation(format!(
                "typing expiry {:?} must exceed the typing debounce {:?}",
                self.typing_expiry, self.typing_debounce
            )));
        }
        if self.default_page_size == 0 || self.max_page_size == 0 {
            return Err(AppError::validation("page sizes must be non-zero"));
        }
        Ok(())
    }
}

fn parsed<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn load() -> Self {
        dotenvy::dotenv().ok();

        let defaults = ChatConfig::default();

        Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parsed("SERVER_PORT", 8080),
                environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            },
            storage: match env::var("STORAGE_BACKEND").as_deref() {
                Ok("postgres") => StorageBackend::Postgres,
                _ => StorageBackend::Memory,
            },
            ephemeral: match env::var("EPHEMERAL_BACKEND").as_deref() {
                Ok("redis") => EphemeralBackend::Redis,
                _ => EphemeralBackend::Memory,
            },
            database: DatabaseConfig {
                host: env::var("DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
                port: parsed("DB_PORT", 5432),
                user: env::var("DB_USER").unwrap_or_else(|_| "postgres".to_string()),
                password: env::var("DB_PASSWORD").unwrap_or_else(|_| "postgres".to_string()),
                database: env::var("DB_NAME").unwrap_or_else(|_| "storefront_chat".to_string()),
                ssl_mode: env::var("DB_SSL_MODE").unwrap_or_else(|_| "disable".to_string()),
                max_connections: parsed("DB_MAX_CONNS", 25),
            },
            redis: RedisConfig {
                host: env::var("REDIS_HOST").unwrap_or_else(|_| "localhost".to_string()),
                port: parsed("REDIS_PORT", 6379),
                password: env::var("REDIS_PASSWORD").ok(),
                db: parsed("REDIS_DB", 0),
            },
            minio: MinioConfig {
                enabled: parsed("ATTACHMENTS_ENABLED", false),
                endpoint: env::var("MINIO_ENDPOINT")
                    .unwrap_or_else(|_| "http://localhost:9000".to_string()),
                access_key: env::var("MINIO_ACCESS_KEY")
                    .unwrap_or_else(|_| "minioadmin".to_string()),
                secret_key: env::var("MINIO_SECRET_KEY")
                    .unwrap_or_else(|_| "minioadmin".to_string()),
                region: env::var("MINIO_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
                attachments_bucket: env::var("MINIO_BUCKET")
                    .unwrap_or_else(|_| "chat-attachments".to_string()),
                public_url: env::var("MINIO_PUBLIC_URL").ok(),
            },
            chat: ChatConfig {
                typing_debounce: Duration::from_millis(parsed(
                    "TYPING_DEBOUNCE_MS",
                    defaults.typing_debounce.as_millis() as u64,
                )),
                typing_expiry: Duration::from_millis(parsed(
                    "TYPING_EXPIRY_MS",
                    defaults.typing_expiry.as_millis() as u64,
                )),
                heartbeat_interval: Duration::from_secs(parsed(
                    "PRESENCE_HEARTBEAT_SECS",
                    defaults.heartbeat_interval.as_secs(),
                )),
                presence_ttl: Duration::from_secs(parsed(
                    "PRESENCE_TTL_SECS",
                    defaults.presence_ttl.as_secs(),
                )),
                ephemeral_sweep: Duration::from_secs(parsed("EPHEMERAL_SWEEP_SECS", 0)),
                default_page_size: parsed("DEFAULT_PAGE_SIZE", defaults.default_page_size),
                max_page_size: parsed("MAX_PAGE_SIZE", defaults.max_page_size),
            },
        }
    }

    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.database.user,
            self.database.password,
            self.database.host,
            self.database.port,
            self.database.database,
            self.database.ssl_mode
        )
    }

    pub fn redis_url(&self) -> String {
        match &self.redis.password {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                password, self.redis.host, self.redis.port, self.redis.db
            ),
            None => format!(
                "redis://{}:{}/{}",
                self.redis.host, self.redis.port, self.redis.db
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        ChatConfig::default().validate().unwrap();
    }

    #[test]
    fn presence_ttl_needs_margin_over_heartbeat() {
        let config = ChatConfig {
            heartbeat_interval: Duration::from_secs(30),
            presence_ttl: Duration::from_secs(45),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn typing_expiry_must_outlast_debounce() {
        let config = ChatConfig {
            typing_debounce: Duration::from_secs(5),
            typing_expiry: Duration::from_secs(5),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
