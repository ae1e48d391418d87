//! Application configuration.
//!
//! Loaded from `config.yaml` (if present) layered with environment
//! variables.

use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for an explicit config file path.
pub const CONFIG_ENV_VAR: &str = "NOTIFICATION_WORKER_CONFIG";
/// Prefix for configuration environment variables (layered on top of the
/// plain, unprefixed names below for backwards compatibility with the
/// deployment env the original worker ran in).
pub const CONFIG_ENV_PREFIX: &str = "NOTIFICATION_WORKER";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    /// Max pooled connections checked out for INSERT + RLS SET pairs.
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            name: "notifications".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            pool_size: 10,
        }
    }
}

impl DatabaseConfig {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.name
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub gcp_project_id: String,
    pub pubsub_subscription: String,
    pub dlq_topic: String,
    pub email_immediate_topic: String,
    pub email_daily_topic: String,
    pub realtime_topic: String,
    /// Max concurrent in-flight messages pulled from the subscription.
    pub max_concurrency: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            gcp_project_id: "local-dev".to_string(),
            pubsub_subscription: "notification-matches".to_string(),
            dlq_topic: "notification-worker-dlq".to_string(),
            email_immediate_topic: "email-notifications-immediate".to_string(),
            email_daily_topic: "email-notifications-daily".to_string(),
            realtime_topic: "realtime-notifications".to_string(),
            max_concurrency: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub app_env: String,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            app_env: "development".to_string(),
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// Sliding dedup window, in minutes (default 1440 = 24h).
    pub deduplication_window_minutes: i64,
    /// Per-message processing deadline, in seconds (default 30).
    pub message_deadline_secs: u64,
    /// Graceful shutdown grace period, in seconds (default 30).
    pub shutdown_grace_secs: u64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            deduplication_window_minutes: 1440,
            message_deadline_secs: 30,
            shutdown_grace_secs: 30,
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub broker: BrokerConfig,
    pub ingestion: IngestionConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Sources, in order of priority (later overrides earlier):
    /// 1. Defaults.
    /// 2. `config.yaml` in the current directory, if present.
    /// 3. File named by `NOTIFICATION_WORKER_CONFIG`, if set.
    /// 4. Environment variables, both the legacy flat names (`DB_HOST`,
    ///    `PORT`, ...) and the `NOTIFICATION_WORKER__`-prefixed nested form.
    pub fn load() -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new("config", FileFormat::Yaml).required(false))
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        // Legacy flat env vars, mapped onto the nested struct.
        builder = builder
            .set_override_option("server.port", env_u16("PORT"))?
            .set_override_option("server.app_env", std::env::var("NODE_ENV").ok())?
            .set_override_option("server.log_level", std::env::var("LOG_LEVEL").ok())?
            .set_override_option("database.host", std::env::var("DB_HOST").ok())?
            .set_override_option("database.port", env_u16("DB_PORT"))?
            .set_override_option("database.name", std::env::var("DB_NAME").ok())?
            .set_override_option("database.user", std::env::var("DB_USER").ok())?
            .set_override_option("database.password", std::env::var("DB_PASSWORD").ok())?
            .set_override_option("broker.gcp_project_id", std::env::var("GCP_PROJECT_ID").ok())?
            .set_override_option(
                "broker.pubsub_subscription",
                std::env::var("PUBSUB_SUBSCRIPTION").ok(),
            )?
            .set_override_option("broker.dlq_topic", std::env::var("DLQ_TOPIC").ok())?
            .set_override_option(
                "broker.email_immediate_topic",
                std::env::var("EMAIL_IMMEDIATE_TOPIC").ok(),
            )?
            .set_override_option(
                "broker.email_daily_topic",
                std::env::var("EMAIL_DAILY_TOPIC").ok(),
            )?
            .set_override_option("broker.realtime_topic", std::env::var("REALTIME_TOPIC").ok())?
            .set_override_option(
                "ingestion.deduplication_window_minutes",
                env_i64("DEDUPLICATION_WINDOW_MINUTES"),
            )?;

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Configuration suitable for unit/integration tests.
    pub fn for_test() -> Self {
        Self::default()
    }
}

fn env_u16(name: &str) -> Option<u16> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_i64(name: &str) -> Option<i64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration error: {0}")]
    Source(#[from] ::config::ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.ingestion.deduplication_window_minutes, 1440);
        assert_eq!(config.ingestion.message_deadline_secs, 30);
        assert_eq!(config.server.port, 8080);
    }
}
