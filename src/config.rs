use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;
use validator::Validate;

use crate::messaging::ConsumerConfig;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const CONFIG_DIR: &str = "config";

/// Application configuration with validation. Values come from
/// `config/default.toml`, an optional `config/{environment}.toml`, and
/// `APP__*` environment variable overrides, in that order.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Whether to run database migrations on startup
    #[serde(default = "default_true_bool")]
    pub auto_migrate: bool,

    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB connect timeout (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,

    /// Upper bound on a single synchronous gateway call
    #[serde(default = "default_gateway_timeout_secs")]
    pub gateway_timeout_secs: u64,

    /// Simulated gateway: fraction of payments declined
    #[validate(range(min = 0.0, max = 1.0))]
    #[serde(default)]
    pub gateway_decline_rate: f64,

    /// Simulated gateway: fraction of payments failing with a fault
    #[validate(range(min = 0.0, max = 1.0))]
    #[serde(default)]
    pub gateway_fault_rate: f64,

    /// Broker connection attempts before the consumer gives up
    #[serde(default = "default_queue_connect_attempts")]
    pub queue_connect_attempts: u32,

    /// Fixed delay between broker connection attempts (seconds)
    #[serde(default = "default_queue_connect_retry_secs")]
    pub queue_connect_retry_secs: u64,

    /// How long one receive call blocks waiting for a delivery (seconds)
    #[serde(default = "default_queue_receive_wait_secs")]
    pub queue_receive_wait_secs: u64,

    /// Messages older than this are rerouted to the dead-letter queue;
    /// unset disables the TTL policy
    #[serde(default = "default_queue_message_ttl_secs")]
    pub queue_message_ttl_secs: Option<u64>,

    /// Base unit of the exponential retry backoff (seconds); the delay
    /// before the n-th republish is `2^n` units
    #[serde(default = "default_retry_backoff_unit_secs")]
    pub retry_backoff_unit_secs: u64,

    /// Interval between retry-sweep passes (seconds)
    #[serde(default = "default_retry_sweep_interval_secs")]
    pub retry_sweep_interval_secs: u64,

    /// Failed requests younger than this are skipped by the sweep (seconds)
    #[serde(default = "default_retry_cooldown_secs")]
    pub retry_cooldown_secs: u64,
}

impl AppConfig {
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn gateway_timeout(&self) -> Duration {
        Duration::from_secs(self.gateway_timeout_secs)
    }

    pub fn message_ttl(&self) -> Option<Duration> {
        self.queue_message_ttl_secs.map(Duration::from_secs)
    }

    pub fn retry_cooldown(&self) -> Duration {
        Duration::from_secs(self.retry_cooldown_secs)
    }

    pub fn retry_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.retry_sweep_interval_secs)
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            connect_attempts: self.queue_connect_attempts,
            connect_retry_delay: Duration::from_secs(self.queue_connect_retry_secs),
            receive_wait: Duration::from_secs(self.queue_receive_wait_secs),
            backoff_unit: Duration::from_secs(self.retry_backoff_unit_secs),
        }
    }
}

fn default_database_url() -> String {
    "sqlite::memory:".to_string()
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_true_bool() -> bool {
    true
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_connect_timeout_secs() -> u64 {
    30
}

fn default_gateway_timeout_secs() -> u64 {
    30
}

fn default_queue_connect_attempts() -> u32 {
    10
}

fn default_queue_connect_retry_secs() -> u64 {
    5
}

fn default_queue_receive_wait_secs() -> u64 {
    5
}

fn default_queue_message_ttl_secs() -> Option<u64> {
    Some(3600)
}

fn default_retry_backoff_unit_secs() -> u64 {
    60
}

fn default_retry_sweep_interval_secs() -> u64 {
    60
}

fn default_retry_cooldown_secs() -> u64 {
    300
}

/// Loads configuration from files and the environment.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let environment = env::var("APP_ENVIRONMENT").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let cfg: AppConfig = Config::builder()
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, environment)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?
        .try_deserialize()?;

    cfg.validate()
        .map_err(|err| ConfigError::Message(err.to_string()))?;

    Ok(cfg)
}

/// Installs the global tracing subscriber. The config level applies to this
/// crate's targets; `RUST_LOG` overrides the whole directive when set.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let default_directive = format!("ecommerce_payments={level},payment_worker={level}");
    let directive = std::env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);
    let filter = EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}
