// Relay configuration
// Purpose: every externally supplied setting the relay consumes, with defaults and checks

use crate::errors::{RelayError, RelayResult};
use crate::log_record::LogLevel;
use crate::record_validator::TimestampUnit;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// `"*"` allows any origin.
    pub cors_allowed_origins: Vec<String>,
    /// Frames buffered per subscriber before that subscriber starts missing records.
    pub subscriber_queue_capacity: usize,
    pub shutdown_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4000,
            cors_allowed_origins: vec!["*".to_string()],
            subscriber_queue_capacity: 256,
            shutdown_grace_secs: 5,
        }
    }
}

impl ServerConfig {
    /// `host` may be an address or a name; names are resolved when the listener binds.
    pub fn bind_target(&self) -> (&str, u16) {
        (self.host.as_str(), self.port)
    }

    pub fn allows_any_origin(&self) -> bool {
        self.cors_allowed_origins.iter().any(|origin| origin == "*")
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    #[serde(default = "default_brokers", deserialize_with = "brokers_from_list_or_csv")]
    pub brokers: Vec<String>,
    #[serde(deserialize_with = "string_or_number")]
    pub topic: String,
    #[serde(deserialize_with = "string_or_number")]
    pub group_id: String,
    #[serde(default = "default_client_id", deserialize_with = "string_or_number")]
    pub client_id: String,
    #[serde(default = "default_offset_reset")]
    pub auto_offset_reset: String,
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
    #[serde(default = "default_metadata_timeout_ms")]
    pub metadata_timeout_ms: u64,
}

fn default_brokers() -> Vec<String> {
    vec!["localhost:9092".to_string()]
}

fn default_client_id() -> String {
    "logrelay".to_string()
}

fn default_offset_reset() -> String {
    "latest".to_string()
}

fn default_session_timeout_ms() -> u64 {
    10_000
}

fn default_metadata_timeout_ms() -> u64 {
    5_000
}

impl KafkaConfig {
    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.metadata_timeout_ms)
    }
}

/// Accepts `["a:9092", "b:9092"]` as well as `"a:9092,b:9092"`.
fn brokers_from_list_or_csv<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Brokers {
        List(Vec<String>),
        Csv(String),
    }

    let brokers = match Brokers::deserialize(deserializer)? {
        Brokers::List(list) => list,
        Brokers::Csv(csv) => csv.split(',').map(str::to_string).collect(),
    };
    Ok(brokers
        .into_iter()
        .map(|broker| broker.trim().to_string())
        .filter(|broker| !broker.is_empty())
        .collect())
}

/// Environment values are parsed, so `GROUPID=1234` arrives as an integer.
/// Names are strings to Kafka either way.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Name {
        Text(String),
        Unsigned(u64),
        Signed(i64),
        Float(f64),
    }

    Ok(match Name::deserialize(deserializer)? {
        Name::Text(text) => text,
        Name::Unsigned(n) => n.to_string(),
        Name::Signed(n) => n.to_string(),
        Name::Float(n) => n.to_string(),
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub window_secs: u64,
    pub sweep_interval_ms: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window_secs: 300,
            sweep_interval_ms: 1_000,
        }
    }
}

impl DedupConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub levels: Vec<LogLevel>,
    pub numeric_timestamp_unit: TimestampUnit,
    pub max_payload_bytes: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            levels: LogLevel::default_accepted(),
            numeric_timestamp_unit: TimestampUnit::Auto,
            max_payload_bytes: 1024 * 1024, // 1MB
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG` when set.
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl RelayConfig {
    /// Reject settings the relay cannot run with. Called by the loader after extraction.
    pub fn validate(&self) -> RelayResult<()> {
        if self.kafka.topic.trim().is_empty() {
            return Err(RelayError::config("kafka.topic cannot be empty"));
        }
        if self.kafka.group_id.trim().is_empty() {
            return Err(RelayError::config("kafka.group_id cannot be empty"));
        }
        if self.kafka.brokers.is_empty() {
            return Err(RelayError::config("kafka.brokers must list at least one broker"));
        }
        if !matches!(
            self.kafka.auto_offset_reset.as_str(),
            "earliest" | "latest" | "error"
        ) {
            return Err(RelayError::config(format!(
                "kafka.auto_offset_reset must be earliest, latest or error (got '{}')",
                self.kafka.auto_offset_reset
            )));
        }
        if self.dedup.window_secs == 0 {
            return Err(RelayError::config("dedup.window_secs must be greater than zero"));
        }
        if self.dedup.sweep_interval_ms == 0 {
            return Err(RelayError::config("dedup.sweep_interval_ms must be greater than zero"));
        }
        if self.server.subscriber_queue_capacity == 0 {
            return Err(RelayError::config(
                "server.subscriber_queue_capacity must be greater than zero",
            ));
        }
        if self.validation.levels.is_empty() {
            return Err(RelayError::config("validation.levels cannot be empty"));
        }
        if self.validation.max_payload_bytes == 0 {
            return Err(RelayError::config("validation.max_payload_bytes must be greater than zero"));
        }
        for origin in &self.server.cors_allowed_origins {
            if origin != "*" && axum::http::HeaderValue::from_str(origin).is_err() {
                return Err(RelayError::config(format!("invalid CORS origin '{origin}'")));
            }
        }
        if self.server.host.trim().is_empty() || self.server.host.chars().any(char::is_whitespace) {
            return Err(RelayError::config(format!(
                "server.host '{}' is not a valid host name or address",
                self.server.host
            )));
        }
        Ok(())
    }
}
