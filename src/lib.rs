//! Library root for the `logrelay` crate
//! Kafka log events in, validated and deduplicated, out to WebSocket subscribers.

// Core error handling
pub mod errors;

// Records and their validation
pub mod log_record;
pub mod record_validator;

// Configuration & CLI
pub mod cli;
pub mod config;
pub mod config_loader;

// Relay pipeline
pub mod broadcast_channel;
pub mod dedup_filter;
pub mod relay;

// Broker input
pub mod consumer_loop;
pub mod kafka_source;

// Subscriber channel
pub mod app_state;
pub mod connection_manager;
pub mod relay_web;

// Process lifecycle
pub mod server;
pub mod shutdown;
pub mod telemetry;

#[cfg(test)]
mod tests {
    pub mod pipeline_test;
    pub mod web;
}

pub use broadcast_channel::{BroadcastChannel, ConnectionId, Frame, Subscription};
pub use config::RelayConfig;
pub use dedup_filter::DedupFilter;
pub use errors::{RelayError, RelayResult};
pub use log_record::{LogLevel, LogRecord};
pub use record_validator::{RecordValidator, ValidationFailure};
pub use relay::{Disposition, Relay};
