// Process-wide tracing subscriber setup.

use crate::config::{LogFormat, LoggingConfig};
use crate::errors::{RelayError, RelayResult};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` wins over `logging.filter` when set.
pub fn init_logging(config: &LoggingConfig) -> RelayResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .map_err(|e| RelayError::config(format!("invalid logging.filter '{}': {e}", config.filter)))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let installed = match config.format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    installed.map_err(|e| RelayError::internal(format!("failed to install tracing subscriber: {e}")))
}
