//! Error handling for the log relay
//!
//! Every failure the relay can observe is a variant of [`RelayError`]. Per-message
//! failures are contained by the consumer loop; only setup failures (configuration,
//! broker connection, listener bind) are allowed to end the process.

use crate::record_validator::ValidationFailure;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Main error type for the relay
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Broker operation failed: {operation} - {message}")]
    Broker { operation: String, message: String },

    #[error("Serialization failed: {context}")]
    Serialization {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Record rejected: {0}")]
    Validation(#[from] ValidationFailure),

    #[error("Lock poisoned: {resource}")]
    LockPoisoned { resource: String },

    #[error("I/O operation failed: {operation}")]
    Io {
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Type alias for Result with RelayError
pub type RelayResult<T> = Result<T, RelayError>;

impl RelayError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a broker error
    pub fn broker(operation: impl Into<String>, message: impl ToString) -> Self {
        Self::Broker {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Create a serialization error
    pub fn serialization(context: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            context: context.into(),
            source,
        }
    }

    /// Create an I/O error
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = match self {
            RelayError::Config { .. } | RelayError::Validation(_) => StatusCode::BAD_REQUEST,
            RelayError::Broker { .. } => StatusCode::BAD_GATEWAY,
            RelayError::Serialization { .. }
            | RelayError::LockPoisoned { .. }
            | RelayError::Io { .. }
            | RelayError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

/// Poison-safe locking for `std::sync::Mutex`
pub trait SafeLock<T: ?Sized> {
    fn safe_lock(&self, resource: &str) -> RelayResult<std::sync::MutexGuard<'_, T>>;
}

impl<T: ?Sized> SafeLock<T> for std::sync::Mutex<T> {
    fn safe_lock(&self, resource: &str) -> RelayResult<std::sync::MutexGuard<'_, T>> {
        self.lock().map_err(|_| RelayError::LockPoisoned {
            resource: resource.to_string(),
        })
    }
}

/// Poison-safe read locking for `std::sync::RwLock`
pub trait SafeReadLock<T: ?Sized> {
    fn safe_read(&self, resource: &str) -> RelayResult<std::sync::RwLockReadGuard<'_, T>>;
}

impl<T: ?Sized> SafeReadLock<T> for std::sync::RwLock<T> {
    fn safe_read(&self, resource: &str) -> RelayResult<std::sync::RwLockReadGuard<'_, T>> {
        self.read().map_err(|_| RelayError::LockPoisoned {
            resource: resource.to_string(),
        })
    }
}

/// Poison-safe write locking for `std::sync::RwLock`
pub trait SafeWriteLock<T: ?Sized> {
    fn safe_write(&self, resource: &str) -> RelayResult<std::sync::RwLockWriteGuard<'_, T>>;
}

impl<T: ?Sized> SafeWriteLock<T> for std::sync::RwLock<T> {
    fn safe_write(&self, resource: &str) -> RelayResult<std::sync::RwLockWriteGuard<'_, T>> {
        self.write().map_err(|_| RelayError::LockPoisoned {
            resource: resource.to_string(),
        })
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::serialization("json_operation", err)
    }
}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        RelayError::io("io_operation", err)
    }
}

impl From<figment::Error> for RelayError {
    fn from(err: figment::Error) -> Self {
        RelayError::config(err.to_string())
    }
}

impl From<rdkafka::error::KafkaError> for RelayError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        RelayError::broker("kafka_operation", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_error_creation() {
        let config_err = RelayError::config("kafka.topic must be set");
        assert!(config_err.to_string().contains("Configuration error"));

        let broker_err = RelayError::broker("subscribe", "unknown topic");
        assert!(broker_err.to_string().contains("subscribe - unknown topic"));
    }

    #[test]
    fn test_error_chaining() {
        use std::error::Error;

        let io_err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "port taken");
        let relay_err = RelayError::io("bind listener", io_err);

        assert!(relay_err.source().is_some());
        assert!(relay_err.to_string().contains("I/O operation failed"));
    }

    #[test]
    fn poisoned_mutex_maps_to_lock_error() {
        let lock = Arc::new(Mutex::new(0u32));
        let poisoner = Arc::clone(&lock);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison the lock");
        })
        .join();

        match lock.safe_lock("counter") {
            Err(RelayError::LockPoisoned { resource }) => assert_eq!(resource, "counter"),
            other => panic!("expected LockPoisoned, got {:?}", other.map(|g| *g)),
        };
    }

    #[test]
    fn validation_errors_map_to_bad_request() {
        let err = RelayError::from(ValidationFailure::Decode {
            message: "expected value".to_string(),
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
