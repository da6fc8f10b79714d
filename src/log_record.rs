// Canonical log record carried through the relay.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// LogLevel classifies the severity of a relayed record.
///
/// This is the union of every level seen across schema revisions. Which of them the
/// relay actually accepts is decided by configuration (see `ValidationConfig::levels`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
    Critical,
}

impl LogLevel {
    pub const ALL: [LogLevel; 7] = [
        LogLevel::Trace,
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warn,
        LogLevel::Error,
        LogLevel::Fatal,
        LogLevel::Critical,
    ];

    /// The accepted set used when nothing else is configured.
    pub fn default_accepted() -> Vec<LogLevel> {
        vec![LogLevel::Info, LogLevel::Warn, LogLevel::Error, LogLevel::Fatal]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Fatal => "FATAL",
            LogLevel::Critical => "CRITICAL",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ();

    /// Level names are matched exactly; producers emit them upper-case.
    fn from_str(input: &str) -> Result<LogLevel, Self::Err> {
        LogLevel::ALL
            .into_iter()
            .find(|level| level.as_str() == input)
            .ok_or(())
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// LogRecord is one validated log event.
///
/// Fields are private so a record cannot change after validation; construct one with
/// [`LogRecord::builder`] or through the `RecordValidator`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    timestamp: DateTime<Utc>,
    level: LogLevel,
    message: String,
    service: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    instance_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stack_trace: Option<String>,
}

impl LogRecord {
    pub fn builder(
        timestamp: DateTime<Utc>,
        level: LogLevel,
        message: impl Into<String>,
        service: impl Into<String>,
    ) -> LogRecordBuilder {
        LogRecordBuilder {
            record: LogRecord {
                timestamp,
                level,
                message: message.into(),
                service: service.into(),
                instance_id: None,
                metadata: None,
                trace_id: None,
                stack_trace: None,
            },
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn instance_id(&self) -> Option<&str> {
        self.instance_id.as_deref()
    }

    pub fn metadata(&self) -> Option<&serde_json::Map<String, serde_json::Value>> {
        self.metadata.as_ref()
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    pub fn stack_trace(&self) -> Option<&str> {
        self.stack_trace.as_deref()
    }

    /// Timestamp rendered the way it is keyed and logged: RFC 3339, UTC, `Z` suffix.
    pub fn timestamp_string(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }
}

/// Assembles a [`LogRecord`]; the optional fields are set one at a time.
#[derive(Debug, Clone)]
pub struct LogRecordBuilder {
    record: LogRecord,
}

impl LogRecordBuilder {
    pub fn instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.record.instance_id = Some(instance_id.into());
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Map<String, serde_json::Value>) -> Self {
        self.record.metadata = Some(metadata);
        self
    }

    pub fn trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.record.trace_id = Some(trace_id.into());
        self
    }

    pub fn stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.record.stack_trace = Some(stack_trace.into());
        self
    }

    pub fn build(self) -> LogRecord {
        self.record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn level_parsing_is_exact() {
        assert_eq!(LogLevel::from_str("ERROR"), Ok(LogLevel::Error));
        assert_eq!(LogLevel::from_str("CRITICAL"), Ok(LogLevel::Critical));
        assert!(LogLevel::from_str("error").is_err());
        assert!(LogLevel::from_str("BOGUS").is_err());
    }

    #[test]
    fn record_serializes_camel_case_and_skips_absent_fields() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let record = LogRecord::builder(ts, LogLevel::Error, "db timeout", "db")
            .trace_id("t1")
            .instance_id("db-0")
            .build();

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["timestamp"], "2024-01-15T00:00:00Z");
        assert_eq!(value["level"], "ERROR");
        assert_eq!(value["traceId"], "t1");
        assert_eq!(value["instanceId"], "db-0");
        assert!(value.get("stackTrace").is_none());
        assert!(value.get("metadata").is_none());
    }

    #[test]
    fn timestamp_string_keeps_subsecond_precision() {
        let ts = Utc.timestamp_millis_opt(1_705_276_800_250).unwrap();
        let record = LogRecord::builder(ts, LogLevel::Info, "m", "s").build();
        assert_eq!(record.timestamp_string(), "2024-01-15T00:00:00.250Z");
    }
}
