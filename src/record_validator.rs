//! Record validation
//!
//! Turns one raw broker payload into a canonical [`LogRecord`], or explains field by
//! field why it could not. Validation is pure: nothing here logs or touches shared state,
//! the consumer loop decides what to do with a [`ValidationFailure`].

use crate::config::ValidationConfig;
use crate::log_record::{LogLevel, LogRecord};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Epoch values below this are read as seconds when the unit is `Auto`.
/// 1e11 seconds is the year 5138, 1e11 milliseconds is March 1973.
const AUTO_SECONDS_CEILING: f64 = 1e11;

/// How numeric timestamps are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampUnit {
    /// Seconds or milliseconds, chosen by magnitude.
    #[default]
    Auto,
    Seconds,
    Millis,
}

/// One field that failed its shape check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldIssue {
    pub field: String,
    pub reason: String,
}

impl FieldIssue {
    fn new(field: &str, reason: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// Why a payload was not turned into a record.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationFailure {
    #[error("payload is not valid JSON: {message}")]
    Decode { message: String },

    #[error("payload of {size} bytes exceeds the {max} byte limit")]
    TooLarge { size: usize, max: usize },

    #[error("schema check failed: {}", join_issues(.issues))]
    Schema { issues: Vec<FieldIssue> },
}

impl ValidationFailure {
    /// Field-level detail, empty for decode and size failures.
    pub fn issues(&self) -> &[FieldIssue] {
        match self {
            ValidationFailure::Schema { issues } => issues,
            _ => &[],
        }
    }
}

fn join_issues(issues: &[FieldIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Schema checker for inbound log payloads
#[derive(Debug, Clone)]
pub struct RecordValidator {
    accepted_levels: BTreeSet<LogLevel>,
    timestamp_unit: TimestampUnit,
    max_payload_bytes: usize,
}

impl Default for RecordValidator {
    fn default() -> Self {
        Self::new(&ValidationConfig::default())
    }
}

impl RecordValidator {
    pub fn new(config: &ValidationConfig) -> Self {
        Self {
            accepted_levels: config.levels.iter().copied().collect(),
            timestamp_unit: config.numeric_timestamp_unit,
            max_payload_bytes: config.max_payload_bytes,
        }
    }

    pub fn accepts_level(&self, level: LogLevel) -> bool {
        self.accepted_levels.contains(&level)
    }

    /// Validate a raw payload as delivered by the broker.
    pub fn validate_bytes(&self, payload: &[u8]) -> Result<LogRecord, ValidationFailure> {
        if payload.is_empty() {
            return Err(ValidationFailure::Decode {
                message: "empty payload".to_string(),
            });
        }
        if payload.len() > self.max_payload_bytes {
            return Err(ValidationFailure::TooLarge {
                size: payload.len(),
                max: self.max_payload_bytes,
            });
        }

        let value: Value =
            serde_json::from_slice(payload).map_err(|e| ValidationFailure::Decode {
                message: e.to_string(),
            })?;

        self.validate_value(&value)
    }

    /// Validate an already-decoded payload.
    pub fn validate_value(&self, value: &Value) -> Result<LogRecord, ValidationFailure> {
        let Some(object) = value.as_object() else {
            return Err(ValidationFailure::Schema {
                issues: vec![FieldIssue::new("$", format!("expected object, got {}", kind_of(value)))],
            });
        };

        let mut issues = Vec::new();

        let timestamp = self.check_timestamp(object, &mut issues);
        let level = self.check_level(object, &mut issues);
        let message = required_text(object, "message", &mut issues);
        let service = required_text(object, "service", &mut issues);
        let instance_id = optional_text(object, "instanceId", &mut issues);
        let trace_id = optional_text(object, "traceId", &mut issues);
        let stack_trace = optional_text(object, "stackTrace", &mut issues);
        let metadata = optional_object(object, "metadata", &mut issues);

        match (timestamp, level, message, service) {
            (Some(timestamp), Some(level), Some(message), Some(service)) if issues.is_empty() => {
                let mut builder = LogRecord::builder(timestamp, level, message, service);
                if let Some(instance_id) = instance_id {
                    builder = builder.instance_id(instance_id);
                }
                if let Some(trace_id) = trace_id {
                    builder = builder.trace_id(trace_id);
                }
                if let Some(stack_trace) = stack_trace {
                    builder = builder.stack_trace(stack_trace);
                }
                if let Some(metadata) = metadata {
                    builder = builder.metadata(metadata);
                }
                Ok(builder.build())
            }
            _ => Err(ValidationFailure::Schema { issues }),
        }
    }

    fn check_timestamp(
        &self,
        object: &Map<String, Value>,
        issues: &mut Vec<FieldIssue>,
    ) -> Option<DateTime<Utc>> {
        match present(object, "timestamp") {
            None => {
                issues.push(FieldIssue::new("timestamp", "required"));
                None
            }
            Some(Value::String(text)) => match parse_iso8601(text.trim()) {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    issues.push(FieldIssue::new(
                        "timestamp",
                        format!("not an ISO-8601 instant: {e}"),
                    ));
                    None
                }
            },
            Some(Value::Number(number)) => match number.as_f64().and_then(|n| self.from_epoch(n)) {
                Some(instant) => Some(instant),
                None => {
                    issues.push(FieldIssue::new("timestamp", "epoch value out of range"));
                    None
                }
            },
            Some(other) => {
                issues.push(FieldIssue::new(
                    "timestamp",
                    format!("expected string or number, got {}", kind_of(other)),
                ));
                None
            }
        }
    }

    fn from_epoch(&self, value: f64) -> Option<DateTime<Utc>> {
        if !value.is_finite() {
            return None;
        }
        let millis = match self.timestamp_unit {
            TimestampUnit::Millis => value,
            TimestampUnit::Seconds => value * 1000.0,
            TimestampUnit::Auto if value.abs() < AUTO_SECONDS_CEILING => value * 1000.0,
            TimestampUnit::Auto => value,
        };
        let whole = millis.trunc();
        if whole < i64::MIN as f64 || whole > i64::MAX as f64 {
            return None;
        }
        let nanos_into_milli = ((millis - whole) * 1_000_000.0).round() as i64;
        Utc.timestamp_millis_opt(whole as i64)
            .single()
            .and_then(|base| base.checked_add_signed(chrono::Duration::nanoseconds(nanos_into_milli)))
    }

    fn check_level(
        &self,
        object: &Map<String, Value>,
        issues: &mut Vec<FieldIssue>,
    ) -> Option<LogLevel> {
        match present(object, "level") {
            None => {
                issues.push(FieldIssue::new("level", "required"));
                None
            }
            Some(Value::String(name)) => match LogLevel::from_str(name) {
                Ok(level) if self.accepts_level(level) => Some(level),
                _ => {
                    issues.push(FieldIssue::new(
                        "level",
                        format!("unrecognized level '{name}'"),
                    ));
                    None
                }
            },
            Some(other) => {
                issues.push(FieldIssue::new(
                    "level",
                    format!("expected string, got {}", kind_of(other)),
                ));
                None
            }
        }
    }
}

/// ISO-8601 layouts tried after RFC 3339, which carry their own offset.
const OFFSET_LAYOUTS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f%z", "%Y%m%dT%H%M%S%.f%z"];

/// Layouts with a literal `Z` or no zone at all; both are read as UTC.
const UTC_LAYOUTS: &[&str] = &["%Y%m%dT%H%M%S%.fZ", "%Y-%m-%dT%H:%M:%S%.f"];

/// Extended or basic ISO-8601 date-time. The error reported is the RFC 3339 one.
fn parse_iso8601(text: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    let rfc3339_error = match DateTime::parse_from_rfc3339(text) {
        Ok(parsed) => return Ok(parsed.with_timezone(&Utc)),
        Err(e) => e,
    };
    for layout in OFFSET_LAYOUTS {
        if let Ok(parsed) = DateTime::parse_from_str(text, layout) {
            return Ok(parsed.with_timezone(&Utc));
        }
    }
    for layout in UTC_LAYOUTS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(text, layout) {
            return Ok(parsed.and_utc());
        }
    }
    Err(rfc3339_error)
}

/// A field that is missing or explicitly `null` counts as absent.
fn present<'a>(object: &'a Map<String, Value>, field: &str) -> Option<&'a Value> {
    object.get(field).filter(|value| !value.is_null())
}

fn required_text(
    object: &Map<String, Value>,
    field: &str,
    issues: &mut Vec<FieldIssue>,
) -> Option<String> {
    match present(object, field) {
        None => {
            issues.push(FieldIssue::new(field, "required"));
            None
        }
        Some(Value::String(text)) if text.trim().is_empty() => {
            issues.push(FieldIssue::new(field, "must not be empty"));
            None
        }
        Some(Value::String(text)) => Some(text.clone()),
        Some(other) => {
            issues.push(FieldIssue::new(
                field,
                format!("expected string, got {}", kind_of(other)),
            ));
            None
        }
    }
}

fn optional_text(
    object: &Map<String, Value>,
    field: &str,
    issues: &mut Vec<FieldIssue>,
) -> Option<String> {
    match present(object, field) {
        None => None,
        Some(Value::String(text)) => Some(text.clone()),
        Some(other) => {
            issues.push(FieldIssue::new(
                field,
                format!("expected string, got {}", kind_of(other)),
            ));
            None
        }
    }
}

fn optional_object(
    object: &Map<String, Value>,
    field: &str,
    issues: &mut Vec<FieldIssue>,
) -> Option<Map<String, Value>> {
    match present(object, field) {
        None => None,
        Some(Value::Object(map)) => Some(map.clone()),
        Some(other) => {
            issues.push(FieldIssue::new(
                field,
                format!("expected object, got {}", kind_of(other)),
            ));
            None
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
