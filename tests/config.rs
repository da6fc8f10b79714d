// tests/config.rs
use logrelay::config::LogFormat;
use logrelay::config_loader::load_config;
use logrelay::record_validator::TimestampUnit;
use std::io::Write;

#[test]
fn loads_a_full_config_file() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    write!(
        file,
        r#"
[server]
host = "127.0.0.1"
port = 4100
cors_allowed_origins = ["http://dashboard.local"]
subscriber_queue_capacity = 32

[kafka]
brokers = ["kafka-1:9092", "kafka-2:9092"]
topic = "app-logs"
group_id = "stream-gateway"
auto_offset_reset = "earliest"

[dedup]
window_secs = 120

[validation]
numeric_timestamp_unit = "millis"

[logging]
filter = "logrelay=debug"
format = "json"
"#
    )
    .unwrap();

    let config = load_config(Some(file.path())).unwrap();
    assert_eq!(config.server.bind_target(), ("127.0.0.1", 4100));
    assert!(!config.server.allows_any_origin());
    assert_eq!(config.server.subscriber_queue_capacity, 32);
    assert_eq!(config.kafka.bootstrap_servers(), "kafka-1:9092,kafka-2:9092");
    assert_eq!(config.kafka.auto_offset_reset, "earliest");
    assert_eq!(config.dedup.window().as_secs(), 120);
    assert_eq!(config.validation.numeric_timestamp_unit, TimestampUnit::Millis);
    assert_eq!(config.logging.format, LogFormat::Json);
}

#[test]
fn invalid_values_fail_at_load_time() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    write!(
        file,
        r#"
[kafka]
topic = "app-logs"
group_id = "stream-gateway"

[dedup]
window_secs = 0
"#
    )
    .unwrap();

    let err = load_config(Some(file.path())).unwrap_err();
    assert!(err.to_string().contains("window"));
}
