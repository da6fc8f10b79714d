use crate::config::{DedupConfig, LoggingConfig, RelayConfig, ServerConfig, ValidationConfig};
use crate::errors::RelayResult;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use std::path::Path;

pub const DEFAULT_CONFIG_FILE: &str = "logrelay.toml";
pub const ENV_PREFIX: &str = "LOGRELAY_";
pub const CONFIG_PATH_ENV: &str = "LOGRELAY_CONFIG";

#[derive(serde::Serialize)]
struct RelayConfigDefaults {
    server: ServerConfig,
    kafka: KafkaDefaults,
    dedup: DedupConfig,
    validation: ValidationConfig,
    logging: LoggingConfig,
}

// topic and group_id have no defaults; they must come from a file or the environment.
#[derive(serde::Serialize)]
struct KafkaDefaults {
    brokers: Vec<String>,
    client_id: String,
    auto_offset_reset: String,
    session_timeout_ms: u64,
    metadata_timeout_ms: u64,
}

impl Default for RelayConfigDefaults {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            kafka: KafkaDefaults {
                brokers: vec!["localhost:9092".into()],
                client_id: "logrelay".into(),
                auto_offset_reset: "latest".into(),
                session_timeout_ms: 10_000,
                metadata_timeout_ms: 5_000,
            },
            dedup: DedupConfig::default(),
            validation: ValidationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Defaults only, the base every other layer merges onto.
pub fn defaults() -> Figment {
    Figment::from(Serialized::defaults(RelayConfigDefaults::default()))
}

/// Bare variables from older gateway deployments (`BROKER`, `TOPIC`,
/// `GROUPID`, `PORT`), mapped onto their nested keys.
fn legacy_env() -> Env {
    Env::raw()
        .only(&["broker", "topic", "groupid", "port"])
        .map(|key| match key.as_str().to_ascii_lowercase().as_str() {
            "broker" => "kafka.brokers".into(),
            "topic" => "kafka.topic".into(),
            "groupid" => "kafka.group_id".into(),
            _ => "server.port".into(),
        })
}

/// Full layering: defaults, then the TOML file, then legacy variables, then
/// `LOGRELAY_*` variables (`__` separates nested keys, e.g. `LOGRELAY_KAFKA__TOPIC`).
pub fn figment(config_path: Option<&Path>) -> Figment {
    let file = config_path
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CONFIG_PATH_ENV).map(Into::into))
        .unwrap_or_else(|| DEFAULT_CONFIG_FILE.into());

    defaults()
        .merge(Toml::file(file))
        .merge(legacy_env())
        .merge(Env::prefixed(ENV_PREFIX).ignore(&["config"]).split("__"))
}

/// Extract and validate a configuration from any figment.
pub fn extract(figment: Figment) -> RelayResult<RelayConfig> {
    let config: RelayConfig = figment.extract()?;
    config.validate()?;
    Ok(config)
}

pub fn load_config(config_path: Option<&Path>) -> RelayResult<RelayConfig> {
    extract(figment(config_path))
}

/// Only the `validation` section; offline checks must not require Kafka settings.
pub fn load_validation_config(config_path: Option<&Path>) -> RelayResult<ValidationConfig> {
    Ok(figment(config_path).extract_inner("validation")?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_record::LogLevel;
    use figment::Jail;

    fn load_in_jail(path: Option<&Path>) -> figment::error::Result<RelayConfig> {
        load_config(path).map_err(|e| e.to_string().into())
    }

    #[test]
    fn legacy_variables_map_onto_nested_keys() {
        Jail::expect_with(|jail| {
            jail.set_env("BROKER", "k1:9092,k2:9092");
            jail.set_env("TOPIC", "12345");
            jail.set_env("GROUPID", "1234");
            jail.set_env("PORT", "4555");

            let cfg = load_in_jail(None)?;
            assert_eq!(cfg.kafka.brokers, vec!["k1:9092", "k2:9092"]);
            assert_eq!(cfg.kafka.topic, "12345");
            assert_eq!(cfg.kafka.group_id, "1234");
            assert_eq!(cfg.server.port, 4555);
            Ok(())
        });
    }

    #[test]
    fn prefixed_variables_nest_on_double_underscore() {
        Jail::expect_with(|jail| {
            jail.set_env("LOGRELAY_KAFKA__TOPIC", "app-logs");
            jail.set_env("LOGRELAY_KAFKA__GROUP_ID", "stream-gateway");
            jail.set_env("LOGRELAY_DEDUP__WINDOW_SECS", "60");
            jail.set_env("LOGRELAY_LOGGING__FORMAT", "json");

            let cfg = load_in_jail(None)?;
            assert_eq!(cfg.kafka.topic, "app-logs");
            assert_eq!(cfg.kafka.group_id, "stream-gateway");
            assert_eq!(cfg.dedup.window_secs, 60);
            assert_eq!(cfg.logging.format, crate::config::LogFormat::Json);
            Ok(())
        });
    }

    #[test]
    fn prefixed_beats_legacy_beats_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                DEFAULT_CONFIG_FILE,
                r#"
                [server]
                port = 4100

                [kafka]
                topic = "from-file"
                group_id = "file-group"
                "#,
            )?;
            jail.set_env("TOPIC", "from-legacy");
            jail.set_env("GROUPID", "legacy-group");
            jail.set_env("PORT", "4200");
            jail.set_env("LOGRELAY_KAFKA__TOPIC", "from-prefixed");

            let cfg = load_in_jail(None)?;
            assert_eq!(cfg.kafka.topic, "from-prefixed");
            assert_eq!(cfg.kafka.group_id, "legacy-group");
            assert_eq!(cfg.server.port, 4200);
            Ok(())
        });
    }

    #[test]
    fn file_values_hold_without_environment() {
        Jail::expect_with(|jail| {
            jail.create_file(
                DEFAULT_CONFIG_FILE,
                r#"
                [kafka]
                topic = "from-file"
                group_id = 7
                "#,
            )?;

            let cfg = load_in_jail(None)?;
            assert_eq!(cfg.kafka.topic, "from-file");
            assert_eq!(cfg.kafka.group_id, "7");
            Ok(())
        });
    }

    #[test]
    fn config_path_variable_selects_the_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                DEFAULT_CONFIG_FILE,
                r#"
                [kafka]
                topic = "default-file"
                group_id = "g"
                "#,
            )?;
            jail.create_file(
                "relay-prod.toml",
                r#"
                [kafka]
                topic = "chosen-file"
                group_id = "g"
                "#,
            )?;
            jail.set_env(CONFIG_PATH_ENV, "relay-prod.toml");

            assert_eq!(load_in_jail(None)?.kafka.topic, "chosen-file");
            assert_eq!(
                load_in_jail(Some(Path::new(DEFAULT_CONFIG_FILE)))?.kafka.topic,
                "default-file"
            );
            Ok(())
        });
    }

    #[test]
    fn missing_topic_fails_fast() {
        let result = extract(defaults().merge(Toml::string(
            r#"
            [kafka]
            group_id = "relay"
            "#,
        )));
        let err = result.unwrap_err();
        assert!(err.to_string().contains("topic"));
    }

    #[test]
    fn toml_layer_overrides_defaults() {
        let cfg = extract(defaults().merge(Toml::string(
            r#"
            [kafka]
            topic = "app-logs"
            group_id = "stream-gateway"
            brokers = "k1:9092,k2:9092"

            [dedup]
            window_secs = 60

            [validation]
            levels = ["INFO", "WARN", "ERROR", "FATAL", "CRITICAL"]
            "#,
        )))
        .unwrap();

        assert_eq!(cfg.kafka.topic, "app-logs");
        assert_eq!(cfg.kafka.brokers, vec!["k1:9092", "k2:9092"]);
        assert_eq!(cfg.kafka.client_id, "logrelay");
        assert_eq!(cfg.dedup.window_secs, 60);
        assert_eq!(cfg.dedup.sweep_interval_ms, 1_000);
        assert!(cfg.validation.levels.contains(&LogLevel::Critical));
        assert_eq!(cfg.server.port, 4000);
    }

    #[test]
    fn validation_section_loads_without_kafka_settings() {
        let cfg: ValidationConfig = defaults()
            .merge(Toml::string(
                r#"
                [validation]
                max_payload_bytes = 2048
                "#,
            ))
            .extract_inner("validation")
            .unwrap();
        assert_eq!(cfg.max_payload_bytes, 2048);
        assert_eq!(cfg.levels.len(), 4);
    }

    #[test]
    fn unknown_level_in_config_is_rejected() {
        let result = extract(defaults().merge(Toml::string(
            r#"
            [kafka]
            topic = "t"
            group_id = "g"

            [validation]
            levels = ["INFO", "VERBOSE"]
            "#,
        )));
        assert!(result.is_err());
    }
}
