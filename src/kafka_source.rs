//! Kafka-backed [`MessageSource`]
//!
//! Joins the configured consumer group and subscribes to the topic, so partitions are
//! assigned by the group protocol and spread across every relay instance. Offsets are
//! auto-committed as consumption proceeds.

use crate::config::KafkaConfig;
use crate::consumer_loop::{MessageSource, SourceMessage};
use crate::errors::{RelayError, RelayResult};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer, StreamConsumer};
use rdkafka::message::Message;

pub struct KafkaSource {
    consumer: StreamConsumer,
    topic: String,
}

impl KafkaSource {
    /// Build the consumer, confirm the topic exists, and subscribe.
    ///
    /// Any failure here is a startup failure: the relay must not run without a data flow.
    pub async fn connect(config: &KafkaConfig) -> RelayResult<Self> {
        let client_config = client_config(config);

        let consumer: StreamConsumer = client_config
            .create()
            .map_err(|e| RelayError::broker("create consumer", e))?;

        let partitions = probe_topic(client_config, config).await?;
        tracing::info!(
            topic = %config.topic,
            partitions,
            brokers = %config.bootstrap_servers(),
            "kafka topic found"
        );

        consumer
            .subscribe(&[config.topic.as_str()])
            .map_err(|e| RelayError::broker(format!("subscribe to '{}'", config.topic), e))?;
        tracing::info!(topic = %config.topic, group_id = %config.group_id, "subscribed");

        Ok(Self {
            consumer,
            topic: config.topic.clone(),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

fn client_config(config: &KafkaConfig) -> ClientConfig {
    let mut client = ClientConfig::new();
    client
        .set("bootstrap.servers", config.bootstrap_servers())
        .set("group.id", &config.group_id)
        .set("client.id", &config.client_id)
        .set("enable.auto.commit", "true")
        .set("auto.offset.reset", &config.auto_offset_reset)
        .set("session.timeout.ms", config.session_timeout_ms.to_string())
        .set("enable.partition.eof", "false");
    client
}

/// Fetch topic metadata on a short-lived consumer. Metadata calls block, so this runs on
/// the blocking pool.
async fn probe_topic(client_config: ClientConfig, config: &KafkaConfig) -> RelayResult<usize> {
    let topic = config.topic.clone();
    let timeout = config.metadata_timeout();

    tokio::task::spawn_blocking(move || -> RelayResult<usize> {
        let probe: BaseConsumer = client_config
            .create()
            .map_err(|e| RelayError::broker("create metadata probe", e))?;
        let metadata = probe
            .fetch_metadata(Some(&topic), timeout)
            .map_err(|e| RelayError::broker("fetch metadata", e))?;

        let Some(found) = metadata.topics().iter().find(|t| t.name() == topic) else {
            return Err(RelayError::broker("fetch metadata", format!("topic '{topic}' not found")));
        };
        if let Some(err) = found.error() {
            return Err(RelayError::broker(
                "fetch metadata",
                format!("topic '{topic}' unavailable: {err:?}"),
            ));
        }
        if found.partitions().is_empty() {
            return Err(RelayError::broker("fetch metadata", format!("topic '{topic}' has no partitions")));
        }
        Ok(found.partitions().len())
    })
    .await
    .map_err(|e| RelayError::internal(format!("metadata probe task failed: {e}")))?
}

impl MessageSource for KafkaSource {
    async fn next_message(&mut self) -> Option<RelayResult<SourceMessage>> {
        let next = match self.consumer.recv().await {
            Ok(message) => Ok(SourceMessage {
                partition: message.partition(),
                offset: message.offset(),
                payload: message.payload().map(<[u8]>::to_vec),
            }),
            Err(e) => Err(RelayError::broker("receive message", e)),
        };
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_config_carries_group_settings() {
        let config: KafkaConfig = serde_json::from_value(serde_json::json!({
            "brokers": ["k1:9092", "k2:9092"],
            "topic": "logs",
            "group_id": "stream-gateway"
        }))
        .unwrap();

        let client = client_config(&config);
        assert_eq!(client.get("bootstrap.servers"), Some("k1:9092,k2:9092"));
        assert_eq!(client.get("group.id"), Some("stream-gateway"));
        assert_eq!(client.get("auto.offset.reset"), Some("latest"));
        assert_eq!(client.get("enable.auto.commit"), Some("true"));
    }
}
