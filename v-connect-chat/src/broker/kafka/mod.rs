//! Kafka 实现 / Kafka-backed publisher and consumer group

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::info;

use crate::error::{ChatError, Result};

pub mod consumer_group;
pub mod producer;

pub use consumer_group::KafkaConsumerGroup;
pub use producer::KafkaProducer;

/// Kafka 连接参数 / Kafka connection settings
#[derive(Clone, Debug)]
pub struct KafkaConfig {
    pub brokers: String,
    pub topic: String,
    pub group_id: String,
    pub session_timeout_ms: u64,
    pub flush_frequency_ms: u64,
}

impl KafkaConfig {
    pub(crate) fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", &self.brokers);
        config
    }
}

/// 确认主题存在 / Verify the topic exists by fetching its metadata
pub async fn ping(config: &KafkaConfig) -> Result<()> {
    let client_config = config.client_config();
    let topic = config.topic.clone();
    let timeout = Duration::from_millis(config.session_timeout_ms.max(1000));

    tokio::task::spawn_blocking(move || -> Result<()> {
        let consumer: BaseConsumer = client_config.create()?;
        let metadata = consumer.fetch_metadata(Some(&topic), Timeout::After(timeout))?;
        match metadata.topics().iter().find(|t| t.name() == topic) {
            Some(t) if t.error().is_none() && !t.partitions().is_empty() => {
                info!(topic = %topic, partitions = t.partitions().len(), "kafka topic ready");
                Ok(())
            }
            _ => Err(ChatError::Broker(format!("topic {} is not available", topic))),
        }
    })
    .await
    .map_err(|e| ChatError::Broker(format!("metadata task failed: {}", e)))?
}
