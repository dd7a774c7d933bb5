use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::KafkaConfig;
use crate::broker::MessagePublisher;
use crate::domain::Message;
use crate::error::{ChatError, Result};

/// 异步、批量、leader 确认的生产者 / Asynchronous, batched, leader-acked producer
///
/// 投递失败只记录日志，不回传给调用方。
/// Delivery failures are logged out of band and never reach the caller.
#[derive(Clone)]
pub struct KafkaProducer {
    producer: FutureProducer,
    topic: String,
    closed: Arc<AtomicBool>,
}

impl KafkaProducer {
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        let producer: FutureProducer = config
            .client_config()
            .set("acks", "1")
            .set("compression.type", "snappy")
            .set("linger.ms", config.flush_frequency_ms.to_string())
            .create()?;
        info!(brokers = %config.brokers, topic = %config.topic, "kafka producer created");
        Ok(Self {
            producer,
            topic: config.topic.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// 停止接收新消息并刷出缓冲 / Refuse new sends and flush buffered ones (blocking)
    pub fn close(&self, timeout: Duration) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.producer.flush(Timeout::After(timeout))?;
        info!(topic = %self.topic, "kafka producer flushed");
        Ok(())
    }
}

impl MessagePublisher for KafkaProducer {
    fn produce(&self, msg: &Message) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChatError::Closed);
        }
        let payload = serde_json::to_vec(msg).map_err(ChatError::Encode)?;
        let record = FutureRecord::to(&self.topic).key(msg.key()).payload(&payload);

        let delivery = self
            .producer
            .send_result(record)
            .map_err(|(e, _)| ChatError::from(e))?;

        let room_id = msg.room_id.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    match delivery.await {
                        Ok(Ok((partition, offset))) => {
                            debug!(room_id = %room_id, partition, offset, "message delivered")
                        }
                        Ok(Err((e, _))) => log_delivery_error(&room_id, &e),
                        Err(_) => warn!(room_id = %room_id, "delivery report dropped"),
                    }
                });
            }
            // 无运行时时不跟踪投递结果 / no runtime, delivery is not tracked
            Err(_) => debug!(room_id = %room_id, "message queued without delivery tracking"),
        }
        Ok(())
    }
}

fn log_delivery_error(room_id: &str, e: &KafkaError) {
    error!(room_id = %room_id, error = %e, "failed to produce message");
}
