use async_trait::async_trait;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message as _;
use rdkafka::types::RDKafkaErrorCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use v::Backoff;

use super::KafkaConfig;
use crate::broker::claim::{consume_claim, ClaimSession, Record};
use crate::broker::{MessageConsumer, MessageHandler};
use crate::error::{ChatError, Result};
use crate::tasks::supervise;

/// 消费组成员 / Consumer group member
///
/// 每个会话新建一个底层消费者：会话失败后重新加入组，触发重平衡，
/// 未标记的消息会被重投。
/// Each session joins the group with a fresh client, so a failed session
/// rebalances and unmarked messages are re-delivered.
#[derive(Clone)]
pub struct KafkaConsumerGroup {
    config: KafkaConfig,
    backoff: Backoff,
    closed: Arc<AtomicBool>,
}

impl KafkaConsumerGroup {
    pub fn new(config: KafkaConfig) -> Self {
        Self {
            config,
            backoff: Backoff::default(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 之后的 `consume` 以 `ChatError::Closed` 结束 / Later sessions fail with `Closed`
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn open_session(&self) -> Result<KafkaSession> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChatError::Closed);
        }
        let consumer: StreamConsumer = self
            .config
            .client_config()
            .set("group.id", &self.config.group_id)
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "latest")
            .set("partition.assignment.strategy", "roundrobin")
            .set("session.timeout.ms", self.config.session_timeout_ms.to_string())
            .create()?;
        Ok(KafkaSession {
            consumer,
            topic: self.config.topic.clone(),
            closed: self.closed.clone(),
        })
    }
}

/// 致命错误后客户端不可恢复，重新加入组没有意义
/// After a fatal error the client cannot recover, so rejoining is pointless.
fn is_fatal(e: &KafkaError) -> bool {
    e.rdkafka_error_code() == Some(RDKafkaErrorCode::Fatal)
}

struct KafkaSession {
    consumer: StreamConsumer,
    topic: String,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl ClaimSession for KafkaSession {
    async fn setup(&mut self) -> Result<()> {
        self.consumer.subscribe(&[self.topic.as_str()])?;
        info!(topic = %self.topic, "joined consumer group");
        Ok(())
    }

    async fn next_record(&mut self) -> Option<Result<Record>> {
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        match self.consumer.recv().await {
            Ok(msg) => Some(Ok(Record {
                topic: msg.topic().to_string(),
                partition: msg.partition(),
                offset: msg.offset(),
                payload: msg.payload().map(<[u8]>::to_vec),
            })),
            Err(e) if is_fatal(&e) => {
                error!(topic = %self.topic, error = %e, "fatal consumer error, closing group");
                self.closed.store(true, Ordering::SeqCst);
                Some(Err(ChatError::Closed))
            }
            Err(e) => Some(Err(e.into())),
        }
    }

    fn mark(&mut self, record: &Record) -> Result<()> {
        // 提交位置是下一条要读取的消息 / committed position is the next record to read
        self.consumer
            .store_offset(&record.topic, record.partition, record.offset + 1)?;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        match self.consumer.commit_consumer_state(CommitMode::Sync) {
            Ok(()) => Ok(()),
            // 本会话尚无已标记的消息 / nothing marked in this session
            Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn cleanup(&mut self) -> Result<()> {
        self.consumer.unsubscribe();
        debug!(topic = %self.topic, "left consumer group");
        Ok(())
    }
}

#[async_trait]
impl MessageConsumer for KafkaConsumerGroup {
    async fn consume(&self, cancel: CancellationToken, handler: MessageHandler) -> Result<()> {
        let component = format!("kafka-consumer:{}", self.config.group_id);
        let res = supervise(&component, &cancel, self.backoff, || {
            let handler = handler.clone();
            let cancel = cancel.clone();
            async move {
                let mut session = self.open_session()?;
                let res = consume_claim(&mut session, &handler, &cancel).await;
                if self.closed.load(Ordering::SeqCst) && !cancel.is_cancelled() {
                    return Err(ChatError::Closed);
                }
                res
            }
        })
        .await;
        if let Err(e) = &res {
            warn!(group_id = %self.config.group_id, error = %e, "consumer group stopped");
        }
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::message_handler;

    fn group() -> KafkaConsumerGroup {
        KafkaConsumerGroup::new(KafkaConfig {
            brokers: "127.0.0.1:1".to_string(),
            topic: "chat".to_string(),
            group_id: "chat-ws-test".to_string(),
            session_timeout_ms: 6000,
            flush_frequency_ms: 0,
        })
    }

    #[tokio::test]
    async fn test_closed_group_stops_consuming() {
        let group = group();
        group.clone().close();
        let handler = message_handler(|_| std::future::ready(Ok(())));
        let res = group.consume(CancellationToken::new(), handler).await;
        assert!(matches!(res, Err(ChatError::Closed)));
    }

    #[tokio::test]
    async fn test_cancelled_group_returns_ok_after_close() {
        let group = group();
        group.close();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let handler = message_handler(|_| std::future::ready(Ok(())));
        assert!(group.consume(cancel, handler).await.is_ok());
    }

    #[test]
    fn test_only_fatal_errors_close_the_group() {
        assert!(is_fatal(&KafkaError::MessageConsumption(RDKafkaErrorCode::Fatal)));
        assert!(!is_fatal(&KafkaError::MessageConsumption(RDKafkaErrorCode::BrokerTransportFailure)));
        assert!(!is_fatal(&KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)));
    }
}
