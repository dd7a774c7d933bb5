//! 进程内代理（单节点开发与测试）/ In-process broker for single-node runs and tests
//!
//! 每个消费者都会收到全部消息，等价于每个实例独立的消费组。
//! Every consumer sees every message, like a per-instance consumer group.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use v::Backoff;

use super::claim::{consume_claim, ClaimSession, Record};
use super::{MessageConsumer, MessageHandler, MessagePublisher};
use crate::domain::Message;
use crate::error::{ChatError, Result};
use crate::tasks::supervise;

const MEMORY_TOPIC: &str = "memory";

/// 进程内发布端 / In-process publisher
#[derive(Clone)]
pub struct MemoryBroker {
    tx: broadcast::Sender<Vec<u8>>,
    closed: Arc<AtomicBool>,
}

impl MemoryBroker {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 创建一个已订阅的消费者 / A consumer subscribed from this point on
    pub fn consumer(&self) -> MemoryConsumer {
        MemoryConsumer {
            broker: self.clone(),
            pending: Mutex::new(Some(self.tx.subscribe())),
            backoff: Backoff::default(),
        }
    }

    fn publish_raw(&self, payload: Vec<u8>) {
        // 无订阅者时丢弃 / dropped when nobody listens
        let _ = self.tx.send(payload);
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

impl MessagePublisher for MemoryBroker {
    fn produce(&self, msg: &Message) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ChatError::Closed);
        }
        let payload = serde_json::to_vec(msg).map_err(ChatError::Encode)?;
        self.publish_raw(payload);
        Ok(())
    }
}

/// 进程内消费者 / In-process consumer
pub struct MemoryConsumer {
    broker: MemoryBroker,
    pending: Mutex<Option<broadcast::Receiver<Vec<u8>>>>,
    backoff: Backoff,
}

impl MemoryConsumer {
    fn receiver(&self) -> broadcast::Receiver<Vec<u8>> {
        self.pending.lock().take().unwrap_or_else(|| self.broker.tx.subscribe())
    }
}

struct MemorySession {
    rx: broadcast::Receiver<Vec<u8>>,
    offset: i64,
}

#[async_trait]
impl ClaimSession for MemorySession {
    async fn next_record(&mut self) -> Option<Result<Record>> {
        match self.rx.recv().await {
            Ok(payload) => {
                self.offset += 1;
                Some(Ok(Record {
                    topic: MEMORY_TOPIC.to_string(),
                    partition: 0,
                    offset: self.offset,
                    payload: Some(payload),
                }))
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "memory consumer lagged behind");
                Some(Err(ChatError::Broker(format!("consumer lagged by {} messages", skipped))))
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }

    fn mark(&mut self, _record: &Record) -> Result<()> {
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl MessageConsumer for MemoryConsumer {
    async fn consume(&self, cancel: CancellationToken, handler: MessageHandler) -> Result<()> {
        supervise("memory-consumer", &cancel, self.backoff, || {
            let handler = handler.clone();
            let cancel = cancel.clone();
            async move {
                if self.broker.closed.load(Ordering::SeqCst) {
                    return Err(ChatError::Closed);
                }
                let mut session = MemorySession {
                    rx: self.receiver(),
                    offset: -1,
                };
                consume_claim(&mut session, &handler, &cancel).await
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::message_handler;
    use crate::domain::User;
    use std::time::Duration;

    #[tokio::test]
    async fn test_every_consumer_sees_every_message() {
        let broker = MemoryBroker::new(16);
        let consumers = [broker.consumer(), broker.consumer()];
        broker
            .produce(&Message::new("hi", "lobby", &User::new("u1", "alice")))
            .unwrap();

        for consumer in consumers {
            let cancel = CancellationToken::new();
            let stop = cancel.clone();
            let handler = message_handler(move |msg| {
                assert_eq!(msg.content, "hi");
                stop.cancel();
                std::future::ready(Ok(()))
            });
            tokio::time::timeout(Duration::from_secs(1), consumer.consume(cancel, handler))
                .await
                .unwrap()
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_closed_broker_is_terminal() {
        let broker = MemoryBroker::new(4);
        let consumer = broker.consumer();
        broker.close();
        let handler = message_handler(|_| std::future::ready(Ok(())));
        let res = consumer.consume(CancellationToken::new(), handler).await;
        assert!(matches!(res, Err(ChatError::Closed)));
        assert!(matches!(
            broker.produce(&Message::new("x", "r", &User::new("u", "n"))),
            Err(ChatError::Closed)
        ));
    }
}
