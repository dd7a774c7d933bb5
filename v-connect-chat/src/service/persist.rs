use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::broker::{message_handler, MessageConsumer};
use crate::error::Result;
use crate::storage::{HistoryCache, MessageSink};

/// 持久化 worker：消费主题，先写存储再写缓存列表
/// Persistence worker: consumes the topic, writes to the store and then to the cache list.
///
/// 任一写入失败都会使当前 claim 失败并重投（至少一次）。
/// Either write failing fails the claim, so the message is re-delivered.
pub struct PersistenceWorker {
    consumer: Arc<dyn MessageConsumer>,
    sink: Arc<dyn MessageSink>,
    cache: Arc<dyn HistoryCache>,
}

impl PersistenceWorker {
    pub fn new(consumer: Arc<dyn MessageConsumer>, sink: Arc<dyn MessageSink>, cache: Arc<dyn HistoryCache>) -> Self {
        Self { consumer, sink, cache }
    }

    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!("💾 persistence worker started");
        let sink = self.sink.clone();
        let cache = self.cache.clone();
        let handler = message_handler(move |msg| {
            let sink = sink.clone();
            let cache = cache.clone();
            async move {
                sink.push_message(&msg).await?;
                cache.add_to_list(&msg).await?;
                debug!(room_id = %msg.room_id, user_id = %msg.user_id, "message persisted");
                Ok(())
            }
        });
        let res = self.consumer.consume(cancel, handler).await;
        info!("🛑 persistence worker stopped");
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{MemoryBroker, MessagePublisher};
    use crate::domain::{Message, User};
    use crate::storage::{MemoryCache, MemoryStore, RecentMessages};
    use std::time::Duration;

    #[tokio::test]
    async fn test_writes_store_then_cache() {
        let broker = MemoryBroker::new(8);
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryCache::new(0));
        let worker = PersistenceWorker::new(Arc::new(broker.consumer()), store.clone(), cache.clone());
        let cancel = CancellationToken::new();
        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { worker.run(cancel).await })
        };

        let msg = Message::new("keep me", "r1", &User::new("u1", "alice"));
        broker.produce(&msg).unwrap();

        let cached = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if let Ok(list) = cache.get_last_messages("r1", 10).await {
                    return list;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert_eq!(cached, vec![msg.clone()]);
        assert_eq!(store.get_last_messages("r1", 10).await.unwrap(), vec![msg]);

        cancel.cancel();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_failure_skips_cache_write() {
        let broker = MemoryBroker::new(8);
        let store = Arc::new(MemoryStore::new());
        store.set_failing(true);
        let cache = Arc::new(MemoryCache::new(0));
        let worker = PersistenceWorker::new(Arc::new(broker.consumer()), store.clone(), cache.clone());
        let cancel = CancellationToken::new();
        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { worker.run(cancel).await })
        };

        broker.produce(&Message::new("lost?", "r1", &User::new("u1", "alice"))).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(cache.get_last_messages("r1", 10).await.is_err());
        cancel.cancel();
        assert!(task.await.unwrap().is_ok());
    }
}
