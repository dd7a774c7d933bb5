use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use v::{HealthCheck, HealthStatus};

use crate::broker::{kafka, KafkaConsumerGroup, KafkaProducer, MemoryBroker, MessageConsumer, MessagePublisher};
use crate::config::{AppConfig, BrokerKind, StorageKind};
use crate::service::{DistributionService, HistoryService, PersistenceWorker};
use crate::storage::{HistoryCache, MemoryCache, MemoryStore, MessageSink, PgStore, PresenceStore, RecentMessages, RedisCache};
use crate::ws::{Hub, WsServer};

const DB_GROUP: &str = "default";
const MEMORY_BROKER_CAPACITY: usize = 1024;
const PRODUCER_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// 存储后端 / Storage backends
struct Storage {
    recent_cache: Arc<dyn RecentMessages>,
    history_cache: Arc<dyn HistoryCache>,
    presence: Arc<dyn PresenceStore>,
    store: Arc<dyn RecentMessages>,
    sink: Arc<dyn MessageSink>,
}

async fn open_storage(cfg: &AppConfig) -> Result<Storage> {
    match cfg.storage {
        StorageKind::Redis => {
            let cache = Arc::new(RedisCache::connect(&cfg.redis.url, cfg.redis.history_cap).await?);
            let store = Arc::new(PgStore::connect(DB_GROUP).await?);
            log_health(cache.check_health().await);
            log_health(store.pool().check_health().await);
            Ok(Storage {
                recent_cache: cache.clone(),
                history_cache: cache.clone(),
                presence: cache,
                store: store.clone(),
                sink: store,
            })
        }
        StorageKind::Memory => {
            let cache = Arc::new(MemoryCache::new(cfg.redis.history_cap));
            let store = Arc::new(MemoryStore::new());
            Ok(Storage {
                recent_cache: cache.clone(),
                history_cache: cache.clone(),
                presence: cache,
                store: store.clone(),
                sink: store,
            })
        }
    }
}

fn log_health(status: HealthStatus) {
    if status.healthy {
        info!(component = %status.component, "✅ healthy");
    } else {
        warn!(component = %status.component, message = ?status.message, "unhealthy");
    }
}

/// WebSocket 分发服务 / Run the distribution service until cancelled
pub async fn serve(cfg: &AppConfig, cancel: CancellationToken) -> Result<()> {
    let storage = open_storage(cfg).await?;
    let history = Arc::new(HistoryService::new(
        storage.recent_cache.clone(),
        storage.store.clone(),
        storage.presence.clone(),
        cfg.chat.count_messages_get,
    ));

    let mut kafka_producer = None;
    let mut kafka_group = None;
    let mut workers = Vec::new();
    let (publisher, consumer): (Arc<dyn MessagePublisher>, Arc<dyn MessageConsumer>) = match cfg.broker {
        BrokerKind::Kafka => {
            let group_id = cfg.kafka.fanout_group(&cfg.server.node_id);
            let conn = cfg.kafka.connection(group_id);
            kafka::ping(&conn).await?;
            let producer = KafkaProducer::new(&conn)?;
            kafka_producer = Some(producer.clone());
            info!(group_id = %conn.group_id, "fan-out consumer group");
            let publisher: Arc<dyn MessagePublisher> = Arc::new(producer);
            let group = KafkaConsumerGroup::new(conn);
            kafka_group = Some(group.clone());
            let consumer: Arc<dyn MessageConsumer> = Arc::new(group);
            (publisher, consumer)
        }
        BrokerKind::Memory => {
            let broker = MemoryBroker::new(MEMORY_BROKER_CAPACITY);
            // 单进程模式下在本进程内持久化 / persist in-process when running standalone
            let worker = PersistenceWorker::new(Arc::new(broker.consumer()), storage.sink.clone(), storage.history_cache.clone());
            let worker_cancel = cancel.clone();
            workers.push(tokio::spawn(async move { worker.run(worker_cancel).await }));
            let consumer: Arc<dyn MessageConsumer> = Arc::new(broker.consumer());
            let publisher: Arc<dyn MessagePublisher> = Arc::new(broker);
            (publisher, consumer)
        }
    };

    let hub = Arc::new(Hub::new(consumer));
    let distribution = Arc::new(DistributionService::new(publisher, hub, history.clone()));

    let consume = {
        let distribution = distribution.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let res = distribution.consume(cancel.clone()).await;
            if res.is_err() {
                // 终止性错误：停止整个服务 / terminal: stop the whole service
                cancel.cancel();
            }
            res
        })
    };

    let server = WsServer::new(cfg.server.clone(), cfg.chat.client_queue_capacity, distribution, history);
    let served = server.run(cancel.clone()).await;
    cancel.cancel();
    // 关停后不再开启新的会话 / no new group sessions after shutdown
    if let Some(group) = &kafka_group {
        group.close();
    }

    let consumed = consume.await?;
    for worker in workers {
        if let Err(e) = worker.await? {
            warn!(error = %e, "persistence worker ended with error");
        }
    }
    if let Some(producer) = kafka_producer {
        tokio::task::spawn_blocking(move || producer.close(PRODUCER_FLUSH_TIMEOUT)).await??;
    }
    served?;
    consumed?;
    Ok(())
}

/// 持久化 worker / Run the persistence worker until cancelled
pub async fn persist(cfg: &AppConfig, cancel: CancellationToken) -> Result<()> {
    let storage = open_storage(cfg).await?;
    let mut kafka_group = None;
    let consumer: Arc<dyn MessageConsumer> = match cfg.broker {
        BrokerKind::Kafka => {
            let conn = cfg.kafka.connection(cfg.kafka.persist_group.clone());
            kafka::ping(&conn).await?;
            let group = KafkaConsumerGroup::new(conn);
            kafka_group = Some(group.clone());
            Arc::new(group)
        }
        BrokerKind::Memory => {
            warn!("memory broker has no publishers outside this process");
            Arc::new(MemoryBroker::new(MEMORY_BROKER_CAPACITY).consumer())
        }
    };
    let worker = PersistenceWorker::new(consumer, storage.sink, storage.history_cache);
    let res = worker.run(cancel).await;
    if let Some(group) = kafka_group {
        group.close();
    }
    res?;
    Ok(())
}
