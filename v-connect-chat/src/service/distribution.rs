use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::broker::MessagePublisher;
use crate::domain::Message;
use crate::error::Result;
use crate::service::HistoryService;
use crate::ws::{ChatPusher, ClientHandle, Hub};

/// 发布、消费与连接订阅的编排 / Orchestrates publish, consume and client (un)subscription
pub struct DistributionService {
    publisher: Arc<dyn MessagePublisher>,
    hub: Arc<Hub>,
    history: Arc<HistoryService>,
}

impl DistributionService {
    pub fn new(publisher: Arc<dyn MessagePublisher>, hub: Arc<Hub>, history: Arc<HistoryService>) -> Self {
        Self {
            publisher,
            hub,
            history,
        }
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    pub fn publish(&self, msg: &Message) -> Result<()> {
        self.publisher.produce(msg)
    }

    /// 阻塞直到取消 / Blocks until cancelled
    pub async fn consume(&self, cancel: CancellationToken) -> Result<()> {
        self.hub.run(cancel).await
    }

    /// 注册到 Hub 后写在线记录并发布加入提示；后两步失败不回滚注册
    /// Registers locally, then writes presence and the join notice; their failures do not undo registration.
    pub async fn subscribe(&self, client: &ClientHandle) -> Result<()> {
        self.hub.register(client.clone());
        info!(room_id = %client.room_id, user_id = %client.user.id, "client subscribed");

        let presence = self.history.add_room_client(&client.room_id, &client.user).await;
        if let Err(e) = &presence {
            warn!(room_id = %client.room_id, user_id = %client.user.id, error = %e, "failed to add presence");
        }
        let notice = self.publish(&Message::joined(&client.room_id, &client.user));
        if let Err(e) = &notice {
            warn!(room_id = %client.room_id, user_id = %client.user.id, error = %e, "failed to publish join notice");
        }
        presence.and(notice)
    }

    /// `subscribe` 的镜像操作 / Mirror of `subscribe`
    pub async fn unsubscribe(&self, client: &ClientHandle) -> Result<()> {
        self.hub.unregister(client);
        info!(room_id = %client.room_id, user_id = %client.user.id, "client unsubscribed");

        let presence = self.history.remove_room_client(&client.room_id, &client.user.id).await;
        if let Err(e) = &presence {
            warn!(room_id = %client.room_id, user_id = %client.user.id, error = %e, "failed to remove presence");
        }
        let notice = self.publish(&Message::left(&client.room_id, &client.user));
        if let Err(e) = &notice {
            warn!(room_id = %client.room_id, user_id = %client.user.id, error = %e, "failed to publish leave notice");
        }
        presence.and(notice)
    }
}

#[async_trait]
impl ChatPusher for DistributionService {
    fn publish(&self, msg: &Message) -> Result<()> {
        DistributionService::publish(self, msg)
    }

    async fn unsubscribe(&self, client: &ClientHandle) -> Result<()> {
        DistributionService::unsubscribe(self, client).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::domain::{User, JOINED_THE_ROOM, LEFT_THE_ROOM};
    use crate::error::ChatError;
    use crate::storage::{MemoryCache, MemoryStore, PresenceStore};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct CapturingPublisher {
        sent: Mutex<Vec<Message>>,
        failing: bool,
    }

    impl MessagePublisher for CapturingPublisher {
        fn produce(&self, msg: &Message) -> Result<()> {
            if self.failing {
                return Err(ChatError::Broker("down".to_string()));
            }
            self.sent.lock().push(msg.clone());
            Ok(())
        }
    }

    fn service(publisher: Arc<CapturingPublisher>, cache: Arc<MemoryCache>) -> DistributionService {
        let hub = Arc::new(Hub::new(Arc::new(MemoryBroker::new(4).consumer())));
        let history = Arc::new(HistoryService::new(cache.clone(), Arc::new(MemoryStore::new()), cache, 10));
        DistributionService::new(publisher, hub, history)
    }

    #[tokio::test]
    async fn test_subscribe_then_unsubscribe_leaves_no_entry() {
        let publisher = Arc::new(CapturingPublisher::default());
        let cache = Arc::new(MemoryCache::new(0));
        let svc = service(publisher.clone(), cache.clone());
        let (client, _rx) = ClientHandle::channel("lobby", User::new("u1", "alice"), 4);

        svc.subscribe(&client).await.unwrap();
        assert_eq!(svc.hub().room_size("lobby"), 1);
        assert_eq!(cache.get_room_clients("lobby").await.unwrap().len(), 1);

        svc.unsubscribe(&client).await.unwrap();
        assert_eq!(svc.hub().room_size("lobby"), 0);
        assert!(cache.get_room_clients("lobby").await.unwrap().is_empty());

        let contents: Vec<String> = publisher.sent.lock().iter().map(|m| m.content.clone()).collect();
        assert_eq!(contents, vec![JOINED_THE_ROOM, LEFT_THE_ROOM]);
    }

    #[tokio::test]
    async fn test_side_effect_failures_keep_registration() {
        let publisher = Arc::new(CapturingPublisher {
            failing: true,
            ..Default::default()
        });
        let cache = Arc::new(MemoryCache::new(0));
        cache.set_failing(true);
        let svc = service(publisher, cache);
        let (client, _rx) = ClientHandle::channel("lobby", User::new("u1", "alice"), 4);

        assert!(svc.subscribe(&client).await.is_err());
        assert_eq!(svc.hub().room_size("lobby"), 1);
    }
}
