use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::{Message, User};
use crate::error::{ChatError, Result};
use crate::storage::{PresenceStore, RecentMessages};

/// 旁路缓存读取最近消息，并维护在线成员
/// Cache-aside reads of recent history, plus presence bookkeeping.
///
/// 读路径不回填缓存；缓存只由持久化 worker 写入。
/// The read path never writes back; only the persistence worker fills the cache.
pub struct HistoryService {
    cache: Arc<dyn RecentMessages>,
    store: Arc<dyn RecentMessages>,
    presence: Arc<dyn PresenceStore>,
    count: usize,
}

impl HistoryService {
    pub fn new(
        cache: Arc<dyn RecentMessages>,
        store: Arc<dyn RecentMessages>,
        presence: Arc<dyn PresenceStore>,
        count: usize,
    ) -> Self {
        Self {
            cache,
            store,
            presence,
            count,
        }
    }

    pub async fn get_recent_messages(&self, room_id: &str) -> Result<Vec<Message>> {
        match self.cache.get_last_messages(room_id, self.count).await {
            Ok(messages) => return Ok(messages),
            Err(ChatError::CacheMiss(_)) => debug!(room_id, "history cache miss"),
            Err(e) => warn!(room_id, error = %e, "history cache failed, reading store"),
        }
        self.store.get_last_messages(room_id, self.count).await
    }

    pub async fn get_room_clients(&self, room_id: &str) -> Result<Vec<User>> {
        self.presence.get_room_clients(room_id).await
    }

    pub async fn add_room_client(&self, room_id: &str, user: &User) -> Result<()> {
        self.presence.add_room_client(room_id, user).await
    }

    pub async fn remove_room_client(&self, room_id: &str, user_id: &str) -> Result<()> {
        self.presence.delete_client(room_id, user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{HistoryCache, MemoryCache, MemoryStore};

    fn msg(content: &str) -> Message {
        Message::new(content, "r1", &User::new("u1", "alice"))
    }

    #[tokio::test]
    async fn test_cache_error_falls_back_to_store() {
        let (m1, m2) = (msg("m1"), msg("m2"));
        let cache = Arc::new(MemoryCache::new(0));
        cache.set_failing(true);
        let store = Arc::new(MemoryStore::with_messages("r1", vec![m1.clone(), m2.clone()]));
        let svc = HistoryService::new(cache.clone(), store.clone(), cache, 2);

        assert_eq!(svc.get_recent_messages("r1").await.unwrap(), vec![m1, m2]);
        assert_eq!(store.reads(), 1);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_store() {
        let m3 = msg("m3");
        let cache = Arc::new(MemoryCache::new(0));
        cache.add_to_list(&m3).await.unwrap();
        let store = Arc::new(MemoryStore::with_messages("r1", vec![msg("old")]));
        let svc = HistoryService::new(cache.clone(), store.clone(), cache, 2);

        assert_eq!(svc.get_recent_messages("r1").await.unwrap(), vec![m3]);
        assert_eq!(store.reads(), 0);
    }

    #[tokio::test]
    async fn test_empty_room_is_empty_not_error() {
        let cache = Arc::new(MemoryCache::new(0));
        let store = Arc::new(MemoryStore::new());
        let svc = HistoryService::new(cache.clone(), store.clone(), cache.clone(), 10);

        assert!(svc.get_recent_messages("nowhere").await.unwrap().is_empty());
        // 读路径不回填缓存 / no write-back
        assert!(cache.get_last_messages("nowhere", 10).await.is_err());
    }

    #[tokio::test]
    async fn test_presence_passthrough() {
        let cache = Arc::new(MemoryCache::new(0));
        let svc = HistoryService::new(cache.clone(), Arc::new(MemoryStore::new()), cache, 10);
        let alice = User::new("u1", "alice");

        svc.add_room_client("r1", &alice).await.unwrap();
        assert_eq!(svc.get_room_clients("r1").await.unwrap(), vec![alice]);

        svc.remove_room_client("r1", "u1").await.unwrap();
        assert!(svc.get_room_clients("r1").await.unwrap().is_empty());
    }
}
