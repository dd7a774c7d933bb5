//! 内存存储（单节点开发与测试）/ In-memory backends for single-node runs and tests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::{HistoryCache, MessageSink, PresenceStore, RecentMessages};
use crate::domain::{Message, User};
use crate::error::{ChatError, Result};

/// 内存持久存储 / In-memory durable store
#[derive(Default)]
pub struct MemoryStore {
    messages: Mutex<HashMap<String, Vec<Message>>>,
    failing: AtomicBool,
    reads: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_messages(room_id: &str, messages: Vec<Message>) -> Self {
        let store = Self::new();
        store.messages.lock().insert(room_id.to_string(), messages);
        store
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// 读取次数 / Number of history reads served
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ChatError::Store("memory store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RecentMessages for MemoryStore {
    async fn get_last_messages(&self, room_id: &str, count: usize) -> Result<Vec<Message>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        let guard = self.messages.lock();
        let all = guard.get(room_id).map(Vec::as_slice).unwrap_or_default();
        Ok(all[all.len().saturating_sub(count)..].to_vec())
    }
}

#[async_trait]
impl MessageSink for MemoryStore {
    async fn push_message(&self, msg: &Message) -> Result<()> {
        self.check()?;
        self.messages.lock().entry(msg.room_id.clone()).or_default().push(msg.clone());
        Ok(())
    }
}

/// 内存缓存 / In-memory cache (history lists + presence hashes)
#[derive(Default)]
pub struct MemoryCache {
    lists: Mutex<HashMap<String, Vec<Message>>>,
    presence: Mutex<HashMap<String, BTreeMap<String, String>>>,
    history_cap: usize,
    failing: AtomicBool,
}

impl MemoryCache {
    pub fn new(history_cap: usize) -> Self {
        Self {
            history_cap,
            ..Self::default()
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ChatError::Cache("memory cache unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RecentMessages for MemoryCache {
    async fn get_last_messages(&self, room_id: &str, count: usize) -> Result<Vec<Message>> {
        self.check()?;
        let guard = self.lists.lock();
        match guard.get(room_id) {
            Some(list) if !list.is_empty() => {
                // 列表最新在前 / list is newest first
                let mut recent: Vec<Message> = list.iter().take(count).cloned().collect();
                recent.reverse();
                Ok(recent)
            }
            _ => Err(ChatError::CacheMiss(room_id.to_string())),
        }
    }
}

#[async_trait]
impl HistoryCache for MemoryCache {
    async fn add_to_list(&self, msg: &Message) -> Result<()> {
        self.check()?;
        let mut guard = self.lists.lock();
        let list = guard.entry(msg.room_id.clone()).or_default();
        list.insert(0, msg.clone());
        if self.history_cap > 0 {
            list.truncate(self.history_cap);
        }
        Ok(())
    }
}

#[async_trait]
impl PresenceStore for MemoryCache {
    async fn get_room_clients(&self, room_id: &str) -> Result<Vec<User>> {
        self.check()?;
        Ok(self
            .presence
            .lock()
            .get(room_id)
            .map(|m| m.iter().map(|(id, nick)| User::new(id.clone(), nick.clone())).collect())
            .unwrap_or_default())
    }

    async fn add_room_client(&self, room_id: &str, user: &User) -> Result<()> {
        self.check()?;
        self.presence
            .lock()
            .entry(room_id.to_string())
            .or_default()
            .insert(user.id.clone(), user.nickname.clone());
        Ok(())
    }

    async fn delete_client(&self, room_id: &str, user_id: &str) -> Result<()> {
        self.check()?;
        if let Some(members) = self.presence.lock().get_mut(room_id) {
            members.remove(user_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(content: &str) -> Message {
        Message::new(content, "r1", &User::new("u1", "alice"))
    }

    #[tokio::test]
    async fn test_cache_reads_back_chronologically() {
        let cache = MemoryCache::new(0);
        for c in ["a", "b", "c"] {
            cache.add_to_list(&msg(c)).await.unwrap();
        }
        let got = cache.get_last_messages("r1", 2).await.unwrap();
        let contents: Vec<&str> = got.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_cache_miss_and_cap() {
        let cache = MemoryCache::new(2);
        assert!(matches!(
            cache.get_last_messages("r1", 5).await,
            Err(ChatError::CacheMiss(_))
        ));
        for c in ["a", "b", "c"] {
            cache.add_to_list(&msg(c)).await.unwrap();
        }
        assert_eq!(cache.get_last_messages("r1", 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_presence_roundtrip() {
        let cache = MemoryCache::new(0);
        let user = User::new("u1", "alice");
        cache.add_room_client("r1", &user).await.unwrap();
        assert_eq!(cache.get_room_clients("r1").await.unwrap(), vec![user]);
        cache.delete_client("r1", "u1").await.unwrap();
        assert!(cache.get_room_clients("r1").await.unwrap().is_empty());
        assert!(cache.get_room_clients("unknown").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_returns_most_recent_tail() {
        let store = MemoryStore::with_messages("r1", vec![msg("1"), msg("2"), msg("3")]);
        let got = store.get_last_messages("r1", 2).await.unwrap();
        let contents: Vec<&str> = got.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["2", "3"]);
        assert!(store.get_last_messages("empty", 2).await.unwrap().is_empty());
        assert_eq!(store.reads(), 2);
    }
}
