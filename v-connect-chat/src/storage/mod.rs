//! 存储模块 / Storage
//!
//! 缓存（Redis）与持久存储（PostgreSQL）都满足"最近消息"形态，
//! 由 `RecentMessages` 统一抽象；在线成员只存在于缓存中。
//! Cache and durable store both satisfy `RecentMessages`; presence is cache-only.

use async_trait::async_trait;

use crate::domain::{Message, User};
use crate::error::Result;

pub mod memory;
pub mod pg_store;
pub mod redis_cache;

pub use self::memory::{MemoryCache, MemoryStore};
pub use self::pg_store::PgStore;
pub use self::redis_cache::RedisCache;

/// 房间最近消息（按时间正序）/ Most recent messages of a room, chronological
#[async_trait]
pub trait RecentMessages: Send + Sync {
    async fn get_last_messages(&self, room_id: &str, count: usize) -> Result<Vec<Message>>;
}

/// 房间在线成员 / Room presence (user id -> nickname)
#[async_trait]
pub trait PresenceStore: Send + Sync {
    async fn get_room_clients(&self, room_id: &str) -> Result<Vec<User>>;
    async fn add_room_client(&self, room_id: &str, user: &User) -> Result<()>;
    async fn delete_client(&self, room_id: &str, user_id: &str) -> Result<()>;
}

/// 持久化写入 / Durable write path
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn push_message(&self, msg: &Message) -> Result<()>;
}

/// 最近消息缓存写入 / Recent-history cache write path
#[async_trait]
pub trait HistoryCache: Send + Sync {
    async fn add_to_list(&self, msg: &Message) -> Result<()>;
}
