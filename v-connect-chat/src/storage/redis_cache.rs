use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use tracing::info;

use super::{HistoryCache, PresenceStore, RecentMessages};
use crate::domain::{Message, User};
use crate::error::{ChatError, Result};
use v::{HealthCheck, HealthStatus};

fn presence_key(room_id: &str) -> String {
    format!("room:{}", room_id)
}

/// Redis 缓存 / Redis-backed cache
///
/// - 列表键 `<room_id>`：LPUSH 写入，最新在前 / newest first
/// - 哈希键 `room:<room_id>`：field=user_id, value=nickname
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
    history_cap: usize,
}

impl RedisCache {
    /// 连接并 PING / Connect and ping
    pub async fn connect(url: &str, history_cap: usize) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let mut conn = ConnectionManager::new(client).await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!("🔗 Redis connected: {}", url);
        Ok(Self { conn, history_cap })
    }
}

#[async_trait]
impl RecentMessages for RedisCache {
    async fn get_last_messages(&self, room_id: &str, count: usize) -> Result<Vec<Message>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.lrange(room_id, 0, count as isize - 1).await?;
        if raw.is_empty() {
            return Err(ChatError::CacheMiss(room_id.to_string()));
        }
        let mut messages = raw
            .iter()
            .map(|item| serde_json::from_str::<Message>(item).map_err(ChatError::Decode))
            .collect::<Result<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }
}

#[async_trait]
impl HistoryCache for RedisCache {
    async fn add_to_list(&self, msg: &Message) -> Result<()> {
        let payload = serde_json::to_string(msg).map_err(ChatError::Encode)?;
        let mut pipe = redis::pipe();
        pipe.atomic().lpush(&msg.room_id, payload).ignore();
        if self.history_cap > 0 {
            pipe.ltrim(&msg.room_id, 0, self.history_cap as isize - 1).ignore();
        }
        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl PresenceStore for RedisCache {
    async fn get_room_clients(&self, room_id: &str) -> Result<Vec<User>> {
        let mut conn = self.conn.clone();
        let table: HashMap<String, String> = conn.hgetall(presence_key(room_id)).await?;
        let mut users: Vec<User> = table.into_iter().map(|(id, nickname)| User { id, nickname }).collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(users)
    }

    async fn add_room_client(&self, room_id: &str, user: &User) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.hset(presence_key(room_id), &user.id, &user.nickname).await?;
        Ok(())
    }

    async fn delete_client(&self, room_id: &str, user_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.hdel(presence_key(room_id), user_id).await?;
        Ok(())
    }
}

#[async_trait]
impl HealthCheck for RedisCache {
    async fn check_health(&self) -> HealthStatus {
        let mut conn = self.conn.clone();
        let res: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
        HealthStatus::from_result("redis_cache", res.map(|_| ()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presence_key() {
        assert_eq!(presence_key("lobby"), "room:lobby");
    }
}
