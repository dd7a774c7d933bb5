use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row};

use super::{MessageSink, RecentMessages};
use crate::domain::Message;
use crate::error::Result;

const RECENT_MESSAGES_SQL: &str = r#"
SELECT content, nickname, user_id, time_created FROM (
    SELECT m.content, u.nickname, m.user_id, m.time_created
    FROM messages AS m
    JOIN users AS u ON m.user_id = u.id
    WHERE m.room_id = $1
    ORDER BY m.time_created DESC
    LIMIT $2
) AS recent
ORDER BY time_created ASC
"#;

const INSERT_MESSAGE_SQL: &str =
    "INSERT INTO messages (user_id, content, room_id, time_created) VALUES ($1, $2, $3, $4)";

/// PostgreSQL 持久存储 / Durable message store
#[derive(Clone)]
pub struct PgStore {
    pool: Pool<Postgres>,
}

impl PgStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// 使用 `database.<group>` 配置连接 / Connect through the shared pool registry
    pub async fn connect(group: &str) -> Result<Self> {
        let pool = v::get_pool(group).await?;
        v::check_health(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl RecentMessages for PgStore {
    async fn get_last_messages(&self, room_id: &str, count: usize) -> Result<Vec<Message>> {
        let rows = sqlx::query(RECENT_MESSAGES_SQL)
            .bind(room_id)
            .bind(count as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            messages.push(Message {
                content: row.try_get("content")?,
                nickname: row.try_get("nickname")?,
                user_id: row.try_get("user_id")?,
                time_created: row.try_get::<DateTime<Utc>, _>("time_created")?,
                room_id: room_id.to_string(),
            });
        }
        Ok(messages)
    }
}

#[async_trait]
impl MessageSink for PgStore {
    async fn push_message(&self, msg: &Message) -> Result<()> {
        sqlx::query(INSERT_MESSAGE_SQL)
            .bind(&msg.user_id)
            .bind(&msg.content)
            .bind(&msg.room_id)
            .bind(msg.time_created)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
