use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 系统加入提示 / Synthetic join notice content
pub const JOINED_THE_ROOM: &str = "joined the room";
/// 系统离开提示 / Synthetic leave notice content
pub const LEFT_THE_ROOM: &str = "left the room";

/// 聊天消息（日志主题上的 JSON 形态）/ Chat message as carried on the log topic
///
/// 创建后不可变；无独立 ID，重试可能产生重复。
/// Immutable once created; no identity beyond (room_id, time_created, user_id).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Message {
    #[serde(rename = "Content")]
    pub content: String,
    #[serde(rename = "RoomID")]
    pub room_id: String,
    #[serde(rename = "UserID")]
    pub user_id: String,
    #[serde(rename = "Nickname")]
    pub nickname: String,
    #[serde(rename = "TimeCreated")]
    pub time_created: DateTime<Utc>,
}

impl Message {
    /// 以当前时间创建 / Stamp with the current time
    pub fn new(content: impl Into<String>, room_id: &str, user: &User) -> Self {
        Self {
            content: content.into(),
            room_id: room_id.to_string(),
            user_id: user.id.clone(),
            nickname: user.nickname.clone(),
            time_created: Utc::now(),
        }
    }

    pub fn joined(room_id: &str, user: &User) -> Self {
        Self::new(JOINED_THE_ROOM, room_id, user)
    }

    pub fn left(room_id: &str, user: &User) -> Self {
        Self::new(LEFT_THE_ROOM, room_id, user)
    }

    /// 日志分区键 / Partition key on the log
    pub fn key(&self) -> &[u8] {
        self.room_id.as_bytes()
    }
}

/// 已认证用户身份 / Authenticated identity attached to a connection
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct User {
    pub id: String,
    pub nickname: String,
}

impl User {
    pub fn new(id: impl Into<String>, nickname: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            nickname: nickname.into(),
        }
    }
}

/// 推送给 WebSocket 客户端的消息 / Frame shape written to WebSocket clients
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub content: String,
    pub room_id: String,
    pub nickname: String,
    pub user_id: String,
    pub time_created: DateTime<Utc>,
}

impl From<&Message> for OutboundMessage {
    fn from(msg: &Message) -> Self {
        Self {
            content: msg.content.clone(),
            room_id: msg.room_id.clone(),
            nickname: msg.nickname.clone(),
            user_id: msg.user_id.clone(),
            time_created: msg.time_created,
        }
    }
}
