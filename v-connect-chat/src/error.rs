use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChatError>;

/// 服务错误类型 / Service error
///
/// 只有 `Closed` 对顶层运行循环是终止性的，其余均可重试或仅影响单个连接。
/// Only `Closed` is terminal for the top-level run loop.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("消息解码失败 / decode error: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("消息编码失败 / encode error: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("消息代理错误 / broker error: {0}")]
    Broker(String),
    #[error("缓存错误 / cache error: {0}")]
    Cache(String),
    #[error("缓存未命中 / cache miss: {0}")]
    CacheMiss(String),
    #[error("存储错误 / store error: {0}")]
    Store(String),
    #[error("消息处理失败 / handler error: {0}")]
    Handler(String),
    #[error("客户端已关闭 / client closed")]
    Closed,
}

impl ChatError {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatError::Closed)
    }
}

impl From<rdkafka::error::KafkaError> for ChatError {
    fn from(e: rdkafka::error::KafkaError) -> Self {
        ChatError::Broker(e.to_string())
    }
}

impl From<redis::RedisError> for ChatError {
    fn from(e: redis::RedisError) -> Self {
        ChatError::Cache(e.to_string())
    }
}

impl From<v::DbError> for ChatError {
    fn from(e: v::DbError) -> Self {
        ChatError::Store(v::describe_error(&e))
    }
}

impl From<sqlx::Error> for ChatError {
    fn from(e: sqlx::Error) -> Self {
        ChatError::from(v::DbError::from(e))
    }
}
