//! 消息代理 / Partitioned log used as the cross-instance fan-out bus

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::domain::Message;
use crate::error::Result;

pub mod claim;
pub mod kafka;
pub mod memory;

pub use claim::{consume_claim, handle_record, ClaimSession, Record};
pub use kafka::{KafkaConfig, KafkaConsumerGroup, KafkaProducer};
pub use memory::{MemoryBroker, MemoryConsumer};

/// 已解码消息的回调 / Callback for each decoded message
///
/// 返回错误会使当前 claim 失败并触发重投 / an error aborts the claim (re-delivery).
pub type MessageHandler = Arc<dyn Fn(Message) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// 由闭包构造回调 / Build a handler from a closure returning a future
pub fn message_handler<F, Fut>(f: F) -> MessageHandler
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move |msg| f(msg).boxed())
}

/// 生产者 / Publisher
///
/// 返回成功仅表示已进入客户端缓冲区，不代表已持久化。
/// Success means handed to the client buffer, not acknowledged.
pub trait MessagePublisher: Send + Sync {
    fn produce(&self, msg: &Message) -> Result<()>;
}

/// 消费组成员 / Consumer group member
///
/// 阻塞直到 `cancel` 触发（`Ok`）或客户端关闭（`ChatError::Closed`）。
/// Blocks until cancelled (`Ok`) or the client reports itself closed.
#[async_trait]
pub trait MessageConsumer: Send + Sync {
    async fn consume(&self, cancel: CancellationToken, handler: MessageHandler) -> Result<()>;
}
