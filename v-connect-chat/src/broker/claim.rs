use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::MessageHandler;
use crate::domain::Message;
use crate::error::{ChatError, Result};

/// 分区中的原始记录 / Raw record pulled from an assigned partition
#[derive(Debug, Clone)]
pub struct Record {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Option<Vec<u8>>,
}

/// 一次消费组会话 / One group session
///
/// 生命周期 / Lifecycle: `setup` → `next_record`* → `cleanup`
#[async_trait]
pub trait ClaimSession: Send {
    async fn setup(&mut self) -> Result<()> {
        Ok(())
    }

    /// `None` 表示消息通道已关闭 / `None` once the message channel is closed
    async fn next_record(&mut self) -> Option<Result<Record>>;

    /// 处理成功后标记 / Mark after the handler succeeded
    fn mark(&mut self, record: &Record) -> Result<()>;

    /// 提交已标记的偏移量 / Commit marked offsets
    fn commit(&mut self) -> Result<()>;

    async fn cleanup(&mut self) -> Result<()> {
        Ok(())
    }
}

/// 解码并交给回调 / Decode a record and hand it to the handler
pub async fn handle_record(record: &Record, handler: &MessageHandler) -> Result<()> {
    let payload = record.payload.as_deref().unwrap_or_default();
    let msg: Message = serde_json::from_slice(payload).map_err(ChatError::Decode)?;
    handler(msg).await
}

/// 运行一个 claim 直到取消或失败 / Run a claim until cancelled or failed
///
/// - 解码失败或回调失败：整个 claim 失败（不跳过），未标记的消息会在重平衡后重投
/// - 取消：提交偏移量并正常返回
/// A decode or handler failure fails the whole claim; cancellation commits and returns `Ok`.
pub async fn consume_claim<S: ClaimSession>(
    session: &mut S,
    handler: &MessageHandler,
    cancel: &CancellationToken,
) -> Result<()> {
    session.setup().await?;

    let result = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            next = session.next_record() => Some(next),
        };

        let record = match next {
            None => break session.commit(),
            Some(None) => break Err(ChatError::Broker("messages channel is closed".to_string())),
            Some(Some(Err(e))) => break Err(e),
            Some(Some(Ok(record))) => record,
        };

        if let Err(e) = handle_record(&record, handler).await {
            break Err(e);
        }
        if let Err(e) = session.mark(&record) {
            break Err(e);
        }
        debug!(partition = record.partition, offset = record.offset, "message handled");
    };

    let cleanup = session.cleanup().await;
    result.and(cleanup)
}
