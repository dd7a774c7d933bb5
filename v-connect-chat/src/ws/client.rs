use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{Message, User};
use crate::error::Result;

/// 对端不读时关闭握手的等待上限 / Upper bound on the close handshake when the peer stops reading
const SOCKET_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// 连接的入站方向依赖的服务 / What a connection needs from the distribution service
#[async_trait]
pub trait ChatPusher: Send + Sync {
    fn publish(&self, msg: &Message) -> Result<()>;
    async fn unsubscribe(&self, client: &ClientHandle) -> Result<()>;
}

/// 入队结果 / Outcome of a non-blocking enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    Queued,
    Full,
    Closed,
}

/// 注册到 Hub 的连接句柄 / Handle registered with the hub
#[derive(Clone, Debug)]
pub struct ClientHandle {
    pub id: Uuid,
    pub room_id: String,
    pub user: User,
    sender: mpsc::Sender<WsMessage>,
}

impl ClientHandle {
    /// 新句柄及其出站队列 / A new handle and the receiving end of its outbound queue
    pub fn channel(room_id: &str, user: User, capacity: usize) -> (Self, mpsc::Receiver<WsMessage>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: Uuid::new_v4(),
            room_id: room_id.to_string(),
            user,
            sender,
        };
        (handle, receiver)
    }

    pub fn enqueue(&self, frame: WsMessage) -> Enqueue {
        match self.sender.try_send(frame) {
            Ok(()) => Enqueue::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => Enqueue::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => Enqueue::Closed,
        }
    }
}

/// 单个 WebSocket 连接的读写泵 / Read and write loops for one socket
pub struct Client {
    handle: ClientHandle,
    queue: mpsc::Receiver<WsMessage>,
}

impl Client {
    pub fn new(room_id: &str, user: User, capacity: usize) -> Self {
        let (handle, queue) = ClientHandle::channel(room_id, user, capacity);
        Self { handle, queue }
    }

    pub fn handle(&self) -> &ClientHandle {
        &self.handle
    }

    /// 运行直到任一方向结束；退出前取消订阅并只关闭一次 socket
    /// Runs until either loop ends; unsubscribes and closes the socket exactly once.
    pub async fn run<S>(self, socket: S, pusher: Arc<dyn ChatPusher>, shutdown: CancellationToken)
    where
        S: Stream<Item = std::result::Result<WsMessage, WsError>>
            + Sink<WsMessage, Error = WsError>
            + Send
            + Unpin
            + 'static,
    {
        let Client { handle, mut queue } = self;
        let (mut sink, mut stream) = socket.split();
        let teardown = shutdown.child_token();
        info!(room_id = %handle.room_id, user_id = %handle.user.id, client_id = %handle.id, "✅ client attached");

        let writer = {
            let teardown = teardown.clone();
            let client_id = handle.id;
            tokio::spawn(async move {
                loop {
                    let frame = tokio::select! {
                        biased;
                        frame = queue.recv() => match frame {
                            Some(frame) => frame,
                            None => break,
                        },
                        _ = teardown.cancelled() => break,
                    };
                    // 单次写失败不终止连接 / one failed write does not end the pump
                    tokio::select! {
                        res = sink.send(frame) => if let Err(e) = res {
                            warn!(client_id = %client_id, error = %e, "failed to write frame");
                        },
                        _ = teardown.cancelled() => break,
                    }
                }
                match tokio::time::timeout(SOCKET_CLOSE_TIMEOUT, sink.close()).await {
                    Ok(Err(e)) => debug!(client_id = %client_id, error = %e, "socket close"),
                    Err(_) => debug!(client_id = %client_id, "socket close timed out"),
                    Ok(Ok(())) => {}
                }
                teardown.cancel();
            })
        };

        loop {
            let next = tokio::select! {
                _ = teardown.cancelled() => break,
                next = stream.next() => next,
            };
            let content = match next {
                Some(Ok(WsMessage::Text(text))) => text,
                Some(Ok(WsMessage::Binary(bytes))) => String::from_utf8_lossy(&bytes).into_owned(),
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    debug!(client_id = %handle.id, error = %e, "read error");
                    break;
                }
            };
            let msg = Message::new(content, &handle.room_id, &handle.user);
            if let Err(e) = pusher.publish(&msg) {
                warn!(room_id = %handle.room_id, user_id = %handle.user.id, error = %e, "failed to publish message");
            }
        }

        if let Err(e) = pusher.unsubscribe(&handle).await {
            warn!(room_id = %handle.room_id, user_id = %handle.user.id, error = %e, "unsubscribe incomplete");
        }
        teardown.cancel();
        if let Err(e) = writer.await {
            warn!(client_id = %handle.id, error = %e, "writer task failed");
        }
        info!(room_id = %handle.room_id, user_id = %handle.user.id, client_id = %handle.id, "👋 client detached");
    }
}
