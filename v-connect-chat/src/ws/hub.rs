use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::{ClientHandle, Enqueue};
use crate::broker::{message_handler, MessageConsumer};
use crate::domain::{Message, OutboundMessage};
use crate::error::{ChatError, Result};

/// 本实例的连接注册表 / Process-local registry of connected clients
///
/// `room_id -> (user_id -> ClientHandle)`，由一把锁保护。
/// Guarded by one coarse lock; operations are O(1) and held briefly.
pub struct Hub {
    clients: Mutex<HashMap<String, HashMap<String, ClientHandle>>>,
    consumer: Arc<dyn MessageConsumer>,
}

impl Hub {
    pub fn new(consumer: Arc<dyn MessageConsumer>) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            consumer,
        }
    }

    /// 同一 (room, user) 以最后一次注册为准 / Last registration for a (room, user) wins
    pub fn register(&self, client: ClientHandle) {
        let mut guard = self.clients.lock();
        let room = guard.entry(client.room_id.clone()).or_default();
        if let Some(previous) = room.insert(client.user.id.clone(), client) {
            debug!(room_id = %previous.room_id, user_id = %previous.user.id, client_id = %previous.id, "replaced previous registration");
        }
    }

    /// 只移除同一个连接的注册；房间为空时一并删除
    /// Removes the entry only if it still belongs to `client`; empty rooms are pruned.
    pub fn unregister(&self, client: &ClientHandle) {
        let mut guard = self.clients.lock();
        let Some(room) = guard.get_mut(&client.room_id) else {
            return;
        };
        if room.get(&client.user.id).is_some_and(|c| c.id == client.id) {
            room.remove(&client.user.id);
        }
        if room.is_empty() {
            guard.remove(&client.room_id);
        }
    }

    /// 投递给房间内的本地连接，返回成功入队的数量
    /// Deliver to local clients of the message's room; returns how many were enqueued.
    ///
    /// 入队不阻塞：队列已满时丢弃这条消息。
    /// Never blocks: a saturated queue drops this message for that client.
    pub fn broadcast(&self, msg: &Message) -> usize {
        let targets: Vec<ClientHandle> = match self.clients.lock().get(&msg.room_id) {
            Some(room) => room.values().cloned().collect(),
            None => return 0,
        };

        let text = match serde_json::to_string(&OutboundMessage::from(msg)) {
            Ok(text) => text,
            Err(e) => {
                warn!(room_id = %msg.room_id, error = %e, "failed to encode outbound message");
                return 0;
            }
        };

        let mut delivered = 0;
        for client in targets {
            match client.enqueue(WsMessage::Text(text.clone())) {
                Enqueue::Queued => delivered += 1,
                Enqueue::Full => warn!(
                    room_id = %client.room_id,
                    user_id = %client.user.id,
                    client_id = %client.id,
                    "client queue full, dropping message"
                ),
                Enqueue::Closed => debug!(client_id = %client.id, "client queue closed, skipping"),
            }
        }
        debug!(room_id = %msg.room_id, delivered, "broadcast");
        delivered
    }

    /// 房间内本地连接数 / Number of local clients in a room
    pub fn room_size(&self, room_id: &str) -> usize {
        self.clients.lock().get(room_id).map_or(0, HashMap::len)
    }

    pub fn room_count(&self) -> usize {
        self.clients.lock().len()
    }

    /// 消费日志主题并广播，直到取消 / Consume the topic and broadcast until cancelled
    ///
    /// 失败的会话由消费者按退避重启；只有客户端关闭才会返回错误。
    /// Failed sessions are restarted with backoff by the consumer; only `Closed` is returned.
    pub async fn run(self: &Arc<Self>, cancel: CancellationToken) -> Result<()> {
        info!("📡 hub consuming messages");
        let hub = Arc::clone(self);
        let handler = message_handler(move |msg| {
            hub.broadcast(&msg);
            std::future::ready(Ok(()))
        });
        let res = self.consumer.consume(cancel, handler).await;
        match &res {
            Ok(()) => info!("🛑 hub stopped"),
            Err(ChatError::Closed) => warn!("hub stopped: consumer closed"),
            Err(e) => warn!(error = %e, "hub stopped"),
        }
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::domain::User;
    use tokio::sync::mpsc;

    fn hub() -> Hub {
        Hub::new(Arc::new(MemoryBroker::new(8).consumer()))
    }

    fn client(room: &str, user: &str, capacity: usize) -> (ClientHandle, mpsc::Receiver<WsMessage>) {
        ClientHandle::channel(room, User::new(user, user), capacity)
    }

    fn content(frame: WsMessage) -> String {
        let WsMessage::Text(text) = frame else {
            panic!("expected text frame");
        };
        serde_json::from_str::<OutboundMessage>(&text).unwrap().content
    }

    #[test]
    fn test_broadcast_reaches_every_client_in_room() {
        let hub = hub();
        let (a, mut rx_a) = client("lobby", "a", 4);
        let (b, mut rx_b) = client("lobby", "b", 4);
        let (c, mut rx_c) = client("other", "c", 4);
        hub.register(a);
        hub.register(b);
        hub.register(c);

        let n = hub.broadcast(&Message::new("hi", "lobby", &User::new("a", "a")));

        assert_eq!(n, 2);
        assert_eq!(content(rx_a.try_recv().unwrap()), "hi");
        assert_eq!(content(rx_b.try_recv().unwrap()), "hi");
        assert!(rx_c.try_recv().is_err());
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let hub = hub();
        let (slow, mut rx_slow) = client("lobby", "slow", 1);
        let (fast, mut rx_fast) = client("lobby", "fast", 8);
        hub.register(slow);
        hub.register(fast);

        for i in 0..3 {
            hub.broadcast(&Message::new(format!("m{}", i), "lobby", &User::new("x", "x")));
        }

        assert_eq!(content(rx_slow.try_recv().unwrap()), "m0");
        assert!(rx_slow.try_recv().is_err());
        let fast_seen: Vec<String> = std::iter::from_fn(|| rx_fast.try_recv().ok()).map(content).collect();
        assert_eq!(fast_seen, vec!["m0", "m1", "m2"]);
    }

    #[test]
    fn test_unregister_removes_key_and_prunes_room() {
        let hub = hub();
        let (a, _rx) = client("lobby", "a", 1);
        hub.register(a.clone());
        assert_eq!(hub.room_size("lobby"), 1);

        hub.unregister(&a);
        assert_eq!(hub.room_size("lobby"), 0);
        assert_eq!(hub.room_count(), 0);

        // 重复移除无影响 / no-op when absent
        hub.unregister(&a);
    }

    #[test]
    fn test_stale_client_cannot_remove_newer_registration() {
        let hub = hub();
        let (old, _rx_old) = client("lobby", "a", 1);
        let (new, mut rx_new) = client("lobby", "a", 1);
        hub.register(old.clone());
        hub.register(new);

        hub.unregister(&old);

        assert_eq!(hub.room_size("lobby"), 1);
        assert_eq!(hub.broadcast(&Message::new("still here", "lobby", &User::new("b", "b"))), 1);
        assert_eq!(content(rx_new.try_recv().unwrap()), "still here");
    }

    #[test]
    fn test_closed_client_is_skipped() {
        let hub = hub();
        let (gone, rx) = client("lobby", "gone", 1);
        hub.register(gone);
        drop(rx);
        assert_eq!(hub.broadcast(&Message::new("hi", "lobby", &User::new("b", "b"))), 0);
    }

    #[tokio::test]
    async fn test_run_broadcasts_consumed_messages() {
        let broker = MemoryBroker::new(8);
        let hub = Arc::new(Hub::new(Arc::new(broker.consumer())));
        let (a, mut rx) = client("lobby", "a", 4);
        hub.register(a);

        let cancel = CancellationToken::new();
        let task = {
            let hub = hub.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { hub.run(cancel).await })
        };

        use crate::broker::MessagePublisher;
        broker.produce(&Message::new("from log", "lobby", &User::new("b", "b"))).unwrap();
        let frame = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(content(frame), "from log");

        cancel.cancel();
        assert!(task.await.unwrap().is_ok());
    }
}
