use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{StatusCode, Uri};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::client::{Client, Enqueue};
use crate::config::{ServerConfig, MIN_QUEUE_CAPACITY};
use crate::domain::{OutboundMessage, User};
use crate::service::{DistributionService, HistoryService};

/// 握手时解析出的连接身份 / Identity parsed from the upgrade request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub room_id: String,
    pub user: User,
}

/// 解析 `/ws/rooms/<room_id>?user_id=..&nickname=..`（也接受 `room_id` 查询参数）
/// Parse the upgrade URI; `room_id` may also come from the query string.
pub fn parse_connect_params(uri: &Uri) -> Option<ConnectParams> {
    let mut room_id = uri
        .path()
        .strip_prefix("/ws/rooms/")
        .map(|rest| rest.trim_end_matches('/'))
        .filter(|rest| !rest.is_empty() && !rest.contains('/'))
        .map(decode);
    let mut user_id = None;
    let mut nickname = None;

    for pair in uri.query().unwrap_or_default().split('&') {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let value = decode(value);
        match key {
            "room_id" if room_id.is_none() => room_id = Some(value),
            "user_id" => user_id = Some(value),
            "nickname" => nickname = Some(value),
            _ => {}
        }
    }

    let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
    Some(ConnectParams {
        room_id: non_empty(room_id)?,
        user: User::new(non_empty(user_id)?, non_empty(nickname)?),
    })
}

fn decode(raw: &str) -> String {
    let raw = raw.replace('+', " ");
    match urlencoding::decode(&raw) {
        Ok(s) => s.into_owned(),
        Err(_) => raw,
    }
}

/// WebSocket 监听器 / WebSocket listener
///
/// 每个连接的出站队列至少能容纳历史帧和自己的加入提示
/// Each connection's outbound queue holds at least the history frame and the client's own join notice.
pub struct WsServer {
    config: ServerConfig,
    queue_capacity: usize,
    distribution: Arc<DistributionService>,
    history: Arc<HistoryService>,
}

impl WsServer {
    pub fn new(
        config: ServerConfig,
        queue_capacity: usize,
        distribution: Arc<DistributionService>,
        history: Arc<HistoryService>,
    ) -> Self {
        Self {
            config,
            queue_capacity: queue_capacity.max(MIN_QUEUE_CAPACITY),
            distribution,
            history,
        }
    }

    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.ws_port);
        let listener = TcpListener::bind(&addr).await?;
        info!("🚀 v-connect-chat WebSocket Server starting on {}", addr);
        self.serve(listener, cancel).await
    }

    /// 在已绑定的监听器上接受连接直到取消 / Accept on a bound listener until cancelled
    pub async fn serve(&self, listener: TcpListener, cancel: CancellationToken) -> Result<()> {
        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!(error = %e, "accept failed");
                        continue;
                    }
                },
            };
            let distribution = self.distribution.clone();
            let history = self.history.clone();
            let capacity = self.queue_capacity;
            let shutdown = cancel.child_token();
            tokio::spawn(async move {
                handle_connection(stream, peer_addr, capacity, distribution, history, shutdown).await;
            });
        }
        info!("🛑 WebSocket listener stopped");
        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    capacity: usize,
    distribution: Arc<DistributionService>,
    history: Arc<HistoryService>,
    shutdown: CancellationToken,
) {
    let mut params = None;
    let callback = |req: &Request, resp: Response| -> std::result::Result<Response, ErrorResponse> {
        match parse_connect_params(req.uri()) {
            Some(parsed) => {
                params = Some(parsed);
                Ok(resp)
            }
            None => {
                let mut reject = ErrorResponse::new(Some("room_id, user_id and nickname are required".to_string()));
                *reject.status_mut() = StatusCode::BAD_REQUEST;
                Err(reject)
            }
        }
    };
    let ws_stream = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(peer = %peer_addr, error = %e, "websocket handshake rejected");
            return;
        }
    };
    let Some(ConnectParams { room_id, user }) = params else {
        return;
    };
    info!(peer = %peer_addr, room_id = %room_id, user_id = %user.id, "📨 new connection");

    let client = Client::new(&room_id, user, capacity);

    let recent = match history.get_recent_messages(&room_id).await {
        Ok(messages) => messages,
        Err(e) => {
            warn!(room_id = %room_id, error = %e, "history unavailable");
            Vec::new()
        }
    };
    let frames: Vec<OutboundMessage> = recent.iter().map(OutboundMessage::from).collect();
    match serde_json::to_string(&frames) {
        Ok(text) => {
            if client.handle().enqueue(WsMessage::Text(text)) != Enqueue::Queued {
                warn!(room_id = %room_id, "failed to queue history frame");
            }
        }
        Err(e) => warn!(room_id = %room_id, error = %e, "failed to encode history"),
    }

    if let Err(e) = distribution.subscribe(client.handle()).await {
        warn!(room_id = %room_id, error = %e, "subscribe incomplete");
    }
    client.run(ws_stream, distribution, shutdown).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(uri: &str) -> Option<ConnectParams> {
        parse_connect_params(&uri.parse::<Uri>().unwrap())
    }

    #[test]
    fn test_parse_path_room() {
        let p = parse("/ws/rooms/lobby?user_id=u1&nickname=Alice%20B").unwrap();
        assert_eq!(p.room_id, "lobby");
        assert_eq!(p.user, User::new("u1", "Alice B"));
    }

    #[test]
    fn test_parse_query_room() {
        let p = parse("/ws?room_id=r%2F1&user_id=u2&nickname=bob+smith").unwrap();
        assert_eq!(p.room_id, "r/1");
        assert_eq!(p.user.nickname, "bob smith");
    }

    #[test]
    fn test_missing_identity_is_rejected() {
        assert!(parse("/ws/rooms/lobby?user_id=u1").is_none());
        assert!(parse("/ws/rooms/lobby?nickname=x").is_none());
        assert!(parse("/ws?user_id=u1&nickname=x").is_none());
        assert!(parse("/ws/rooms/?user_id=u1&nickname=x").is_none());
        assert!(parse("/ws/rooms/lobby?user_id=&nickname=x").is_none());
    }
}
