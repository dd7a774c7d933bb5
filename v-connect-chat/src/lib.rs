//! v-connect-chat：多实例实时聊天消息分发
//! Real-time chat distribution across stateless replicas.
//!
//! 入站：WebSocket 文本 → `DistributionService::publish` → Kafka（按房间分区）。
//! 出站：每个实例消费主题 → `Hub::broadcast` → 本地连接。
//! Inbound frames are published to the log keyed by room; every instance
//! consumes the log and fans out to its local connections.

pub mod app;
pub mod broker;
pub mod config;
pub mod domain;
pub mod error;
pub mod service;
pub mod storage;
pub mod tasks;
pub mod ws;

pub use error::{ChatError, Result};
