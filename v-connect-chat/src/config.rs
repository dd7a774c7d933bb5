use anyhow::{bail, Result};
use uuid::Uuid;
use v::ConfigManager;

use crate::broker::KafkaConfig;

#[derive(Clone, Debug)]
pub struct ServerConfig { pub host: String, pub ws_port: u16, pub node_id: String }
#[derive(Clone, Debug)]
pub struct ChatSettings { pub count_messages_get: usize, pub client_queue_capacity: usize }
#[derive(Clone, Debug)]
pub struct KafkaSettings { pub brokers: String, pub topic: String, pub consumer_group: String, pub group_per_instance: bool, pub persist_group: String, pub session_timeout_ms: u64, pub flush_frequency_ms: u64 }
#[derive(Clone, Debug)]
pub struct RedisSettings { pub url: String, pub history_cap: usize }

/// 历史帧与加入提示各占一个槽位 / history frame plus the client's own join notice
pub const MIN_QUEUE_CAPACITY: usize = 2;

/// 后端选择 / Backend selection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BrokerKind { Kafka, Memory }
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StorageKind { Redis, Memory }

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub chat: ChatSettings,
    pub kafka: KafkaSettings,
    pub redis: RedisSettings,
    pub broker: BrokerKind,
    pub storage: StorageKind,
}

impl KafkaSettings {
    /// 广播用消费组：默认每个实例独立，保证每个实例读到全部分区
    /// Fan-out group id; per-instance by default so every replica reads every partition.
    pub fn fanout_group(&self, node_id: &str) -> String {
        if self.group_per_instance { format!("{}-{}", self.consumer_group, node_id) } else { self.consumer_group.clone() }
    }

    pub fn connection(&self, group_id: String) -> KafkaConfig {
        KafkaConfig { brokers: self.brokers.clone(), topic: self.topic.clone(), group_id, session_timeout_ms: self.session_timeout_ms, flush_frequency_ms: self.flush_frequency_ms }
    }
}

/// 未配置 `server.node_id` 时生成唯一节点 ID，避免副本共用同一个广播消费组
/// A missing `server.node_id` gets a generated one so replicas never share a fan-out group.
fn node_id(cm: &ConfigManager) -> String {
    match cm.get::<String>("server.node_id") {
        Ok(id) if !id.trim().is_empty() => id,
        _ => format!("node-{}", Uuid::new_v4().simple()),
    }
}

fn ws_port(cm: &ConfigManager) -> Result<u16> {
    let port = cm.get_or("server.ws_port", 5200_i64);
    match u16::try_from(port) {
        Ok(port) => Ok(port),
        Err(_) => bail!("server.ws_port out of range: {}", port),
    }
}

pub fn load() -> Result<AppConfig> {
    let cm = v::get_global_config_manager()?;
    load_from(&cm)
}

pub fn load_from(cm: &ConfigManager) -> Result<AppConfig> {
    let broker = match cm.get_or("broker.kind", "kafka".to_string()).as_str() {
        "kafka" => BrokerKind::Kafka,
        "memory" => BrokerKind::Memory,
        other => bail!("unknown broker.kind: {}", other),
    };
    let storage = match cm.get_or("storage.kind", "redis".to_string()).as_str() {
        "redis" => StorageKind::Redis,
        "memory" => StorageKind::Memory,
        other => bail!("unknown storage.kind: {}", other),
    };
    Ok(AppConfig {
        server: ServerConfig { host: cm.get_or("server.host", "127.0.0.1".to_string()), ws_port: ws_port(cm)?, node_id: node_id(cm) },
        chat: ChatSettings { count_messages_get: cm.get_or("chat.count_messages_get", 10_i64).max(0) as usize, client_queue_capacity: cm.get_or("chat.client_queue_capacity", 10_i64).max(MIN_QUEUE_CAPACITY as i64) as usize },
        kafka: KafkaSettings {
            brokers: cm.get_or("kafka.brokers", "127.0.0.1:9092".to_string()),
            topic: cm.get_or("kafka.topic", "chat-messages".to_string()),
            consumer_group: cm.get_or("kafka.consumer_group", "chat-ws".to_string()),
            group_per_instance: cm.get_or("kafka.group_per_instance", true),
            persist_group: cm.get_or("kafka.persist_group", "chat-persist".to_string()),
            session_timeout_ms: cm.get_or("kafka.session_timeout_ms", 10000_i64).max(1) as u64,
            flush_frequency_ms: cm.get_or("kafka.flush_frequency_ms", 500_i64).max(0) as u64,
        },
        redis: RedisSettings { url: cm.get_or("redis.url", "redis://127.0.0.1:6379".to_string()), history_cap: cm.get_or("redis.history_cap", 0_i64).max(0) as usize },
        broker,
        storage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kafka(group_per_instance: bool) -> KafkaSettings {
        KafkaSettings { brokers: "b:9092".into(), topic: "t".into(), consumer_group: "chat-ws".into(), group_per_instance, persist_group: "p".into(), session_timeout_ms: 10000, flush_frequency_ms: 500 }
    }

    fn manager(entries: &[(&str, serde_json::Value)]) -> ConfigManager {
        let map = entries.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        ConfigManager::with_sources(vec![v::ConfigSource::Memory(map)]).unwrap()
    }

    #[test]
    fn test_default_loads_get_distinct_fanout_groups() {
        let cm = manager(&[]);
        let first = load_from(&cm).unwrap();
        let second = load_from(&cm).unwrap();
        assert_ne!(first.server.node_id, second.server.node_id);
        assert_ne!(
            first.kafka.fanout_group(&first.server.node_id),
            second.kafka.fanout_group(&second.server.node_id)
        );
    }

    #[test]
    fn test_explicit_node_id_is_kept() {
        let cm = manager(&[("server.node_id", serde_json::json!("replica-7"))]);
        let cfg = load_from(&cm).unwrap();
        assert_eq!(cfg.kafka.fanout_group(&cfg.server.node_id), "chat-ws-replica-7");
    }

    #[test]
    fn test_out_of_range_port_is_rejected() {
        assert!(load_from(&manager(&[("server.ws_port", serde_json::json!(70000))])).is_err());
        assert!(load_from(&manager(&[("server.ws_port", serde_json::json!(-1))])).is_err());
        assert_eq!(load_from(&manager(&[("server.ws_port", serde_json::json!(6100))])).unwrap().server.ws_port, 6100);
    }

    #[test]
    fn test_queue_capacity_has_room_for_history_and_join() {
        let cfg = load_from(&manager(&[("chat.client_queue_capacity", serde_json::json!(1))])).unwrap();
        assert_eq!(cfg.chat.client_queue_capacity, MIN_QUEUE_CAPACITY);
    }

    #[test]
    fn test_fanout_group_is_per_instance() {
        assert_eq!(kafka(true).fanout_group("node-2"), "chat-ws-node-2");
        assert_eq!(kafka(false).fanout_group("node-2"), "chat-ws");
        let conn = kafka(true).connection("g".into());
        assert_eq!((conn.group_id.as_str(), conn.topic.as_str()), ("g", "t"));
    }
}
