// v 库主入口，按需导出模块
// Base library shared by the v-connect services

pub mod comm;
pub use crate::comm::backoff::{sleep_or_cancel, Backoff};
#[cfg(feature = "config")]
pub use crate::comm::config::*;
#[cfg(feature = "config")]
pub use crate::comm::tracing::init_tracing;

#[cfg(feature = "db")]
pub mod db;
#[cfg(feature = "db")]
pub use crate::db::connection::*;
#[cfg(feature = "db")]
pub use crate::db::error::*;

// 重新导出 tracing 宏 / Re-export tracing macros
pub use tracing::{debug, error, info, trace, warn};

// 健康检查接口与状态定义（统一对外暴露）
// Health check interface and status definitions
use async_trait::async_trait;

/// 健康状态结构体 / Component health snapshot
#[derive(Debug, serde::Serialize)]
pub struct HealthStatus {
    /// 组件名称（如 postgres_pool、redis_cache、kafka）
    /// Component name (e.g., postgres_pool, redis_cache, kafka)
    pub component: String,
    pub healthy: bool,
    /// 附加消息（错误信息或提示）/ Error details or hint
    pub message: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl HealthStatus {
    pub fn from_result<E: std::fmt::Display>(component: &str, res: std::result::Result<(), E>) -> Self {
        let (healthy, message) = match res {
            Ok(()) => (true, "OK".to_string()),
            Err(e) => (false, e.to_string()),
        };
        Self {
            component: component.to_string(),
            healthy,
            message: Some(message),
            timestamp: chrono::Utc::now(),
        }
    }
}

/// 健康检查通用接口 / Generic health check
#[async_trait]
pub trait HealthCheck {
    async fn check_health(&self) -> HealthStatus;
}
