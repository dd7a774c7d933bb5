use anyhow::{anyhow, Result};
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use lazy_static::lazy_static;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

lazy_static! {
    static ref GLOBAL_CONFIG_MANAGER: RwLock<Option<Arc<ConfigManager>>> = RwLock::new(None);
}

/// 配置错误类型 / Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("配置项 '{key}' 不存在 / key not found")]
    KeyNotFound { key: String },
    #[error("配置项 '{key}' 类型转换失败: {message}")]
    TypeConversionError { key: String, message: String },
    #[error("配置初始化失败: {message}")]
    InitializationError { message: String },
}

/// 配置数据源信息 / Loaded source description
#[derive(Debug, Clone)]
pub struct ConfigSourceInfo {
    pub source_type: String,
    pub description: String,
    pub priority: u8,
    pub loaded: bool,
}

/// 配置管理器 / Layered configuration manager
///
/// 优先级（高 → 低）/ Priority (high → low):
/// 附加源 > 环境变量 `V_*` > production.toml > default.toml > development.toml
///
/// 环境变量以 `__` 分隔层级，键名本身可含 `_`：`V_SERVER__NODE_ID` → `server.node_id`
/// Env nesting uses `__` so keys may contain `_`: `V_SERVER__NODE_ID` → `server.node_id`.
pub struct ConfigManager {
    config: Config,
    sources_info: Vec<ConfigSourceInfo>,
}

impl ConfigManager {
    /// 仅使用默认配置源 / Default sources only
    pub fn new() -> Result<Self> {
        Self::with_sources(vec![])
    }

    /// 默认配置源之后追加自定义源 / Default sources followed by `extra`
    pub fn with_sources(extra: Vec<ConfigSource>) -> Result<Self> {
        let defaults = vec![
            ConfigSource::File {
                path: "config/development.toml".to_string(),
                format: Some(FileFormat::Toml),
                required: false,
            },
            ConfigSource::File {
                path: "config/default.toml".to_string(),
                format: Some(FileFormat::Toml),
                required: false,
            },
            ConfigSource::File {
                path: "config/production.toml".to_string(),
                format: Some(FileFormat::Toml),
                required: false,
            },
            ConfigSource::Env {
                prefix: "V".to_string(),
                separator: "__",
            },
        ];

        let mut builder = Config::builder();
        let mut sources_info = Vec::new();

        for (idx, source) in defaults.into_iter().chain(extra).enumerate() {
            let info = source.get_source_info(idx as u8 + 1);
            if let ConfigSource::File { path, required, .. } = &source {
                let exists = std::path::Path::new(path).exists();
                if !exists && *required {
                    return Err(anyhow!("必需的配置文件不存在 / required config file missing: {}", path));
                }
                if !exists {
                    sources_info.push(info);
                    continue;
                }
            }
            builder = source.add_to_builder(builder)?;
            sources_info.push(ConfigSourceInfo { loaded: true, ..info });
        }

        let config = builder
            .build()
            .map_err(|e| anyhow!("构建配置失败 / failed to build config: {}", e))?;
        Ok(Self { config, sources_info })
    }

    /// 获取指定 key 的配置值 / Typed lookup
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        self.config
            .get(key)
            .map_err(|e| anyhow!("获取配置 '{}' 失败: {}", key, e))
    }

    /// 不存在时返回默认值 / Lookup with fallback
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    /// 返回分类错误 / Lookup returning a classified error
    pub fn get_safe<T: DeserializeOwned>(&self, key: &str) -> std::result::Result<T, ConfigError> {
        self.config.get(key).map_err(|e| match e {
            config::ConfigError::NotFound(_) => ConfigError::KeyNotFound { key: key.to_string() },
            other => ConfigError::TypeConversionError {
                key: key.to_string(),
                message: other.to_string(),
            },
        })
    }

    pub fn exists(&self, key: &str) -> bool {
        self.config.get::<serde_json::Value>(key).is_ok()
    }

    /// 校验必需配置项 / Fail on the first missing key
    pub fn validate_required_keys(&self, required_keys: &[&str]) -> std::result::Result<(), ConfigError> {
        match required_keys.iter().find(|k| !self.exists(k)) {
            Some(key) => Err(ConfigError::KeyNotFound { key: key.to_string() }),
            None => Ok(()),
        }
    }

    /// 已成功加载的配置源 / Sources that were actually loaded
    pub fn get_active_sources(&self) -> Vec<&ConfigSourceInfo> {
        self.sources_info.iter().filter(|info| info.loaded).collect()
    }
}

/// 配置源类型 / Configuration source
pub enum ConfigSource {
    /// 文件配置源 / File
    File {
        path: String,
        format: Option<FileFormat>,
        required: bool,
    },
    /// 环境变量配置源 / Environment variables
    Env {
        prefix: String,
        separator: &'static str,
    },
    /// 内存配置源 / In-memory map
    Memory(HashMap<String, serde_json::Value>),
    /// 字符串配置源 / Inline string
    String { content: String, format: FileFormat },
}

impl ConfigSource {
    /// 显式指定的配置文件（必需）/ Explicit, required config file
    pub fn required_file(path: impl Into<String>) -> Self {
        ConfigSource::File {
            path: path.into(),
            format: None,
            required: true,
        }
    }

    pub fn get_source_info(&self, priority: u8) -> ConfigSourceInfo {
        let (source_type, description) = match self {
            ConfigSource::File { path, required, .. } => {
                ("File", format!("文件配置源: {} (必需: {})", path, required))
            }
            ConfigSource::Env { prefix, separator } => (
                "Environment",
                format!("环境变量配置源: 前缀={}, 分隔符={}", prefix, separator),
            ),
            ConfigSource::Memory(map) => ("Memory", format!("内存配置源: {} 个配置项", map.len())),
            ConfigSource::String { .. } => ("String", "字符串配置源".to_string()),
        };
        ConfigSourceInfo {
            source_type: source_type.to_string(),
            description,
            priority,
            loaded: false,
        }
    }

    pub fn add_to_builder(
        self,
        builder: ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<ConfigBuilder<config::builder::DefaultState>> {
        match self {
            ConfigSource::File {
                path,
                format,
                required,
            } => {
                let file = match format {
                    Some(format) => File::with_name(&path).format(format),
                    None => File::with_name(&path),
                };
                Ok(builder.add_source(file.required(required)))
            }
            ConfigSource::Env { prefix, separator } => Ok(builder.add_source(
                Environment::with_prefix(&prefix)
                    .separator(separator)
                    .prefix_separator("_")
                    .ignore_empty(true),
            )),
            ConfigSource::Memory(map) => {
                let mut nested = serde_json::Map::new();
                for (key, value) in map {
                    insert_dotted(&mut nested, &key, value);
                }
                let json = serde_json::to_string(&nested)
                    .map_err(|e| anyhow!("序列化内存配置失败: {}", e))?;
                Ok(builder.add_source(File::from_str(&json, FileFormat::Json)))
            }
            ConfigSource::String { content, format } => {
                Ok(builder.add_source(File::from_str(&content, format)))
            }
        }
    }
}

// "a.b.c" => {"a":{"b":{"c":v}}}
fn insert_dotted(root: &mut serde_json::Map<String, serde_json::Value>, key: &str, value: serde_json::Value) {
    match key.split_once('.') {
        None => {
            root.insert(key.to_string(), value);
        }
        Some((head, rest)) => {
            let child = root
                .entry(head.to_string())
                .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
            if !child.is_object() {
                *child = serde_json::Value::Object(serde_json::Map::new());
            }
            if let serde_json::Value::Object(map) = child {
                insert_dotted(map, rest, value);
            }
        }
    }
}

/// 获取全局配置管理器（懒加载单例）/ Global manager, created lazily from default sources
pub fn get_global_config_manager() -> Result<Arc<ConfigManager>> {
    {
        let guard = GLOBAL_CONFIG_MANAGER
            .read()
            .map_err(|e| anyhow!("读取全局配置管理器锁失败: {}", e))?;
        if let Some(manager) = guard.as_ref() {
            return Ok(Arc::clone(manager));
        }
    }
    let mut guard = GLOBAL_CONFIG_MANAGER
        .write()
        .map_err(|e| anyhow!("获取全局配置管理器写锁失败: {}", e))?;
    if let Some(manager) = guard.as_ref() {
        return Ok(Arc::clone(manager));
    }
    let manager = Arc::new(ConfigManager::new()?);
    *guard = Some(Arc::clone(&manager));
    Ok(manager)
}

/// 安装全局配置管理器（如命令行指定了配置文件）/ Install a prepared global manager
pub fn init_global_config_manager(manager: ConfigManager) -> Result<Arc<ConfigManager>> {
    let manager = Arc::new(manager);
    let mut guard = GLOBAL_CONFIG_MANAGER
        .write()
        .map_err(|e| anyhow!("获取全局配置管理器写锁失败: {}", e))?;
    *guard = Some(Arc::clone(&manager));
    Ok(manager)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_string() {
        let source = ConfigSource::String {
            content: "[server]\nws_port = 5200".to_string(),
            format: FileFormat::Toml,
        };
        let manager = ConfigManager::with_sources(vec![source]).unwrap();
        assert_eq!(manager.get::<i64>("server.ws_port").unwrap(), 5200);
    }

    #[test]
    fn test_config_from_memory_nested_keys() {
        let mut map = HashMap::new();
        map.insert("kafka.topic".to_string(), serde_json::json!("chat"));
        map.insert("kafka.brokers".to_string(), serde_json::json!("a:9092,b:9092"));
        let manager = ConfigManager::with_sources(vec![ConfigSource::Memory(map)]).unwrap();
        assert_eq!(manager.get::<String>("kafka.topic").unwrap(), "chat");
        assert!(manager.exists("kafka.brokers"));
    }

    #[test]
    fn test_get_or_and_missing_keys() {
        let manager = ConfigManager::with_sources(vec![]).unwrap();
        assert_eq!(manager.get_or("chat.unset_for_test", 10_i64), 10);
        assert!(matches!(
            manager.get_safe::<String>("chat.unset_for_test"),
            Err(ConfigError::KeyNotFound { .. })
        ));
        assert!(manager.validate_required_keys(&["chat.unset_for_test"]).is_err());
    }

    #[test]
    fn test_env_override_keeps_underscored_keys() {
        std::env::set_var("V_SERVER__NODE_ID", "replica-7");
        let manager = ConfigManager::new().unwrap();
        std::env::remove_var("V_SERVER__NODE_ID");
        assert_eq!(manager.get::<String>("server.node_id").unwrap(), "replica-7");
        assert!(!manager.exists("server.node.id"));
    }

    #[test]
    fn test_missing_required_file_fails() {
        let res = ConfigManager::with_sources(vec![ConfigSource::required_file("does/not/exist.toml")]);
        assert!(res.is_err());
    }
}
