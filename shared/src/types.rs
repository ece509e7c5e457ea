use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

// 配置键（与宿主框架约定的属性 ID）
/// 云端网关设备令牌
pub const PROP_UPLINK_ACCESS_TOKEN: &str = "uplink.accessToken";
/// 云端 MQTT 客户端 ID
pub const PROP_UPLINK_CLIENT_ID: &str = "uplink.clientId";
/// 云端 broker 地址
pub const PROP_UPLINK_BROKER_URL: &str = "uplink.brokerUrl";
/// 云端 broker 端口
pub const PROP_UPLINK_BROKER_PORT: &str = "uplink.brokerPort";
/// 本地传感网 MQTT 用户名
pub const PROP_DOWNLINK_USERNAME: &str = "downlink.username";
/// 本地传感网 MQTT 端口
pub const PROP_DOWNLINK_PORT: &str = "downlink.port";
/// 现场总线轮询间隔（毫秒）
pub const PROP_POLLING_INTERVAL_MS: &str = "polling.intervalMs";

/// 日志中需要脱敏的键
pub const SECRET_KEYS: &[&str] = &[PROP_UPLINK_ACCESS_TOKEN];

// 配置值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl ConfigValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            ConfigValue::Bool(_) => "bool",
            ConfigValue::Integer(_) => "integer",
            ConfigValue::Float(_) => "float",
            ConfigValue::String(_) => "string",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            ConfigValue::Integer(value) => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigValue::Bool(value) => write!(f, "{}", value),
            ConfigValue::Integer(value) => write!(f, "{}", value),
            ConfigValue::Float(value) => write!(f, "{}", value),
            ConfigValue::String(value) => f.write_str(value),
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(value: &str) -> Self {
        ConfigValue::String(value.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(value: String) -> Self {
        ConfigValue::String(value)
    }
}

impl From<i64> for ConfigValue {
    fn from(value: i64) -> Self {
        ConfigValue::Integer(value)
    }
}

impl From<bool> for ConfigValue {
    fn from(value: bool) -> Self {
        ConfigValue::Bool(value)
    }
}

/// 不可变的配置快照
///
/// 每次宿主下发配置都会生成一个新的快照，克隆只增加引用计数。
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Configuration {
    entries: Arc<BTreeMap<String, ConfigValue>>,
}

impl Configuration {
    pub fn new(entries: BTreeMap<String, ConfigValue>) -> Self {
        Self {
            entries: Arc::new(entries),
        }
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConfigValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 读取必需的非空字符串
    pub fn require_str(&self, key: &str) -> Result<&str, GatewayError> {
        let value = self.require(key)?;
        let text = value
            .as_str()
            .ok_or_else(|| GatewayError::invalid(key, format!("expected string, got {}", value.type_name())))?;

        if text.trim().is_empty() {
            return Err(GatewayError::invalid(key, "must not be empty"));
        }

        Ok(text)
    }

    /// 读取必需的整数
    pub fn require_integer(&self, key: &str) -> Result<i64, GatewayError> {
        let value = self.require(key)?;
        value
            .as_integer()
            .ok_or_else(|| GatewayError::invalid(key, format!("expected integer, got {}", value.type_name())))
    }

    /// 读取端口号，范围 1..=65535
    pub fn require_port(&self, key: &str) -> Result<u16, GatewayError> {
        let port = self.require_integer(key)?;
        match u16::try_from(port) {
            Ok(port) if port > 0 => Ok(port),
            _ => Err(GatewayError::invalid(key, format!("port {} out of range 1-65535", port))),
        }
    }

    /// 读取正的毫秒数
    pub fn require_positive_millis(&self, key: &str) -> Result<u64, GatewayError> {
        let millis = self.require_integer(key)?;
        match u64::try_from(millis) {
            Ok(millis) if millis > 0 => Ok(millis),
            _ => Err(GatewayError::invalid(key, format!("{} ms is not a positive interval", millis))),
        }
    }

    fn require(&self, key: &str) -> Result<&ConfigValue, GatewayError> {
        self.get(key)
            .ok_or_else(|| GatewayError::invalid(key, "required key is missing"))
    }
}

impl<K, V> FromIterator<(K, V)> for Configuration
where
    K: Into<String>,
    V: Into<ConfigValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::new(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

// 网关子系统
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subsystem {
    Uplink,
    Downlink,
    Polling,
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Subsystem::Uplink => "uplink",
            Subsystem::Downlink => "downlink",
            Subsystem::Polling => "polling",
        };
        f.write_str(name)
    }
}

// 网关错误类型
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error("No configuration has been delivered")]
    ConfigurationMissing,

    #[error("Invalid configuration key {key}: {reason}")]
    ConfigurationInvalid { key: String, reason: String },

    #[error("Connection failed: {0}")]
    ConnectionFailed(Subsystem),

    #[error("Connection timed out: {subsystem} after {after_ms} ms")]
    Timeout { subsystem: Subsystem, after_ms: u64 },

    #[error("Partial start rolled back ({rolled_back:?}): {cause}")]
    PartialStartRolledBack {
        rolled_back: Vec<Subsystem>,
        cause: Box<GatewayError>,
    },
}

impl GatewayError {
    pub fn invalid(key: &str, reason: impl Into<String>) -> Self {
        GatewayError::ConfigurationInvalid {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// 网络类失败可以重试，配置错误不行
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::ConnectionFailed(_) | GatewayError::Timeout { .. } => true,
            GatewayError::PartialStartRolledBack { cause, .. } => cause.is_retryable(),
            GatewayError::ConfigurationMissing | GatewayError::ConfigurationInvalid { .. } => false,
        }
    }
}
