use crate::types::{
    ConfigValue, Configuration, GatewayError, PROP_DOWNLINK_PORT, PROP_DOWNLINK_USERNAME,
    PROP_POLLING_INTERVAL_MS, PROP_UPLINK_ACCESS_TOKEN, PROP_UPLINK_BROKER_PORT,
    PROP_UPLINK_BROKER_URL, PROP_UPLINK_CLIENT_ID,
};
use anyhow::{Context, Result};
use config::{Config, Environment, File, Map};
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

// 云端上行连接参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UplinkParams {
    pub device_token: String,
    pub client_id: String,
    pub broker_host: String,
    pub broker_port: u16,
}

impl UplinkParams {
    pub fn from_configuration(config: &Configuration) -> Result<Self, GatewayError> {
        Ok(Self {
            device_token: config.require_str(PROP_UPLINK_ACCESS_TOKEN)?.to_string(),
            client_id: config.require_str(PROP_UPLINK_CLIENT_ID)?.to_string(),
            broker_host: parse_broker_host(config.require_str(PROP_UPLINK_BROKER_URL)?)?,
            broker_port: config.require_port(PROP_UPLINK_BROKER_PORT)?,
        })
    }
}

// 本地传感网下行连接参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownlinkParams {
    pub username: String,
    pub port: u16,
}

impl DownlinkParams {
    pub fn from_configuration(config: &Configuration) -> Result<Self, GatewayError> {
        Ok(Self {
            username: config.require_str(PROP_DOWNLINK_USERNAME)?.to_string(),
            port: config.require_port(PROP_DOWNLINK_PORT)?,
        })
    }
}

// 现场总线轮询参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingParams {
    pub interval: Duration,
}

impl PollingParams {
    pub fn from_configuration(config: &Configuration) -> Result<Self, GatewayError> {
        let millis = config.require_positive_millis(PROP_POLLING_INTERVAL_MS)?;
        Ok(Self {
            interval: Duration::from_millis(millis),
        })
    }
}

/// 三个子系统的完整启动参数
///
/// 只有全部键都存在且类型正确时才能构造，网关不会以部分配置启动。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayParams {
    pub uplink: UplinkParams,
    pub downlink: DownlinkParams,
    pub polling: PollingParams,
}

impl GatewayParams {
    pub fn from_configuration(config: &Configuration) -> Result<Self, GatewayError> {
        Ok(Self {
            uplink: UplinkParams::from_configuration(config)?,
            downlink: DownlinkParams::from_configuration(config)?,
            polling: PollingParams::from_configuration(config)?,
        })
    }
}

// 接受 "host"、"tcp://host"、"mqtt://host"，TLS 由传输层另行处理
fn parse_broker_host(url: &str) -> Result<String, GatewayError> {
    let url = url.trim();
    let host = match url.split_once("://") {
        Some(("tcp", rest)) | Some(("mqtt", rest)) => rest,
        Some((scheme, _)) => {
            return Err(GatewayError::invalid(
                PROP_UPLINK_BROKER_URL,
                format!("unsupported scheme {}", scheme),
            ))
        }
        None => url,
    };
    let host = host.trim_end_matches('/');

    if host.is_empty() || host.contains('/') {
        return Err(GatewayError::invalid(
            PROP_UPLINK_BROKER_URL,
            format!("{} is not a broker host", url),
        ));
    }

    Ok(host.to_string())
}

/// 运行时参数（不属于宿主下发的配置快照）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    pub connect_timeout_ms: u64,
    pub keep_alive_secs: u64,
    pub downlink_host: String,
    pub reconnect_interval_ms: u64,
    pub retry_max_attempts: u32,
    pub retry_initial_backoff_ms: u64,
    pub retry_max_backoff_ms: u64,
    pub diagnostics_bind: Option<String>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            keep_alive_secs: 60,
            downlink_host: "localhost".to_string(),
            reconnect_interval_ms: 5_000,
            retry_max_attempts: 1,
            retry_initial_backoff_ms: 1_000,
            retry_max_backoff_ms: 30_000,
            diagnostics_bind: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct UplinkSection {
    access_token: Option<ConfigValue>,
    client_id: Option<ConfigValue>,
    broker_url: Option<ConfigValue>,
    broker_port: Option<ConfigValue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DownlinkSection {
    username: Option<ConfigValue>,
    port: Option<ConfigValue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PollingSection {
    interval_ms: Option<ConfigValue>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GatewayFile {
    uplink: UplinkSection,
    downlink: DownlinkSection,
    polling: PollingSection,
    runtime: RuntimeSettings,
}

impl GatewayFile {
    // 映射到宿主约定的键，缺失的键保持缺失，交给编排器拒绝
    fn into_configuration(self) -> Configuration {
        let entries = [
            (PROP_UPLINK_ACCESS_TOKEN, self.uplink.access_token),
            (PROP_UPLINK_CLIENT_ID, self.uplink.client_id),
            (PROP_UPLINK_BROKER_URL, self.uplink.broker_url),
            (PROP_UPLINK_BROKER_PORT, self.uplink.broker_port),
            (PROP_DOWNLINK_USERNAME, self.downlink.username),
            (PROP_DOWNLINK_PORT, self.downlink.port),
            (PROP_POLLING_INTERVAL_MS, self.polling.interval_ms),
        ];

        let entries: BTreeMap<String, ConfigValue> = entries
            .into_iter()
            .filter_map(|(key, value)| value.map(|value| (key.to_string(), value)))
            .collect();

        Configuration::new(entries)
    }
}

// 加载结果
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub configuration: Configuration,
    pub runtime: RuntimeSettings,
}

// 环境变量前缀，例如 GATEWAY_UPLINK__ACCESS_TOKEN
const ENV_PREFIX: &str = "GATEWAY";

// 必须保持字符串类型的环境变量，不做数值解析
const ENV_STRING_KEYS: [&str; 4] = [
    "GATEWAY_UPLINK__ACCESS_TOKEN",
    "GATEWAY_UPLINK__CLIENT_ID",
    "GATEWAY_UPLINK__BROKER_URL",
    "GATEWAY_DOWNLINK__USERNAME",
];

pub fn load_config(path: &str) -> Result<LoadedConfig> {
    // 加载 .env 文件
    dotenv().ok();

    let vars = std::env::vars()
        .filter(|(key, _)| key.starts_with(ENV_PREFIX))
        .collect();
    load_config_with_env(path, vars)
}

fn environment(vars: Map<String, String>) -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .source(Some(vars))
}

fn load_config_with_env(path: &str, vars: Map<String, String>) -> Result<LoadedConfig> {
    let string_vars: Map<String, String> = vars
        .iter()
        .filter(|(key, _)| ENV_STRING_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    let settings = Config::builder()
        // 配置文件（toml/yaml/json 均可），可以不存在
        .add_source(File::with_name(path).required(false))
        // 环境变量覆盖，端口与时间按数值解析
        .add_source(environment(vars).try_parsing(true))
        // 令牌、客户端 ID 等即使全是数字也保持字符串
        .add_source(environment(string_vars))
        .build()
        .with_context(|| format!("Failed to read gateway configuration from {}", path))?;

    let file: GatewayFile = settings
        .try_deserialize()
        .with_context(|| "Failed to deserialize gateway configuration")?;

    validate_runtime(&file.runtime)?;

    Ok(LoadedConfig {
        runtime: file.runtime.clone(),
        configuration: file.into_configuration(),
    })
}

fn validate_runtime(runtime: &RuntimeSettings) -> Result<()> {
    if runtime.connect_timeout_ms == 0 {
        return Err(anyhow::anyhow!("Connect timeout cannot be zero"));
    }

    if runtime.retry_max_attempts == 0 {
        return Err(anyhow::anyhow!("Retry attempts must be at least 1"));
    }

    if runtime.downlink_host.trim().is_empty() {
        return Err(anyhow::anyhow!("Downlink host cannot be empty"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn full_config() -> Configuration {
        Configuration::from_iter([
            (PROP_UPLINK_ACCESS_TOKEN, ConfigValue::from("A1_TEST_TOKEN")),
            (PROP_UPLINK_CLIENT_ID, ConfigValue::from("gatewayxm-01")),
            (PROP_UPLINK_BROKER_URL, ConfigValue::from("tcp://demo.thingsboard.io/")),
            (PROP_UPLINK_BROKER_PORT, ConfigValue::from(1883_i64)),
            (PROP_DOWNLINK_USERNAME, ConfigValue::from("sensor")),
            (PROP_DOWNLINK_PORT, ConfigValue::from(1884_i64)),
            (PROP_POLLING_INTERVAL_MS, ConfigValue::from(500_i64)),
        ])
    }

    fn without(config: &Configuration, key: &str) -> Configuration {
        config
            .iter()
            .filter(|(k, _)| *k != key)
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_gateway_params_from_full_config() {
        let params = GatewayParams::from_configuration(&full_config()).unwrap();

        assert_eq!(params.uplink.broker_host, "demo.thingsboard.io");
        assert_eq!(params.uplink.broker_port, 1883);
        assert_eq!(params.downlink.username, "sensor");
        assert_eq!(params.downlink.port, 1884);
        assert_eq!(params.polling.interval, Duration::from_millis(500));
    }

    #[test]
    fn test_missing_poll_interval_is_rejected() {
        let config = without(&full_config(), PROP_POLLING_INTERVAL_MS);
        let err = GatewayParams::from_configuration(&config).unwrap_err();

        assert!(matches!(
            err,
            GatewayError::ConfigurationInvalid { ref key, .. } if key == PROP_POLLING_INTERVAL_MS
        ));
    }

    #[test]
    fn test_mistyped_port_is_rejected() {
        let config: Configuration = full_config()
            .iter()
            .map(|(k, v)| {
                let value = if k == PROP_DOWNLINK_PORT {
                    ConfigValue::from("1884")
                } else {
                    v.clone()
                };
                (k.to_string(), value)
            })
            .collect();

        assert!(DownlinkParams::from_configuration(&config).is_err());
    }

    #[test]
    fn test_broker_host_parsing() {
        assert_eq!(parse_broker_host("broker.local").unwrap(), "broker.local");
        assert_eq!(parse_broker_host("mqtt://10.0.0.5").unwrap(), "10.0.0.5");
        assert!(parse_broker_host("ssl://broker.local").is_err());
        assert!(parse_broker_host("tcp://").is_err());
        assert!(parse_broker_host("tcp://broker.local/path").is_err());
    }

    #[test]
    fn test_load_config_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("gateway.toml")).unwrap();
        writeln!(
            file,
            r#"
[uplink]
access_token = "A1_TEST_TOKEN"
client_id = "gatewayxm-01"
broker_url = "demo.thingsboard.io"
broker_port = 1883

[downlink]
username = "sensor"
port = 1884

[runtime]
connect_timeout_ms = 2500
"#
        )
        .unwrap();

        let path = dir.path().join("gateway");
        let loaded = load_config_with_env(path.to_str().unwrap(), Map::new()).unwrap();

        assert_eq!(loaded.runtime.connect_timeout_ms, 2500);
        assert_eq!(loaded.runtime.downlink_host, "localhost");
        assert_eq!(
            loaded.configuration.get(PROP_UPLINK_BROKER_PORT),
            Some(&ConfigValue::Integer(1883))
        );
        // polling 段缺失，键保持缺失
        assert!(loaded.configuration.get(PROP_POLLING_INTERVAL_MS).is_none());
        assert_eq!(loaded.configuration.len(), 6);
    }

    #[test]
    fn test_numeric_env_overrides_keep_string_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway");

        let vars: Map<String, String> = [
            ("GATEWAY_UPLINK__ACCESS_TOKEN", "1234567890"),
            ("GATEWAY_UPLINK__CLIENT_ID", "42"),
            ("GATEWAY_UPLINK__BROKER_URL", "10.0.0.5"),
            ("GATEWAY_UPLINK__BROKER_PORT", "1883"),
            ("GATEWAY_DOWNLINK__USERNAME", "7"),
            ("GATEWAY_DOWNLINK__PORT", "1884"),
            ("GATEWAY_POLLING__INTERVAL_MS", "250"),
            ("GATEWAY_RUNTIME__CONNECT_TIMEOUT_MS", "3000"),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();

        let loaded = load_config_with_env(path.to_str().unwrap(), vars).unwrap();
        let config = &loaded.configuration;

        assert_eq!(
            config.get(PROP_UPLINK_ACCESS_TOKEN),
            Some(&ConfigValue::from("1234567890"))
        );
        assert_eq!(config.get(PROP_UPLINK_CLIENT_ID), Some(&ConfigValue::from("42")));
        assert_eq!(config.get(PROP_UPLINK_BROKER_PORT), Some(&ConfigValue::Integer(1883)));
        assert_eq!(loaded.runtime.connect_timeout_ms, 3000);

        let params = GatewayParams::from_configuration(config).unwrap();
        assert_eq!(params.uplink.device_token, "1234567890");
        assert_eq!(params.uplink.client_id, "42");
        assert_eq!(params.downlink.username, "7");
        assert_eq!(params.polling.interval, Duration::from_millis(250));
    }

    #[test]
    fn test_runtime_validation() {
        let mut runtime = RuntimeSettings::default();
        assert!(validate_runtime(&runtime).is_ok());

        runtime.retry_max_attempts = 0;
        assert!(validate_runtime(&runtime).is_err());
    }
}
