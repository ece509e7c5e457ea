use serde::{Deserialize, Serialize};
use std::time::Duration;

// MQTT 会话配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttSessionConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u64,
    pub clean_session: bool,
    pub reconnect_interval_ms: u64,
}

impl MqttSessionConfig {
    pub fn new(broker_host: impl Into<String>, broker_port: u16, client_id: impl Into<String>) -> Self {
        Self {
            broker_host: broker_host.into(),
            broker_port,
            client_id: client_id.into(),
            ..Self::default()
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.username = Some(username.into());
        self.password = password;
        self
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.broker_host, self.broker_port)
    }
}

impl Default for MqttSessionConfig {
    fn default() -> Self {
        Self {
            broker_host: "localhost".to_string(),
            broker_port: 1883,
            client_id: crate::utils::generate_client_id("gatewayxm"),
            username: None,
            password: None,
            keep_alive_secs: 60,
            clean_session: true,
            reconnect_interval_ms: 5000,
        }
    }
}

// MQTT 错误类型
#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Connection refused by broker: {0}")]
    Rejected(String),

    #[error("Session closed before the broker answered")]
    Closed,
}
