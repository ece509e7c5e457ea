use async_trait::async_trait;
use gatewayxm_shared::{redact_secret, MqttSessionConfig, RuntimeSettings, Subsystem, UplinkParams};
use tracing::{error, info};

use crate::connection::{ConnectionHandle, ConnectionState};
use crate::mqtt_session::MqttSession;

/// 云端遥测上行连接器
///
/// 设备令牌作为 MQTT 用户名，密码为空；客户端 ID 直接使用配置值。
pub struct UplinkConnector {
    session: MqttSession,
    keep_alive_secs: u64,
    reconnect_interval_ms: u64,
}

impl UplinkConnector {
    pub fn new(runtime: &RuntimeSettings) -> Self {
        Self {
            session: MqttSession::new("uplink"),
            keep_alive_secs: runtime.keep_alive_secs,
            reconnect_interval_ms: runtime.reconnect_interval_ms,
        }
    }

    fn session_config(&self, params: &UplinkParams) -> MqttSessionConfig {
        MqttSessionConfig {
            keep_alive_secs: self.keep_alive_secs,
            reconnect_interval_ms: self.reconnect_interval_ms,
            ..MqttSessionConfig::new(&params.broker_host, params.broker_port, &params.client_id)
                .with_credentials(&params.device_token, None)
        }
    }
}

#[async_trait]
impl ConnectionHandle for UplinkConnector {
    type Params = UplinkParams;

    fn subsystem(&self) -> Subsystem {
        Subsystem::Uplink
    }

    async fn connect(&mut self, params: &UplinkParams) -> bool {
        info!(
            "Connecting uplink to {}:{} as {} (token {})",
            params.broker_host,
            params.broker_port,
            params.client_id,
            redact_secret(&params.device_token)
        );

        match self.session.open(&self.session_config(params)).await {
            Ok(()) => true,
            Err(e) => {
                error!("Uplink connection failed: {}", e);
                false
            }
        }
    }

    async fn disconnect(&mut self) {
        self.session.close().await;
    }

    fn state(&self) -> ConnectionState {
        self.session.state()
    }
}
