use async_trait::async_trait;
use gatewayxm_shared::{
    generate_client_id, DownlinkParams, MqttSessionConfig, RuntimeSettings, Subsystem,
};
use tracing::{error, info};

use crate::connection::{ConnectionHandle, ConnectionState};
use crate::mqtt_session::MqttSession;

/// 本地传感网下行连接器，连接本机 broker
pub struct DownlinkConnector {
    session: MqttSession,
    host: String,
    client_id: String,
    keep_alive_secs: u64,
    reconnect_interval_ms: u64,
}

impl DownlinkConnector {
    pub fn new(runtime: &RuntimeSettings) -> Self {
        Self {
            session: MqttSession::new("downlink"),
            host: runtime.downlink_host.clone(),
            client_id: generate_client_id("gatewayxm-downlink"),
            keep_alive_secs: runtime.keep_alive_secs,
            reconnect_interval_ms: runtime.reconnect_interval_ms,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn session_config(&self, params: &DownlinkParams) -> MqttSessionConfig {
        MqttSessionConfig {
            keep_alive_secs: self.keep_alive_secs,
            reconnect_interval_ms: self.reconnect_interval_ms,
            ..MqttSessionConfig::new(&self.host, params.port, &self.client_id)
                .with_credentials(&params.username, None)
        }
    }
}

#[async_trait]
impl ConnectionHandle for DownlinkConnector {
    type Params = DownlinkParams;

    fn subsystem(&self) -> Subsystem {
        Subsystem::Downlink
    }

    async fn connect(&mut self, params: &DownlinkParams) -> bool {
        info!(
            "Connecting downlink to {}:{} as user {}",
            self.host, params.port, params.username
        );

        match self.session.open(&self.session_config(params)).await {
            Ok(()) => true,
            Err(e) => {
                error!("Downlink connection failed: {}", e);
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
