use anyhow::Result;
use gatewayxm_shared::{load_config, Configuration, DownlinkParams, RuntimeSettings, UplinkParams};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::connection::{ConnectionHandle, PollingControl};
use crate::downlink::DownlinkConnector;
use crate::orchestrator::{GatewayOrchestrator, OrchestratorSettings};
use crate::poller::{FieldBus, PollingDriver};
use crate::uplink::UplinkConnector;

/// 使用 MQTT 连接器与给定现场总线组装编排器
pub fn build_gateway<F: FieldBus>(
    runtime: &RuntimeSettings,
    bus: Arc<F>,
) -> GatewayOrchestrator<UplinkConnector, DownlinkConnector, PollingDriver<F>> {
    GatewayOrchestrator::new(
        UplinkConnector::new(runtime),
        DownlinkConnector::new(runtime),
        PollingDriver::new(bus),
        OrchestratorSettings::from_runtime(runtime),
    )
}

// 宿主事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HostEvent {
    Reload,
    Shutdown,
}

/// 宿主适配层
///
/// 所有生命周期回调都在同一个任务里顺序执行，回调之间不会并发或重入。
pub struct GatewayHost<U, D, P>
where
    U: ConnectionHandle<Params = UplinkParams>,
    D: ConnectionHandle<Params = DownlinkParams>,
    P: PollingControl,
{
    orchestrator: GatewayOrchestrator<U, D, P>,
    config_path: String,
}

impl<U, D, P> GatewayHost<U, D, P>
where
    U: ConnectionHandle<Params = UplinkParams>,
    D: ConnectionHandle<Params = DownlinkParams>,
    P: PollingControl,
{
    pub fn new(orchestrator: GatewayOrchestrator<U, D, P>, config_path: impl Into<String>) -> Self {
        Self {
            orchestrator,
            config_path: config_path.into(),
        }
    }

    pub fn orchestrator(&self) -> &GatewayOrchestrator<U, D, P> {
        &self.orchestrator
    }

    /// 组件创建；已有配置时随即做一次配置更新
    pub async fn activate(&mut self, initial: Option<Configuration>) {
        self.orchestrator.on_activate();

        let Some(config) = initial.filter(|config| !config.is_empty()) else {
            info!("No configuration available yet, waiting for an update");
            return;
        };

        if let Err(e) = self.orchestrator.on_activate_with_config(config).await {
            warn!("Gateway stays stopped until the next configuration update: {}", e);
        }
    }

    /// 重新读取配置文件并下发；读取失败时保持现状
    pub async fn reload(&mut self) {
        let loaded = match load_config(&self.config_path) {
            Ok(loaded) => loaded,
            Err(e) => {
                error!("Ignoring configuration reload: {:#}", e);
                return;
            }
        };

        if let Err(e) = self.orchestrator.on_configuration_changed(loaded.configuration).await {
            warn!("Gateway stays stopped until the next configuration update: {}", e);
        }
    }

    pub async fn deactivate(&mut self) {
        self.orchestrator.on_deactivate().await;
    }

    /// 运行直到收到关闭信号
    pub async fn run(mut self, initial: Option<Configuration>) -> Result<()> {
        // 先接管信号，首次连接期间收到的关闭请求也会走 deactivate
        let mut signals = HostSignals::new()?;
        self.activate(initial).await;

        loop {
            match signals.next().await {
                HostEvent::Reload => {
                    info!("Reload requested, reading {}", self.config_path);
                    self.reload().await;
                }
                HostEvent::Shutdown => {
                    info!("Shutdown requested");
                    break;
                }
            }
        }

        self.deactivate().await;
        Ok(())
    }
}

#[cfg(unix)]
struct HostSignals {
    hangup: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl HostSignals {
    fn new() -> Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            hangup: signal(SignalKind::hangup())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    async fn next(&mut self) -> HostEvent {
        tokio::select! {
            _ = self.hangup.recv() => HostEvent::Reload,
            _ = self.terminate.recv() => HostEvent::Shutdown,
            _ = tokio::signal::ctrl_c() => HostEvent::Shutdown,
        }
    }
}

#[cfg(not(unix))]
struct HostSignals;

#[cfg(not(unix))]
impl HostSignals {
    fn new() -> Result<Self> {
        Ok(Self)
    }

    async fn next(&mut self) -> HostEvent {
        let _ = tokio::signal::ctrl_c().await;
        HostEvent::Shutdown
    }
}
