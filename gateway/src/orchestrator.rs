use futures::FutureExt;
use gatewayxm_shared::{
    now_utc, redact_secret, ConfigValue, Configuration, DownlinkParams, GatewayError,
    GatewayParams, RuntimeSettings, Subsystem, UplinkParams, SECRET_KEYS,
};
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::connection::{connect_with_timeout, ConnectionHandle, PollingControl};
use crate::diagnostics::GatewayStatus;

/// 编排器生命周期状态
///
/// `Starting` 与 `StoppingOnFailure` 只在一次配置更新的控制流内部短暂出现，
/// 生命周期回调返回时状态总是 `Stopped` 或 `Running`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    StoppingOnFailure,
}

/// 启动失败后的重试策略（指数退避，有上限）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// 只尝试一次，失败后等待下一次配置下发
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// 第 `attempt` 次失败之后的等待时间
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub connect_timeout: Duration,
    pub retry: RetryPolicy,
}

impl OrchestratorSettings {
    pub fn from_runtime(runtime: &RuntimeSettings) -> Self {
        Self {
            connect_timeout: Duration::from_millis(runtime.connect_timeout_ms),
            retry: RetryPolicy {
                max_attempts: runtime.retry_max_attempts.max(1),
                initial_backoff: Duration::from_millis(runtime.retry_initial_backoff_ms),
                max_backoff: Duration::from_millis(runtime.retry_max_backoff_ms),
            },
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            retry: RetryPolicy::none(),
        }
    }
}

/// 网关生命周期编排器
///
/// 按固定顺序启动 上行 -> 下行 -> 轮询，按相反顺序停止。
/// 任何一步启动失败都会完整停止所有子系统，不会留下半连接状态。
pub struct GatewayOrchestrator<U, D, P>
where
    U: ConnectionHandle<Params = UplinkParams>,
    D: ConnectionHandle<Params = DownlinkParams>,
    P: PollingControl,
{
    uplink: U,
    downlink: D,
    poller: P,
    settings: OrchestratorSettings,
    state: LifecycleState,
    configuration: Option<Configuration>,
    last_outcome: Option<String>,
    status: watch::Sender<GatewayStatus>,
}

impl<U, D, P> GatewayOrchestrator<U, D, P>
where
    U: ConnectionHandle<Params = UplinkParams>,
    D: ConnectionHandle<Params = DownlinkParams>,
    P: PollingControl,
{
    pub fn new(uplink: U, downlink: D, poller: P, settings: OrchestratorSettings) -> Self {
        let (status, _) = watch::channel(GatewayStatus::initial());
        Self {
            uplink,
            downlink,
            poller,
            settings,
            state: LifecycleState::Stopped,
            configuration: None,
            last_outcome: None,
            status,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// 订阅状态快照（诊断用，不阻塞生命周期回调）
    pub fn subscribe(&self) -> watch::Receiver<GatewayStatus> {
        self.status.subscribe()
    }

    pub fn uplink(&self) -> &U {
        &self.uplink
    }

    pub fn downlink(&self) -> &D {
        &self.downlink
    }

    pub fn poller(&self) -> &P {
        &self.poller
    }

    /// 读取当前配置值；从未下发过配置时返回 `ConfigurationMissing`
    pub fn get_config_value(&self, key: &str) -> Result<Option<&ConfigValue>, GatewayError> {
        self.configuration
            .as_ref()
            .map(|config| config.get(key))
            .ok_or(GatewayError::ConfigurationMissing)
    }

    /// 组件创建，尚无配置
    pub fn on_activate(&mut self) {
        self.state = LifecycleState::Stopped;
        info!("Gateway activated.");
        self.publish_status();
    }

    /// 组件创建时已有配置，等同于一次配置更新
    pub async fn on_activate_with_config(&mut self, config: Configuration) -> Result<(), GatewayError> {
        info!("Gateway activated with configuration.");
        self.on_configuration_changed(config).await
    }

    /// 配置更新：总是先停后启，不做热更新
    pub async fn on_configuration_changed(&mut self, config: Configuration) -> Result<(), GatewayError> {
        info!("Gateway configuration updated.");

        if self.state == LifecycleState::Running {
            self.stop_all().await;
            self.state = LifecycleState::Stopped;
        }

        log_properties(&config);
        self.configuration = Some(config.clone());

        let result = self.start_with_retry(&config).await;
        match &result {
            Ok(()) => {
                info!("Gateway started.");
                self.last_outcome = Some("started".to_string());
            }
            Err(e) => {
                error!("Could not start gateway: {}", e);
                self.last_outcome = Some(e.to_string());
            }
        }

        self.publish_status();
        result
    }

    /// 组件永久关闭：无条件停止全部子系统
    pub async fn on_deactivate(&mut self) {
        self.stop_all().await;
        self.state = LifecycleState::Stopped;
        self.last_outcome = Some("deactivated".to_string());
        self.publish_status();
        info!("Gateway deactivated.");
    }

    async fn start_with_retry(&mut self, config: &Configuration) -> Result<(), GatewayError> {
        // 配置不完整时不触碰任何子系统
        let params = GatewayParams::from_configuration(config).map_err(|e| {
            warn!("Configuration rejected, no subsystem touched: {}", e);
            e
        })?;

        let max_attempts = self.settings.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let err = match self.start_attempt(&params).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            if attempt >= max_attempts || !err.is_retryable() {
                return Err(err);
            }

            let delay = self.settings.retry.backoff(attempt);
            warn!(
                "Start attempt {}/{} failed: {}, retrying in {:?}",
                attempt, max_attempts, err, delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    // 一次完整的启动尝试；失败时回滚到全部停止
    async fn start_attempt(&mut self, params: &GatewayParams) -> Result<(), GatewayError> {
        self.state = LifecycleState::Starting;
        let mut started = Vec::new();

        match self.start_all(params, &mut started).await {
            Ok(()) => {
                self.state = LifecycleState::Running;
                Ok(())
            }
            Err(cause) => {
                self.state = LifecycleState::StoppingOnFailure;
                self.stop_all().await;
                self.state = LifecycleState::Stopped;

                if started.is_empty() {
                    Err(cause)
                } else {
                    warn!("Rolled back partially started subsystems: {:?}", started);
                    Err(GatewayError::PartialStartRolledBack {
                        rolled_back: started,
                        cause: Box::new(cause),
                    })
                }
            }
        }
    }

    async fn start_all(
        &mut self,
        params: &GatewayParams,
        started: &mut Vec<Subsystem>,
    ) -> Result<(), GatewayError> {
        let timeout = self.settings.connect_timeout;

        // 上行携带设备身份，必须先于下行
        connect_with_timeout(&mut self.uplink, &params.uplink, timeout).await?;
        started.push(Subsystem::Uplink);

        connect_with_timeout(&mut self.downlink, &params.downlink, timeout).await?;
        started.push(Subsystem::Downlink);

        // 遥测通路就绪后才开始轮询
        self.poller.start(&params.polling).await;
        started.push(Subsystem::Polling);

        Ok(())
    }

    // 逆序停止，单个子系统失败不影响其余子系统
    async fn stop_all(&mut self) {
        debug!("Stopping all subsystems");

        if AssertUnwindSafe(self.poller.stop()).catch_unwind().await.is_err() {
            error!("Stopping {} panicked, continuing teardown", Subsystem::Polling);
        }
        if AssertUnwindSafe(self.downlink.disconnect()).catch_unwind().await.is_err() {
            error!("Disconnecting {} panicked, continuing teardown", Subsystem::Downlink);
        }
        if AssertUnwindSafe(self.uplink.disconnect()).catch_unwind().await.is_err() {
            error!("Disconnecting {} panicked, continuing teardown", Subsystem::Uplink);
        }
    }

    fn publish_status(&self) {
        self.status.send_replace(GatewayStatus {
            state: self.state,
            uplink: self.uplink.state(),
            downlink: self.downlink.state(),
            polling: self.poller.is_running(),
            last_outcome: self.last_outcome.clone(),
            configuration: self.configuration.clone(),
            updated_at: now_utc(),
        });
    }
}

fn log_properties(config: &Configuration) {
    for (key, value) in config.iter() {
        let shown = if SECRET_KEYS.contains(&key) {
            redact_secret(&value.to_string())
        } else {
            value.to_string()
        };
        info!("New property - {} = {} of type {}", key, shown, value.type_name());
    }
}
