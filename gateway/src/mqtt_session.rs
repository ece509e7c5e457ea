use gatewayxm_shared::{MqttError, MqttSessionConfig};
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, Incoming, MqttOptions, Outgoing};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::connection::ConnectionState;

// 关闭会话时等待事件循环退出的时间
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// 单个 MQTT 会话：客户端加上后台事件循环任务
pub struct MqttSession {
    name: &'static str,
    state: Arc<watch::Sender<ConnectionState>>,
    client: Option<AsyncClient>,
    event_loop_task: Option<JoinHandle<()>>,
}

impl MqttSession {
    pub fn new(name: &'static str) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            name,
            state: Arc::new(state),
            client: None,
            event_loop_task: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// 建立会话并等待 broker 的第一个 ConnAck
    pub async fn open(&mut self, config: &MqttSessionConfig) -> Result<(), MqttError> {
        self.close().await;

        let mut mqtt_options = MqttOptions::new(
            config.client_id.clone(),
            &config.broker_host,
            config.broker_port,
        );

        // 设置认证信息
        if let Some(username) = &config.username {
            mqtt_options.set_credentials(username, config.password.as_deref().unwrap_or(""));
        }

        // 设置保持连接
        mqtt_options.set_keep_alive(config.keep_alive());
        mqtt_options.set_clean_session(config.clean_session);

        let (client, event_loop) = AsyncClient::new(mqtt_options, 10);
        let (ready_tx, ready_rx) = oneshot::channel();

        info!("Opening {} MQTT session to {}", self.name, config.endpoint());
        self.state.send_replace(ConnectionState::Connecting);

        // 先保存句柄，连接被取消时 close() 仍能清理
        self.event_loop_task = Some(tokio::spawn(run_event_loop(
            self.name,
            event_loop,
            self.state.clone(),
            ready_tx,
            config.reconnect_interval(),
        )));
        self.client = Some(client);

        let outcome = match ready_rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(MqttError::Closed),
        };

        if outcome.is_err() {
            self.close().await;
        }

        outcome
    }

    /// 关闭会话；未打开时为空操作
    pub async fn close(&mut self) {
        let Some(client) = self.client.take() else {
            return;
        };

        if let Err(e) = client.disconnect().await {
            debug!("{} MQTT disconnect request not delivered: {}", self.name, e);
        }

        if let Some(mut task) = self.event_loop_task.take() {
            if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
                warn!("{} MQTT event loop did not exit in time, aborting", self.name);
                task.abort();
            }
        }

        self.state.send_replace(ConnectionState::Disconnected);
        info!("{} MQTT session closed", self.name);
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        if let Some(task) = self.event_loop_task.take() {
            task.abort();
        }
    }
}

// 运行事件循环
async fn run_event_loop(
    name: &'static str,
    mut event_loop: EventLoop,
    state: Arc<watch::Sender<ConnectionState>>,
    ready: oneshot::Sender<Result<(), MqttError>>,
    reconnect_interval: Duration,
) {
    let mut ready = Some(ready);

    loop {
        match event_loop.poll().await {
            // 被拒绝的 ConnAck 由 poll 以 ConnectionRefused 错误返回
            Ok(Event::Incoming(Incoming::ConnAck(connack))) => {
                info!("{} MQTT connection established: {:?}", name, connack);
                state.send_replace(ConnectionState::Connected);
                if let Some(ready) = ready.take() {
                    let _ = ready.send(Ok(()));
                }
            }
            Ok(Event::Incoming(Incoming::Disconnect)) => {
                warn!("{} MQTT broker initiated disconnect", name);
                state.send_replace(ConnectionState::Connecting);
            }
            Ok(Event::Incoming(packet)) => {
                debug!("{} MQTT incoming: {:?}", name, packet);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("{} MQTT disconnect sent", name);
                state.send_replace(ConnectionState::Disconnected);
                return;
            }
            Ok(Event::Outgoing(outgoing)) => {
                debug!("{} MQTT outgoing: {:?}", name, outgoing);
            }
            Err(e) => {
                // 首次连接失败直接上报，不做重连
                if let Some(ready) = ready.take() {
                    error!("{} MQTT connection error: {}", name, e);
                    state.send_replace(ConnectionState::Disconnected);
                    let _ = ready.send(Err(session_error(e)));
                    return;
                }

                warn!(
                    "{} MQTT connection lost: {}, reconnecting in {:?}",
                    name, e, reconnect_interval
                );
                state.send_replace(ConnectionState::Connecting);
                tokio::time::sleep(reconnect_interval).await;
            }
        }
    }
}

fn session_error(error: ConnectionError) -> MqttError {
    match error {
        ConnectionError::ConnectionRefused(code) => MqttError::Rejected(format!("{:?}", code)),
        other => MqttError::Connection(other.to_string()),
    }
}
