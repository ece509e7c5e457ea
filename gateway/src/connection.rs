use async_trait::async_trait;
use gatewayxm_shared::{GatewayError, PollingParams, Subsystem};
use serde::Serialize;
use std::fmt::Debug;
use std::time::Duration;
use tracing::{debug, warn};

/// 子系统连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// 统一的连接能力
///
/// 上行、下行连接器都实现该接口，编排器按同一方式处理。
/// 所有失败都通过 `connect` 的布尔返回值报告，实现不得向外抛错。
#[async_trait]
pub trait ConnectionHandle: Send {
    type Params: Debug + Send + Sync;

    fn subsystem(&self) -> Subsystem;

    /// 建立会话，成功返回 true
    async fn connect(&mut self, params: &Self::Params) -> bool;

    /// 断开会话；已断开时为空操作
    async fn disconnect(&mut self);

    fn state(&self) -> ConnectionState;

    /// 仅用于诊断，编排器的控制流不依赖它
    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }
}

/// 轮询驱动的启停能力
#[async_trait]
pub trait PollingControl: Send {
    async fn start(&mut self, params: &PollingParams);

    /// 返回时轮询任务已退出，不会再触发
    async fn stop(&mut self);

    fn is_running(&self) -> bool;
}

/// 带超时的连接
///
/// 超时后正在进行的连接 future 被丢弃，由随后的 `disconnect` 负责清理。
pub async fn connect_with_timeout<H>(
    handle: &mut H,
    params: &H::Params,
    timeout: Duration,
) -> Result<(), GatewayError>
where
    H: ConnectionHandle + ?Sized,
{
    let subsystem = handle.subsystem();
    debug!("Connecting {} (timeout {:?})", subsystem, timeout);

    match tokio::time::timeout(timeout, handle.connect(params)).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(GatewayError::ConnectionFailed(subsystem)),
        Err(_) => {
            warn!("Connecting {} timed out after {:?}", subsystem, timeout);
            Err(GatewayError::Timeout {
                subsystem,
                after_ms: timeout.as_millis() as u64,
            })
        }
    }
}
