//! GatewayXM 生命周期编排
//!
//! 按依赖顺序启停三个子系统：云端上行 MQTT、本地传感网下行 MQTT、现场总线轮询。

pub mod connection;
pub mod diagnostics;
pub mod downlink;
pub mod host;
pub mod mqtt_session;
pub mod orchestrator;
pub mod poller;
pub mod uplink;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::{connect_with_timeout, ConnectionHandle, ConnectionState, PollingControl};
pub use diagnostics::GatewayStatus;
pub use downlink::DownlinkConnector;
pub use host::{build_gateway, GatewayHost};
pub use orchestrator::{GatewayOrchestrator, LifecycleState, OrchestratorSettings, RetryPolicy};
pub use poller::{FieldBus, IdleFieldBus, PollingDriver};
pub use uplink::UplinkConnector;
