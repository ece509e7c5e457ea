//! GatewayXM 共享库：配置模型、错误类型与工具函数

pub mod config;
pub mod mqtt;
pub mod types;
pub mod utils;

pub use config::{
    load_config, DownlinkParams, GatewayParams, LoadedConfig, PollingParams, RuntimeSettings,
    UplinkParams,
};
pub use mqtt::{MqttError, MqttSessionConfig};
pub use types::*;
pub use utils::{generate_client_id, now_utc, redact_secret};
