use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use gatewayxm_shared::{now_utc, redact_secret, ConfigValue, Configuration, GatewayError, SECRET_KEYS};
use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use crate::connection::ConnectionState;
use crate::orchestrator::LifecycleState;

/// 网关状态快照，每次生命周期回调结束后发布
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    pub state: LifecycleState,
    pub uplink: ConnectionState,
    pub downlink: ConnectionState,
    pub polling: bool,
    pub last_outcome: Option<String>,
    #[serde(skip)]
    pub configuration: Option<Configuration>,
    pub updated_at: DateTime<Utc>,
}

impl GatewayStatus {
    pub fn initial() -> Self {
        Self {
            state: LifecycleState::Stopped,
            uplink: ConnectionState::Disconnected,
            downlink: ConnectionState::Disconnected,
            polling: false,
            last_outcome: None,
            configuration: None,
            updated_at: now_utc(),
        }
    }

    /// 与编排器的 `get_config_value` 语义一致
    pub fn config_value(&self, key: &str) -> Result<Option<ConfigValue>, GatewayError> {
        self.configuration
            .as_ref()
            .map(|config| config.get(key).cloned())
            .ok_or(GatewayError::ConfigurationMissing)
    }
}

type StatusState = watch::Receiver<GatewayStatus>;

pub fn router(status: StatusState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/config/{key}", get(config_value))
        .with_state(status)
}

pub async fn serve(bind_address: &str, status: StatusState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .with_context(|| format!("Failed to bind diagnostics server on {}", bind_address))?;

    info!("Diagnostics server listening on: {}", bind_address);
    info!("  - Health check: http://{}/health", bind_address);
    info!("  - Config values: http://{}/config/{{key}}", bind_address);

    axum::serve(listener, router(status))
        .await
        .with_context(|| "Diagnostics server error")?;

    Ok(())
}

// 健康检查端点
async fn health(State(status): State<StatusState>) -> Json<GatewayStatus> {
    let snapshot = status.borrow().clone();
    Json(snapshot)
}

// 配置查询端点，凭据脱敏
async fn config_value(State(status): State<StatusState>, Path(key): Path<String>) -> Response {
    let result = status.borrow().config_value(&key);

    match result {
        Ok(Some(value)) => {
            let value = if SECRET_KEYS.contains(&key.as_str()) {
                ConfigValue::String(redact_secret(&value.to_string()))
            } else {
                value
            };
            Json(serde_json::json!({ "key": key, "value": value })).into_response()
        }
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": format!("Unknown configuration key {}", key) })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}
