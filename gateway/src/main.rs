use anyhow::{Context, Result};
use gatewayxm::{build_gateway, diagnostics, GatewayHost, IdleFieldBus};
use gatewayxm_shared::load_config;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting GatewayXM...");

    // 加载配置
    let config_path = std::env::var("GATEWAY_CONFIG").unwrap_or_else(|_| "config/gateway".to_string());
    let loaded = load_config(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;
    info!("Runtime settings: {:?}", loaded.runtime);

    let orchestrator = build_gateway(&loaded.runtime, Arc::new(IdleFieldBus));

    // 诊断服务只读取状态快照
    if let Some(bind_address) = loaded.runtime.diagnostics_bind.clone() {
        let status = orchestrator.subscribe();
        tokio::spawn(async move {
            if let Err(e) = diagnostics::serve(&bind_address, status).await {
                error!("Diagnostics server stopped: {:#}", e);
            }
        });
    }

    GatewayHost::new(orchestrator, config_path)
        .run(Some(loaded.configuration))
        .await?;

    info!("GatewayXM stopped");
    Ok(())
}
