//! Mocheong - 购物助手网关服务器
//!
//! 入口：初始化日志、加载配置、装配编排引擎，启动 WebSocket 网关直到 Ctrl+C / SIGTERM。
//!
//! 运行方式：
//! ```bash
//! cargo run -- [config.toml]
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use mocheong::config::load_config;
use mocheong::core::{
    run_with_graceful_shutdown, OrchestratorCleanup, ShutdownCoordinator, ShutdownManager,
};
use mocheong::gateway::{Gateway, GatewayConfig};
use mocheong::{observability, runtime};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load configuration")?;
    tracing::info!(app = %cfg.app.name, "Configuration loaded");

    let orchestrator = runtime::bootstrap(&cfg)
        .await
        .context("Failed to start orchestrator")?;

    let gateway = Arc::new(
        Gateway::new(GatewayConfig::from_app(&cfg), Arc::clone(&orchestrator))
            .context("Failed to create gateway")?,
    );

    let shutdown = Arc::new(ShutdownManager::new());
    let mut coordinator = ShutdownCoordinator::new(Arc::clone(&shutdown));
    coordinator.register(OrchestratorCleanup::new(orchestrator));

    tracing::info!("Press Ctrl+C to stop");
    let token = shutdown.token();
    let grace = gateway.config().drain_timeout + Duration::from_secs(1);
    run_with_graceful_shutdown(
        Arc::clone(&shutdown),
        grace,
        async move { gateway.serve(token).await },
        move || async move { coordinator.run_cleanup().await },
    )
    .await;

    Ok(())
}
