use std::net::SocketAddr;
use std::sync::Arc;

use threadrun_agents::ToolRegistry;
use threadrun_common::Result;
use threadrun_config::AppConfig;
use tokio::net::TcpListener;
use tracing::info;

use crate::router::build_router;
use crate::state::AppState;

pub struct GatewayServer {
    state: Arc<AppState>,
}

impl GatewayServer {
    pub fn new(config: AppConfig, tools: ToolRegistry) -> Result<Self> {
        Ok(Self {
            state: Arc::new(AppState::from_config(config, tools)?),
        })
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Serve until ctrl-c, letting in-flight turns finish.
    pub async fn run(self) -> Result<()> {
        let gateway = &self.state.config.gateway;
        let addr = format!("{}:{}", gateway.host, gateway.port);
        let listener = TcpListener::bind(&addr).await?;
        let local: SocketAddr = listener.local_addr()?;

        info!(
            tools = ?self.state.orchestrator.tools().names(),
            "threadrun listening on http://{local}"
        );

        let app = build_router(self.state);
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("threadrun stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown signal received");
    }
}
