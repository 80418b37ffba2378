use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use trellis_core::config::GatewayConfig;

use crate::routes;
use crate::state::AppState;

/// Build the HTTP router over shared state.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(routes::health))
        .route("/api/agents", get(routes::list_agents))
        .route("/api/workflows/execute", post(routes::execute_workflow))
        .route("/api/executions", get(routes::list_executions))
        .route("/api/executions/{id}", delete(routes::cancel_execution))
        .route("/api/executions/{id}/logs", get(routes::execution_logs))
        .route("/api/logs", get(routes::recent_logs))
        .route("/api/logs/stats", get(routes::log_stats))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// HTTP gateway server built on axum.
pub struct GatewayServer {
    config: GatewayConfig,
    state: Arc<AppState>,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    /// Serve until `shutdown` fires, then cancel in-flight runs and release
    /// every session still held.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let app = router(self.state.clone());

        let listener = TcpListener::bind(&self.config.bind).await?;
        info!(bind = %self.config.bind, "Gateway listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        self.state.running.cancel_all();
        if let Some(sessions) = &self.state.sessions {
            sessions.release_all().await;
        }
        info!("Gateway shut down");
        Ok(())
    }
}
