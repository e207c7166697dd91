//! Main HTTP gateway server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, instrument};

use atlas_orchestrator::Orchestrator;

use crate::{agents_api, chat_api, health_api, intent_api};

/// Application state shared across routes.
#[derive(Clone)]
pub struct GatewayState {
    pub orchestrator: Arc<Orchestrator>,
    pub started_at: Instant,
}

impl GatewayState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            started_at: Instant::now(),
        }
    }
}

pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/chat", post(chat_api::chat))
        .route("/chat/continue", post(chat_api::continue_chat))
        .route("/intent", get(intent_api::get_intent).post(intent_api::post_intent))
        .route("/agents", get(agents_api::list_agents))
        .route("/providers/state", get(health_api::providers_state))
        .route("/health", get(health_api::get_health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve on an already bound listener.
pub async fn serve(listener: TcpListener, state: GatewayState) -> Result<()> {
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

#[instrument(skip(state))]
pub async fn start_server(addr: SocketAddr, state: GatewayState) -> Result<()> {
    let listener = TcpListener::bind(&addr).await?;
    info!(
        addr = %addr,
        mode = %state.orchestrator.execution_mode(),
        "Atlas gateway listening"
    );
    serve(listener, state).await
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}
