use std::net::SocketAddr;
use std::sync::Arc;

use adk_pipe_identity::TokenChain;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use app::{build_router, AppState};
use config::PipeConfig;

pub mod app;
pub mod config;
pub mod session;
pub mod translate;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub pipe: PipeConfig,
}

pub async fn run_server(
    config: ServerConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    config.pipe.validate()?;

    let state = Arc::new(AppState::new(config.pipe, TokenChain::standard()));
    let app = build_router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %addr, "adk-pipe listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
