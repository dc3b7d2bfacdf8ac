//! Chat Relay Gateway - stateful, streaming conversations with a remote model.
//!
//! This crate provides the HTTP relay between chat clients and the model:
//! - Per-session conversation history with bounded growth
//! - NDJSON streaming of partial model output
//! - Cancellation-safe commit of completed turns
//!
//! ## Architecture
//!
//! ```text
//! Client → POST /api/chat → Relay (validate → truncate → stream) → Model
//!                              ↓
//!                     HistoryStore.commit
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod frame;
pub mod provider;
pub mod relay;
pub mod routes;
pub mod session;

pub use frame::{parse_ndjson, StreamFrame, NDJSON_CONTENT_TYPE};
pub use provider::{
    GeminiProvider, GenerationOptions, ModelClient, ModelStream, ProviderError, ScriptedClient,
};
pub use relay::{ChatRequest, FrameSink, PreparedTurn, Relay, RelayState, TurnOutcome, TurnReport};
pub use routes::AppState;
pub use session::{HistoryStore, Role, Turn};

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use relay_common::config::Config;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;

/// Build the relay router backed by the configured Gemini client.
pub fn build_router(config: &Config) -> Router {
    let client = GeminiProvider::from_config(&config.model);
    build_router_with_client(config, Arc::new(client))
}

/// Build the relay router around an arbitrary model client.
pub fn build_router_with_client(config: &Config, client: Arc<dyn ModelClient>) -> Router {
    build_router_with_store(config, HistoryStore::new(config.session.max_turns), client)
}

/// Build the relay router around an existing store and model client.
pub fn build_router_with_store(
    config: &Config,
    store: HistoryStore,
    client: Arc<dyn ModelClient>,
) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let state = AppState {
        relay: Relay::new(store, client),
    };

    routes::build_routes(state)
        .layer(RequestBodyLimitLayer::new(config.server.body_limit_bytes))
        .layer(cors)
}

/// Start the relay server and serve until Ctrl+C.
pub async fn start_server(config: &Config) -> anyhow::Result<()> {
    let addr = SocketAddr::from((
        config.server.bind.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));

    let router = build_router(config);

    tracing::info!("Starting chat relay on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Chat relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C, shutting down"),
        Err(e) => tracing::error!("Failed to listen for Ctrl+C: {}", e),
    }
}
