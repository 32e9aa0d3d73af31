// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::connection::handle_socket;
use crate::state::ServerState;

/// Build the HTTP router: `GET /ws` upgrades to the event socket,
/// `GET /stats` exposes orchestrator counters for debugging.
pub fn router(state: Arc<ServerState>) -> Router {
    let mut router = Router::new()
        .route("/ws", get(ws_handler))
        .route("/stats", get(stats_handler));
    if state.config.server.permissive_cors {
        router = router.layer(CorsLayer::permissive());
    }
    router.with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<ServerState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn stats_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let stats: Vec<_> = state.pools().iter().map(|p| p.stats()).collect();
    Json(serde_json::json!({
        "connections": stats.len(),
        "limiter": {
            "capacity": state.limiter.capacity(),
            "available": state.limiter.available(),
            "waiting": state.limiter.waiting(),
        },
        "pools": stats,
    }))
}

/// Bind and serve until `shutdown` resolves, then clean up every pool.
pub async fn serve(
    state: Arc<ServerState>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listen = state.config.server.listen.clone();
    let listener = tokio::net::TcpListener::bind(&listen).await?;
    info!(%listen, "listening");

    let app = router(Arc::clone(&state));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    state.shutdown().await;
    Ok(())
}
