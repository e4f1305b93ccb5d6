//! Axum WebSocket upgrade handler.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;

use super::connection::run_connection;
use crate::app_state::AppState;
use crate::domain::Session;

/// `GET /`: upgrades a client connection and gives it its own session.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let config = Arc::clone(&state.session_config);

    ws.on_upgrade(move |socket| async move {
        let (session, outbound) = Session::new(peer.to_string(), config);
        tracing::debug!(client = %peer, session = %session.id(), "client connected");
        run_connection(socket, session, outbound).await;
    })
}
