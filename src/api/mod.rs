//! HTTP layer: router composition for the WebSocket endpoint and system
//! routes.

pub mod system;

use axum::Router;
use axum::routing::get;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;
use crate::ws::handler::ws_handler;

/// Builds the complete router: the client WebSocket at `/` plus system
/// routes.
///
/// Serve it with `into_make_service_with_connect_info::<SocketAddr>()`;
/// the WebSocket handler needs the peer address.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .merge(system::routes())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
