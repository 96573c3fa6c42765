//! API route definitions

use super::auth_handlers;
use super::handlers::{self, RelayState};
use super::ws_gateway;
use crate::auth::middleware::require_auth;
use axum::{
    http::{header, HeaderValue, Method},
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the API router
pub fn create_router(state: RelayState) -> Router {
    let origins: Vec<HeaderValue> = state
        .allowed_origins()
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    Router::new()
        // Health check
        .route("/health", get(handlers::health))
        // ====================================================================
        // Auth
        // ====================================================================
        .route("/api/auth/local", post(auth_handlers::login))
        .route("/api/auth/local/register", post(auth_handlers::register))
        // ====================================================================
        // Authenticated user profile
        // ====================================================================
        .nest(
            "/api/users",
            Router::new()
                .route("/me", get(auth_handlers::me))
                .layer(from_fn_with_state(state.clone(), require_auth)),
        )
        // ====================================================================
        // Message relay (auth happens during the WS handshake)
        // ====================================================================
        .route("/ws", get(ws_gateway::ws_relay))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
