//! HTTP + WebSocket API layer
//!
//! - `handlers` — shared server state, error type, health endpoint
//! - `auth_handlers` — credential login/register and user profile endpoints
//! - `ws_gateway` — authenticated WebSocket message relay
//! - `routes` — router assembly, CORS and tracing layers

pub mod auth_handlers;
pub mod handlers;
pub mod routes;
pub mod ws_gateway;
