//! API request handlers and shared server state

use crate::store::ChatStore;
use crate::AuthConfig;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::sync::Arc;

/// Shared server state
pub struct ServerState {
    /// Persistent store for users and messages
    pub store: Arc<dyn ChatStore>,
    /// Auth config — None means deny-by-default
    pub auth_config: Option<AuthConfig>,
    /// Server port (used for building the localhost origin in the CORS whitelist)
    pub server_port: u16,
}

/// Shared relay state
pub type RelayState = Arc<ServerState>;

impl ServerState {
    /// Build the list of allowed origins for CORS.
    ///
    /// Always includes:
    /// - `http://localhost:3000` (local frontend dev server)
    /// - `http://localhost:{server_port}` / `http://127.0.0.1:{server_port}`
    ///
    /// Optionally includes `frontend_url` from auth config.
    pub fn allowed_origins(&self) -> Vec<String> {
        let mut origins = vec![
            "http://localhost:3000".to_string(),
            format!("http://localhost:{}", self.server_port),
            format!("http://127.0.0.1:{}", self.server_port),
        ];

        if let Some(ref auth_config) = self.auth_config {
            if let Some(ref frontend_url) = auth_config.frontend_url {
                let trimmed = frontend_url.trim_end_matches('/').to_string();
                if !trimmed.is_empty() && !origins.contains(&trimmed) {
                    origins.push(trimmed);
                }
            }
        }

        origins
    }
}

// ============================================================================
// Health
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub store: bool,
}

/// GET /health — liveness probe, also checks the store connection
pub async fn health(State(state): State<RelayState>) -> Json<HealthResponse> {
    let store_ok = matches!(state.store.health_check().await, Ok(true));

    Json(HealthResponse {
        status: if store_ok { "ok" } else { "degraded" }.to_string(),
        store: store_ok,
    })
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug)]
pub enum AppError {
    Internal(anyhow::Error),
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    Conflict(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, name, message) = match self {
            AppError::Internal(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "ApplicationError",
                e.to_string(),
            ),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NotFoundError", msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "ValidationError", msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UnauthorizedError", msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "ForbiddenError", msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "ConflictError", msg),
        };

        let body = Json(serde_json::json!({
            "error": {
                "status": status.as_u16(),
                "name": name,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_origins_includes_localhost() {
        let state = crate::test_helpers::mock_server_state(None);
        let origins = state.allowed_origins();
        assert!(origins.contains(&"http://localhost:3000".to_string()));
    }

    #[test]
    fn test_allowed_origins_includes_frontend_url() {
        let mut config = crate::test_helpers::test_auth_config();
        config.frontend_url = Some("https://chat.example.com/".to_string());

        let state = crate::test_helpers::mock_server_state(Some(config));
        let origins = state.allowed_origins();
        assert!(origins.contains(&"https://chat.example.com".to_string()));
    }

    #[tokio::test]
    async fn test_error_body_shape() {
        let err = AppError::BadRequest("Invalid identifier or password".to_string());
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["name"], "ValidationError");
        assert_eq!(json["error"]["status"], 400);
        assert_eq!(json["error"]["message"], "Invalid identifier or password");
    }
}
