//! Auth session for the terminal client.
//!
//! Talks to the relay's credential endpoints, keeps the JWT on disk so a
//! session survives restarts, and restores it by validating against
//! `/api/users/me` before reuse.

use crate::api::auth_handlers::AuthTokenResponse;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum SessionError {
    /// The relay could not be reached
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    /// The relay rejected the credentials or the request
    #[error("{0}")]
    Credential(String),
    /// The token file could not be read or written
    #[error("token storage error: {0}")]
    Storage(#[from] std::io::Error),
}

/// Public user view as returned by the relay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: i64,
    pub username: String,
    pub email: String,
}

/// An authenticated session: the token plus who it belongs to
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub user: UserInfo,
}

pub struct AuthSession {
    base_url: String,
    http: reqwest::Client,
    token_path: PathBuf,
    session: Option<Session>,
}

impl AuthSession {
    /// Session manager against `base_url`, persisting the token at the
    /// platform data directory.
    pub fn new(base_url: &str) -> Self {
        Self::with_token_path(base_url, default_token_path())
    }

    pub fn with_token_path(base_url: &str, token_path: PathBuf) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            token_path,
            session: None,
        }
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Log in with a username or email. On success the token is written to
    /// disk and the session is held in memory.
    pub async fn login(
        &mut self,
        identifier: &str,
        password: &str,
    ) -> Result<&Session, SessionError> {
        let response = self
            .http
            .post(format!("{}/api/auth/local", self.base_url))
            .json(&serde_json::json!({
                "identifier": identifier,
                "password": password,
            }))
            .send()
            .await?;

        self.accept_token_response(response).await
    }

    /// Create an account; the relay logs the new user in immediately.
    pub async fn register(
        &mut self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<&Session, SessionError> {
        let response = self
            .http
            .post(format!("{}/api/auth/local/register", self.base_url))
            .json(&serde_json::json!({
                "username": username,
                "email": email,
                "password": password,
            }))
            .send()
            .await?;

        self.accept_token_response(response).await
    }

    /// Restore a previous session from the token file.
    ///
    /// Validates the stored token against `/api/users/me`; a rejected token
    /// is deleted so the next restore is a clean miss rather than a retry
    /// with known-bad credentials.
    pub async fn restore(&mut self) -> Result<Option<&Session>, SessionError> {
        let Some(token) = self.read_token()? else {
            return Ok(None);
        };

        let response = self
            .http
            .get(format!("{}/api/users/me", self.base_url))
            .bearer_auth(&token)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {
                let user: UserInfo = response.json().await?;
                debug!(username = %user.username, "Restored session from token file");
                self.session = Some(Session { token, user });
                Ok(self.session.as_ref())
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
                warn!("Stored token rejected, clearing it");
                self.clear_token()?;
                Ok(None)
            }
            _ => Err(SessionError::Credential(
                extract_error_message(&response.text().await.unwrap_or_default())
                    .unwrap_or_else(|| "Session restore failed".to_string()),
            )),
        }
    }

    /// Drop the in-memory session and delete the token file.
    pub fn logout(&mut self) -> Result<(), SessionError> {
        self.session = None;
        self.clear_token()
    }

    async fn accept_token_response(
        &mut self,
        response: reqwest::Response,
    ) -> Result<&Session, SessionError> {
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = extract_error_message(&body)
                .unwrap_or_else(|| "Authentication failed".to_string());
            return Err(SessionError::Credential(message));
        }

        let auth: AuthTokenResponse = response.json().await?;
        self.write_token(&auth.jwt)?;
        Ok(self.session.insert(Session {
            token: auth.jwt,
            user: UserInfo {
                id: auth.user.id,
                username: auth.user.username,
                email: auth.user.email,
            },
        }))
    }

    fn read_token(&self) -> Result<Option<String>, SessionError> {
        match std::fs::read_to_string(&self.token_path) {
            Ok(contents) => {
                let token = contents.trim().to_string();
                Ok((!token.is_empty()).then_some(token))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_token(&self, token: &str) -> Result<(), SessionError> {
        if let Some(parent) = self.token_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.token_path, token)?;
        Ok(())
    }

    fn clear_token(&self) -> Result<(), SessionError> {
        match std::fs::remove_file(&self.token_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Platform-appropriate token location, e.g. `~/.local/share/chat-relay/token`.
pub fn default_token_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chat-relay")
        .join("token")
}

/// Pull the human-readable message out of a relay error body
/// (`{"error": {"message": "..."}}`).
fn extract_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value["error"]["message"].as_str().map(str::to_string)
}

// ============================================================================
// Tests
// ============================================================================
