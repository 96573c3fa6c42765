//! Authenticated real-time message relay.
//!
//! A small chat backend: credential auth issuing JWTs, a WebSocket gateway
//! that persists and echoes messages, and an embedded SQLite store. The
//! companion `chat` binary provides a terminal client with a local message
//! cache that works offline.

pub mod api;
pub mod auth;
pub mod client;
pub mod protocol;
pub mod store;

#[cfg(test)]
pub(crate) mod test_helpers;

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

// ============================================================================
// YAML config structs (deserialization targets)
// ============================================================================

/// Top-level YAML configuration file structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: ServerYamlConfig,
    /// Auth section — if absent, auth_config will be None (deny-by-default)
    pub auth: Option<AuthConfig>,
}

/// Server configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerYamlConfig {
    pub port: u16,
    pub database_path: String,
}

impl Default for ServerYamlConfig {
    fn default() -> Self {
        Self {
            port: 1337,
            database_path: "chat-relay.db".into(),
        }
    }
}

/// Auth configuration section
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// JWT signing secret (HS256, minimum 32 characters)
    pub jwt_secret: String,
    /// JWT token lifetime in seconds (default: 2592000 = 30 days)
    #[serde(default = "default_jwt_expiry")]
    pub jwt_expiry_secs: u64,
    /// Allow new user registration via POST /api/auth/local/register (default: true)
    #[serde(default = "default_allow_registration")]
    pub allow_registration: bool,
    /// Frontend URL for CORS (e.g. "http://localhost:3000")
    pub frontend_url: Option<String>,
}

fn default_jwt_expiry() -> u64 {
    2_592_000
}

fn default_allow_registration() -> bool {
    true
}

// ============================================================================
// Runtime config (what the application actually uses)
// ============================================================================

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_path: String,
    /// Auth config — None means deny-by-default (no auth section in YAML)
    pub auth_config: Option<AuthConfig>,
}

impl Config {
    /// Load configuration from environment variables only.
    /// Equivalent to from_yaml_and_env(None).
    pub fn from_env() -> Result<Self> {
        Self::from_yaml_and_env(None)
    }

    /// Load configuration from an optional YAML file, then override with env vars.
    ///
    /// Priority: env var > YAML > default
    ///
    /// If `yaml_path` is None, tries "config.yaml" in CWD. If the file doesn't
    /// exist, falls back to pure env var / defaults.
    pub fn from_yaml_and_env(yaml_path: Option<&Path>) -> Result<Self> {
        // 1. Load YAML config (or defaults if file not found)
        let yaml = Self::load_yaml(yaml_path);

        // 2. Env overrides for the auth section. A JWT_SECRET env var alone is
        //    enough to enable auth when the YAML has no auth section.
        let mut auth_config = yaml.auth;
        if let Ok(secret) = std::env::var("JWT_SECRET") {
            match auth_config.as_mut() {
                Some(auth) => auth.jwt_secret = secret,
                None => {
                    auth_config = Some(AuthConfig {
                        jwt_secret: secret,
                        jwt_expiry_secs: default_jwt_expiry(),
                        allow_registration: default_allow_registration(),
                        frontend_url: None,
                    });
                }
            }
        }
        if let (Some(auth), Ok(url)) = (auth_config.as_mut(), std::env::var("FRONTEND_URL")) {
            auth.frontend_url = Some(url);
        }

        // 3. Build Config with env var overrides
        Ok(Self {
            server_port: std::env::var("SERVER_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(yaml.server.port),
            database_path: std::env::var("DATABASE_PATH").unwrap_or(yaml.server.database_path),
            auth_config,
        })
    }

    /// Try to load and parse a YAML config file. Returns defaults on any failure.
    fn load_yaml(yaml_path: Option<&Path>) -> YamlConfig {
        let default_path = Path::new("config.yaml");
        let path = yaml_path.unwrap_or(default_path);

        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_yaml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    YamlConfig::default()
                }
            },
            Err(_) => {
                tracing::debug!(
                    "No config file at {}, using env vars / defaults",
                    path.display()
                );
                YamlConfig::default()
            }
        }
    }
}

// ============================================================================
// Server entry point
// ============================================================================

/// Build the server state and serve until shutdown.
pub async fn start_server(config: Config) -> Result<()> {
    if config.auth_config.is_none() {
        warn!("No auth configured — all authenticated endpoints will reject requests");
    }

    let store = store::sqlite::SqliteStore::open(Path::new(&config.database_path))?;

    let state = Arc::new(api::handlers::ServerState {
        store: Arc::new(store),
        auth_config: config.auth_config,
        server_port: config.server_port,
    });

    let app = api::routes::create_router(state);

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Relay listening on {}", addr);
    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
