//! Shared helpers for unit tests.

use crate::api::handlers::{RelayState, ServerState};
use crate::store::mock::MockChatStore;
use crate::AuthConfig;
use std::sync::Arc;

pub const TEST_SECRET: &str = "test-secret-key-minimum-32-chars!!";

pub fn test_auth_config() -> AuthConfig {
    AuthConfig {
        jwt_secret: TEST_SECRET.to_string(),
        jwt_expiry_secs: 3600,
        allow_registration: true,
        frontend_url: None,
    }
}

/// Server state backed by an empty in-memory mock store.
pub fn mock_server_state(auth_config: Option<AuthConfig>) -> RelayState {
    mock_server_state_with_store(auth_config, Arc::new(MockChatStore::new()))
}

/// Server state over a caller-provided mock, for tests that inspect or
/// fault-inject the store.
pub fn mock_server_state_with_store(
    auth_config: Option<AuthConfig>,
    store: Arc<MockChatStore>,
) -> RelayState {
    Arc::new(ServerState {
        store,
        auth_config,
        server_port: 1337,
    })
}
