//! Store record types

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A registered user account.
///
/// The bcrypt hash never leaves the server; handlers convert to a public
/// response type before serializing users to clients.
#[derive(Debug, Clone, Serialize)]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}
