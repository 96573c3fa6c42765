//! Persistence seam for users and chat messages.
//!
//! `ChatStore` abstracts the embedded SQLite store so the HTTP handlers and
//! the gateway can be exercised against an in-memory mock.

pub mod mock;
pub mod models;
pub mod sqlite;

use crate::protocol::ChatMessage;
use anyhow::Result;
use async_trait::async_trait;
use models::UserRecord;

/// Abstract interface for the user and message store.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Create a user with a bcrypt password hash.
    ///
    /// The username must be unique; callers check for an existing account
    /// first to produce a structured conflict error.
    async fn create_user(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<UserRecord>;

    /// Look up a user by username (the login identifier)
    async fn get_user_by_username(&self, username: &str) -> Result<Option<UserRecord>>;

    /// Look up a user by email (login accepts either identifier form)
    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserRecord>>;

    /// Look up a user by id
    async fn get_user_by_id(&self, id: i64) -> Result<Option<UserRecord>>;

    /// Persist a new message with a store-assigned id and timestamp
    async fn create_message(&self, content: &str, sender: i64) -> Result<ChatMessage>;

    /// Connectivity probe for the health endpoint
    async fn health_check(&self) -> Result<bool>;
}
