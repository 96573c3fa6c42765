//! In-memory `ChatStore` mock for tests.

use super::models::UserRecord;
use super::ChatStore;
use crate::protocol::ChatMessage;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct MockChatStore {
    users: Mutex<Vec<UserRecord>>,
    messages: Mutex<Vec<ChatMessage>>,
    next_user_id: AtomicI64,
    next_message_id: AtomicI64,
    fail_message_writes: AtomicBool,
}

impl MockChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `create_message` calls fail, to exercise the
    /// gateway's persistence-failure path.
    pub fn set_fail_message_writes(&self, fail: bool) {
        self.fail_message_writes.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of everything persisted so far.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages.lock().expect("mock lock").clone()
    }
}

#[async_trait]
impl ChatStore for MockChatStore {
    async fn create_user(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<UserRecord> {
        let mut users = self.users.lock().expect("mock lock");
        if users.iter().any(|u| u.username == username) {
            return Err(anyhow!("username already taken"));
        }
        let user = UserRecord {
            id: self.next_user_id.fetch_add(1, Ordering::SeqCst) + 1,
            username: username.to_string(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            created_at: Utc::now(),
        };
        users.push(user.clone());
        Ok(user)
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        let users = self.users.lock().expect("mock lock");
        Ok(users.iter().find(|u| u.username == username).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let users = self.users.lock().expect("mock lock");
        Ok(users.iter().find(|u| u.email == email).cloned())
    }

    async fn get_user_by_id(&self, id: i64) -> Result<Option<UserRecord>> {
        let users = self.users.lock().expect("mock lock");
        Ok(users.iter().find(|u| u.id == id).cloned())
    }

    async fn create_message(&self, content: &str, sender: i64) -> Result<ChatMessage> {
        if self.fail_message_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("simulated write failure"));
        }
        let message = ChatMessage {
            id: self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1,
            content: content.to_string(),
            sender,
            timestamp: Utc::now(),
        };
        self.messages
            .lock()
            .expect("mock lock")
            .push(message.clone());
        Ok(message)
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}
