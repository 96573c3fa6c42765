//! SQLite-backed `ChatStore`.
//!
//! A single connection behind a tokio mutex; all operations are short
//! single-statement transactions. Timestamps are stored as unix millis.

use super::models::UserRecord;
use super::ChatStore;
use crate::protocol::ChatMessage;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::info;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

/// Current wall-clock time truncated to millisecond precision, so the value
/// we hand back matches the value the database stored.
fn now_millis() -> DateTime<Utc> {
    millis_to_datetime(Utc::now().timestamp_millis())
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(Utc::now)
}

impl SqliteStore {
    /// Open (or create) the database file and initialize the schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        Self::init_schema(&conn)?;
        info!(path = %path.display(), "Chat store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database for tests and throwaway runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "create table if not exists users (
                 id integer primary key autoincrement,
                 username text not null unique,
                 email text not null,
                 password_hash text not null,
                 created_at integer not null
             );
             create table if not exists messages (
                 id integer primary key autoincrement,
                 content text not null,
                 sender integer not null,
                 timestamp integer not null
             );",
        )?;
        Ok(())
    }

    fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
        Ok(UserRecord {
            id: row.get(0)?,
            username: row.get(1)?,
            email: row.get(2)?,
            password_hash: row.get(3)?,
            created_at: millis_to_datetime(row.get(4)?),
        })
    }
}

#[async_trait]
impl ChatStore for SqliteStore {
    async fn create_user(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
    ) -> Result<UserRecord> {
        let conn = self.conn.lock().await;
        let created_at = now_millis();
        conn.execute(
            "insert into users (username, email, password_hash, created_at)
             values (?1, ?2, ?3, ?4)",
            params![username, email, password_hash, created_at.timestamp_millis()],
        )
        .context("Failed to create user")?;
        Ok(UserRecord {
            id: conn.last_insert_rowid(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            created_at,
        })
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        let conn = self.conn.lock().await;
        let user = conn
            .query_row(
                "select id, username, email, password_hash, created_at
                 from users where username = ?1",
                [username],
                Self::row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let conn = self.conn.lock().await;
        let user = conn
            .query_row(
                "select id, username, email, password_hash, created_at
                 from users where email = ?1",
                [email],
                Self::row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    async fn get_user_by_id(&self, id: i64) -> Result<Option<UserRecord>> {
        let conn = self.conn.lock().await;
        let user = conn
            .query_row(
                "select id, username, email, password_hash, created_at
                 from users where id = ?1",
                [id],
                Self::row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    async fn create_message(&self, content: &str, sender: i64) -> Result<ChatMessage> {
        let conn = self.conn.lock().await;
        let timestamp = now_millis();
        conn.execute(
            "insert into messages (content, sender, timestamp) values (?1, ?2, ?3)",
            params![content, sender, timestamp.timestamp_millis()],
        )
        .context("Failed to persist message")?;
        Ok(ChatMessage {
            id: conn.last_insert_rowid(),
            content: content.to_string(),
            sender,
            timestamp,
        })
    }

    async fn health_check(&self) -> Result<bool> {
        let conn = self.conn.lock().await;
        let one: i64 = conn.query_row("select 1", [], |row| row.get(0))?;
        Ok(one == 1)
    }
}
