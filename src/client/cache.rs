//! Local message cache.
//!
//! A small SQLite database that keeps each user's conversation readable
//! without a server connection. Rows are keyed by the client-assigned
//! `local_id` so a message keeps a single cache entry across its pending
//! and confirmed states; `server_id` is filled in once the relay confirms.
//!
//! Schema versions (PRAGMA user_version):
//! - v1: messages without an owner column (single-user cache)
//! - v2: adds `owner` + index, scoping cached history per account

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

const SCHEMA_VERSION: i64 = 2;

#[derive(Debug, Error)]
pub enum CacheError {
    /// The entry is not cacheable (empty owner or content)
    #[error("invalid cache entry: {0}")]
    Validation(String),
    /// The underlying database failed
    #[error("cache storage error: {0}")]
    Storage(String),
}

impl From<rusqlite::Error> for CacheError {
    fn from(e: rusqlite::Error) -> Self {
        CacheError::Storage(e.to_string())
    }
}

impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> Self {
        CacheError::Storage(e.to_string())
    }
}

/// One cached message row.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedMessage {
    /// Client-assigned identity, stable across pending → confirmed
    pub local_id: Uuid,
    /// Relay-assigned id, present once confirmed
    pub server_id: Option<i64>,
    /// Username whose conversation this row belongs to
    pub owner: String,
    pub content: String,
    pub sender: i64,
    pub timestamp: DateTime<Utc>,
    /// True while the message has not been confirmed by the relay
    pub pending: bool,
}

/// Handle to the cache database. Connections are opened per operation, so
/// the handle stays cheap to clone across blocking tasks.
#[derive(Debug, Clone)]
pub struct MessageCache {
    path: PathBuf,
}

impl MessageCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Upsert a batch of messages for one user.
    ///
    /// The whole batch is validated first and written in a single
    /// transaction, so a bad entry never leaves a partial write.
    pub fn store(&self, messages: &[CachedMessage]) -> Result<(), CacheError> {
        for message in messages {
            validate(message)?;
        }

        let mut conn = self.open()?;
        let tx = conn.transaction()?;
        for message in messages {
            tx.execute(
                "insert into messages
                     (local_id, server_id, owner, content, sender, timestamp, pending)
                 values (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 on conflict(local_id) do update set
                     server_id = excluded.server_id,
                     content = excluded.content,
                     sender = excluded.sender,
                     timestamp = excluded.timestamp,
                     pending = excluded.pending",
                params![
                    message.local_id.to_string(),
                    message.server_id,
                    message.owner,
                    message.content,
                    message.sender,
                    message.timestamp.timestamp_millis(),
                    message.pending,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Load one user's cached conversation, oldest first.
    pub fn retrieve(&self, owner: &str) -> Result<Vec<CachedMessage>, CacheError> {
        if owner.is_empty() {
            return Err(CacheError::Validation("owner must not be empty".into()));
        }

        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "select local_id, server_id, owner, content, sender, timestamp, pending
             from messages where owner = ?1 order by timestamp asc, local_id asc",
        )?;
        let rows = stmt.query_map([owner], |row| {
            let local_id: String = row.get(0)?;
            let millis: i64 = row.get(5)?;
            Ok(CachedMessage {
                local_id: local_id.parse().unwrap_or_else(|_| Uuid::nil()),
                server_id: row.get(1)?,
                owner: row.get(2)?,
                content: row.get(3)?,
                sender: row.get(4)?,
                timestamp: Utc
                    .timestamp_millis_opt(millis)
                    .single()
                    .unwrap_or_else(Utc::now),
                pending: row.get(6)?,
            })
        })?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    fn open(&self) -> Result<Connection, CacheError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&self.path)?;
        migrate(&conn)?;
        Ok(conn)
    }
}

fn validate(message: &CachedMessage) -> Result<(), CacheError> {
    if message.owner.is_empty() {
        return Err(CacheError::Validation("owner must not be empty".into()));
    }
    if message.content.is_empty() {
        return Err(CacheError::Validation("content must not be empty".into()));
    }
    Ok(())
}

/// Bring the database up to the current schema version.
fn migrate(conn: &Connection) -> Result<(), CacheError> {
    let version: i64 = conn.query_row("pragma user_version", [], |row| row.get(0))?;

    if version < 1 {
        conn.execute_batch(
            "create table if not exists messages (
                 local_id text primary key,
                 server_id integer,
                 owner text not null,
                 content text not null,
                 sender integer not null,
                 timestamp integer not null,
                 pending integer not null
             );
             create index if not exists idx_messages_owner on messages (owner);",
        )?;
    } else if version < 2 {
        // v1 predates per-user scoping: rows had no owner column
        conn.execute_batch(
            "alter table messages add column owner text not null default '';
             create index if not exists idx_messages_owner on messages (owner);",
        )?;
    }

    if version < SCHEMA_VERSION {
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
