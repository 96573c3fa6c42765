//! Terminal chat client: auth session, relay connection, local cache.
//!
//! - `session` — credential login/logout and token persistence
//! - `chat` — live relay connection with optimistic local echo
//! - `cache` — SQLite-backed per-user message cache

pub mod cache;
pub mod chat;
pub mod session;
