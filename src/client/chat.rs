//! Live chat session over the relay WebSocket.
//!
//! Messages are echoed locally the moment the user submits them (marked
//! pending), then reconciled against the relay's `receiveMessage`
//! confirmation so a confirmed message replaces its pending entry instead
//! of appearing twice. Every change to the conversation is snapshotted to
//! the local cache, so history survives crashes and offline restarts.

use super::cache::{CachedMessage, MessageCache};
use crate::client::session::UserInfo;
use crate::protocol::{ChatMessage, ClientEvent, ServerEvent};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{
    client::IntoClientRequest, http::header::AUTHORIZATION, protocol::Message as WsMessage,
};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One entry of the local conversation view.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalMessage {
    /// Client-assigned identity, stable across pending → confirmed
    pub local_id: Uuid,
    /// Relay-assigned id once confirmed
    pub server_id: Option<i64>,
    pub content: String,
    pub sender: i64,
    pub timestamp: DateTime<Utc>,
    /// True until the relay has confirmed persistence
    pub pending: bool,
}

impl LocalMessage {
    fn into_cached(self, owner: &str) -> CachedMessage {
        CachedMessage {
            local_id: self.local_id,
            server_id: self.server_id,
            owner: owner.to_string(),
            content: self.content,
            sender: self.sender,
            timestamp: self.timestamp,
            pending: self.pending,
        }
    }

    fn from_cached(cached: CachedMessage) -> Self {
        Self {
            local_id: cached.local_id,
            server_id: cached.server_id,
            content: cached.content,
            sender: cached.sender,
            timestamp: cached.timestamp,
            pending: cached.pending,
        }
    }
}

/// Out-of-band events surfaced to the UI loop.
#[derive(Debug, Clone)]
pub enum ChatNotice {
    /// A message was confirmed by the relay (own echo)
    Confirmed(LocalMessage),
    /// The relay reported a per-message failure (e.g. persistence)
    RelayError(String),
    /// A cache write failed; the conversation stays usable in memory
    CacheFailure(String),
    /// The relay connection is gone
    Disconnected,
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A connected chat session for one authenticated user.
pub struct ChatSession {
    user: UserInfo,
    owner: String,
    cache: MessageCache,
    messages: Arc<Mutex<Vec<LocalMessage>>>,
    outgoing_tx: mpsc::UnboundedSender<ClientEvent>,
    notices_tx: mpsc::UnboundedSender<ChatNotice>,
    notices_rx: mpsc::UnboundedReceiver<ChatNotice>,
    task: tokio::task::JoinHandle<()>,
}

impl ChatSession {
    /// Connect to the relay and seed the conversation from the local cache.
    ///
    /// The token is sent in the Authorization header of the upgrade request.
    pub async fn connect(
        server_url: &str,
        token: &str,
        user: UserInfo,
        cache: MessageCache,
    ) -> Result<Self> {
        let ws_url = format!(
            "{}/ws",
            server_url.trim_end_matches('/').replacen("http", "ws", 1)
        );

        let mut request = ws_url
            .clone()
            .into_client_request()
            .with_context(|| format!("Invalid relay URL: {}", ws_url))?;
        request.headers_mut().insert(
            AUTHORIZATION,
            format!("Bearer {}", token)
                .parse()
                .context("Token is not a valid header value")?,
        );

        let (ws_stream, _) = connect_async(request)
            .await
            .with_context(|| format!("Failed to connect to {}", ws_url))?;
        info!(username = %user.username, "Connected to relay");

        // Seed the in-memory view from the cache before any live traffic
        let owner = user.username.clone();
        let seed_cache = cache.clone();
        let seed_owner = owner.clone();
        let cached = tokio::task::spawn_blocking(move || seed_cache.retrieve(&seed_owner))
            .await
            .context("Cache read task failed")??;
        let messages = Arc::new(Mutex::new(seed_messages(cached)));

        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(run_socket(
            ws_stream,
            outgoing_rx,
            messages.clone(),
            notices_tx.clone(),
            cache.clone(),
            owner.clone(),
        ));

        Ok(Self {
            user,
            owner,
            cache,
            messages,
            outgoing_tx,
            notices_tx,
            notices_rx,
            task,
        })
    }

    pub fn user(&self) -> &UserInfo {
        &self.user
    }

    /// Submit a message: local pending echo first, then hand it to the relay.
    pub fn submit(&self, content: &str) -> Result<LocalMessage> {
        let content = content.trim();
        if content.is_empty() {
            bail!("Message must not be empty");
        }

        let message = LocalMessage {
            local_id: Uuid::new_v4(),
            server_id: None,
            content: content.to_string(),
            sender: self.user.id,
            timestamp: Utc::now(),
            pending: true,
        };

        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.clone());
        self.persist_snapshot();

        self.outgoing_tx
            .send(ClientEvent::SendMessage {
                content: content.to_string(),
                sender: self.user.id,
            })
            .context("Relay connection closed")?;

        Ok(message)
    }

    /// Snapshot of the conversation, oldest first.
    pub fn messages(&self) -> Vec<LocalMessage> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Next out-of-band event; None once the socket task is fully gone.
    pub async fn next_notice(&mut self) -> Option<ChatNotice> {
        self.notices_rx.recv().await
    }

    /// Write the current conversation to the cache and wait for it.
    pub async fn flush(&self) -> Result<()> {
        let cache = self.cache.clone();
        let rows = self.snapshot_rows();
        tokio::task::spawn_blocking(move || cache.store(&rows))
            .await
            .context("Cache write task failed")??;
        Ok(())
    }

    /// Tear the session down, flushing the cache first.
    pub async fn close(mut self) {
        if let Err(e) = self.flush().await {
            warn!(error = %e, "Final cache flush failed");
        }
        self.task.abort();
        self.notices_rx.close();
    }

    fn snapshot_rows(&self) -> Vec<CachedMessage> {
        let owner = &self.owner;
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .map(|m| m.into_cached(owner))
            .collect()
    }

    /// Fire-and-forget cache write; failures surface as a notice.
    fn persist_snapshot(&self) {
        let cache = self.cache.clone();
        let rows = self.snapshot_rows();
        let notices = self.notices_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = write_rows(&cache, rows).await {
                let _ = notices.send(ChatNotice::CacheFailure(e));
            }
        });
    }
}

async fn write_rows(cache: &MessageCache, rows: Vec<CachedMessage>) -> Result<(), String> {
    let cache = cache.clone();
    match tokio::task::spawn_blocking(move || cache.store(&rows)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            warn!(error = %e, "Cache write failed");
            Err(e.to_string())
        }
        Err(e) => {
            warn!(error = %e, "Cache write task failed");
            Err(e.to_string())
        }
    }
}

/// Socket task: forwards submissions to the relay and folds relay events
/// back into the shared conversation.
async fn run_socket(
    ws_stream: WsStream,
    mut outgoing_rx: mpsc::UnboundedReceiver<ClientEvent>,
    messages: Arc<Mutex<Vec<LocalMessage>>>,
    notices: mpsc::UnboundedSender<ChatNotice>,
    cache: MessageCache,
    owner: String,
) {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    loop {
        tokio::select! {
            outgoing = outgoing_rx.recv() => {
                let Some(event) = outgoing else {
                    // Session handle dropped
                    break;
                };
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "Failed to encode outbound event");
                        continue;
                    }
                };
                if ws_sender.send(WsMessage::Text(text.into())).await.is_err() {
                    let _ = notices.send(ChatNotice::Disconnected);
                    break;
                }
            }

            frame = ws_receiver.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        match serde_json::from_str::<ServerEvent>(&text) {
                            Ok(ServerEvent::ReceiveMessage { message }) => {
                                let confirmed = {
                                    let mut guard =
                                        messages.lock().unwrap_or_else(|e| e.into_inner());
                                    reconcile(&mut guard, &message)
                                };
                                let rows: Vec<CachedMessage> = {
                                    let guard =
                                        messages.lock().unwrap_or_else(|e| e.into_inner());
                                    guard.iter().cloned().map(|m| m.into_cached(&owner)).collect()
                                };
                                if let Err(e) = write_rows(&cache, rows).await {
                                    let _ = notices.send(ChatNotice::CacheFailure(e));
                                }
                                if let Some(confirmed) = confirmed {
                                    let _ = notices.send(ChatNotice::Confirmed(confirmed));
                                }
                            }
                            Ok(ServerEvent::ErrorMessage { error }) => {
                                let _ = notices.send(ChatNotice::RelayError(error));
                            }
                            Err(e) => {
                                warn!(error = %e, "Unparseable relay event");
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        debug!(?frame, "Relay closed the connection");
                        let _ = notices.send(ChatNotice::Disconnected);
                        break;
                    }
                    // Pings are answered by the protocol layer during reads
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "Relay socket error");
                        let _ = notices.send(ChatNotice::Disconnected);
                        break;
                    }
                    None => {
                        let _ = notices.send(ChatNotice::Disconnected);
                        break;
                    }
                }
            }
        }
    }
}

/// Fold a confirmed relay message into the local conversation.
///
/// - Already known server id → no-op (relay retransmit)
/// - Matches the oldest pending entry with the same content and sender →
///   confirm that entry in place, adopting the relay id and timestamp
/// - Otherwise → append as a new confirmed entry
///
/// Returns the confirmed entry, or None for a retransmit.
fn reconcile(messages: &mut Vec<LocalMessage>, incoming: &ChatMessage) -> Option<LocalMessage> {
    if messages.iter().any(|m| m.server_id == Some(incoming.id)) {
        return None;
    }

    if let Some(entry) = messages.iter_mut().find(|m| {
        m.pending
            && m.server_id.is_none()
            && m.content == incoming.content
            && m.sender == incoming.sender
    }) {
        entry.server_id = Some(incoming.id);
        entry.timestamp = incoming.timestamp;
        entry.pending = false;
        return Some(entry.clone());
    }

    let message = LocalMessage {
        local_id: Uuid::new_v4(),
        server_id: Some(incoming.id),
        content: incoming.content.clone(),
        sender: incoming.sender,
        timestamp: incoming.timestamp,
        pending: false,
    };
    messages.push(message.clone());
    Some(message)
}

/// Build the in-memory view from cached rows, dropping duplicate
/// confirmed entries (same server id) that older cache versions could
/// accumulate.
fn seed_messages(cached: Vec<CachedMessage>) -> Vec<LocalMessage> {
    let mut seen = HashSet::new();
    cached
        .into_iter()
        .filter(|row| match row.server_id {
            Some(id) => seen.insert(id),
            None => true,
        })
        .map(LocalMessage::from_cached)
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn pending(content: &str, sender: i64) -> LocalMessage {
        LocalMessage {
            local_id: Uuid::new_v4(),
            server_id: None,
            content: content.to_string(),
            sender,
            timestamp: Utc::now(),
            pending: true,
        }
    }

    fn incoming(id: i64, content: &str, sender: i64) -> ChatMessage {
        ChatMessage {
            id,
            content: content.to_string(),
            sender,
            timestamp: Utc.timestamp_millis_opt(5_000).single().unwrap(),
        }
    }

    #[test]
    fn test_reconcile_confirms_pending_in_place() {
        let mut messages = vec![pending("hello", 7)];
        let local_id = messages[0].local_id;

        let confirmed = reconcile(&mut messages, &incoming(42, "hello", 7)).unwrap();

        assert_eq!(messages.len(), 1, "must not duplicate the pending entry");
        assert_eq!(confirmed.local_id, local_id);
        assert_eq!(messages[0].server_id, Some(42));
        assert!(!messages[0].pending);
        // The relay timestamp wins over the optimistic one
        assert_eq!(messages[0].timestamp.timestamp_millis(), 5_000);
    }

    #[test]
    fn test_reconcile_confirms_oldest_matching_pending() {
        // Two identical pending submissions: confirmations apply in order
        let mut messages = vec![pending("hi", 7), pending("hi", 7)];
        let first_id = messages[0].local_id;
        let second_id = messages[1].local_id;

        let confirmed = reconcile(&mut messages, &incoming(1, "hi", 7)).unwrap();
        assert_eq!(confirmed.local_id, first_id);

        let confirmed = reconcile(&mut messages, &incoming(2, "hi", 7)).unwrap();
        assert_eq!(confirmed.local_id, second_id);

        assert_eq!(messages.len(), 2);
        assert!(messages.iter().all(|m| !m.pending));
    }

    #[test]
    fn test_reconcile_ignores_retransmit() {
        let mut messages = vec![pending("hello", 7)];
        reconcile(&mut messages, &incoming(42, "hello", 7)).unwrap();

        assert!(reconcile(&mut messages, &incoming(42, "hello", 7)).is_none());
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn test_reconcile_appends_unknown_message() {
        let mut messages = vec![pending("mine", 7)];

        let confirmed = reconcile(&mut messages, &incoming(9, "different", 7)).unwrap();

        assert_eq!(messages.len(), 2);
        assert_eq!(confirmed.server_id, Some(9));
        assert!(!confirmed.pending);
        // The original pending entry is untouched
        assert!(messages[0].pending);
    }

    #[test]
    fn test_seed_drops_duplicate_server_ids() {
        let ts = Utc.timestamp_millis_opt(1_000).single().unwrap();
        let row = |server_id: Option<i64>, content: &str| CachedMessage {
            local_id: Uuid::new_v4(),
            server_id,
            owner: "alice".to_string(),
            content: content.to_string(),
            sender: 7,
            timestamp: ts,
            pending: server_id.is_none(),
        };

        let seeded = seed_messages(vec![
            row(Some(1), "a"),
            row(Some(1), "a duplicate"),
            row(None, "still pending"),
            row(Some(2), "b"),
        ]);

        assert_eq!(seeded.len(), 3);
        assert_eq!(seeded[0].content, "a");
        assert_eq!(seeded[1].content, "still pending");
        assert_eq!(seeded[2].content, "b");
    }
}
