//! Process-wide table of live stream sessions.
//!
//! This is the only state shared across connections. It is constructed
//! explicitly and injected into the router state, never reached through a
//! global.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::info;
use widget_relay::SessionHandler;

/// One live session: its private handler plus the open stream's sender.
///
/// The handler sits behind a per-session mutex so a multi-threaded runtime
/// still processes requests within one session strictly one at a time.
#[derive(Clone)]
pub struct SessionEntry {
    pub handler: Arc<Mutex<SessionHandler>>,
    pub events_tx: mpsc::Sender<Bytes>,
}

impl SessionEntry {
    pub fn new(handler: SessionHandler, events_tx: mpsc::Sender<Bytes>) -> Self {
        Self {
            handler: Arc::new(Mutex::new(handler)),
            events_tx,
        }
    }
}

/// Linearizable map from session id to live session.
#[derive(Default)]
pub struct SessionTable {
    inner: RwLock<HashMap<String, SessionEntry>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unconditionally; the id generator guarantees uniqueness.
    pub async fn insert(&self, id: impl Into<String>, entry: SessionEntry) {
        self.inner.write().await.insert(id.into(), entry);
    }

    pub async fn get(&self, id: &str) -> Option<SessionEntry> {
        self.inner.read().await.get(id).cloned()
    }

    /// Idempotent removal; returns whether a session was actually removed.
    pub async fn remove(&self, id: &str) -> bool {
        self.inner.write().await.remove(id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

/// One-shot teardown handle for a session.
///
/// Owned by the session's response stream; dropping the stream (client
/// disconnect, handshake abort) removes the session from the table. Explicit
/// `teardown` calls and the drop path funnel through the same guard, so
/// removal runs at most once no matter which fires first.
pub struct SessionGuard {
    table: Arc<SessionTable>,
    id: String,
    torn_down: AtomicBool,
}

impl SessionGuard {
    pub fn new(table: Arc<SessionTable>, id: impl Into<String>) -> Self {
        Self {
            table,
            id: id.into(),
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let table = self.table.clone();
        let id = self.id.clone();
        tokio::spawn(async move {
            if table.remove(&id).await {
                info!(session = %id, "session closed");
            }
        });
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use widget_relay::SessionHandlerFactory;

    fn entry() -> SessionEntry {
        let handler = SessionHandlerFactory::builder()
            .build()
            .unwrap()
            .create()
            .unwrap();
        let (tx, _rx) = mpsc::channel(4);
        SessionEntry::new(handler, tx)
    }

    #[tokio::test]
    async fn put_then_get_returns_same_session_until_removed() {
        let table = SessionTable::new();
        table.insert("s1", entry()).await;
        assert!(table.get("s1").await.is_some());

        assert!(table.remove("s1").await);
        assert!(table.get("s1").await.is_none());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let table = SessionTable::new();
        table.insert("s1", entry()).await;
        assert!(table.remove("s1").await);
        assert!(!table.remove("s1").await);
        assert!(!table.remove("never-existed").await);
    }

    #[tokio::test]
    async fn overwriting_put_replaces_the_entry() {
        let table = SessionTable::new();
        let first = entry();
        let first_tx = first.events_tx.clone();
        table.insert("s1", first).await;

        let second = entry();
        table.insert("s1", second.clone()).await;
        assert_eq!(table.len().await, 1);

        let got = table.get("s1").await.unwrap();
        assert!(got.events_tx.same_channel(&second.events_tx));
        assert!(!got.events_tx.same_channel(&first_tx));
    }

    #[tokio::test]
    async fn guard_removes_exactly_once() {
        let table = Arc::new(SessionTable::new());
        table.insert("s1", entry()).await;

        let guard = SessionGuard::new(table.clone(), "s1");
        guard.teardown();
        // Both the error path and the close path may fire; second is a no-op.
        guard.teardown();
        drop(guard);

        tokio::task::yield_now().await;
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(1);
        while table.get("s1").await.is_some() {
            if tokio::time::Instant::now() > deadline {
                panic!("session was not removed");
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }
}
