//! Per-connection state and the process-local session table.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;

/// Lifecycle of one gateway connection. There is no reconnect state: a
/// client that reconnects gets a brand-new connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
}

/// State owned by a single connection task.
#[derive(Debug)]
pub struct GatewaySession {
    /// Unique connection identifier (`conn_` prefixed ULID).
    pub connection_id: String,
    /// Authenticated user ID.
    pub user_id: String,
    state: ConnectionState,
}

impl GatewaySession {
    pub fn new(connection_id: String, user_id: String) -> Self {
        Self {
            connection_id,
            user_id,
            state: ConnectionState::Connecting,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn mark_open(&mut self) {
        if self.state == ConnectionState::Connecting {
            self.state = ConnectionState::Open;
        }
    }

    /// Move to `Closed`. Returns `false` if the session was already closed.
    pub fn mark_closed(&mut self) -> bool {
        let was_open = self.state != ConnectionState::Closed;
        self.state = ConnectionState::Closed;
        was_open
    }
}

/// Live transport handle for a local connection: the sending half of its
/// outbound queue.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub user_id: String,
    pub tx: mpsc::Sender<Arc<str>>,
}

/// connection id → live transport handle, for sockets accepted by this
/// process only. Never shared, never persisted.
#[derive(Debug)]
pub struct SessionTable {
    sessions: DashMap<String, SessionHandle>,
    buffer: usize,
}

impl SessionTable {
    /// `buffer` is the outbound queue capacity given to each connection.
    pub fn new(buffer: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            buffer: buffer.max(1),
        }
    }

    /// Register a connection and return the receiving half of its queue.
    pub fn register(&self, connection_id: &str, user_id: &str) -> mpsc::Receiver<Arc<str>> {
        let (tx, rx) = mpsc::channel(self.buffer);
        self.sessions.insert(
            connection_id.to_string(),
            SessionHandle {
                user_id: user_id.to_string(),
                tx,
            },
        );
        rx
    }

    pub fn lookup(&self, connection_id: &str) -> Option<SessionHandle> {
        self.sessions.get(connection_id).map(|h| h.value().clone())
    }

    /// Remove a connection. Returns `false` if it was not registered.
    pub fn unregister(&self, connection_id: &str) -> bool {
        self.sessions.remove(connection_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Remove every entry and return the removed connection ids. Dropping the
    /// handles closes each connection's outbound queue, which ends its task.
    pub fn drain(&self) -> Vec<String> {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        ids.into_iter()
            .filter(|id| self.sessions.remove(id).is_some())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_state_transitions() {
        let mut session = GatewaySession::new("conn_1".into(), "alice".into());
        assert_eq!(session.state(), ConnectionState::Connecting);
        session.mark_open();
        assert_eq!(session.state(), ConnectionState::Open);
        assert!(session.mark_closed());
        assert!(!session.mark_closed());
        session.mark_open();
        assert_eq!(session.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn register_lookup_unregister() {
        let table = SessionTable::new(4);
        let mut rx = table.register("conn_1", "alice");
        assert_eq!(table.len(), 1);

        let handle = table.lookup("conn_1").unwrap();
        assert_eq!(handle.user_id, "alice");
        handle.tx.send(Arc::from("hello")).await.unwrap();
        assert_eq!(rx.recv().await.as_deref(), Some("hello"));

        assert!(table.unregister("conn_1"));
        assert!(!table.unregister("conn_1"));
        assert!(table.lookup("conn_1").is_none());
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn drain_closes_queues() {
        let table = SessionTable::new(4);
        let mut rx1 = table.register("conn_1", "alice");
        let mut rx2 = table.register("conn_2", "bob");

        let mut drained = table.drain();
        drained.sort();
        assert_eq!(drained, vec!["conn_1", "conn_2"]);
        assert!(table.is_empty());

        assert!(rx1.recv().await.is_none());
        assert!(rx2.recv().await.is_none());
    }
}
