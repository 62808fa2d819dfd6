//! Connection registry
//!
//! A single task owns the map of locally-held connections. Every lifecycle
//! change and every fan-out goes through its command queue, so accepts,
//! closes and deliveries are applied one at a time in arrival order.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};

use crate::types::{ServerEvent, SessionId};

/// Sender half of a connection's outbound queue
pub type ConnectionSender = mpsc::Sender<ServerEvent>;

enum Command {
    Accept {
        session: SessionId,
        sender: ConnectionSender,
        reply: oneshot::Sender<bool>,
    },
    Confirm {
        session: SessionId,
        reply: oneshot::Sender<bool>,
    },
    Close {
        session: SessionId,
        reply: oneshot::Sender<bool>,
    },
    Deliver {
        event: ServerEvent,
        reply: oneshot::Sender<usize>,
    },
    LiveCount {
        reply: oneshot::Sender<usize>,
    },
    CloseAll {
        reply: oneshot::Sender<usize>,
    },
}

struct Entry {
    sender: ConnectionSender,
    /// Set once the connect has been added to the shared count
    confirmed: bool,
}

/// Connections held by this instance
#[derive(Default)]
struct RegistryState {
    connections: HashMap<SessionId, Entry>,
    /// Set by close_all; no accept succeeds afterwards
    closed: bool,
}

impl RegistryState {
    fn accept(&mut self, session: SessionId, sender: ConnectionSender) -> bool {
        if self.closed {
            tracing::debug!(session = %session, "Accept refused, registry closed");
            return false;
        }
        if self.connections.contains_key(&session) {
            tracing::debug!(session = %session, "Duplicate accept ignored");
            return false;
        }
        self.connections.insert(
            session,
            Entry {
                sender,
                confirmed: false,
            },
        );
        tracing::debug!(session = %session, live = self.connections.len(), "Connection registered");
        true
    }

    fn confirm(&mut self, session: SessionId) -> bool {
        match self.connections.get_mut(&session) {
            Some(entry) => {
                entry.confirmed = true;
                true
            }
            None => false,
        }
    }

    fn close(&mut self, session: SessionId) -> bool {
        let removed = self.connections.remove(&session).is_some();
        if removed {
            tracing::debug!(session = %session, live = self.connections.len(), "Connection unregistered");
        }
        removed
    }

    fn deliver(&self, event: &ServerEvent) -> usize {
        let mut delivered = 0;
        for (session, entry) in &self.connections {
            match entry.sender.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    // Slow client: it misses this event, nobody else waits on it
                    tracing::warn!(session = %session, "Outbound queue full, dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::debug!(session = %session, "Outbound queue closed, close pending");
                }
            }
        }
        delivered
    }

    /// Returns how many of the dropped connections were already counted.
    /// Unconfirmed ones are left for their accept path to undo.
    fn close_all(&mut self) -> usize {
        self.closed = true;
        let confirmed = self.connections.values().filter(|e| e.confirmed).count();
        // Dropping the senders ends every writer, which closes the sockets
        self.connections.clear();
        confirmed
    }
}

async fn run(mut rx: mpsc::UnboundedReceiver<Command>) {
    let mut state = RegistryState::default();

    while let Some(command) = rx.recv().await {
        match command {
            Command::Accept { session, sender, reply } => {
                let _ = reply.send(state.accept(session, sender));
            }
            Command::Confirm { session, reply } => {
                let _ = reply.send(state.confirm(session));
            }
            Command::Close { session, reply } => {
                let _ = reply.send(state.close(session));
            }
            Command::Deliver { event, reply } => {
                let _ = reply.send(state.deliver(&event));
            }
            Command::LiveCount { reply } => {
                let _ = reply.send(state.connections.len());
            }
            Command::CloseAll { reply } => {
                let _ = reply.send(state.close_all());
            }
        }
    }
}

/// Handle to the registry task; cheap to clone
#[derive(Clone)]
pub struct ConnectionRegistry {
    tx: mpsc::UnboundedSender<Command>,
}

impl ConnectionRegistry {
    /// Spawn the registry task on the current runtime
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(rx));
        Self { tx }
    }

    async fn request<T: Default>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> T {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(command(reply)).is_err() {
            return T::default();
        }
        rx.await.unwrap_or_default()
    }

    /// Register a connection as pending. Returns false if the session is
    /// already registered or the registry has been closed.
    pub async fn accept(&self, session: SessionId, sender: ConnectionSender) -> bool {
        self.request(|reply| Command::Accept { session, sender, reply }).await
    }

    /// Mark a pending connection as counted. Returns false if close_all
    /// dropped it in the meantime.
    pub async fn confirm(&self, session: SessionId) -> bool {
        self.request(|reply| Command::Confirm { session, reply }).await
    }

    /// Deregister a connection. Returns true only for the first close of a session.
    pub async fn close(&self, session: SessionId) -> bool {
        self.request(|reply| Command::Close { session, reply }).await
    }

    /// Queue an event for every registered connection; returns how many took it
    pub async fn deliver(&self, event: ServerEvent) -> usize {
        self.request(|reply| Command::Deliver { event, reply }).await
    }

    pub async fn local_live_count(&self) -> usize {
        self.request(|reply| Command::LiveCount { reply }).await
    }

    /// Deregister everything and refuse further accepts. Returns how many
    /// of the dropped connections had been confirmed.
    pub async fn close_all(&self) -> usize {
        self.request(|reply| Command::CloseAll { reply }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> (ConnectionSender, mpsc::Receiver<ServerEvent>) {
        mpsc::channel(8)
    }

    #[tokio::test]
    async fn test_duplicate_accept_ignored() {
        let registry = ConnectionRegistry::spawn();
        let session = SessionId::new();
        let (tx, _rx) = queue();

        assert!(registry.accept(session, tx.clone()).await);
        assert!(!registry.accept(session, tx).await);
        assert_eq!(registry.local_live_count().await, 1);
    }

    #[tokio::test]
    async fn test_close_runs_once() {
        let registry = ConnectionRegistry::spawn();
        let session = SessionId::new();
        let (tx, _rx) = queue();

        registry.accept(session, tx).await;
        assert!(registry.close(session).await);
        assert!(!registry.close(session).await);
        assert_eq!(registry.local_live_count().await, 0);
    }

    #[tokio::test]
    async fn test_deliver_reaches_each_connection_once() {
        let registry = ConnectionRegistry::spawn();
        let (tx_a, mut rx_a) = queue();
        let (tx_b, mut rx_b) = queue();
        registry.accept(SessionId::new(), tx_a).await;
        registry.accept(SessionId::new(), tx_b).await;

        let delivered = registry.deliver(ServerEvent::PresenceUpdate { count: 2 }).await;
        assert_eq!(delivered, 2);

        assert_eq!(rx_a.recv().await, Some(ServerEvent::PresenceUpdate { count: 2 }));
        assert_eq!(rx_b.recv().await, Some(ServerEvent::PresenceUpdate { count: 2 }));
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_connection_skipped() {
        let registry = ConnectionRegistry::spawn();
        let kept = SessionId::new();
        let gone = SessionId::new();
        let (tx_kept, mut rx_kept) = queue();
        let (tx_gone, _rx_gone) = queue();
        registry.accept(kept, tx_kept).await;
        registry.accept(gone, tx_gone).await;
        registry.close(gone).await;

        assert_eq!(registry.deliver(ServerEvent::Pong).await, 1);
        assert_eq!(rx_kept.recv().await, Some(ServerEvent::Pong));
    }

    #[tokio::test]
    async fn test_full_queue_drops_for_that_client_only() {
        let registry = ConnectionRegistry::spawn();
        let (slow_tx, _slow_rx) = mpsc::channel(1);
        let (fast_tx, mut fast_rx) = queue();
        registry.accept(SessionId::new(), slow_tx).await;
        registry.accept(SessionId::new(), fast_tx).await;

        assert_eq!(registry.deliver(ServerEvent::Pong).await, 2);
        assert_eq!(registry.deliver(ServerEvent::Pong).await, 1);
        assert_eq!(fast_rx.recv().await, Some(ServerEvent::Pong));
        assert_eq!(fast_rx.recv().await, Some(ServerEvent::Pong));
    }

    #[tokio::test]
    async fn test_close_all_drops_senders() {
        let registry = ConnectionRegistry::spawn();
        let (tx, mut rx) = queue();
        let first = SessionId::new();
        let second = SessionId::new();
        registry.accept(first, tx).await;
        registry.accept(second, queue().0).await;
        registry.confirm(first).await;
        registry.confirm(second).await;

        assert_eq!(registry.close_all().await, 2);
        assert_eq!(registry.local_live_count().await, 0);
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_close_all_skips_unconfirmed() {
        let registry = ConnectionRegistry::spawn();
        let counted = SessionId::new();
        let pending = SessionId::new();
        registry.accept(counted, queue().0).await;
        registry.accept(pending, queue().0).await;
        assert!(registry.confirm(counted).await);

        assert_eq!(registry.close_all().await, 1);
        assert!(!registry.confirm(pending).await);
    }

    #[tokio::test]
    async fn test_accept_refused_after_close_all() {
        let registry = ConnectionRegistry::spawn();
        registry.close_all().await;

        assert!(!registry.accept(SessionId::new(), queue().0).await);
        assert_eq!(registry.local_live_count().await, 0);
    }
}
