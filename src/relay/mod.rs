//! Cross-instance relay core
//!
//! A [`RelayInstance`] is what one server process runs: a connection
//! registry for the clients it holds, a presence coordinator keeping the
//! shared count, a message relay, and a subscription task feeding both
//! coordinators from the broadcast medium.
//!
//! Every instance, the publishing one included, learns about presence
//! changes and chat messages only through its subscription, so all clients
//! everywhere see events through the same path.

pub mod messages;
pub mod presence;
pub mod registry;
pub mod subscriber;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub use messages::MessageRelay;
pub use presence::PresenceCoordinator;
pub use registry::{ConnectionRegistry, ConnectionSender};

use crate::backend::{BroadcastMedium, CounterStore};
use crate::types::{ClientEvent, RelayResult, ServerEvent, SessionId};

/// Namespace used when none is configured
pub const DEFAULT_NAMESPACE: &str = "chat";

/// Default per-connection outbound queue size
pub const DEFAULT_OUTBOUND_BUFFER: usize = 1024;

/// Well-known counter key and channel names for one deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keys {
    pub counter: String,
    pub presence_channel: String,
    pub message_channel: String,
}

impl Keys {
    pub fn for_namespace(namespace: &str) -> Self {
        Self {
            counter: format!("{}:connection-count", namespace),
            presence_channel: format!("{}:connection-count-updated", namespace),
            message_channel: format!("{}:new-message", namespace),
        }
    }

    pub fn channels(&self) -> Vec<String> {
        vec![self.presence_channel.clone(), self.message_channel.clone()]
    }
}

impl Default for Keys {
    fn default() -> Self {
        Self::for_namespace(DEFAULT_NAMESPACE)
    }
}

/// Per-instance settings
#[derive(Debug, Clone)]
pub struct InstanceOptions {
    /// Identity stamped on every message this instance relays
    pub origin_tag: String,
    pub keys: Keys,
    pub outbound_buffer: usize,
}

impl InstanceOptions {
    pub fn new(origin_tag: impl Into<String>) -> Self {
        Self {
            origin_tag: origin_tag.into(),
            keys: Keys::default(),
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
        }
    }

    pub fn with_keys(mut self, keys: Keys) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_outbound_buffer(mut self, size: usize) -> Self {
        self.outbound_buffer = size.max(1);
        self
    }
}

/// A connection accepted by this instance
#[derive(Debug)]
pub struct LocalConnection {
    pub session: SessionId,
    /// Events queued for the client; ends when the instance drops the connection
    pub outbound: mpsc::Receiver<ServerEvent>,
}

/// One running relay process
pub struct RelayInstance {
    options: InstanceOptions,
    registry: ConnectionRegistry,
    presence: Arc<PresenceCoordinator>,
    relay: Arc<MessageRelay>,
    dispatcher: JoinHandle<()>,
    closing: AtomicBool,
}

impl RelayInstance {
    /// Start an instance: initialize the shared counter if absent and
    /// subscribe to both channels before returning.
    ///
    /// A failed counter initialization is logged and tolerated; a failed
    /// subscription is returned since the instance could never relay.
    pub async fn start(
        store: Arc<dyn CounterStore>,
        medium: Arc<dyn BroadcastMedium>,
        options: InstanceOptions,
    ) -> RelayResult<Self> {
        let registry = ConnectionRegistry::spawn();
        let presence = Arc::new(PresenceCoordinator::new(
            store,
            medium.clone(),
            registry.clone(),
            options.keys.clone(),
        ));
        let relay = Arc::new(MessageRelay::new(
            medium.clone(),
            registry.clone(),
            options.keys.message_channel.clone(),
            options.origin_tag.clone(),
        ));

        if let Err(e) = presence.initialize().await {
            tracing::warn!(error = %e, "Could not initialize shared connection counter");
        }

        let stream = medium.subscribe(&options.keys.channels()).await?;
        let dispatcher = tokio::spawn(subscriber::run_dispatch(
            stream,
            options.keys.clone(),
            presence.clone(),
            relay.clone(),
        ));

        tracing::info!(origin = %options.origin_tag, "Relay instance started");

        Ok(Self {
            options,
            registry,
            presence,
            relay,
            dispatcher,
            closing: AtomicBool::new(false),
        })
    }

    pub fn origin_tag(&self) -> &str {
        self.relay.origin_tag()
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Accept a client connection and count it globally.
    ///
    /// Returns `None` for a duplicate session or once shutdown has begun,
    /// with any increment already made undone. The connection is accepted
    /// even when the counter store is down.
    pub async fn accept(&self, session: SessionId) -> Option<LocalConnection> {
        if self.is_closing() {
            return None;
        }

        let (tx, outbound) = mpsc::channel(self.options.outbound_buffer);
        if !self.registry.accept(session, tx).await {
            return None;
        }

        let counted = self.presence.on_connect().await;

        // Shutdown may have dropped the pending connection while the
        // increment was in flight; it was not part of the compensation.
        if !self.registry.confirm(session).await {
            if counted.is_some() {
                self.presence.on_disconnect().await;
            }
            tracing::debug!(session = %session, "Connection dropped by shutdown during accept");
            return None;
        }

        tracing::info!(session = %session, "Client connected");
        Some(LocalConnection { session, outbound })
    }

    /// Handle an event from a local client. Returns a reply meant only for that client.
    pub async fn receive(&self, session: SessionId, event: ClientEvent) -> Option<ServerEvent> {
        match event {
            ClientEvent::SendMessage { text } => {
                if !self.relay.on_client_message(text).await {
                    tracing::debug!(session = %session, "Message not published");
                }
                None
            }
            ClientEvent::Ping => Some(ServerEvent::Pong),
        }
    }

    /// Close a client connection. Only the first close of a session touches the count.
    pub async fn close(&self, session: SessionId) -> bool {
        if !self.registry.close(session).await {
            return false;
        }

        tracing::info!(session = %session, "Client disconnected");
        self.presence.on_disconnect().await;
        true
    }

    pub async fn local_live_count(&self) -> usize {
        self.registry.local_live_count().await
    }

    /// Graceful shutdown: stop accepting, drop every local connection, take
    /// them off the shared count in one step and publish the corrected count.
    ///
    /// Returns the corrected count when the compensation succeeded.
    pub async fn shutdown(&self) -> Option<i64> {
        if self.closing.swap(true, Ordering::SeqCst) {
            return None;
        }

        let live = self.registry.close_all().await;
        let corrected = self.presence.reconcile_on_shutdown(live).await;
        self.dispatcher.abort();

        tracing::info!(live, corrected = ?corrected, "Relay instance shut down");
        corrected
    }
}

impl Drop for RelayInstance {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}
