//! Presence coordinator
//!
//! Keeps the shared connection counter in step with local connects and
//! disconnects, and re-broadcasts every presence event it hears to the
//! connections this instance holds. Store and medium failures are logged
//! and absorbed: a stale count beats a rejected connection.

use std::sync::Arc;

use super::{ConnectionRegistry, Keys};
use crate::backend::{BroadcastMedium, CounterStore};
use crate::types::{PresenceEvent, RelayResult};

pub struct PresenceCoordinator {
    store: Arc<dyn CounterStore>,
    medium: Arc<dyn BroadcastMedium>,
    registry: ConnectionRegistry,
    keys: Keys,
}

impl PresenceCoordinator {
    pub fn new(
        store: Arc<dyn CounterStore>,
        medium: Arc<dyn BroadcastMedium>,
        registry: ConnectionRegistry,
        keys: Keys,
    ) -> Self {
        Self {
            store,
            medium,
            registry,
            keys,
        }
    }

    /// Create the shared counter at zero unless some instance already did.
    /// Returns true if this call created it.
    pub async fn initialize(&self) -> RelayResult<bool> {
        let created = self.store.set_if_absent(&self.keys.counter, 0).await?;
        if created {
            tracing::info!(key = %self.keys.counter, "Initialized shared connection counter");
        }
        Ok(created)
    }

    /// Account for a newly accepted local connection
    pub async fn on_connect(&self) -> Option<i64> {
        match self.store.increment(&self.keys.counter).await {
            Ok(count) => {
                self.publish(count).await;
                Some(count)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to increment connection count, count is stale");
                None
            }
        }
    }

    /// Account for a closed local connection
    pub async fn on_disconnect(&self) -> Option<i64> {
        match self.store.decrement(&self.keys.counter).await {
            Ok(count) => {
                self.publish(count).await;
                Some(count)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to decrement connection count, count is stale");
                None
            }
        }
    }

    /// Fan a presence event out to every local connection, whoever published it
    pub async fn on_presence_event(&self, event: PresenceEvent) -> usize {
        let delivered = self.registry.deliver(event.into()).await;
        tracing::debug!(count = event.count, delivered, "Presence update delivered");
        delivered
    }

    /// Remove `live` connections that are about to vanish without their own
    /// disconnect accounting, then publish the corrected count.
    pub async fn reconcile_on_shutdown(&self, live: usize) -> Option<i64> {
        if live == 0 {
            return None;
        }

        tracing::info!(live, "Removing local connections from the shared count");

        let by = i64::try_from(live).unwrap_or(i64::MAX);
        match self.store.decrement_clamped(&self.keys.counter, by).await {
            Ok(count) => {
                self.publish(count).await;
                Some(count)
            }
            Err(e) => {
                tracing::warn!(error = %e, live, "Shutdown reconciliation failed, count stays overstated");
                None
            }
        }
    }

    async fn publish(&self, count: i64) -> bool {
        let payload = PresenceEvent::new(count).to_payload();
        match self.medium.publish(&self.keys.presence_channel, &payload).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, count, "Failed to publish presence update");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::types::ServerEvent;
    use futures::StreamExt;
    use tokio::sync::mpsc;

    fn coordinator(backend: &MemoryBackend) -> (PresenceCoordinator, ConnectionRegistry) {
        let registry = ConnectionRegistry::spawn();
        let presence = PresenceCoordinator::new(
            Arc::new(backend.clone()),
            Arc::new(backend.clone()),
            registry.clone(),
            Keys::default(),
        );
        (presence, registry)
    }

    #[tokio::test]
    async fn test_initialize_sets_absent_counter_once() {
        let backend = MemoryBackend::new();
        let (presence, _) = coordinator(&backend);

        assert!(presence.initialize().await.unwrap());
        assert_eq!(backend.peek(&Keys::default().counter), Some(0));

        presence.on_connect().await;
        assert!(!presence.initialize().await.unwrap());
        assert_eq!(backend.peek(&Keys::default().counter), Some(1));
    }

    #[tokio::test]
    async fn test_connect_and_disconnect_publish_counts() {
        let backend = MemoryBackend::new();
        let (presence, _) = coordinator(&backend);
        let keys = Keys::default();
        let mut sub = backend.subscribe(&[keys.presence_channel.clone()]).await.unwrap();

        assert_eq!(presence.on_connect().await, Some(1));
        assert_eq!(presence.on_disconnect().await, Some(0));

        assert_eq!(sub.next().await.unwrap().payload, "1");
        assert_eq!(sub.next().await.unwrap().payload, "0");
    }

    #[tokio::test]
    async fn test_store_down_is_fail_open() {
        let backend = MemoryBackend::new();
        let (presence, _) = coordinator(&backend);
        backend.set_store_available(false);

        assert_eq!(presence.on_connect().await, None);
        assert_eq!(presence.on_disconnect().await, None);
    }

    #[tokio::test]
    async fn test_presence_event_reaches_every_local_connection() {
        let backend = MemoryBackend::new();
        let (presence, registry) = coordinator(&backend);
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        registry.accept(crate::types::SessionId::new(), tx_a).await;
        registry.accept(crate::types::SessionId::new(), tx_b).await;

        assert_eq!(presence.on_presence_event(PresenceEvent::new(9)).await, 2);
        assert_eq!(presence.on_presence_event(PresenceEvent::new(9)).await, 2);

        for rx in [&mut rx_a, &mut rx_b] {
            assert_eq!(rx.recv().await, Some(ServerEvent::PresenceUpdate { count: 9 }));
            assert_eq!(rx.recv().await, Some(ServerEvent::PresenceUpdate { count: 9 }));
        }
    }

    #[tokio::test]
    async fn test_reconcile_clamps_at_zero() {
        let backend = MemoryBackend::new();
        let (presence, _) = coordinator(&backend);
        let keys = Keys::default();
        backend.set(&keys.counter, 2).await.unwrap();

        assert_eq!(presence.reconcile_on_shutdown(3).await, Some(0));
        assert_eq!(presence.reconcile_on_shutdown(0).await, None);
        assert_eq!(backend.peek(&keys.counter), Some(0));
    }
}
