//! Message relay
//!
//! Client text goes onto the message channel untouched. Whatever comes back
//! off the channel, including this instance's own publications, is stamped
//! here and fanned out to local connections.

use std::sync::Arc;

use super::ConnectionRegistry;
use crate::backend::BroadcastMedium;
use crate::types::RelayedMessage;

pub struct MessageRelay {
    medium: Arc<dyn BroadcastMedium>,
    registry: ConnectionRegistry,
    channel: String,
    origin_tag: String,
}

impl MessageRelay {
    pub fn new(
        medium: Arc<dyn BroadcastMedium>,
        registry: ConnectionRegistry,
        channel: String,
        origin_tag: String,
    ) -> Self {
        Self {
            medium,
            registry,
            channel,
            origin_tag,
        }
    }

    pub fn origin_tag(&self) -> &str {
        &self.origin_tag
    }

    /// Publish a message from a local client. Missing or empty text is
    /// dropped without telling the sender. Returns true if it was published.
    pub async fn on_client_message(&self, text: Option<String>) -> bool {
        let text = match text {
            Some(text) if !text.is_empty() => text,
            _ => return false,
        };

        match self.medium.publish(&self.channel, &text).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to publish chat message, message lost");
                false
            }
        }
    }

    /// Stamp a message read off the channel and deliver it locally
    pub async fn on_message_event(&self, text: String) -> usize {
        let message = RelayedMessage::stamp(text, &self.origin_tag);
        let id = message.id;
        let delivered = self.registry.deliver(message.into()).await;
        tracing::debug!(id = %id, delivered, "Chat message delivered");
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::types::{ServerEvent, SessionId};
    use futures::StreamExt;
    use tokio::sync::mpsc;

    fn relay(backend: &MemoryBackend) -> (MessageRelay, ConnectionRegistry) {
        let registry = ConnectionRegistry::spawn();
        let relay = MessageRelay::new(
            Arc::new(backend.clone()),
            registry.clone(),
            "test:new-message".to_string(),
            "5000".to_string(),
        );
        (relay, registry)
    }

    #[tokio::test]
    async fn test_empty_text_never_published() {
        let backend = MemoryBackend::new();
        let (relay, _) = relay(&backend);
        let mut sub = backend.subscribe(&["test:new-message".to_string()]).await.unwrap();

        assert!(!relay.on_client_message(None).await);
        assert!(!relay.on_client_message(Some(String::new())).await);
        assert!(relay.on_client_message(Some("  hi  ".to_string())).await);

        // The first payload seen is the verbatim non-empty one
        assert_eq!(sub.next().await.unwrap().payload, "  hi  ");
    }

    #[tokio::test]
    async fn test_medium_down_drops_message() {
        let backend = MemoryBackend::new();
        let (relay, _) = relay(&backend);
        backend.set_medium_available(false);

        assert!(!relay.on_client_message(Some("lost".to_string())).await);
    }

    #[tokio::test]
    async fn test_message_event_stamped_and_delivered() {
        let backend = MemoryBackend::new();
        let (relay, registry) = relay(&backend);
        let (tx, mut rx) = mpsc::channel(4);
        registry.accept(SessionId::new(), tx).await;

        assert_eq!(relay.on_message_event("hello".to_string()).await, 1);

        match rx.recv().await {
            Some(ServerEvent::NewMessage { message }) => {
                assert_eq!(message.text, "hello");
                assert_eq!(message.origin_tag, "5000");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
