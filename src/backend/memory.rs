//! In-process coordination backend
//!
//! Clones share the same counters and the same broadcast bus, so handing a
//! clone to each instance simulates several processes sharing one store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::{BroadcastMedium, CounterStore, MediumMessage, MediumStream};
use crate::types::{RelayError, RelayResult};

/// Buffer of the internal bus; subscribers that fall further behind lose payloads
const BUS_CAPACITY: usize = 1024;

struct Inner {
    counters: Mutex<HashMap<String, i64>>,
    bus: broadcast::Sender<MediumMessage>,
    store_available: AtomicBool,
    medium_available: AtomicBool,
}

/// Counter store and broadcast medium backed by process memory
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (bus, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                counters: Mutex::new(HashMap::new()),
                bus,
                store_available: AtomicBool::new(true),
                medium_available: AtomicBool::new(true),
            }),
        }
    }

    /// Simulate the counter store going down or coming back
    pub fn set_store_available(&self, available: bool) {
        self.inner.store_available.store(available, Ordering::SeqCst);
    }

    /// Simulate the medium going down or coming back
    pub fn set_medium_available(&self, available: bool) {
        self.inner.medium_available.store(available, Ordering::SeqCst);
    }

    /// Read a counter without going through the availability check
    pub fn peek(&self, key: &str) -> Option<i64> {
        self.inner.counters.lock().get(key).copied()
    }

    fn check_store(&self) -> RelayResult<()> {
        if self.inner.store_available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RelayError::Store("memory store marked unavailable".to_string()))
        }
    }

    fn check_medium(&self) -> RelayResult<()> {
        if self.inner.medium_available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RelayError::Medium("memory medium marked unavailable".to_string()))
        }
    }

    fn update(&self, key: &str, f: impl FnOnce(i64) -> i64) -> RelayResult<i64> {
        self.check_store()?;
        let mut counters = self.inner.counters.lock();
        let slot = counters.entry(key.to_string()).or_insert(0);
        *slot = f(*slot);
        Ok(*slot)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryBackend {
    async fn get(&self, key: &str) -> RelayResult<Option<i64>> {
        self.check_store()?;
        Ok(self.inner.counters.lock().get(key).copied())
    }

    async fn set(&self, key: &str, value: i64) -> RelayResult<()> {
        self.check_store()?;
        self.inner.counters.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: i64) -> RelayResult<bool> {
        self.check_store()?;
        let mut counters = self.inner.counters.lock();
        if counters.contains_key(key) {
            return Ok(false);
        }
        counters.insert(key.to_string(), value);
        Ok(true)
    }

    async fn increment(&self, key: &str) -> RelayResult<i64> {
        self.update(key, |v| v + 1)
    }

    async fn decrement(&self, key: &str) -> RelayResult<i64> {
        self.update(key, |v| v - 1)
    }

    async fn decrement_clamped(&self, key: &str, by: i64) -> RelayResult<i64> {
        self.update(key, |v| (v - by).max(0))
    }
}

#[async_trait]
impl BroadcastMedium for MemoryBackend {
    async fn publish(&self, channel: &str, payload: &str) -> RelayResult<()> {
        self.check_medium()?;
        // No receivers just means nobody is subscribed yet
        let _ = self.inner.bus.send(MediumMessage::new(channel, payload));
        Ok(())
    }

    async fn subscribe(&self, channels: &[String]) -> RelayResult<MediumStream> {
        self.check_medium()?;
        let mut rx = self.inner.bus.subscribe();
        let channels = channels.to_vec();

        let stream = async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(msg) => {
                        if channels.iter().any(|c| *c == msg.channel) {
                            yield msg;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(missed = n, "memory subscription lagged, payloads dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_set_if_absent_only_once() {
        let backend = MemoryBackend::new();
        assert!(backend.set_if_absent("k", 0).await.unwrap());
        backend.increment("k").await.unwrap();
        assert!(!backend.set_if_absent("k", 0).await.unwrap());
        assert_eq!(backend.get("k").await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_decrement_clamped_never_negative() {
        let backend = MemoryBackend::new();
        backend.set("k", 2).await.unwrap();
        assert_eq!(backend.decrement_clamped("k", 5).await.unwrap(), 0);
        assert_eq!(backend.peek("k"), Some(0));
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let a = MemoryBackend::new();
        let b = a.clone();
        a.increment("k").await.unwrap();
        assert_eq!(b.increment("k").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_subscription_filters_channels() {
        let backend = MemoryBackend::new();
        let mut stream = backend.subscribe(&["wanted".to_string()]).await.unwrap();

        backend.publish("other", "x").await.unwrap();
        backend.publish("wanted", "y").await.unwrap();

        let msg = stream.next().await.unwrap();
        assert_eq!(msg, MediumMessage::new("wanted", "y"));
    }

    #[tokio::test]
    async fn test_unavailable_store_errors() {
        let backend = MemoryBackend::new();
        backend.set_store_available(false);
        assert!(matches!(backend.increment("k").await, Err(RelayError::Store(_))));
        assert!(backend.publish("c", "p").await.is_ok());

        backend.set_medium_available(false);
        assert!(matches!(backend.publish("c", "p").await, Err(RelayError::Medium(_))));
    }
}
