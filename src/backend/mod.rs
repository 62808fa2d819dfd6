//! Coordination backends
//!
//! Every instance of the relay talks to two external capabilities: a shared
//! counter store offering atomic integer operations, and a broadcast medium
//! offering best-effort publish/subscribe on named channels. Both are traits
//! so the coordinators never care which service provides them.
//!
//! - [`MemoryBackend`]: in-process implementation, shared between several
//!   instances to simulate a deployment
//! - [`RedisBackend`]: production implementation on top of Redis

pub mod memory;
pub mod redis_backend;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::types::RelayResult;

pub use self::memory::MemoryBackend;
pub use self::redis_backend::RedisBackend;

/// One payload received on a subscribed channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediumMessage {
    pub channel: String,
    pub payload: String,
}

impl MediumMessage {
    pub fn new(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// Stream of payloads for a subscription; ends when the medium drops it
pub type MediumStream = Pin<Box<dyn Stream<Item = MediumMessage> + Send>>;

/// Atomic integer store shared by every instance
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn get(&self, key: &str) -> RelayResult<Option<i64>>;

    async fn set(&self, key: &str, value: i64) -> RelayResult<()>;

    /// Set the key only when it does not exist yet. Returns true if it was set.
    async fn set_if_absent(&self, key: &str, value: i64) -> RelayResult<bool>;

    async fn increment(&self, key: &str) -> RelayResult<i64>;

    async fn decrement(&self, key: &str) -> RelayResult<i64>;

    /// Atomically subtract `by`, never going below zero. Returns the new value.
    async fn decrement_clamped(&self, key: &str, by: i64) -> RelayResult<i64>;
}

/// Best-effort publish/subscribe transport without persistence
#[async_trait]
pub trait BroadcastMedium: Send + Sync {
    async fn publish(&self, channel: &str, payload: &str) -> RelayResult<()>;

    /// Subscribe to a set of channels. Only payloads published after the
    /// subscription is established are delivered.
    async fn subscribe(&self, channels: &[String]) -> RelayResult<MediumStream>;
}
