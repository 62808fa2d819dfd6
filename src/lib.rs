//! Chat Relay
//!
//! A WebSocket chat relay that runs as any number of stateless instances
//! behind a load balancer. Instances share nothing but a counter store and
//! a publish/subscribe medium (Redis in production).
//!
//! # Features
//!
//! - **Global presence**: one connection count across every instance
//! - **Fan-out**: a message sent to any instance reaches every client
//! - **Fail-open**: store or medium outages never block connections
//! - **Graceful shutdown**: held connections are taken off the count on exit
//!
//! # Modules
//!
//! - `types`: wire events, session ids and the error type
//! - `backend`: counter store and broadcast medium capabilities
//! - `relay`: connection registry, presence coordinator, message relay
//! - `api`: HTTP and WebSocket endpoints
//! - `config`: command line and environment configuration
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use chat_relay::backend::MemoryBackend;
//! use chat_relay::relay::{InstanceOptions, RelayInstance};
//! use chat_relay::types::{ClientEvent, SessionId};
//!
//! # async fn run() -> chat_relay::types::RelayResult<()> {
//! let backend = Arc::new(MemoryBackend::new());
//! let instance = RelayInstance::start(backend.clone(), backend, InstanceOptions::new("5000")).await?;
//!
//! let session = SessionId::new();
//! let mut conn = instance.accept(session).await.expect("fresh session");
//! instance
//!     .receive(session, ClientEvent::SendMessage { text: Some("hi".into()) })
//!     .await;
//! let _presence = conn.outbound.recv().await;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod backend;
pub mod config;
pub mod relay;
pub mod types;

// Re-export commonly used items at crate root
pub use backend::{BroadcastMedium, CounterStore, MemoryBackend, RedisBackend};
pub use relay::{InstanceOptions, Keys, LocalConnection, RelayInstance};
pub use types::{ClientEvent, PresenceEvent, RelayError, RelayResult, RelayedMessage, ServerEvent, SessionId};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
