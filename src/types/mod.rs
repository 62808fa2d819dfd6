//! Data types for the chat relay
//!
//! This module contains the wire events exchanged with clients, the
//! session identifier for local connections, and the crate error type.

mod error;
mod events;
mod session;

pub use error::RelayError;
pub use events::{ClientEvent, PresenceEvent, RelayedMessage, ServerEvent};
pub use session::SessionId;

/// Result type for relay operations
pub type RelayResult<T> = Result<T, RelayError>;
