//! WebSocket module for client connections
//!
//! Provides the endpoint at `/ws`. Each connection runs as a small set of
//! tasks: a reader feeding client events to the relay instance, a writer
//! draining the connection's outbound queue, and a heartbeat.
//!
//! ## Protocol
//! - Inbound: `{"type":"sendMessage","text":"..."}`, `{"type":"ping"}`
//! - Outbound: `presenceUpdate`, `newMessage`, `pong`

pub mod handler;
pub mod state;

pub use handler::ws_handler;
pub use state::{AppState, Heartbeat};
