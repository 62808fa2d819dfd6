//! API module for HTTP and WebSocket endpoints
//!
//! Thin I/O surface in front of the relay core: the `/ws` upgrade endpoint
//! and the health check.

pub mod http;
pub mod websocket;
