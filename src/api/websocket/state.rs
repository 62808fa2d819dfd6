//! WebSocket application state

use std::sync::Arc;
use std::time::Duration;

use crate::relay::RelayInstance;

/// Server-initiated ping schedule for idle connection detection
#[derive(Debug, Clone, Copy)]
pub struct Heartbeat {
    pub ping_interval: Duration,
    /// A pong must arrive within this long after each ping
    pub pong_timeout: Duration,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
        }
    }
}

/// Shared application state for HTTP and WebSocket handlers
pub struct AppState {
    pub instance: Arc<RelayInstance>,

    /// Listening port, reported by the health check
    pub port: u16,

    pub heartbeat: Heartbeat,

    /// Allowed CORS origin, `*` for any
    pub cors_origin: String,
}

impl AppState {
    pub fn new(instance: Arc<RelayInstance>, port: u16) -> Self {
        Self {
            instance,
            port,
            heartbeat: Heartbeat::default(),
            cors_origin: "*".to_string(),
        }
    }

    pub fn with_heartbeat(mut self, heartbeat: Heartbeat) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn with_cors_origin(mut self, origin: impl Into<String>) -> Self {
        self.cors_origin = origin.into();
        self
    }
}
