//! Process configuration
//!
//! Every flag can also come from the environment; flags win.

use std::time::Duration;

use clap::Parser;

use crate::api::websocket::Heartbeat;
use crate::relay::{InstanceOptions, Keys, DEFAULT_NAMESPACE, DEFAULT_OUTBOUND_BUFFER};
use crate::types::{RelayError, RelayResult};

/// Legacy variable name still honoured for the store URL
pub const LEGACY_REDIS_URL_ENV: &str = "UPSTASH_REDIS_REST_URL";

/// Horizontally scalable chat relay
#[derive(Parser, Clone, Debug)]
#[command(name = "relay-server", version, about = "WebSocket chat relay coordinated over Redis")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 5000)]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Allowed CORS origin (`*` for any)
    #[arg(long, env = "CORS_ORIGIN", default_value = "http://localhost:3000")]
    pub cors_origin: String,

    /// Redis connection URL for the shared counter and pub/sub channels
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Identity stamped on relayed messages (defaults to the port)
    #[arg(long, env = "INSTANCE_ID")]
    pub instance_id: Option<String>,

    /// Prefix for the counter key and channel names
    #[arg(long, env = "RELAY_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// Per-connection outbound queue size; events beyond it are dropped for that client
    #[arg(long, env = "RELAY_OUTBOUND_BUFFER", default_value_t = DEFAULT_OUTBOUND_BUFFER)]
    pub outbound_buffer: usize,

    /// Seconds between server pings
    #[arg(long, env = "RELAY_PING_INTERVAL_SECS", default_value_t = 30)]
    pub ping_interval_secs: u64,

    /// Seconds to wait for a pong before closing the connection
    #[arg(long, env = "RELAY_PONG_TIMEOUT_SECS", default_value_t = 10)]
    pub pong_timeout_secs: u64,

    /// Upper bound on shutdown reconciliation, in milliseconds
    #[arg(long, env = "RELAY_SHUTDOWN_GRACE_MS", default_value_t = 2000)]
    pub shutdown_grace_ms: u64,

    /// Enable structured JSON logging
    #[arg(long, env = "RELAY_JSON_LOGS")]
    pub json_logs: bool,
}

impl Config {
    /// Parse flags and environment
    pub fn load() -> Self {
        Self::parse()
    }

    /// The store URL, falling back to the legacy variable. Missing is fatal.
    pub fn resolve_redis_url(&self) -> RelayResult<String> {
        self.redis_url
            .clone()
            .or_else(|| std::env::var(LEGACY_REDIS_URL_ENV).ok())
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| RelayError::Config("Missing REDIS_URL".to_string()))
    }

    pub fn origin_tag(&self) -> String {
        self.instance_id
            .clone()
            .unwrap_or_else(|| self.port.to_string())
    }

    pub fn instance_options(&self) -> InstanceOptions {
        InstanceOptions::new(self.origin_tag())
            .with_keys(Keys::for_namespace(&self.namespace))
            .with_outbound_buffer(self.outbound_buffer)
    }

    pub fn heartbeat(&self) -> Heartbeat {
        Heartbeat {
            ping_interval: Duration::from_secs(self.ping_interval_secs.max(1)),
            pong_timeout: Duration::from_secs(self.pong_timeout_secs.max(1)),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
