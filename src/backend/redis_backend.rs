//! Redis coordination backend
//!
//! Counter commands share one multiplexed connection. Pub/sub needs a
//! dedicated connection, so every subscription opens its own.

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, Script};

use super::{BroadcastMedium, CounterStore, MediumMessage, MediumStream};
use crate::types::{RelayError, RelayResult};

/// Subtract ARGV[1] from KEYS[1] without crossing zero
const DECREMENT_CLAMPED_LUA: &str = r#"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
local next = current - tonumber(ARGV[1])
if next < 0 then next = 0 end
redis.call('SET', KEYS[1], next)
return next
"#;

/// Counter store and broadcast medium backed by a Redis server
pub struct RedisBackend {
    client: Client,
    conn: MultiplexedConnection,
    decrement_clamped: Script,
}

impl RedisBackend {
    /// Open a client for `url` and establish the command connection
    pub async fn connect(url: &str) -> RelayResult<Self> {
        let client = Client::open(url).map_err(|e| RelayError::Config(e.to_string()))?;
        let conn = client.get_multiplexed_async_connection().await?;

        tracing::info!("Connected to Redis");

        Ok(Self {
            client,
            conn,
            decrement_clamped: Script::new(DECREMENT_CLAMPED_LUA),
        })
    }
}

fn medium_err(err: redis::RedisError) -> RelayError {
    RelayError::Medium(err.to_string())
}

#[async_trait]
impl CounterStore for RedisBackend {
    async fn get(&self, key: &str) -> RelayResult<Option<i64>> {
        let mut conn = self.conn.clone();
        let value: Option<i64> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: i64) -> RelayResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: i64) -> RelayResult<bool> {
        let mut conn = self.conn.clone();
        let set: bool = conn.set_nx(key, value).await?;
        Ok(set)
    }

    async fn increment(&self, key: &str) -> RelayResult<i64> {
        let mut conn = self.conn.clone();
        let value: i64 = conn.incr(key, 1).await?;
        Ok(value)
    }

    async fn decrement(&self, key: &str) -> RelayResult<i64> {
        let mut conn = self.conn.clone();
        let value: i64 = conn.decr(key, 1).await?;
        Ok(value)
    }

    async fn decrement_clamped(&self, key: &str, by: i64) -> RelayResult<i64> {
        let mut conn = self.conn.clone();
        let value: i64 = self
            .decrement_clamped
            .key(key)
            .arg(by)
            .invoke_async(&mut conn)
            .await?;
        Ok(value)
    }
}

#[async_trait]
impl BroadcastMedium for RedisBackend {
    async fn publish(&self, channel: &str, payload: &str) -> RelayResult<()> {
        let mut conn = self.conn.clone();
        let _receivers: i64 = conn.publish(channel, payload).await.map_err(medium_err)?;
        Ok(())
    }

    async fn subscribe(&self, channels: &[String]) -> RelayResult<MediumStream> {
        let mut pubsub = self.client.get_async_pubsub().await.map_err(medium_err)?;
        for channel in channels {
            pubsub.subscribe(channel.as_str()).await.map_err(medium_err)?;
        }

        tracing::info!(channels = ?channels, "Subscribed to {} Redis channel(s)", channels.len());

        let stream = pubsub.into_on_message().filter_map(|msg| {
            let channel = msg.get_channel_name().to_string();
            let decoded = match msg.get_payload::<String>() {
                Ok(payload) => Some(MediumMessage::new(channel, payload)),
                Err(e) => {
                    tracing::warn!(channel = %channel, error = %e, "Dropping non-text payload");
                    None
                }
            };
            futures::future::ready(decoded)
        });

        Ok(Box::pin(stream))
    }
}
