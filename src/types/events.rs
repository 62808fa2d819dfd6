//! Wire events exchanged with clients and over the broadcast medium

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{RelayError, RelayResult};

/// Presence update carrying the global connection count
///
/// On the medium it travels as a bare decimal integer, one event per
/// connect or disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEvent {
    pub count: i64,
}

impl PresenceEvent {
    pub fn new(count: i64) -> Self {
        Self { count }
    }

    /// Encode as a medium payload
    pub fn to_payload(&self) -> String {
        self.count.to_string()
    }

    /// Decode a payload read off the presence channel
    pub fn from_payload(channel: &str, payload: &str) -> RelayResult<Self> {
        payload
            .trim()
            .parse::<i64>()
            .map(Self::new)
            .map_err(|e| RelayError::Codec {
                channel: channel.to_string(),
                reason: e.to_string(),
            })
    }
}

/// A chat message as stamped by the instance that read it off the medium
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayedMessage {
    pub id: Uuid,
    pub text: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "originTag")]
    pub origin_tag: String,
}

impl RelayedMessage {
    /// Stamp raw text with a fresh id and the current time
    pub fn stamp(text: String, origin_tag: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            text,
            created_at: Utc::now(),
            origin_tag: origin_tag.to_string(),
        }
    }
}

/// Events sent by a client
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Post a chat message; missing or empty text is ignored
    SendMessage {
        #[serde(default)]
        text: Option<String>,
    },

    /// Application-level heartbeat
    Ping,
}

/// Events pushed to a client
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerEvent {
    PresenceUpdate {
        count: i64,
    },

    NewMessage {
        #[serde(flatten)]
        message: RelayedMessage,
    },

    Pong,
}

impl From<PresenceEvent> for ServerEvent {
    fn from(event: PresenceEvent) -> Self {
        ServerEvent::PresenceUpdate { count: event.count }
    }
}

impl From<RelayedMessage> for ServerEvent {
    fn from(message: RelayedMessage) -> Self {
        ServerEvent::NewMessage { message }
    }
}
