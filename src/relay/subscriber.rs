//! Subscription dispatch loop
//!
//! One task reads both channels and hands each payload to its handler
//! before pulling the next, so presence and message handlers never overlap
//! within an instance and each channel is processed in medium order.

use std::sync::Arc;

use futures::StreamExt;

use super::{Keys, MessageRelay, PresenceCoordinator};
use crate::backend::{MediumMessage, MediumStream};
use crate::types::PresenceEvent;

pub async fn run_dispatch(
    mut stream: MediumStream,
    keys: Keys,
    presence: Arc<PresenceCoordinator>,
    relay: Arc<MessageRelay>,
) {
    while let Some(msg) = stream.next().await {
        dispatch(msg, &keys, &presence, &relay).await;
    }

    // No resubscription: events published from here on are lost to this instance
    tracing::error!("Broadcast subscription ended, no further events will be relayed");
}

async fn dispatch(
    msg: MediumMessage,
    keys: &Keys,
    presence: &PresenceCoordinator,
    relay: &MessageRelay,
) {
    if msg.channel == keys.presence_channel {
        match PresenceEvent::from_payload(&msg.channel, &msg.payload) {
            Ok(event) => {
                presence.on_presence_event(event).await;
            }
            Err(e) => tracing::warn!(error = %e, "Ignoring presence payload"),
        }
    } else if msg.channel == keys.message_channel {
        relay.on_message_event(msg.payload).await;
    } else {
        tracing::debug!(channel = %msg.channel, "Payload on unexpected channel ignored");
    }
}
