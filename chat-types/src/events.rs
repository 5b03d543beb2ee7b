//! Realtime event types for VetLink chat.
//!
//! The realtime transport delivers these for every committed row belonging
//! to a subscribed scope. Delivery is at-least-once and ordered per channel;
//! consumers deduplicate by id and reconcile outage windows with an explicit
//! pull when `Reconnected` is observed.

use crate::model::{Chat, Message};
use serde::{Deserialize, Serialize};

/// A message-level realtime event for a single chat channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MessageEvent {
    /// A new message row was committed.
    Inserted(Message),
    /// An existing message row changed (status or read flag).
    Updated(Message),
}

impl MessageEvent {
    /// The message carried by this event.
    pub fn message(&self) -> &Message {
        match self {
            Self::Inserted(m) | Self::Updated(m) => m,
        }
    }
}

/// A chat-level realtime event for a user's chat-list channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChatEvent {
    /// A new chat was created with this user as a participant.
    Inserted(Chat),
    /// An existing chat changed (timestamp bump, unread change).
    Updated(Chat),
}

impl ChatEvent {
    /// The chat carried by this event.
    pub fn chat(&self) -> &Chat {
        match self {
            Self::Inserted(c) | Self::Updated(c) => c,
        }
    }
}

/// Everything a realtime channel can deliver.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A message event on a chat channel.
    Message(MessageEvent),
    /// A chat event on a user-chats channel.
    Chat(ChatEvent),
    /// The transport dropped and re-established the channel.
    ///
    /// Events committed during the outage were not replayed; the consumer
    /// must reconcile with an explicit pull.
    Reconnected,
}
