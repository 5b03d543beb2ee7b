//! # chat-types
//!
//! Shared data model for the VetLink chat synchronization engine.
//!
//! This crate provides the foundational types used across all VetLink chat
//! crates:
//! - [`UserId`], [`ChatId`], [`MessageId`], [`AppointmentId`] - Identity types
//! - [`Chat`], [`Message`], [`MessageContent`], [`MessageStatus`] - The chat model
//! - [`MessageEvent`], [`ChatEvent`], [`TransportEvent`] - Realtime event types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod events;
mod ids;
mod model;

pub use events::{ChatEvent, MessageEvent, TransportEvent};
pub use ids::{AppointmentId, ChatId, MessageId, UserId};
pub use model::{Chat, Message, MessageContent, MessageStatus, Participant, ParticipantRole};
