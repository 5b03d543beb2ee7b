//! Chat and message model for VetLink chat.

use crate::ids::{AppointmentId, ChatId, MessageId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of a chat participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    /// Pet owner.
    Owner,
    /// Veterinarian.
    Vet,
}

/// A chat participant with denormalized display data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Identity-provider id of this participant.
    pub user_id: UserId,
    /// Role of this participant in the chat.
    pub role: ParticipantRole,
    /// Display name shown in the chat list.
    pub display_name: String,
    /// Clinic name (vets only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clinic_name: Option<String>,
}

impl Participant {
    /// Create an owner participant.
    pub fn owner(user_id: impl Into<UserId>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: ParticipantRole::Owner,
            display_name: display_name.into(),
            clinic_name: None,
        }
    }

    /// Create a vet participant.
    pub fn vet(
        user_id: impl Into<UserId>,
        display_name: impl Into<String>,
        clinic_name: Option<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            role: ParticipantRole::Vet,
            display_name: display_name.into(),
            clinic_name,
        }
    }
}

/// A two-party conversation between a pet owner and a veterinarian.
///
/// A chat is uniquely identified by the unordered pair
/// (owner id, vet id); the repository's get-or-create never mints a
/// second chat for an existing pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chat {
    /// Unique identifier, assigned by the remote store.
    pub id: ChatId,
    /// The pet-owner participant.
    pub owner: Participant,
    /// The veterinarian participant.
    pub vet: Participant,
    /// The appointment this chat originated from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appointment_id: Option<AppointmentId>,
    /// When the chat was created.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the most recent message (equals `created_at` when empty).
    pub last_message_at: DateTime<Utc>,
    /// Unread messages for the viewer this copy was materialized for.
    ///
    /// Derived, per-viewer. Recomputed by the engine; never meaningful
    /// across viewers.
    #[serde(default)]
    pub unread_count: u32,
}

impl Chat {
    /// Both participants, owner first.
    pub fn participants(&self) -> [&Participant; 2] {
        [&self.owner, &self.vet]
    }

    /// Look up a participant by user id.
    pub fn participant(&self, user_id: &UserId) -> Option<&Participant> {
        self.participants()
            .into_iter()
            .find(|p| &p.user_id == user_id)
    }

    /// The participant on the other side of the conversation.
    pub fn other_participant(&self, user_id: &UserId) -> Option<&Participant> {
        self.participants()
            .into_iter()
            .find(|p| &p.user_id != user_id)
    }

    /// Check whether a user is one of the two participants.
    pub fn is_participant(&self, user_id: &UserId) -> bool {
        self.participant(user_id).is_some()
    }

    /// The unordered participant pair, sorted for stable comparison.
    pub fn participant_pair(&self) -> (UserId, UserId) {
        let a = self.owner.user_id.clone();
        let b = self.vet.user_id.clone();
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }
}

/// Kind-specific message payload.
///
/// Tagged sum type keyed by content kind; each variant carries only its
/// relevant fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageContent {
    /// Plain text.
    Text {
        /// The message body.
        body: String,
    },
    /// An image, by media URL.
    Image {
        /// URL of the uploaded image.
        url: String,
    },
    /// A voice note.
    Audio {
        /// URL of the uploaded recording.
        url: String,
        /// Recording length in seconds.
        duration_secs: u32,
    },
    /// A shared location.
    Location {
        /// Latitude in degrees.
        latitude: f64,
        /// Longitude in degrees.
        longitude: f64,
    },
    /// A reference to an appointment record.
    AppointmentRef {
        /// The referenced appointment.
        appointment_id: AppointmentId,
    },
    /// An attached file.
    File {
        /// URL of the uploaded file.
        url: String,
        /// Original file name.
        file_name: String,
    },
}

impl MessageContent {
    /// Plain-text convenience constructor.
    pub fn text(body: impl Into<String>) -> Self {
        Self::Text { body: body.into() }
    }

    /// Short human-readable preview for notifications and chat lists.
    ///
    /// Media kinds use fixed placeholders; raw payloads never leak into
    /// previews.
    pub fn preview(&self, max_len: usize) -> String {
        match self {
            Self::Text { body } => {
                if body.chars().count() <= max_len {
                    body.clone()
                } else {
                    let truncated: String = body.chars().take(max_len).collect();
                    format!("{truncated}…")
                }
            }
            Self::Image { .. } => "Sent a photo".to_string(),
            Self::Audio { duration_secs, .. } => {
                format!("Voice message ({duration_secs}s)")
            }
            Self::Location { .. } => "Shared a location".to_string(),
            Self::AppointmentRef { .. } => "Shared an appointment".to_string(),
            Self::File { file_name, .. } => format!("Sent a file: {file_name}"),
        }
    }
}

/// Delivery status of a message.
///
/// Ordered; transitions are monotonic and never regress.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Optimistically inserted locally, not yet confirmed by the remote.
    Sending,
    /// Confirmed by the remote store.
    Sent,
    /// Delivered to the recipient's device.
    Delivered,
    /// Read by the recipient.
    Read,
}

impl MessageStatus {
    /// Advance to `next` only if it is a forward transition.
    ///
    /// Returns the maximum of the two, so a late `Sent` can never undo
    /// an observed `Read`.
    pub fn advance(self, next: Self) -> Self {
        self.max(next)
    }
}

/// A single chat message.
///
/// Immutable after creation except for `status` and `read`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier.
    pub id: MessageId,
    /// The chat this message belongs to.
    pub chat_id: ChatId,
    /// The participant who sent it.
    pub sender_id: UserId,
    /// Kind-specific payload.
    pub content: MessageContent,
    /// Creation time (client clock while `Sending`, server clock after).
    pub timestamp: DateTime<Utc>,
    /// Delivery status.
    pub status: MessageStatus,
    /// Whether the recipient has read this message.
    #[serde(default)]
    pub read: bool,
}

impl Message {
    /// Create an optimistic local message in `Sending` state.
    pub fn outgoing(chat_id: ChatId, sender_id: UserId, content: MessageContent) -> Self {
        Self {
            id: MessageId::new(),
            chat_id,
            sender_id,
            content,
            timestamp: Utc::now(),
            status: MessageStatus::Sending,
            read: false,
        }
    }
}
