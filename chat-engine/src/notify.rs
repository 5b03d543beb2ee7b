//! Push notification dispatch.
//!
//! Push delivery and realtime delivery are independent paths: a recipient
//! with an active session gets the message through their live channel
//! whether or not the push network is reachable. Everything in this module
//! is therefore best-effort — a missing token, a disabled flag, or a push
//! failure yields `false`, never an error that could fail the originating
//! send.

use async_trait::async_trait;
use chat_store::{CacheStore, KeyValueStore};
use chat_types::{Chat, ChatId, Message, MessageId, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// Default maximum preview length in characters.
pub const DEFAULT_PREVIEW_LEN: usize = 80;

/// Push delivery errors.
#[derive(Debug, Error)]
pub enum PushError {
    /// The push network is unreachable.
    #[error("push network error: {0}")]
    Network(String),

    /// The delivery token was rejected (expired or rotated).
    #[error("delivery token rejected")]
    TokenRejected,
}

/// A delivery-token-addressed notification payload.
#[derive(Debug, Clone, PartialEq)]
pub struct PushPayload {
    /// Notification title (the sender's display name).
    pub title: String,
    /// Short content preview, never a raw payload.
    pub body: String,
    /// Unread badge count across all the recipient's chats.
    pub badge: u32,
    /// Chat to open when the notification is tapped.
    pub chat_id: ChatId,
    /// The message that triggered the notification.
    pub message_id: MessageId,
}

/// The push delivery network.
#[async_trait]
pub trait PushSender: Send + Sync + 'static {
    /// Submit a payload addressed to a delivery token.
    async fn send(&self, token: &str, payload: PushPayload) -> Result<(), PushError>;
}

/// A user's push registration: one active token, rotated in place.
#[derive(Debug, Clone, PartialEq)]
pub struct PushRegistration {
    /// Opaque per-device delivery token.
    pub token: String,
    /// Cleared on notification opt-out; the token is kept for re-enable.
    pub enabled: bool,
}

/// Resolves recipients to tokens, formats previews, and submits to the
/// push network. Tracks the local badge count from the cache.
pub struct NotificationDispatcher<P: PushSender, K: KeyValueStore> {
    sender: Arc<P>,
    cache: Arc<CacheStore<K>>,
    registrations: Mutex<HashMap<UserId, PushRegistration>>,
    preview_len: usize,
}

impl<P: PushSender, K: KeyValueStore> NotificationDispatcher<P, K> {
    /// Create a dispatcher over the given push network and cache.
    pub fn new(sender: Arc<P>, cache: Arc<CacheStore<K>>) -> Self {
        Self {
            sender,
            cache,
            registrations: Mutex::new(HashMap::new()),
            preview_len: DEFAULT_PREVIEW_LEN,
        }
    }

    /// Set the maximum preview length.
    pub fn with_preview_len(mut self, len: usize) -> Self {
        self.preview_len = len;
        self
    }

    /// Register (or rotate) a user's delivery token, enabled by default.
    ///
    /// Returns `true` when the registration is active. Models the
    /// app-start permission/token flow.
    pub async fn initialize(&self, user_id: UserId, token: &str) -> bool {
        let mut registrations = self.registrations.lock().await;
        registrations.insert(
            user_id,
            PushRegistration {
                token: token.to_string(),
                enabled: true,
            },
        );
        true
    }

    /// Toggle notification delivery for a user without dropping the token.
    pub async fn set_enabled(&self, user_id: &UserId, enabled: bool) {
        let mut registrations = self.registrations.lock().await;
        if let Some(registration) = registrations.get_mut(user_id) {
            registration.enabled = enabled;
        }
    }

    /// The current registration for a user, if any.
    pub async fn registration(&self, user_id: &UserId) -> Option<PushRegistration> {
        self.registrations.lock().await.get(user_id).cloned()
    }

    /// Notify `recipient` about a freshly committed message.
    ///
    /// Returns `false` without error when the recipient has no token or
    /// has notifications disabled, and when the push network fails. The
    /// badge is the sum of unread across the recipient's chats in *this
    /// dispatcher's* cache at dispatch time; it is only meaningful when
    /// the dispatcher runs somewhere with the recipient's data (a shared
    /// backend, not a sender-only device, where it degrades to zero).
    /// Stale is acceptable.
    pub async fn send_message_notification(
        &self,
        recipient: &UserId,
        message: &Message,
        chat: &Chat,
        sender_name: &str,
    ) -> bool {
        let token = {
            let registrations = self.registrations.lock().await;
            match registrations.get(recipient) {
                Some(reg) if reg.enabled => reg.token.clone(),
                Some(_) => {
                    tracing::debug!("Notifications disabled for {}", recipient);
                    return false;
                }
                None => {
                    tracing::debug!("No delivery token for {}", recipient);
                    return false;
                }
            }
        };

        let payload = PushPayload {
            title: sender_name.to_string(),
            body: message.content.preview(self.preview_len),
            badge: self.badge_count(recipient).await,
            chat_id: chat.id,
            message_id: message.id,
        };

        match self.sender.send(&token, payload).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Push to {} failed: {}", recipient, e);
                false
            }
        }
    }

    /// Unread messages summed across all the recipient's cached chats.
    pub async fn badge_count(&self, user_id: &UserId) -> u32 {
        let mut badge = 0;
        for chat in self.cache.chats(user_id).await {
            badge += self.cache.unread_count(&chat.id, user_id).await;
        }
        badge
    }
}

/// Mock push sender for testing.
///
/// Captures submitted payloads and supports forced failure.
#[derive(Debug, Default)]
pub struct MockPushSender {
    inner: Arc<std::sync::Mutex<MockPushInner>>,
}

#[derive(Debug, Default)]
struct MockPushInner {
    sent: Vec<(String, PushPayload)>,
    fail_next: Option<String>,
}

impl MockPushSender {
    /// Create a new mock sender.
    pub fn new() -> Self {
        Self::default()
    }

    /// All (token, payload) pairs submitted so far.
    pub fn sent(&self) -> Vec<(String, PushPayload)> {
        self.inner.lock().unwrap().sent.clone()
    }

    /// Cause the next `send()` to fail with the given error.
    pub fn fail_next(&self, error: &str) {
        self.inner.lock().unwrap().fail_next = Some(error.to_string());
    }
}

impl Clone for MockPushSender {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl PushSender for MockPushSender {
    async fn send(&self, token: &str, payload: PushPayload) -> Result<(), PushError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.fail_next.take() {
            return Err(PushError::Network(error));
        }
        inner.sent.push((token.to_string(), payload));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_store::MemoryStore;
    use chat_types::{MessageContent, Participant};
    use chrono::Utc;

    fn fixtures() -> (
        NotificationDispatcher<MockPushSender, MemoryStore>,
        MockPushSender,
        Arc<CacheStore<MemoryStore>>,
        Chat,
        Message,
    ) {
        let sender = MockPushSender::new();
        let cache = Arc::new(CacheStore::new(MemoryStore::new()));
        let dispatcher = NotificationDispatcher::new(Arc::new(sender.clone()), Arc::clone(&cache));
        let now = Utc::now();
        let chat = Chat {
            id: ChatId::new(),
            owner: Participant::owner("owner1", "Ana"),
            vet: Participant::vet("vet1", "Dr. Ruiz", None),
            appointment_id: None,
            created_at: now,
            last_message_at: now,
            unread_count: 0,
        };
        let message = Message::outgoing(chat.id, "vet1".into(), MessageContent::text("Hola Ana"));
        (dispatcher, sender, cache, chat, message)
    }

    #[tokio::test]
    async fn no_token_returns_false() {
        let (dispatcher, sender, _cache, chat, message) = fixtures();
        let delivered = dispatcher
            .send_message_notification(&"owner1".into(), &message, &chat, "Dr. Ruiz")
            .await;
        assert!(!delivered);
        assert!(sender.sent().is_empty());
    }

    #[tokio::test]
    async fn disabled_returns_false_without_error() {
        let (dispatcher, sender, _cache, chat, message) = fixtures();
        let owner: UserId = "owner1".into();
        dispatcher.initialize(owner.clone(), "token-1").await;
        dispatcher.set_enabled(&owner, false).await;

        let delivered = dispatcher
            .send_message_notification(&owner, &message, &chat, "Dr. Ruiz")
            .await;

        assert!(!delivered);
        assert!(sender.sent().is_empty());
    }

    #[tokio::test]
    async fn delivers_with_preview_and_ids() {
        let (dispatcher, sender, _cache, chat, message) = fixtures();
        let owner: UserId = "owner1".into();
        dispatcher.initialize(owner.clone(), "token-1").await;

        let delivered = dispatcher
            .send_message_notification(&owner, &message, &chat, "Dr. Ruiz")
            .await;

        assert!(delivered);
        let sent = sender.sent();
        assert_eq!(sent.len(), 1);
        let (token, payload) = &sent[0];
        assert_eq!(token, "token-1");
        assert_eq!(payload.title, "Dr. Ruiz");
        assert_eq!(payload.body, "Hola Ana");
        assert_eq!(payload.chat_id, chat.id);
        assert_eq!(payload.message_id, message.id);
    }

    #[tokio::test]
    async fn media_preview_is_placeholder() {
        let (dispatcher, sender, _cache, chat, _message) = fixtures();
        let owner: UserId = "owner1".into();
        dispatcher.initialize(owner.clone(), "token-1").await;

        let image = Message::outgoing(
            chat.id,
            "vet1".into(),
            MessageContent::Image {
                url: "https://cdn.example/raw.jpg".into(),
            },
        );
        dispatcher
            .send_message_notification(&owner, &image, &chat, "Dr. Ruiz")
            .await;

        let (_token, payload) = &sender.sent()[0];
        assert_eq!(payload.body, "Sent a photo");
    }

    #[tokio::test]
    async fn badge_sums_unread_across_cached_chats() {
        let (dispatcher, sender, cache, chat, message) = fixtures();
        let owner: UserId = "owner1".into();
        dispatcher.initialize(owner.clone(), "token-1").await;

        cache.upsert_chat(&owner, chat.clone()).await;
        cache.append_message(message.clone()).await;
        let second = Message::outgoing(chat.id, "vet1".into(), MessageContent::text("y"));
        cache.append_message(second).await;

        dispatcher
            .send_message_notification(&owner, &message, &chat, "Dr. Ruiz")
            .await;

        let (_token, payload) = &sender.sent()[0];
        assert_eq!(payload.badge, 2);
    }

    #[tokio::test]
    async fn push_failure_is_swallowed() {
        let (dispatcher, sender, _cache, chat, message) = fixtures();
        let owner: UserId = "owner1".into();
        dispatcher.initialize(owner.clone(), "token-1").await;
        sender.fail_next("gateway timeout");

        let delivered = dispatcher
            .send_message_notification(&owner, &message, &chat, "Dr. Ruiz")
            .await;

        assert!(!delivered);
    }

    #[tokio::test]
    async fn initialize_rotates_token_in_place() {
        let (dispatcher, _sender, _cache, _chat, _message) = fixtures();
        let owner: UserId = "owner1".into();
        dispatcher.initialize(owner.clone(), "old-token").await;
        dispatcher.initialize(owner.clone(), "new-token").await;

        let registration = dispatcher.registration(&owner).await.unwrap();
        assert_eq!(registration.token, "new-token");
        assert!(registration.enabled);
    }
}
