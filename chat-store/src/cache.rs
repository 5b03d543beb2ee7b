//! The chat/message cache.
//!
//! Serves reads instantly from the device key/value store and absorbs
//! writes from three concurrent sources: UI-triggered optimistic sends,
//! realtime events, and background reconciliation pulls. All mutations are
//! upserts keyed by chat/message id, so the writers commute.
//!
//! Cache operations never fail: a storage error is logged and degrades to
//! an empty read or a dropped write, keeping the app usable offline.

use crate::kv::KeyValueStore;
use chat_types::{Chat, ChatId, Message, MessageId, MessageStatus, UserId};

const NS_CHATS: &str = "chats";
const NS_MESSAGES: &str = "messages";

/// Durable per-user chat lists and per-chat message lists.
#[derive(Debug)]
pub struct CacheStore<K: KeyValueStore> {
    kv: K,
}

impl<K: KeyValueStore> CacheStore<K> {
    /// Create a cache over the given key/value store.
    pub fn new(kv: K) -> Self {
        Self { kv }
    }

    // --- Chats ---

    /// The viewer's cached chat list, ordered by `last_message_at` descending.
    pub async fn chats(&self, user_id: &UserId) -> Vec<Chat> {
        self.load_chats(user_id).await
    }

    /// Replace the viewer's cached chat list wholesale.
    pub async fn put_chats(&self, user_id: &UserId, mut chats: Vec<Chat>) {
        sort_chats(&mut chats);
        self.save_chats(user_id, &chats).await;
    }

    /// Upsert a single chat into the viewer's cached list, keyed by chat id.
    pub async fn upsert_chat(&self, user_id: &UserId, chat: Chat) {
        let mut chats = self.load_chats(user_id).await;
        match chats.iter_mut().find(|c| c.id == chat.id) {
            Some(existing) => *existing = chat,
            None => chats.push(chat),
        }
        sort_chats(&mut chats);
        self.save_chats(user_id, &chats).await;
    }

    // --- Messages ---

    /// The chat's cached messages, ascending by timestamp.
    pub async fn messages(&self, chat_id: &ChatId) -> Vec<Message> {
        self.load_messages(chat_id).await
    }

    /// Upsert a message, keyed by message id.
    ///
    /// Returns `true` only when the message was newly inserted. A repeat
    /// delivery of an id already present updates the row in place (status
    /// only ever advances) and returns `false` — this is the
    /// duplicate-suppression signal for at-least-once realtime delivery.
    pub async fn append_message(&self, message: Message) -> bool {
        let mut messages = self.load_messages(&message.chat_id).await;
        let inserted = match messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => {
                existing.status = existing.status.advance(message.status);
                existing.read = existing.read || message.read;
                false
            }
            None => {
                messages.push(message.clone());
                true
            }
        };
        sort_messages(&mut messages);
        self.save_messages(&message.chat_id, &messages).await;
        inserted
    }

    /// Advance a message's delivery status. No-op on a missing id or a
    /// backwards transition.
    pub async fn update_message_status(
        &self,
        chat_id: &ChatId,
        message_id: &MessageId,
        status: MessageStatus,
    ) {
        let mut messages = self.load_messages(chat_id).await;
        if let Some(msg) = messages.iter_mut().find(|m| &m.id == message_id) {
            msg.status = msg.status.advance(status);
            self.save_messages(chat_id, &messages).await;
        }
    }

    /// Replace an optimistic local row with its confirmed server row.
    ///
    /// Removes the row under `local_id` and upserts `message` under its
    /// server id. Exactly one row survives even when the realtime echo of
    /// the send already inserted the server id.
    pub async fn reconcile_message(
        &self,
        chat_id: &ChatId,
        local_id: &MessageId,
        message: Message,
    ) {
        let mut messages = self.load_messages(chat_id).await;
        messages.retain(|m| &m.id != local_id);
        match messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => {
                existing.status = existing.status.advance(message.status);
                existing.read = existing.read || message.read;
            }
            None => messages.push(message),
        }
        sort_messages(&mut messages);
        self.save_messages(chat_id, &messages).await;
    }

    /// Mark every message not sent by `reader_id` as read. Idempotent.
    pub async fn mark_read(&self, chat_id: &ChatId, reader_id: &UserId) {
        let mut messages = self.load_messages(chat_id).await;
        let mut changed = false;
        for msg in messages.iter_mut().filter(|m| &m.sender_id != reader_id) {
            if !msg.read || msg.status < MessageStatus::Read {
                msg.read = true;
                msg.status = msg.status.advance(MessageStatus::Read);
                changed = true;
            }
        }
        if changed {
            self.save_messages(chat_id, &messages).await;
        }
    }

    /// Unread messages in one chat from the viewer's perspective: not
    /// authored by the viewer and not yet read.
    pub async fn unread_count(&self, chat_id: &ChatId, viewer_id: &UserId) -> u32 {
        self.load_messages(chat_id)
            .await
            .iter()
            .filter(|m| &m.sender_id != viewer_id && !m.read)
            .count() as u32
    }

    // --- Persistence helpers ---

    async fn load_chats(&self, user_id: &UserId) -> Vec<Chat> {
        self.load(NS_CHATS, user_id.as_str()).await
    }

    async fn save_chats(&self, user_id: &UserId, chats: &[Chat]) {
        self.save(NS_CHATS, user_id.as_str(), chats).await;
    }

    async fn load_messages(&self, chat_id: &ChatId) -> Vec<Message> {
        self.load(NS_MESSAGES, &chat_id.to_string()).await
    }

    async fn save_messages(&self, chat_id: &ChatId, messages: &[Message]) {
        self.save(NS_MESSAGES, &chat_id.to_string(), messages).await;
    }

    async fn load<T: serde::de::DeserializeOwned>(&self, namespace: &str, key: &str) -> Vec<T> {
        let raw = match self.kv.get(namespace, key).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Cache read failed for {}/{}: {}", namespace, key, e);
                return Vec::new();
            }
        };
        match raw {
            Some(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                tracing::warn!("Corrupt cache entry {}/{}: {}", namespace, key, e);
                Vec::new()
            }),
            None => Vec::new(),
        }
    }

    async fn save<T: serde::Serialize>(&self, namespace: &str, key: &str, value: &[T]) {
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("Cache encode failed for {}/{}: {}", namespace, key, e);
                return;
            }
        };
        if let Err(e) = self.kv.set(namespace, key, json).await {
            tracing::warn!("Cache write failed for {}/{}: {}", namespace, key, e);
        }
    }
}

fn sort_messages(messages: &mut [Message]) {
    // Stable sort: equal timestamps keep arrival order.
    messages.sort_by_key(|m| m.timestamp);
}

fn sort_chats(chats: &mut [Chat]) {
    chats.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
}
