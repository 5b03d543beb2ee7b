//! In-memory chat repository.
//!
//! The injectable fake selected at construction time when no live backend
//! is available. Implements the real contract semantics (pair-unique
//! get-or-create, server-assigned ids, idempotent mark-read) plus failure
//! injection, so engine tests exercise the same code paths as production.

use super::{ChatRepository, RepositoryError};
use async_trait::async_trait;
use chat_types::{
    AppointmentId, Chat, ChatEvent, ChatId, Message, MessageContent, MessageEvent, MessageId,
    MessageStatus, Participant, TransportEvent, UserId,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// In-memory repository with failure injection.
///
/// Cloning shares state, so a test can hold one handle while the engine
/// holds another.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    chats: Vec<Chat>,
    messages: HashMap<ChatId, Vec<Message>>,
    offline: bool,
    fail_next_send: Option<String>,
    event_sink: Option<mpsc::UnboundedSender<TransportEvent>>,
}

impl InMemoryRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the remote being unreachable. All operations fail with
    /// `Network` until turned off.
    pub fn set_offline(&self, offline: bool) {
        self.inner.lock().unwrap().offline = offline;
    }

    /// Cause the next `send_message` to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_send = Some(error.to_string());
    }

    /// Route every committed mutation out as a [`TransportEvent`].
    ///
    /// Tests forward these into the mock realtime broker to emulate the
    /// storage layer fanning writes out to subscribed channels.
    pub fn set_event_sink(&self, sink: mpsc::UnboundedSender<TransportEvent>) {
        self.inner.lock().unwrap().event_sink = Some(sink);
    }

    /// Number of stored chats (for tests).
    pub fn chat_count(&self) -> usize {
        self.inner.lock().unwrap().chats.len()
    }

    fn emit(inner: &Inner, event: TransportEvent) {
        if let Some(sink) = &inner.event_sink {
            let _ = sink.send(event);
        }
    }
}

impl Clone for InMemoryRepository {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl ChatRepository for InMemoryRepository {
    async fn get_or_create_chat(
        &self,
        owner: Participant,
        vet: Participant,
        appointment_id: Option<AppointmentId>,
    ) -> Result<Chat, RepositoryError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.offline {
            return Err(RepositoryError::Network("remote unreachable".into()));
        }
        if owner.user_id == vet.user_id {
            return Err(RepositoryError::Validation(
                "owner and vet must be distinct".into(),
            ));
        }

        // Pair uniqueness: the unordered (owner, vet) pair resolves to the
        // existing chat, mirroring the storage-layer constraint.
        if let Some(existing) = inner.chats.iter().find(|c| {
            (c.owner.user_id == owner.user_id && c.vet.user_id == vet.user_id)
                || (c.owner.user_id == vet.user_id && c.vet.user_id == owner.user_id)
        }) {
            return Ok(existing.clone());
        }

        let now = Utc::now();
        let chat = Chat {
            id: ChatId::new(),
            owner,
            vet,
            appointment_id,
            created_at: now,
            last_message_at: now,
            unread_count: 0,
        };
        inner.chats.push(chat.clone());
        Self::emit(&inner, TransportEvent::Chat(ChatEvent::Inserted(chat.clone())));
        Ok(chat)
    }

    async fn list_messages(
        &self,
        chat_id: &ChatId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Message>, RepositoryError> {
        let inner = self.inner.lock().unwrap();
        if inner.offline {
            return Err(RepositoryError::Network("remote unreachable".into()));
        }
        let messages = inner.messages.get(chat_id).cloned().unwrap_or_default();
        Ok(messages.into_iter().skip(offset).take(limit).collect())
    }

    async fn list_chats_for_user(&self, user_id: &UserId) -> Result<Vec<Chat>, RepositoryError> {
        let inner = self.inner.lock().unwrap();
        if inner.offline {
            return Err(RepositoryError::Network("remote unreachable".into()));
        }
        let mut chats: Vec<Chat> = inner
            .chats
            .iter()
            .filter(|c| c.is_participant(user_id))
            .cloned()
            .collect();
        chats.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        Ok(chats)
    }

    async fn send_message(
        &self,
        chat_id: &ChatId,
        sender_id: &UserId,
        content: MessageContent,
    ) -> Result<Message, RepositoryError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.fail_next_send.take() {
            return Err(RepositoryError::Network(error));
        }
        if inner.offline {
            return Err(RepositoryError::Network("remote unreachable".into()));
        }
        if let MessageContent::Text { body } = &content {
            if body.trim().is_empty() {
                return Err(RepositoryError::Validation("empty message body".into()));
            }
        }

        let chat_index = inner
            .chats
            .iter()
            .position(|c| &c.id == chat_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("chat {chat_id}")))?;
        if !inner.chats[chat_index].is_participant(sender_id) {
            return Err(RepositoryError::NotAuthorized);
        }

        let message = Message {
            id: MessageId::new(),
            chat_id: *chat_id,
            sender_id: sender_id.clone(),
            content,
            timestamp: Utc::now(),
            status: MessageStatus::Sent,
            read: false,
        };
        inner
            .messages
            .entry(*chat_id)
            .or_default()
            .push(message.clone());

        // Appending bumps the parent chat's last_message_at at the storage
        // layer, not client-side.
        inner.chats[chat_index].last_message_at = message.timestamp;
        let updated_chat = inner.chats[chat_index].clone();

        Self::emit(
            &inner,
            TransportEvent::Message(MessageEvent::Inserted(message.clone())),
        );
        Self::emit(&inner, TransportEvent::Chat(ChatEvent::Updated(updated_chat)));
        Ok(message)
    }

    async fn mark_read(
        &self,
        chat_id: &ChatId,
        reader_id: &UserId,
    ) -> Result<(), RepositoryError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.offline {
            return Err(RepositoryError::Network("remote unreachable".into()));
        }
        if !inner
            .chats
            .iter()
            .any(|c| &c.id == chat_id && c.is_participant(reader_id))
        {
            return Err(RepositoryError::NotAuthorized);
        }

        let mut changed = Vec::new();
        if let Some(messages) = inner.messages.get_mut(chat_id) {
            for msg in messages
                .iter_mut()
                .filter(|m| &m.sender_id != reader_id && !m.read)
            {
                msg.read = true;
                msg.status = msg.status.advance(MessageStatus::Read);
                changed.push(msg.clone());
            }
        }
        for msg in changed {
            Self::emit(&inner, TransportEvent::Message(MessageEvent::Updated(msg)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> Participant {
        Participant::owner("owner1", "Ana")
    }

    fn vet() -> Participant {
        Participant::vet("vet1", "Dr. Ruiz", Some("Clínica Central".into()))
    }

    // ===========================================
    // Get-Or-Create Tests
    // ===========================================

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let repo = InMemoryRepository::new();
        let first = repo.get_or_create_chat(owner(), vet(), None).await.unwrap();
        let second = repo.get_or_create_chat(owner(), vet(), None).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(repo.chat_count(), 1);
    }

    #[tokio::test]
    async fn get_or_create_matches_reversed_pair() {
        let repo = InMemoryRepository::new();
        let first = repo.get_or_create_chat(owner(), vet(), None).await.unwrap();
        // Same pair presented with roles flipped still resolves.
        let swapped_owner = Participant::owner("vet1", "Dr. Ruiz");
        let swapped_vet = Participant::vet("owner1", "Ana", None);
        let second = repo
            .get_or_create_chat(swapped_owner, swapped_vet, None)
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn get_or_create_rejects_self_pair() {
        let repo = InMemoryRepository::new();
        let result = repo
            .get_or_create_chat(owner(), Participant::vet("owner1", "Ana", None), None)
            .await;
        assert!(matches!(result, Err(RepositoryError::Validation(_))));
    }

    #[tokio::test]
    async fn racing_creators_share_one_chat() {
        let repo = InMemoryRepository::new();
        let (a, b) = tokio::join!(
            repo.get_or_create_chat(owner(), vet(), None),
            repo.get_or_create_chat(owner(), vet(), None),
        );
        assert_eq!(a.unwrap().id, b.unwrap().id);
        assert_eq!(repo.chat_count(), 1);
    }

    // ===========================================
    // Send / List Tests
    // ===========================================

    #[tokio::test]
    async fn send_assigns_server_fields_and_bumps_chat() {
        let repo = InMemoryRepository::new();
        let chat = repo.get_or_create_chat(owner(), vet(), None).await.unwrap();

        let msg = repo
            .send_message(&chat.id, &UserId::new("owner1"), MessageContent::text("Hola"))
            .await
            .unwrap();

        assert_eq!(msg.status, MessageStatus::Sent);
        let chats = repo
            .list_chats_for_user(&UserId::new("owner1"))
            .await
            .unwrap();
        assert_eq!(chats[0].last_message_at, msg.timestamp);
    }

    #[tokio::test]
    async fn send_from_stranger_is_not_authorized() {
        let repo = InMemoryRepository::new();
        let chat = repo.get_or_create_chat(owner(), vet(), None).await.unwrap();

        let result = repo
            .send_message(&chat.id, &UserId::new("intruder"), MessageContent::text("hi"))
            .await;
        assert!(matches!(result, Err(RepositoryError::NotAuthorized)));
    }

    #[tokio::test]
    async fn send_rejects_empty_text() {
        let repo = InMemoryRepository::new();
        let chat = repo.get_or_create_chat(owner(), vet(), None).await.unwrap();

        let result = repo
            .send_message(&chat.id, &UserId::new("owner1"), MessageContent::text("   "))
            .await;
        assert!(matches!(result, Err(RepositoryError::Validation(_))));
    }

    #[tokio::test]
    async fn send_to_missing_chat_is_not_found() {
        let repo = InMemoryRepository::new();
        let result = repo
            .send_message(&ChatId::new(), &UserId::new("owner1"), MessageContent::text("hi"))
            .await;
        assert!(matches!(result, Err(RepositoryError::NotFound(_))));
    }

    #[tokio::test]
    async fn list_messages_pages_in_order() {
        let repo = InMemoryRepository::new();
        let chat = repo.get_or_create_chat(owner(), vet(), None).await.unwrap();
        let sender = UserId::new("owner1");
        for i in 0..5 {
            repo.send_message(&chat.id, &sender, MessageContent::text(format!("m{i}")))
                .await
                .unwrap();
        }

        let page = repo.list_messages(&chat.id, 2, 2).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].content, MessageContent::text("m2"));
        assert_eq!(page[1].content, MessageContent::text("m3"));
    }

    // ===========================================
    // Mark-Read Tests
    // ===========================================

    #[tokio::test]
    async fn mark_read_skips_own_and_is_idempotent() {
        let repo = InMemoryRepository::new();
        let chat = repo.get_or_create_chat(owner(), vet(), None).await.unwrap();
        let ana = UserId::new("owner1");
        let ruiz = UserId::new("vet1");
        repo.send_message(&chat.id, &ana, MessageContent::text("mine"))
            .await
            .unwrap();
        repo.send_message(&chat.id, &ruiz, MessageContent::text("theirs"))
            .await
            .unwrap();

        repo.mark_read(&chat.id, &ana).await.unwrap();
        repo.mark_read(&chat.id, &ana).await.unwrap();

        let messages = repo.list_messages(&chat.id, 10, 0).await.unwrap();
        let mine = messages.iter().find(|m| m.sender_id == ana).unwrap();
        let theirs = messages.iter().find(|m| m.sender_id == ruiz).unwrap();
        assert!(!mine.read);
        assert!(theirs.read);
    }

    // ===========================================
    // Failure Injection Tests
    // ===========================================

    #[tokio::test]
    async fn offline_fails_everything_with_network() {
        let repo = InMemoryRepository::new();
        repo.set_offline(true);

        let result = repo.get_or_create_chat(owner(), vet(), None).await;
        assert!(matches!(result, Err(RepositoryError::Network(_))));
        let result = repo.list_chats_for_user(&UserId::new("owner1")).await;
        assert!(matches!(result, Err(RepositoryError::Network(_))));
    }

    #[tokio::test]
    async fn fail_next_send_fails_once() {
        let repo = InMemoryRepository::new();
        let chat = repo.get_or_create_chat(owner(), vet(), None).await.unwrap();
        repo.fail_next_send("connection reset");

        let sender = UserId::new("owner1");
        let first = repo
            .send_message(&chat.id, &sender, MessageContent::text("hi"))
            .await;
        assert!(matches!(first, Err(RepositoryError::Network(_))));

        let second = repo
            .send_message(&chat.id, &sender, MessageContent::text("hi"))
            .await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn event_sink_sees_committed_writes() {
        let repo = InMemoryRepository::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        repo.set_event_sink(tx);

        let chat = repo.get_or_create_chat(owner(), vet(), None).await.unwrap();
        repo.send_message(&chat.id, &UserId::new("owner1"), MessageContent::text("hi"))
            .await
            .unwrap();

        assert!(matches!(
            rx.try_recv().unwrap(),
            TransportEvent::Chat(ChatEvent::Inserted(_))
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            TransportEvent::Message(MessageEvent::Inserted(_))
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            TransportEvent::Chat(ChatEvent::Updated(_))
        ));
    }
}
