//! ChatEngine - the chat synchronization orchestrator.
//!
//! Composes the cache, the remote repository, the realtime subscription
//! manager, and the notification dispatcher:
//!
//! ```text
//! UI → ChatEngine → CacheStore (instant reads, optimistic writes)
//!            ↓
//!       ChatRepository (remote commit)
//!            ↓ storage-layer fan-out
//!       RealtimeTransport → router task → CacheStore + event stream
//! ```
//!
//! Reads serve the cache immediately and reconcile with the remote in the
//! background. Writes commit locally first (`status = Sending`), then
//! remotely; a failed remote commit leaves the local row cached for manual
//! retry. Repository failures degrade reads to cache-only; only
//! `get_or_create_chat` and `send_message` surface errors, so the UI can
//! offer retry.

use crate::notify::{NotificationDispatcher, PushSender};
use crate::realtime::{
    ChannelTopic, RealtimeError, RealtimeTransport, SubscriptionHandle, SubscriptionManager,
};
use crate::repository::{ChatRepository, RepositoryError};
use crate::session::SessionProvider;
use chat_store::{CacheStore, KeyValueStore};
use chat_types::{
    AppointmentId, Chat, ChatEvent, ChatId, Message, MessageContent, MessageEvent, MessageId,
    MessageStatus, Participant, TransportEvent, UserId,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Engine errors - the error taxonomy exposed to the UI layer.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No signed-in user.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The acting user is not allowed to perform this operation.
    #[error("not authorized")]
    NotAuthorized,

    /// Chat or message missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// The remote store is unreachable.
    #[error("network error: {0}")]
    Network(String),

    /// Malformed payload.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The realtime channel could not be opened.
    #[error("realtime error: {0}")]
    Realtime(#[from] RealtimeError),
}

impl From<RepositoryError> for EngineError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::Network(m) => Self::Network(m),
            RepositoryError::NotAuthenticated => Self::NotAuthenticated,
            RepositoryError::NotAuthorized => Self::NotAuthorized,
            RepositoryError::NotFound(m) => Self::NotFound(m),
            RepositoryError::Validation(m) => Self::Validation(m),
            // Benign by contract; a conforming repository re-fetches.
            RepositoryError::AlreadyExists => Self::Validation("already exists".into()),
        }
    }
}

/// Configuration for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Page size for reconciling pulls.
    pub page_size: usize,
    /// Buffer size of the per-subscription event stream.
    pub event_buffer: usize,
    /// Maximum notification preview length in characters.
    pub preview_len: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            event_buffer: 64,
            preview_len: crate::notify::DEFAULT_PREVIEW_LEN,
        }
    }
}

impl EngineConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the reconciling pull page size.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the per-subscription event buffer size.
    pub fn with_event_buffer(mut self, event_buffer: usize) -> Self {
        self.event_buffer = event_buffer;
        self
    }

    /// Set the notification preview length.
    pub fn with_preview_len(mut self, preview_len: usize) -> Self {
        self.preview_len = preview_len;
        self
    }
}

/// A live stream of message events for one chat.
///
/// Dropping the subscription stops delivery but keeps the channel open;
/// pass the handle to [`ChatEngine::unsubscribe`] for explicit teardown.
#[derive(Debug)]
pub struct ChatSubscription {
    handle: SubscriptionHandle,
    events: mpsc::Receiver<MessageEvent>,
}

impl ChatSubscription {
    /// Wait for the next message event.
    pub async fn recv(&mut self) -> Option<MessageEvent> {
        self.events.recv().await
    }

    /// Take an already-delivered event without waiting.
    pub fn try_recv(&mut self) -> Option<MessageEvent> {
        self.events.try_recv().ok()
    }

    /// The handle identifying this subscription.
    pub fn handle(&self) -> &SubscriptionHandle {
        &self.handle
    }

    /// Consume the subscription, keeping only the handle for teardown.
    pub fn into_handle(self) -> SubscriptionHandle {
        self.handle
    }
}

/// A live stream of chat events for one user's chat list.
#[derive(Debug)]
pub struct ChatListSubscription {
    handle: SubscriptionHandle,
    events: mpsc::Receiver<ChatEvent>,
}

impl ChatListSubscription {
    /// Wait for the next chat event.
    pub async fn recv(&mut self) -> Option<ChatEvent> {
        self.events.recv().await
    }

    /// Take an already-delivered event without waiting.
    pub fn try_recv(&mut self) -> Option<ChatEvent> {
        self.events.try_recv().ok()
    }

    /// The handle identifying this subscription.
    pub fn handle(&self) -> &SubscriptionHandle {
        &self.handle
    }

    /// Consume the subscription, keeping only the handle for teardown.
    pub fn into_handle(self) -> SubscriptionHandle {
        self.handle
    }
}

/// The chat synchronization engine.
pub struct ChatEngine<R, T, P, K>
where
    R: ChatRepository,
    T: RealtimeTransport,
    P: PushSender,
    K: KeyValueStore,
{
    config: EngineConfig,
    repository: Arc<R>,
    cache: Arc<CacheStore<K>>,
    subscriptions: SubscriptionManager<T>,
    notifications: NotificationDispatcher<P, K>,
    session: Arc<dyn SessionProvider>,
}

impl<R, T, P, K> ChatEngine<R, T, P, K>
where
    R: ChatRepository + 'static,
    T: RealtimeTransport,
    P: PushSender,
    K: KeyValueStore + 'static,
{
    /// Create an engine with the default configuration.
    pub fn new(
        repository: R,
        transport: T,
        push: P,
        storage: K,
        session: Arc<dyn SessionProvider>,
    ) -> Self {
        Self::with_config(EngineConfig::default(), repository, transport, push, storage, session)
    }

    /// Create an engine with an explicit configuration.
    pub fn with_config(
        config: EngineConfig,
        repository: R,
        transport: T,
        push: P,
        storage: K,
        session: Arc<dyn SessionProvider>,
    ) -> Self {
        let cache = Arc::new(CacheStore::new(storage));
        let notifications = NotificationDispatcher::new(Arc::new(push), Arc::clone(&cache))
            .with_preview_len(config.preview_len);
        Self {
            config,
            repository: Arc::new(repository),
            cache,
            subscriptions: SubscriptionManager::new(Arc::new(transport)),
            notifications,
            session,
        }
    }

    /// The cache backing this engine (shared with the dispatcher).
    pub fn cache(&self) -> &CacheStore<K> {
        &self.cache
    }

    /// The notification dispatcher.
    pub fn notifications(&self) -> &NotificationDispatcher<P, K> {
        &self.notifications
    }

    /// The subscription registry.
    pub fn subscriptions(&self) -> &SubscriptionManager<T> {
        &self.subscriptions
    }

    fn current_user(&self) -> Result<UserId, EngineError> {
        self.session
            .current_user_id()
            .ok_or(EngineError::NotAuthenticated)
    }

    // --- Chats ---

    /// Resolve the chat for an (owner, vet) pair, creating it if absent.
    ///
    /// The one read path whose failure is surfaced directly, so the UI
    /// can offer retry.
    pub async fn get_or_create_chat(
        &self,
        owner: Participant,
        vet: Participant,
        appointment_id: Option<AppointmentId>,
    ) -> Result<Chat, EngineError> {
        let user = self.current_user()?;
        if user != owner.user_id && user != vet.user_id {
            return Err(EngineError::NotAuthorized);
        }
        let chat = self
            .repository
            .get_or_create_chat(owner, vet, appointment_id)
            .await?;
        self.cache.upsert_chat(&user, chat.clone()).await;
        Ok(chat)
    }

    /// The user's chat list, freshest available.
    ///
    /// A reachable remote refreshes the cache; an unreachable one degrades
    /// to the last-known-good cached list without error.
    pub async fn get_chats(&self, user_id: &UserId) -> Vec<Chat> {
        match self.repository.list_chats_for_user(user_id).await {
            Ok(mut chats) => {
                for chat in &mut chats {
                    chat.unread_count = self.cache.unread_count(&chat.id, user_id).await;
                }
                self.cache.put_chats(user_id, chats).await;
                self.cache.chats(user_id).await
            }
            Err(e) => {
                tracing::warn!("Chat list refresh failed for {}: {}, serving cache", user_id, e);
                self.cache.chats(user_id).await
            }
        }
    }

    // --- Messages ---

    /// A chat's messages from the cache, immediately.
    ///
    /// Kicks off a background reconciling pull; missing remote entries are
    /// upserted by id, never replacing locally-pending `Sending` rows.
    pub async fn get_messages(&self, chat_id: &ChatId) -> Vec<Message> {
        let cached = self.cache.messages(chat_id).await;
        let repository = Arc::clone(&self.repository);
        let cache = Arc::clone(&self.cache);
        let chat_id = *chat_id;
        let page_size = self.config.page_size;
        tokio::spawn(async move {
            pull_messages(repository.as_ref(), cache.as_ref(), &chat_id, page_size).await;
        });
        cached
    }

    /// Reconcile a chat's cache against the remote, inline.
    ///
    /// Returns the messages that were newly inserted. Used by the
    /// background refresh and by pull-on-focus fallbacks when the realtime
    /// channel is down.
    pub async fn refresh_messages(&self, chat_id: &ChatId) -> Vec<Message> {
        pull_messages(
            self.repository.as_ref(),
            self.cache.as_ref(),
            chat_id,
            self.config.page_size,
        )
        .await
    }

    /// Send a message: optimistic local commit, then remote commit.
    ///
    /// On remote success the local row is reconciled to the server id and
    /// the recipient's push notification is dispatched (best-effort). On
    /// failure the row stays cached in `Sending` state for
    /// [`retry_message`](Self::retry_message), and the error is returned.
    pub async fn send_message(
        &self,
        chat_id: ChatId,
        sender_id: &UserId,
        content: MessageContent,
    ) -> Result<Message, EngineError> {
        let user = self.current_user()?;
        if &user != sender_id {
            return Err(EngineError::NotAuthorized);
        }
        let local = Message::outgoing(chat_id, sender_id.clone(), content);
        self.cache.append_message(local.clone()).await;
        self.commit_send(&local).await
    }

    /// Re-send a cached message stuck in `Sending` state.
    ///
    /// The reconciled server id is stable thereafter.
    pub async fn retry_message(
        &self,
        chat_id: &ChatId,
        message_id: &MessageId,
    ) -> Result<Message, EngineError> {
        let user = self.current_user()?;
        let local = self
            .cache
            .messages(chat_id)
            .await
            .into_iter()
            .find(|m| &m.id == message_id)
            .ok_or_else(|| EngineError::NotFound(format!("message {message_id}")))?;
        if local.sender_id != user {
            return Err(EngineError::NotAuthorized);
        }
        if local.status != MessageStatus::Sending {
            // Already confirmed; nothing to retry.
            return Ok(local);
        }
        self.commit_send(&local).await
    }

    async fn commit_send(&self, local: &Message) -> Result<Message, EngineError> {
        match self
            .repository
            .send_message(&local.chat_id, &local.sender_id, local.content.clone())
            .await
        {
            Ok(sent) => {
                self.cache
                    .reconcile_message(&local.chat_id, &local.id, sent.clone())
                    .await;
                self.touch_chat(&local.sender_id, &local.chat_id, sent.timestamp)
                    .await;
                self.notify_recipient(&sent).await;
                Ok(sent)
            }
            Err(e) => {
                // The optimistic row stays cached in Sending state.
                tracing::warn!("Send failed for chat {}: {}", local.chat_id, e);
                Err(e.into())
            }
        }
    }

    async fn touch_chat(&self, user_id: &UserId, chat_id: &ChatId, at: DateTime<Utc>) {
        let chats = self.cache.chats(user_id).await;
        if let Some(mut chat) = chats.into_iter().find(|c| &c.id == chat_id) {
            if chat.last_message_at < at {
                chat.last_message_at = at;
                self.cache.upsert_chat(user_id, chat).await;
            }
        }
    }

    /// Dispatch the push notification for a confirmed send. Best-effort:
    /// every failure mode is logged and swallowed.
    async fn notify_recipient(&self, message: &Message) {
        let chats = self.cache.chats(&message.sender_id).await;
        let Some(chat) = chats.into_iter().find(|c| c.id == message.chat_id) else {
            tracing::debug!("No cached chat {} for push dispatch", message.chat_id);
            return;
        };
        let Some(recipient) = chat.other_participant(&message.sender_id).cloned() else {
            return;
        };
        let sender_name = chat
            .participant(&message.sender_id)
            .map(|p| p.display_name.clone())
            .unwrap_or_default();
        let delivered = self
            .notifications
            .send_message_notification(&recipient.user_id, message, &chat, &sender_name)
            .await;
        tracing::debug!("Push dispatch for {}: delivered={}", message.id, delivered);
    }

    // --- Read state ---

    /// Mark every message in the chat not sent by `reader_id` as read.
    ///
    /// Idempotent. A failed remote mark-read degrades to cache-only and
    /// is reconciled on the next refresh.
    pub async fn mark_messages_as_read(
        &self,
        chat_id: &ChatId,
        reader_id: &UserId,
    ) -> Result<(), EngineError> {
        let user = self.current_user()?;
        if &user != reader_id {
            return Err(EngineError::NotAuthorized);
        }
        if let Err(e) = self.repository.mark_read(chat_id, reader_id).await {
            tracing::warn!("Remote mark-read failed for {}: {}", chat_id, e);
        }
        self.cache.mark_read(chat_id, reader_id).await;

        let chats = self.cache.chats(reader_id).await;
        if let Some(mut chat) = chats.into_iter().find(|c| &c.id == chat_id) {
            chat.unread_count = 0;
            self.cache.upsert_chat(reader_id, chat).await;
        }
        Ok(())
    }

    /// Unread messages summed across all the user's cached chats.
    pub async fn get_unread_count(&self, user_id: &UserId) -> u32 {
        let mut total = 0;
        for chat in self.cache.chats(user_id).await {
            total += self.cache.unread_count(&chat.id, user_id).await;
        }
        total
    }

    // --- Realtime ---

    /// Observe one chat live.
    ///
    /// Every message event is upserted into the cache before being
    /// forwarded; duplicate inserts of an id already cached are suppressed.
    /// A transport reconnect triggers a reconciling pull whose new rows are
    /// forwarded as `Inserted` events.
    pub async fn subscribe_to_chat(
        &self,
        chat_id: ChatId,
    ) -> Result<ChatSubscription, EngineError> {
        let topic = ChannelTopic::Chat(chat_id);
        let (handle, mut raw) = self.subscriptions.subscribe(topic).await?;
        let (tx, rx) = mpsc::channel(self.config.event_buffer);
        let repository = Arc::clone(&self.repository);
        let cache = Arc::clone(&self.cache);
        let page_size = self.config.page_size;

        let task = tokio::spawn(async move {
            while let Some(event) = raw.recv().await {
                match event {
                    TransportEvent::Message(ev) => {
                        let forward = match &ev {
                            MessageEvent::Inserted(m) => cache.append_message(m.clone()).await,
                            MessageEvent::Updated(m) => {
                                cache.append_message(m.clone()).await;
                                true
                            }
                        };
                        if forward && tx.send(ev).await.is_err() {
                            return;
                        }
                    }
                    TransportEvent::Reconnected => {
                        tracing::debug!("Chat {} channel reconnected, reconciling", chat_id);
                        let inserted =
                            pull_messages(repository.as_ref(), cache.as_ref(), &chat_id, page_size)
                                .await;
                        for message in inserted {
                            if tx.send(MessageEvent::Inserted(message)).await.is_err() {
                                return;
                            }
                        }
                    }
                    // Chat events do not belong to a chat channel.
                    TransportEvent::Chat(_) => {}
                }
            }
        });
        self.subscriptions.register_task(&handle, task).await;
        Ok(ChatSubscription { handle, events: rx })
    }

    /// Observe a user's chat list live.
    pub async fn subscribe_to_user_chats(
        &self,
        user_id: UserId,
    ) -> Result<ChatListSubscription, EngineError> {
        let topic = ChannelTopic::UserChats(user_id.clone());
        let (handle, mut raw) = self.subscriptions.subscribe(topic).await?;
        let (tx, rx) = mpsc::channel(self.config.event_buffer);
        let repository = Arc::clone(&self.repository);
        let cache = Arc::clone(&self.cache);

        let task = tokio::spawn(async move {
            while let Some(event) = raw.recv().await {
                match event {
                    TransportEvent::Chat(ev) => {
                        let mut chat = ev.chat().clone();
                        chat.unread_count = cache.unread_count(&chat.id, &user_id).await;
                        cache.upsert_chat(&user_id, chat.clone()).await;
                        let ev = match ev {
                            ChatEvent::Inserted(_) => ChatEvent::Inserted(chat),
                            ChatEvent::Updated(_) => ChatEvent::Updated(chat),
                        };
                        if tx.send(ev).await.is_err() {
                            return;
                        }
                    }
                    TransportEvent::Reconnected => {
                        tracing::debug!("Chat list channel for {} reconnected", user_id);
                        match repository.list_chats_for_user(&user_id).await {
                            Ok(mut chats) => {
                                for chat in &mut chats {
                                    chat.unread_count =
                                        cache.unread_count(&chat.id, &user_id).await;
                                }
                                cache.put_chats(&user_id, chats.clone()).await;
                                for chat in chats {
                                    if tx.send(ChatEvent::Updated(chat)).await.is_err() {
                                        return;
                                    }
                                }
                            }
                            Err(e) => {
                                tracing::warn!("Chat list reconcile failed for {}: {}", user_id, e);
                            }
                        }
                    }
                    // Message events do not belong to a chat-list channel.
                    TransportEvent::Message(_) => {}
                }
            }
        });
        self.subscriptions.register_task(&handle, task).await;
        Ok(ChatListSubscription { handle, events: rx })
    }

    /// Tear down a subscription.
    pub async fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.subscriptions.unsubscribe(handle).await;
    }

    // --- Notifications ---

    /// Register the signed-in user's delivery token.
    pub async fn initialize_notifications(&self, token: &str) -> Result<bool, EngineError> {
        let user = self.current_user()?;
        Ok(self.notifications.initialize(user, token).await)
    }
}

/// Pull remote pages into the cache until exhausted.
///
/// Returns the messages that were newly inserted. Repository failure ends
/// the pull with a warning; whatever landed stays cached.
async fn pull_messages<R, K>(
    repository: &R,
    cache: &CacheStore<K>,
    chat_id: &ChatId,
    page_size: usize,
) -> Vec<Message>
where
    R: ChatRepository + ?Sized,
    K: KeyValueStore,
{
    let mut inserted = Vec::new();
    let mut offset = 0;
    loop {
        let page = match repository.list_messages(chat_id, page_size, offset).await {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!("Message refresh failed for {}: {}", chat_id, e);
                break;
            }
        };
        let fetched = page.len();
        for message in page {
            if cache.append_message(message.clone()).await {
                inserted.push(message);
            }
        }
        if fetched < page_size {
            break;
        }
        offset += fetched;
    }
    inserted
}
