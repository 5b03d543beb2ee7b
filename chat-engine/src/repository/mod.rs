//! Remote chat repository abstraction.
//!
//! This module provides the contract against the hosted relational store
//! for chats and messages. The engine is the only retry authority: the
//! repository reports failures and never retries internally.
//!
//! # Design
//!
//! The repository trait is async and CRUD-shaped:
//! - `get_or_create_chat()` resolves the unordered participant pair
//! - `list_messages()` / `list_chats_for_user()` are ordered range queries
//! - `send_message()` assigns server id and timestamp
//! - `mark_read()` is an idempotent bulk update

mod memory;

pub use memory::InMemoryRepository;

use async_trait::async_trait;
use chat_types::{AppointmentId, Chat, ChatId, Message, MessageContent, Participant, UserId};
use thiserror::Error;

/// Repository errors.
///
/// None of these are retried inside the repository; the engine decides
/// whether to degrade to cache or surface the error.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The remote store is unreachable.
    #[error("network error: {0}")]
    Network(String),

    /// No authenticated session.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The caller is not a participant of the chat.
    #[error("not a chat participant")]
    NotAuthorized,

    /// Chat or message missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed payload (unsupported content, empty body, bad pair).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Insert hit the pair-uniqueness constraint.
    ///
    /// Benign: get-or-create resolves it by re-fetching the existing row.
    /// It never escapes a conforming implementation.
    #[error("already exists")]
    AlreadyExists,
}

/// CRUD + query operations against the hosted store for chats and messages.
#[async_trait]
pub trait ChatRepository: Send + Sync {
    /// Resolve the chat for an unordered (owner, vet) pair, creating it if
    /// absent.
    ///
    /// Safe under two callers racing to create the same pair: an insert
    /// conflict on the pair constraint is re-fetched, not surfaced.
    async fn get_or_create_chat(
        &self,
        owner: Participant,
        vet: Participant,
        appointment_id: Option<AppointmentId>,
    ) -> Result<Chat, RepositoryError>;

    /// Messages of a chat, ascending by creation time, one bounded page.
    async fn list_messages(
        &self,
        chat_id: &ChatId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Message>, RepositoryError>;

    /// All chats the user participates in, `last_message_at` descending.
    async fn list_chats_for_user(&self, user_id: &UserId) -> Result<Vec<Chat>, RepositoryError>;

    /// Append a message. The server assigns id and timestamp and bumps the
    /// parent chat's `last_message_at` at the storage layer.
    async fn send_message(
        &self,
        chat_id: &ChatId,
        sender_id: &UserId,
        content: MessageContent,
    ) -> Result<Message, RepositoryError>;

    /// Mark all messages not sent by `reader_id` as read. Idempotent.
    async fn mark_read(&self, chat_id: &ChatId, reader_id: &UserId)
        -> Result<(), RepositoryError>;
}
