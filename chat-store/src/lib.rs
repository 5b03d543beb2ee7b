//! # chat-store
//!
//! Local cache store for the VetLink chat synchronization engine.
//!
//! This crate provides durable-feeling, per-chat and per-user persistence
//! of chats and messages over a narrow key/value seam:
//! - [`KeyValueStore`] - The namespaced string key/value contract the
//!   device's durable storage satisfies
//! - [`MemoryStore`] - In-process implementation for tests and fakes
//! - [`CacheStore`] - The chat/message cache itself
//!
//! The cache is the fallback source of truth when the remote is
//! unreachable: reads never fail (absence is an empty collection) and all
//! mutations are upserts keyed by chat/message id, so concurrent tasks
//! commute.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod cache;
mod kv;

pub use cache::CacheStore;
pub use kv::{KeyValueStore, MemoryStore, StoreError};
