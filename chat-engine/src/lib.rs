//! Chat synchronization engine.
//!
//! Orchestrates the local cache, the remote repository, realtime
//! subscriptions, and push notification dispatch behind one facade,
//! [`ChatEngine`]. The UI talks only to the engine; the remote backends
//! are trait seams ([`ChatRepository`], [`RealtimeTransport`],
//! [`PushSender`], [`SessionProvider`]) with injectable fakes for tests
//! and offline development.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod engine;
pub mod notify;
pub mod realtime;
pub mod repository;
pub mod session;

pub use engine::{ChatEngine, ChatListSubscription, ChatSubscription, EngineConfig, EngineError};
pub use notify::{
    MockPushSender, NotificationDispatcher, PushError, PushPayload, PushRegistration, PushSender,
};
pub use realtime::{
    ChannelTopic, MockRealtime, RealtimeError, RealtimeTransport, SubscriptionHandle,
    SubscriptionManager,
};
pub use repository::{ChatRepository, InMemoryRepository, RepositoryError};
pub use session::{SessionProvider, StaticSession};
