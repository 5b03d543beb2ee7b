//! Realtime subscription management.
//!
//! Live channels are keyed by scope: a single chat or a user's chat list.
//! The underlying transport is at-least-once and ordered per channel; it
//! auto-reconnects on transient loss but does not replay missed events,
//! signalling [`TransportEvent::Reconnected`] instead so the engine can
//! reconcile with an explicit pull.
//!
//! The [`SubscriptionManager`] is an explicit registry owned by one engine
//! instance — never global — and enforces at most one live channel per
//! scope: subscribing to an already-active topic tears the old channel
//! down first, so events are never delivered twice through parallel
//! channels.

mod mock;

pub use mock::MockRealtime;

use async_trait::async_trait;
use chat_types::{ChatId, TransportEvent, UserId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// Realtime errors.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// The transport could not open the channel.
    #[error("channel failed: {0}")]
    ChannelFailed(String),

    /// The channel was closed by the transport.
    #[error("channel closed")]
    Closed,
}

/// Scope of a live channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelTopic {
    /// Message events of a single chat.
    Chat(ChatId),
    /// Chat events for everything a user participates in.
    UserChats(UserId),
}

/// Channel-based pub/sub transport.
///
/// Implementations wrap the hosted realtime broker; [`MockRealtime`]
/// feeds synthetic events in tests.
#[async_trait]
pub trait RealtimeTransport: Send + Sync + 'static {
    /// Open a live channel for the given scope.
    ///
    /// The receiver yields events in the order the underlying transport
    /// commits them. Delivery is at-least-once.
    async fn open(
        &self,
        topic: ChannelTopic,
    ) -> Result<mpsc::Receiver<TransportEvent>, RealtimeError>;

    /// Close the channel for the given scope. Best-effort.
    async fn close(&self, topic: &ChannelTopic);
}

/// Opaque reference to a live subscription.
#[derive(Debug)]
pub struct SubscriptionHandle {
    id: u64,
    topic: ChannelTopic,
}

impl SubscriptionHandle {
    /// The scope this handle is bound to.
    pub fn topic(&self) -> &ChannelTopic {
        &self.topic
    }
}

struct ActiveChannel {
    id: u64,
    router: Option<JoinHandle<()>>,
}

/// Registry of live channels, at most one per topic.
pub struct SubscriptionManager<T: RealtimeTransport> {
    transport: Arc<T>,
    active: Mutex<HashMap<ChannelTopic, ActiveChannel>>,
    next_id: AtomicU64,
}

impl<T: RealtimeTransport> SubscriptionManager<T> {
    /// Create a manager over the given transport.
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            active: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Open a channel for `topic`, tearing down any previous channel on
    /// the same topic first.
    pub async fn subscribe(
        &self,
        topic: ChannelTopic,
    ) -> Result<(SubscriptionHandle, mpsc::Receiver<TransportEvent>), RealtimeError> {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.remove(&topic) {
            tracing::debug!("Replacing live channel for {:?}", topic);
            if let Some(router) = previous.router {
                router.abort();
            }
            self.transport.close(&topic).await;
        }

        let receiver = self.transport.open(topic.clone()).await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        active.insert(topic.clone(), ActiveChannel { id, router: None });
        Ok((SubscriptionHandle { id, topic }, receiver))
    }

    /// Attach the router task draining a subscription's raw receiver, so
    /// teardown can abort it.
    pub async fn register_task(&self, handle: &SubscriptionHandle, task: JoinHandle<()>) {
        let mut active = self.active.lock().await;
        match active.get_mut(&handle.topic) {
            Some(channel) if channel.id == handle.id => channel.router = Some(task),
            // The handle was already replaced by a newer subscription.
            _ => task.abort(),
        }
    }

    /// Tear down the subscription behind `handle`.
    ///
    /// A stale handle (its topic was re-subscribed since) is a no-op: the
    /// newer channel stays live.
    pub async fn unsubscribe(&self, handle: SubscriptionHandle) {
        let mut active = self.active.lock().await;
        let is_current = active.get(&handle.topic).map(|c| c.id) == Some(handle.id);
        if !is_current {
            tracing::debug!("Ignoring stale unsubscribe for {:?}", handle.topic);
            return;
        }
        if let Some(channel) = active.remove(&handle.topic) {
            if let Some(router) = channel.router {
                router.abort();
            }
        }
        self.transport.close(&handle.topic).await;
    }

    /// Whether a channel is live for the given topic.
    pub async fn is_active(&self, topic: &ChannelTopic) -> bool {
        self.active.lock().await.contains_key(topic)
    }

    /// Number of live channels.
    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }
}
