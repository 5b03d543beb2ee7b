//! Mock realtime transport for testing.
//!
//! Lets tests feed synthetic events into open channels, including
//! duplicate deliveries and reconnect signals.

use super::{ChannelTopic, RealtimeError, RealtimeTransport};
use async_trait::async_trait;
use chat_types::TransportEvent;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

const CHANNEL_BUFFER: usize = 64;

/// Mock realtime transport.
///
/// Cloning shares state, so a test can hold one handle while the engine
/// holds another. A topic can be open from several subscribers at once
/// (two devices watching the same chat); `emit` fans an event out to every
/// live receiver, the way the hosted broker broadcasts per channel.
#[derive(Debug, Default)]
pub struct MockRealtime {
    inner: Arc<Mutex<MockRealtimeInner>>,
}

#[derive(Debug, Default)]
struct MockRealtimeInner {
    channels: HashMap<ChannelTopic, Vec<mpsc::Sender<TransportEvent>>>,
    opened: Vec<ChannelTopic>,
    closed: Vec<ChannelTopic>,
    fail_next_open: Option<String>,
}

impl MockRealtime {
    /// Create a new mock transport with no open channels.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver an event to every open receiver for `topic`.
    ///
    /// Receivers that have been dropped are pruned. Returns `false` if no
    /// live receiver got the event.
    pub fn emit(&self, topic: &ChannelTopic, event: TransportEvent) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(senders) = inner.channels.get_mut(topic) else {
            return false;
        };
        senders.retain(|s| !s.is_closed());
        let mut delivered = false;
        for sender in senders.iter() {
            delivered |= sender.try_send(event.clone()).is_ok();
        }
        if senders.is_empty() {
            inner.channels.remove(topic);
        }
        delivered
    }

    /// Signal a transparent reconnect on the channel for `topic`.
    ///
    /// Events committed during the simulated outage are not replayed; the
    /// consumer is expected to reconcile with a pull.
    pub fn emit_reconnected(&self, topic: &ChannelTopic) -> bool {
        self.emit(topic, TransportEvent::Reconnected)
    }

    /// Topics that have been opened, in order.
    pub fn opened(&self) -> Vec<ChannelTopic> {
        self.inner.lock().unwrap().opened.clone()
    }

    /// Topics that have been closed, in order.
    pub fn closed(&self) -> Vec<ChannelTopic> {
        self.inner.lock().unwrap().closed.clone()
    }

    /// Cause the next `open()` to fail with the given error.
    pub fn fail_next_open(&self, error: &str) {
        self.inner.lock().unwrap().fail_next_open = Some(error.to_string());
    }
}

impl Clone for MockRealtime {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl RealtimeTransport for MockRealtime {
    async fn open(
        &self,
        topic: ChannelTopic,
    ) -> Result<mpsc::Receiver<TransportEvent>, RealtimeError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.fail_next_open.take() {
            return Err(RealtimeError::ChannelFailed(error));
        }
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER);
        inner.channels.entry(topic.clone()).or_default().push(tx);
        inner.opened.push(topic);
        Ok(rx)
    }

    // Close tears down every receiver for the topic; the manager only
    // calls it once its own channel is the last one it knows about.
    async fn close(&self, topic: &ChannelTopic) {
        let mut inner = self.inner.lock().unwrap();
        inner.channels.remove(topic);
        inner.closed.push(topic.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_types::{ChatId, Message, MessageContent, MessageEvent};

    #[tokio::test]
    async fn emit_without_channel_is_false() {
        let transport = MockRealtime::new();
        assert!(!transport.emit_reconnected(&ChannelTopic::Chat(ChatId::new())));
    }

    #[tokio::test]
    async fn emit_delivers_to_open_channel() {
        let transport = MockRealtime::new();
        let chat_id = ChatId::new();
        let topic = ChannelTopic::Chat(chat_id);
        let mut rx = transport.open(topic.clone()).await.unwrap();

        let msg = Message::outgoing(chat_id, "vet1".into(), MessageContent::text("hi"));
        assert!(transport.emit(&topic, TransportEvent::Message(MessageEvent::Inserted(msg))));
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn emit_broadcasts_to_every_open_receiver() {
        let transport = MockRealtime::new();
        let chat_id = ChatId::new();
        let topic = ChannelTopic::Chat(chat_id);

        // Two devices watching the same chat.
        let mut rx_a = transport.open(topic.clone()).await.unwrap();
        let mut rx_b = transport.open(topic.clone()).await.unwrap();

        let msg = Message::outgoing(chat_id, "vet1".into(), MessageContent::text("hi"));
        assert!(transport.emit(&topic, TransportEvent::Message(MessageEvent::Inserted(msg))));

        assert!(rx_a.recv().await.is_some());
        assert!(rx_b.recv().await.is_some());
    }

    #[tokio::test]
    async fn emit_prunes_dropped_receivers() {
        let transport = MockRealtime::new();
        let topic = ChannelTopic::Chat(ChatId::new());

        let rx = transport.open(topic.clone()).await.unwrap();
        drop(rx);

        assert!(!transport.emit_reconnected(&topic));
    }

    #[tokio::test]
    async fn close_drops_the_channel() {
        let transport = MockRealtime::new();
        let topic = ChannelTopic::Chat(ChatId::new());
        let mut rx = transport.open(topic.clone()).await.unwrap();

        transport.close(&topic).await;

        assert!(!transport.emit_reconnected(&topic));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn forced_open_failure() {
        let transport = MockRealtime::new();
        transport.fail_next_open("broker down");

        let result = transport.open(ChannelTopic::Chat(ChatId::new())).await;
        assert!(matches!(result, Err(RealtimeError::ChannelFailed(_))));

        // Next open works.
        assert!(transport.open(ChannelTopic::Chat(ChatId::new())).await.is_ok());
    }
}
