//! Outbound event port.
//!
//! Publishing happens after the state it describes is committed and is
//! fire-and-forget: a failed publish is logged and never undoes the write.

use ncmp_types::{LcmEvent, SubscriptionOutcomeEvent};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::warn;

/// Events the core emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "event", rename_all = "snake_case")]
pub enum NcmpEvent {
    Lcm(LcmEvent),
    SubscriptionOutcome(SubscriptionOutcomeEvent),
}

/// Sink for outbound events.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, topic: &str, key: &str, event: NcmpEvent);
}

/// An event together with its routing information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedEvent {
    pub topic: String,
    pub key: String,
    pub event: NcmpEvent,
}

/// Publisher that forwards events over an unbounded channel.
#[derive(Clone)]
pub struct ChannelEventPublisher {
    tx: mpsc::UnboundedSender<PublishedEvent>,
}

impl ChannelEventPublisher {
    /// Creates a publisher and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PublishedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventPublisher for ChannelEventPublisher {
    fn publish(&self, topic: &str, key: &str, event: NcmpEvent) {
        let published = PublishedEvent {
            topic: topic.to_string(),
            key: key.to_string(),
            event,
        };
        if self.tx.send(published).is_err() {
            warn!("Dropped event for {key} on {topic}: receiver closed");
        }
    }
}
