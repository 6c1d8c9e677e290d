use std::collections::HashMap;

use chat_api::StoredMessage;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Notification published whenever session state changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChange {
    Connected,
    Disconnected { reason: Option<String> },
    PresenceChanged,
    ConversationChanged,
    UsersChanged,
    /// A message arrived over the relay, whether or not it belongs to the
    /// open conversation.
    MessageRelayed(StoredMessage),
}

/// Receiving end of a bus subscription.
pub struct Subscription {
    pub id: u64,
    rx: UnboundedReceiver<StateChange>,
}

impl Subscription {
    /// Wait for the next change. Returns `None` once unsubscribed.
    pub async fn recv(&mut self) -> Option<StateChange> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<StateChange> {
        self.rx.try_recv().ok()
    }
}

/// Small fan-out bus for session state changes. Subscribers whose receiver
/// was dropped are pruned on the next publish.
pub struct StateBus {
    next_id: u64,
    subscribers: HashMap<u64, UnboundedSender<StateChange>>,
}

impl StateBus {
    pub fn new() -> Self {
        Self {
            next_id: 0,
            subscribers: HashMap::new(),
        }
    }

    pub fn subscribe(&mut self) -> Subscription {
        let (tx, rx) = unbounded_channel();
        self.next_id += 1;
        self.subscribers.insert(self.next_id, tx);
        Subscription {
            id: self.next_id,
            rx,
        }
    }

    /// Remove a subscriber. Returns false if the id was unknown.
    pub fn unsubscribe(&mut self, id: u64) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    pub fn publish(&mut self, change: StateChange) {
        self.subscribers
            .retain(|_, tx| tx.send(change.clone()).is_ok());
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

impl Default for StateBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_subscribers_until_unsubscribed() {
        let mut bus = StateBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.publish(StateChange::PresenceChanged);
        assert_eq!(a.recv().await, Some(StateChange::PresenceChanged));
        assert_eq!(b.recv().await, Some(StateChange::PresenceChanged));
        assert!(bus.unsubscribe(a.id));
        bus.publish(StateChange::Connected);
        assert_eq!(a.recv().await, None);
        assert_eq!(b.recv().await, Some(StateChange::Connected));
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let mut bus = StateBus::new();
        let sub = bus.subscribe();
        drop(sub);
        bus.publish(StateChange::UsersChanged);
        assert!(bus.is_empty());
    }
}
