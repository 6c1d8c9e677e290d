use chat_api::PeerId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;

/// Online peers counted per open connection, plus their activity labels.
pub struct Presence {
    counts: Mutex<HashMap<PeerId, usize>>,
    activities: Mutex<HashMap<PeerId, String>>,
    debounce: Duration,
}

impl Presence {
    pub fn new(debounce: Duration) -> Self {
        Self {
            counts: Mutex::new(HashMap::new()),
            activities: Mutex::new(HashMap::new()),
            debounce,
        }
    }

    /// Register a connection. Returns true if the peer transitioned to online.
    pub fn connect(&self, peer: &PeerId) -> bool {
        let mut guard = self.counts.lock();
        let c = guard.entry(peer.clone()).or_insert(0);
        *c += 1;
        *c == 1
    }

    /// Deregister a connection. Returns true if the peer is offline once the
    /// debounce has passed.
    pub async fn disconnect(&self, peer: &PeerId) -> bool {
        {
            let mut guard = self.counts.lock();
            if let Some(c) = guard.get_mut(peer) {
                if *c > 0 {
                    *c -= 1;
                }
            }
        }
        sleep(self.debounce).await;
        let mut guard = self.counts.lock();
        match guard.get(peer).copied() {
            Some(0) => {
                guard.remove(peer);
                self.activities.lock().remove(peer);
                true
            }
            // still connected, or already reported by an earlier disconnect
            _ => false,
        }
    }

    pub fn is_online(&self, peer: &PeerId) -> bool {
        self.counts.lock().get(peer).is_some_and(|c| *c > 0)
    }

    /// Peers with at least one open connection, sorted.
    pub fn online(&self) -> Vec<PeerId> {
        let guard = self.counts.lock();
        let mut peers: Vec<PeerId> = guard
            .iter()
            .filter(|(_, c)| **c > 0)
            .map(|(p, _)| p.clone())
            .collect();
        peers.sort();
        peers
    }

    /// Record an activity label. Returns true when it changed.
    pub fn set_activity(&self, peer: &PeerId, activity: &str) -> bool {
        let mut guard = self.activities.lock();
        if guard.get(peer).map(String::as_str) == Some(activity) {
            return false;
        }
        guard.insert(peer.clone(), activity.to_string());
        true
    }

    pub fn activities(&self) -> HashMap<PeerId, String> {
        self.activities.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::time::{sleep, Duration};

    #[tokio::test]
    async fn state_machine() {
        let presence = Arc::new(Presence::new(Duration::from_millis(20)));
        let alice = PeerId::new("alice");
        assert!(presence.connect(&alice));
        let p = presence.clone();
        let a = alice.clone();
        let fut = tokio::spawn(async move { p.disconnect(&a).await });
        sleep(Duration::from_millis(10)).await;
        // reconnect before debounce expiry
        assert!(presence.connect(&alice));
        sleep(Duration::from_millis(30)).await;
        assert!(!fut.await.unwrap());
        assert!(presence.is_online(&alice));
        // final disconnect
        assert!(presence.disconnect(&alice).await);
        assert!(presence.online().is_empty());
    }

    #[tokio::test]
    async fn second_tab_keeps_peer_online() {
        let presence = Presence::new(Duration::from_millis(5));
        let bob = PeerId::new("bob");
        assert!(presence.connect(&bob));
        assert!(!presence.connect(&bob));
        assert!(!presence.disconnect(&bob).await);
        assert_eq!(presence.online(), vec![bob.clone()]);
        assert!(presence.disconnect(&bob).await);
    }

    #[tokio::test]
    async fn activity_is_dropped_when_peer_leaves() {
        let presence = Presence::new(Duration::from_millis(1));
        let carol = PeerId::new("carol");
        presence.connect(&carol);
        assert!(presence.set_activity(&carol, "listening to X"));
        assert!(!presence.set_activity(&carol, "listening to X"));
        assert_eq!(presence.activities().len(), 1);
        presence.disconnect(&carol).await;
        assert!(presence.activities().is_empty());
    }
}
