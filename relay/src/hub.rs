//! Routing table from peer ids to their open websocket connections.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chat_api::PeerId;
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;

struct Route {
    id: u64,
    tx: UnboundedSender<String>,
}

#[derive(Default)]
pub struct Hub {
    routes: Mutex<HashMap<PeerId, Vec<Route>>>,
    next_id: AtomicU64,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a connection to `peer`. Returns the connection id.
    pub fn register(&self, peer: &PeerId, tx: UnboundedSender<String>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.routes
            .lock()
            .entry(peer.clone())
            .or_default()
            .push(Route { id, tx });
        id
    }

    pub fn unregister(&self, peer: &PeerId, id: u64) {
        let mut guard = self.routes.lock();
        if let Some(routes) = guard.get_mut(peer) {
            routes.retain(|r| r.id != id);
            if routes.is_empty() {
                guard.remove(peer);
            }
        }
    }

    /// Deliver a frame to every connection of `peer`. Returns how many
    /// connections accepted it.
    pub fn send_to(&self, peer: &PeerId, frame: &str) -> usize {
        let mut guard = self.routes.lock();
        let Some(routes) = guard.get_mut(peer) else {
            return 0;
        };
        routes.retain(|r| r.tx.send(frame.to_string()).is_ok());
        routes.len()
    }

    #[cfg(test)]
    fn connections(&self, peer: &PeerId) -> usize {
        self.routes.lock().get(peer).map_or(0, Vec::len)
    }
}
