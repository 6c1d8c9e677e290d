use std::collections::BTreeMap;

use chat_api::{PeerId, UserProfile};
use parking_lot::Mutex;

/// Known chat users: seeded from config, extended by peers that connect.
pub struct Directory {
    users: Mutex<BTreeMap<PeerId, UserProfile>>,
}

impl Directory {
    pub fn new(seed: Vec<UserProfile>) -> Self {
        Self {
            users: Mutex::new(seed.into_iter().map(|u| (u.peer_id.clone(), u)).collect()),
        }
    }

    /// Add a placeholder profile for an unknown peer.
    pub fn ensure(&self, peer: &PeerId) {
        self.users
            .lock()
            .entry(peer.clone())
            .or_insert_with(|| UserProfile {
                peer_id: peer.clone(),
                full_name: peer.to_string(),
                image_url: None,
            });
    }

    /// Everyone except `caller`.
    pub fn others(&self, caller: &PeerId) -> Vec<UserProfile> {
        self.users
            .lock()
            .values()
            .filter(|u| &u.peer_id != caller)
            .cloned()
            .collect()
    }
}
