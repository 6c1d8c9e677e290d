use std::collections::{HashMap, HashSet};

use chat_api::{PeerId, ServerEvent};

/// Online peers and their activity labels as reported by the relay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceState {
    pub online: HashSet<PeerId>,
    pub activities: HashMap<PeerId, String>,
}

impl PresenceState {
    /// Apply a presence event. Message events are ignored here.
    /// Returns true when presence changed.
    pub fn apply(&mut self, event: &ServerEvent) -> bool {
        match event {
            ServerEvent::UsersOnline { users } => {
                self.online = users.iter().cloned().collect();
                true
            }
            ServerEvent::Activities { activities } => {
                self.activities = activities.clone().into_map();
                true
            }
            ServerEvent::UserConnected { user_id } => self.online.insert(user_id.clone()),
            ServerEvent::UserDisconnected { user_id } => self.online.remove(user_id),
            // Activity for a peer that already left is kept but never marks it online.
            ServerEvent::ActivityUpdated { user_id, activity } => {
                self.activities.insert(user_id.clone(), activity.clone()) != Some(activity.clone())
            }
            ServerEvent::ReceiveMessage { .. } | ServerEvent::MessageSent { .. } => false,
        }
    }

    pub fn is_online(&self, peer: &PeerId) -> bool {
        self.online.contains(peer)
    }

    /// Activity label for a peer that is currently online.
    pub fn activity_of(&self, peer: &PeerId) -> Option<&str> {
        if !self.is_online(peer) {
            return None;
        }
        self.activities.get(peer).map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.online.clear();
        self.activities.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_api::ActivitySnapshot;

    #[test]
    fn join_leave_and_full_sync() {
        let mut p = PresenceState::default();
        assert!(p.apply(&ServerEvent::UserConnected {
            user_id: "peerA".into()
        }));
        assert!(!p.apply(&ServerEvent::UserConnected {
            user_id: "peerA".into()
        }));
        p.apply(&ServerEvent::UsersOnline {
            users: vec!["peerB".into(), "peerC".into()],
        });
        assert!(!p.is_online(&"peerA".into()));
        assert!(p.is_online(&"peerB".into()));
        assert!(p.apply(&ServerEvent::UserDisconnected {
            user_id: "peerB".into()
        }));
        assert_eq!(p.online.len(), 1);
    }

    #[test]
    fn late_activity_for_departed_peer_is_stale() {
        let mut p = PresenceState::default();
        p.apply(&ServerEvent::UserConnected {
            user_id: "peerA".into(),
        });
        p.apply(&ServerEvent::UserDisconnected {
            user_id: "peerA".into(),
        });
        p.apply(&ServerEvent::ActivityUpdated {
            user_id: "peerA".into(),
            activity: "x".into(),
        });
        assert!(!p.is_online(&"peerA".into()));
        assert_eq!(p.activities.get(&"peerA".into()).map(String::as_str), Some("x"));
        assert_eq!(p.activity_of(&"peerA".into()), None);
    }

    #[test]
    fn clear_empties_both_maps() {
        let mut p = PresenceState::default();
        p.apply(&ServerEvent::UsersOnline {
            users: vec!["peerA".into(), "peerB".into()],
        });
        p.apply(&ServerEvent::Activities {
            activities: ActivitySnapshot::Pairs(vec![("peerA".into(), "listening".into())]),
        });
        p.clear();
        assert!(p.online.is_empty());
        assert!(p.activities.is_empty());
    }
}
