//! Conversation cache and the reconciliation rules that keep optimistic
//! entries, durable history and relayed messages in a single ordered list.

use std::collections::HashSet;

use chat_api::{PeerId, StoredMessage};

use crate::message::{ChatMessage, Delivery, TempId};

/// A change to apply to a [`Conversation`].
#[derive(Debug, Clone)]
pub enum CacheEvent {
    /// Switch to another peer (or none), discarding the current list.
    Select { peer: Option<PeerId> },
    /// Historical fetch finished for the given selection generation.
    History {
        generation: u64,
        messages: Vec<StoredMessage>,
    },
    /// Historical fetch failed for the given selection generation.
    FetchFailed { generation: u64, error: String },
    /// Optimistic insert of a pending message. Kept whatever the selection.
    Insert(ChatMessage),
    /// The durable write for `temp_id` succeeded.
    Confirm {
        temp_id: TempId,
        message: StoredMessage,
    },
    /// The durable write for `temp_id` failed.
    Fail {
        temp_id: TempId,
        reason: String,
        error: String,
    },
    /// A message delivered over the relay channel.
    Relay(StoredMessage),
    ClearError,
    ClearMessageError,
}

/// Ordered message history between the local user and the selected peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    owner: PeerId,
    peer: Option<PeerId>,
    generation: u64,
    messages: Vec<ChatMessage>,
    pub is_loading: bool,
    /// Error from the last historical fetch.
    pub fetch_error: Option<String>,
    /// Error from the most recent failed send.
    pub message_error: Option<String>,
}

impl Conversation {
    pub fn new(owner: PeerId) -> Self {
        Self {
            owner,
            peer: None,
            generation: 0,
            messages: Vec::new(),
            is_loading: false,
            fetch_error: None,
            message_error: None,
        }
    }

    pub fn owner(&self) -> &PeerId {
        &self.owner
    }

    pub fn peer(&self) -> Option<&PeerId> {
        self.peer.as_ref()
    }

    /// Incremented on every selection; fetch results carry it so late
    /// responses for an earlier selection are dropped.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Whether a relayed or fetched message between `sender` and `receiver`
    /// belongs here.
    pub fn accepts(&self, sender: &PeerId, receiver: &PeerId) -> bool {
        match &self.peer {
            Some(peer) => {
                (sender == &self.owner && receiver == peer)
                    || (sender == peer && receiver == &self.owner)
            }
            None => false,
        }
    }

    /// Apply one event. Returns true when the conversation changed.
    pub fn apply(&mut self, event: CacheEvent) -> bool {
        match event {
            CacheEvent::Select { peer } => {
                self.generation += 1;
                self.is_loading = peer.is_some();
                self.peer = peer;
                self.messages.clear();
                self.fetch_error = None;
                self.message_error = None;
                true
            }
            CacheEvent::History {
                generation,
                messages,
            } => {
                if generation != self.generation {
                    return false;
                }
                self.is_loading = false;
                self.merge_history(messages);
                true
            }
            CacheEvent::FetchFailed { generation, error } => {
                if generation != self.generation {
                    return false;
                }
                self.is_loading = false;
                self.fetch_error = Some(error);
                true
            }
            CacheEvent::Insert(message) => {
                self.insert_sorted(message);
                true
            }
            CacheEvent::Confirm { temp_id, message } => self.confirm(&temp_id, message),
            CacheEvent::Fail {
                temp_id,
                reason,
                error,
            } => {
                self.message_error = Some(error);
                if let Some(entry) = self
                    .messages
                    .iter_mut()
                    .find(|m| m.temp_id() == Some(&temp_id))
                {
                    entry.delivery = Delivery::Failed { temp_id, reason };
                }
                true
            }
            CacheEvent::Relay(message) => self.append(message),
            CacheEvent::ClearError => self.fetch_error.take().is_some(),
            CacheEvent::ClearMessageError => self.message_error.take().is_some(),
        }
    }

    /// Append a confirmed message, de-duplicating by durable id.
    pub fn append(&mut self, message: StoredMessage) -> bool {
        if !self.accepts(&message.sender_id, &message.receiver_id) {
            return false;
        }
        if let Some(idx) = self.position_of(&message.id) {
            self.messages[idx] = message.into();
            self.resort();
            return true;
        }
        self.insert_sorted(message.into());
        true
    }

    fn confirm(&mut self, temp_id: &TempId, message: StoredMessage) -> bool {
        let existing = self.position_of(&message.id);
        match self.messages.iter().position(|m| m.temp_id() == Some(temp_id)) {
            Some(idx) => {
                if existing.is_some_and(|other| other != idx) {
                    // relay echo got here first
                    self.messages.remove(idx);
                } else {
                    self.messages[idx] = message.into();
                    self.resort();
                }
                true
            }
            None => match existing {
                Some(idx) => {
                    self.messages[idx] = message.into();
                    self.resort();
                    true
                }
                None => false,
            },
        }
    }

    fn merge_history(&mut self, history: Vec<StoredMessage>) {
        let mut merged: Vec<ChatMessage> = history
            .into_iter()
            .filter(|m| self.accepts(&m.sender_id, &m.receiver_id))
            .map(ChatMessage::from)
            .collect();
        let mut known: HashSet<String> = HashSet::new();
        merged.retain(|m| m.durable_id().map_or(true, |id| known.insert(id.to_string())));
        for local in self.messages.drain(..) {
            let seen = local.durable_id().is_some_and(|id| known.contains(id));
            if !seen {
                merged.push(local);
            }
        }
        merged.sort_by_key(|m| m.created_at);
        self.messages = merged;
    }

    fn insert_sorted(&mut self, message: ChatMessage) {
        let idx = self
            .messages
            .partition_point(|m| m.created_at <= message.created_at);
        self.messages.insert(idx, message);
    }

    fn resort(&mut self) {
        if !self
            .messages
            .windows(2)
            .all(|w| w[0].created_at <= w[1].created_at)
        {
            self.messages.sort_by_key(|m| m.created_at);
        }
    }

    fn position_of(&self, durable_id: &str) -> Option<usize> {
        self.messages
            .iter()
            .position(|m| m.durable_id() == Some(durable_id))
    }
}

/// Pure form of [`Conversation::apply`].
pub fn reconcile(mut conversation: Conversation, event: CacheEvent) -> Conversation {
    conversation.apply(event);
    conversation
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(id: &str, from: &str, to: &str, at: i64) -> StoredMessage {
        StoredMessage {
            id: id.into(),
            sender_id: from.into(),
            receiver_id: to.into(),
            content: format!("msg {id}"),
            created_at: at,
            updated_at: at,
        }
    }

    fn open(peer: &str) -> Conversation {
        reconcile(
            Conversation::new("self".into()),
            CacheEvent::Select {
                peer: Some(peer.into()),
            },
        )
    }

    fn pending_at(content: &str, at: i64) -> ChatMessage {
        let mut m = ChatMessage::pending(
            TempId::generate(),
            "self".into(),
            "peerA".into(),
            content.into(),
        );
        m.created_at = at;
        m
    }

    #[test]
    fn relay_echo_does_not_duplicate() {
        let mut conv = open("peerA");
        assert!(conv.append(stored("D", "self", "peerA", 10)));
        assert!(conv.append(stored("D", "self", "peerA", 10)));
        assert_eq!(conv.messages().len(), 1);
        assert_eq!(conv.messages()[0].durable_id(), Some("D"));
    }

    #[test]
    fn confirm_replaces_in_place_and_is_idempotent() {
        let mut conv = open("peerA");
        let pending = pending_at("hello", 10);
        let temp = pending.temp_id().cloned().unwrap();
        conv.apply(CacheEvent::Insert(pending));
        let confirmed = stored("D", "self", "peerA", 11);
        conv.apply(CacheEvent::Confirm {
            temp_id: temp.clone(),
            message: confirmed.clone(),
        });
        conv.apply(CacheEvent::Confirm {
            temp_id: temp,
            message: confirmed,
        });
        assert_eq!(conv.messages().len(), 1);
        assert_eq!(conv.messages()[0].durable_id(), Some("D"));
    }

    #[test]
    fn echo_before_confirm_keeps_single_entry() {
        let mut conv = open("peerA");
        let pending = pending_at("hello", 10);
        let temp = pending.temp_id().cloned().unwrap();
        conv.apply(CacheEvent::Insert(pending));
        conv.apply(CacheEvent::Relay(stored("D", "self", "peerA", 11)));
        assert_eq!(conv.messages().len(), 2);
        conv.apply(CacheEvent::Confirm {
            temp_id: temp,
            message: stored("D", "self", "peerA", 11),
        });
        assert_eq!(conv.messages().len(), 1);
        assert!(!conv.messages()[0].is_pending());
    }

    #[test]
    fn failure_marks_entry_and_sets_error() {
        let mut conv = open("peerA");
        let pending = pending_at("hello", 10);
        let temp = pending.temp_id().cloned().unwrap();
        conv.apply(CacheEvent::Insert(pending));
        conv.apply(CacheEvent::Fail {
            temp_id: temp,
            reason: "connection refused".into(),
            error: "could not send".into(),
        });
        assert_eq!(conv.messages().len(), 1);
        assert!(conv.messages()[0].is_failed());
        assert_eq!(conv.message_error.as_deref(), Some("could not send"));
        assert!(conv.apply(CacheEvent::ClearMessageError));
        assert!(conv.message_error.is_none());
    }

    #[test]
    fn history_and_live_appends_stay_ordered() {
        let mut conv = open("peerA");
        let generation = conv.generation();
        conv.append(stored("live", "peerA", "self", 25));
        conv.apply(CacheEvent::Insert(pending_at("late", 40)));
        conv.apply(CacheEvent::History {
            generation,
            messages: vec![
                stored("h1", "self", "peerA", 10),
                stored("h2", "peerA", "self", 20),
                stored("live", "peerA", "self", 25),
                stored("h3", "self", "peerA", 30),
            ],
        });
        conv.append(stored("early", "peerA", "self", 15));
        let times: Vec<i64> = conv.messages().iter().map(|m| m.created_at).collect();
        assert_eq!(times, vec![10, 15, 20, 25, 30, 40]);
        assert!(!conv.is_loading);
    }

    #[test]
    fn stale_history_is_dropped() {
        let mut conv = open("peerA");
        let stale = conv.generation();
        conv.apply(CacheEvent::Select {
            peer: Some("peerB".into()),
        });
        let changed = conv.apply(CacheEvent::History {
            generation: stale,
            messages: vec![stored("h1", "self", "peerA", 10)],
        });
        assert!(!changed);
        assert!(conv.messages().is_empty());
        assert!(conv.is_loading);
    }

    #[test]
    fn fetch_error_keeps_messages() {
        let mut conv = open("peerA");
        let generation = conv.generation();
        conv.append(stored("m1", "peerA", "self", 5));
        conv.apply(CacheEvent::FetchFailed {
            generation,
            error: "boom".into(),
        });
        assert_eq!(conv.messages().len(), 1);
        assert_eq!(conv.fetch_error.as_deref(), Some("boom"));
        conv.apply(CacheEvent::ClearError);
        assert!(conv.fetch_error.is_none());
        assert_eq!(conv.messages().len(), 1);
    }

    #[test]
    fn own_sends_are_kept_without_a_matching_selection() {
        let mut idle = Conversation::new("self".into());
        let pending = pending_at("hello", 10);
        let temp = pending.temp_id().cloned().unwrap();
        assert!(idle.apply(CacheEvent::Insert(pending)));
        idle.apply(CacheEvent::Confirm {
            temp_id: temp,
            message: stored("D", "self", "peerA", 10),
        });
        assert_eq!(idle.messages().len(), 1);
        assert_eq!(idle.messages()[0].durable_id(), Some("D"));

        let mut other = open("peerB");
        assert!(other.apply(CacheEvent::Insert(pending_at("hi", 5))));
        assert_eq!(other.messages().len(), 1);
    }

    #[test]
    fn messages_for_other_peers_are_ignored() {
        let mut conv = open("peerA");
        assert!(!conv.append(stored("x", "peerB", "self", 5)));
        assert!(conv.messages().is_empty());
        let idle = Conversation::new("self".into());
        assert!(!idle.accepts(&"self".into(), &"peerA".into()));
    }
}
