use anyhow::{anyhow, Result};
use chat_api::{NewMessage, PeerId, StoredMessage};
use parking_lot::Mutex;
use time::OffsetDateTime;
use uuid::Uuid;

/// Append-only in-memory message log.
#[derive(Default)]
pub struct MessageLog {
    entries: Mutex<Vec<StoredMessage>>,
}

fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist a new message and assign its durable id.
    pub fn create(&self, msg: &NewMessage) -> Result<StoredMessage> {
        if msg.content.trim().is_empty() {
            return Err(anyhow!("empty_message"));
        }
        if msg.sender_id.as_str().is_empty() || msg.receiver_id.as_str().is_empty() {
            return Err(anyhow!("missing_participant"));
        }
        let mut guard = self.entries.lock();
        // keep createdAt non-decreasing in log order
        let now = guard
            .last()
            .map_or(now_millis(), |last| now_millis().max(last.created_at));
        let stored = StoredMessage {
            id: Uuid::new_v4().to_string(),
            sender_id: msg.sender_id.clone(),
            receiver_id: msg.receiver_id.clone(),
            content: msg.content.clone(),
            created_at: now,
            updated_at: now,
        };
        guard.push(stored.clone());
        Ok(stored)
    }

    /// All messages between `a` and `b`, oldest first.
    pub fn between(&self, a: &PeerId, b: &PeerId) -> Vec<StoredMessage> {
        let mut out: Vec<StoredMessage> = self
            .entries
            .lock()
            .iter()
            .filter(|m| m.is_between(a, b))
            .cloned()
            .collect();
        out.sort_by_key(|m| m.created_at);
        out
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
