use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chat_api::{PeerId, StoredMessage};
use time::OffsetDateTime;

static NEXT_TEMP: AtomicU64 = AtomicU64::new(1);

/// Current wall clock in unix milliseconds.
pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Client-generated id for a message that has not been persisted yet.
///
/// Combines the creation time with a process-wide counter so two sends in the
/// same millisecond still get distinct ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TempId(String);

impl TempId {
    pub fn generate() -> Self {
        let seq = NEXT_TEMP.fetch_add(1, Ordering::Relaxed);
        Self(format!("temp-{}-{}", now_millis(), seq))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Delivery state of a message in the conversation cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Pending { temp_id: TempId },
    Confirmed { id: String },
    Failed { temp_id: TempId, reason: String },
}

/// One entry of the conversation cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub delivery: Delivery,
    pub sender_id: PeerId,
    pub receiver_id: PeerId,
    pub content: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ChatMessage {
    /// Build the optimistic entry shown before the durable write completes.
    pub fn pending(temp_id: TempId, sender_id: PeerId, receiver_id: PeerId, content: String) -> Self {
        let now = now_millis();
        Self {
            delivery: Delivery::Pending { temp_id },
            sender_id,
            receiver_id,
            content,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn temp_id(&self) -> Option<&TempId> {
        match &self.delivery {
            Delivery::Pending { temp_id } | Delivery::Failed { temp_id, .. } => Some(temp_id),
            Delivery::Confirmed { .. } => None,
        }
    }

    pub fn durable_id(&self) -> Option<&str> {
        match &self.delivery {
            Delivery::Confirmed { id } => Some(id),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.delivery, Delivery::Pending { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.delivery, Delivery::Failed { .. })
    }
}

impl From<StoredMessage> for ChatMessage {
    fn from(m: StoredMessage) -> Self {
        Self {
            delivery: Delivery::Confirmed { id: m.id },
            sender_id: m.sender_id,
            receiver_id: m.receiver_id,
            content: m.content,
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}
