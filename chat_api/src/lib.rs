use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// HTTP header carrying the caller's peer id.
pub const USER_HEADER: &str = "x-user-id";

/// Stable user identifier issued by the identity provider.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A message as recorded by the persistence service.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    #[serde(rename = "_id")]
    pub id: String,
    pub sender_id: PeerId,
    pub receiver_id: PeerId,
    pub content: String,
    /// Unix milliseconds.
    pub created_at: i64,
    pub updated_at: i64,
}

impl StoredMessage {
    /// True when the message was exchanged between `a` and `b` in either direction.
    pub fn is_between(&self, a: &PeerId, b: &PeerId) -> bool {
        (&self.sender_id == a && &self.receiver_id == b)
            || (&self.sender_id == b && &self.receiver_id == a)
    }
}

/// Body of a durable write.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub sender_id: PeerId,
    pub receiver_id: PeerId,
    pub content: String,
}

/// Directory entry for a chat user.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(rename = "clerkId")]
    pub peer_id: PeerId,
    pub full_name: String,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Error body returned by the HTTP API.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub message: String,
}

/// Activity labels as sent in a full sync. Relays emit either a JSON object
/// or a list of `[peer, label]` pairs.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum ActivitySnapshot {
    Map(HashMap<PeerId, String>),
    Pairs(Vec<(PeerId, String)>),
}

impl ActivitySnapshot {
    pub fn into_map(self) -> HashMap<PeerId, String> {
        match self {
            ActivitySnapshot::Map(map) => map,
            ActivitySnapshot::Pairs(pairs) => pairs.into_iter().collect(),
        }
    }
}

/// Events pushed by the relay to a connected client.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    UsersOnline { users: Vec<PeerId> },
    Activities { activities: ActivitySnapshot },
    UserConnected { user_id: PeerId },
    UserDisconnected { user_id: PeerId },
    ReceiveMessage { message: StoredMessage },
    MessageSent { message: StoredMessage },
    ActivityUpdated { user_id: PeerId, activity: String },
}

/// Events a client sends to the relay.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    UserConnected {
        user_id: PeerId,
    },
    SendMessage {
        sender_id: PeerId,
        receiver_id: PeerId,
        content: String,
        message: StoredMessage,
    },
    UpdateActivity {
        user_id: PeerId,
        activity: String,
    },
}
