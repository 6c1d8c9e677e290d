use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the chat session and its collaborators.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("message content is empty")]
    EmptyContent,
    #[error("request failed: {0}")]
    Transport(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("relay channel error: {0}")]
    Channel(String),
    #[error("relay channel is not connected")]
    NotConnected,
    #[error("malformed relay frame: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::Transport(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ChatError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ChatError::Channel(err.to_string())
    }
}
