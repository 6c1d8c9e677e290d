use async_trait::async_trait;
use chat_api::{ApiError, NewMessage, PeerId, StoredMessage, UserProfile};
use reqwest::{Client, Response};

use crate::error::ChatError;

pub use chat_api::USER_HEADER;

/// Durable message persistence.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message and return the stored record.
    async fn create(&self, message: &NewMessage) -> Result<StoredMessage, ChatError>;
    /// Messages exchanged between `me` and `peer`, oldest first.
    async fn history(&self, me: &PeerId, peer: &PeerId) -> Result<Vec<StoredMessage>, ChatError>;
    /// Every known user except `me`.
    async fn users(&self, me: &PeerId) -> Result<Vec<UserProfile>, ChatError>;
}

/// HTTP client for the relay's REST API.
#[derive(Clone)]
pub struct HttpStore {
    client: Client,
    base_url: String,
}

impl HttpStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Turn a non-success response into a transport error, preferring the
/// server's `message` field.
async fn check(resp: Response) -> Result<Response, ChatError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = match resp.json::<ApiError>().await {
        Ok(body) => body.message,
        Err(_) => status.to_string(),
    };
    Err(ChatError::Transport(message))
}

#[async_trait]
impl MessageStore for HttpStore {
    async fn create(&self, message: &NewMessage) -> Result<StoredMessage, ChatError> {
        let resp = self
            .client
            .post(self.url("/api/users/messages/send"))
            .header(USER_HEADER, message.sender_id.as_str())
            .json(message)
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    async fn history(&self, me: &PeerId, peer: &PeerId) -> Result<Vec<StoredMessage>, ChatError> {
        let resp = self
            .client
            .get(self.url(&format!("/api/users/messages/{}", peer)))
            .header(USER_HEADER, me.as_str())
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }

    async fn users(&self, me: &PeerId) -> Result<Vec<UserProfile>, ChatError> {
        let resp = self
            .client
            .get(self.url("/api/users"))
            .header(USER_HEADER, me.as_str())
            .send()
            .await?;
        Ok(check(resp).await?.json().await?)
    }
}
