use chat_api::{ClientEvent, ServerEvent};

use crate::error::ChatError;

/// Decode a single relay frame.
pub fn decode_event(frame: &str) -> Result<ServerEvent, ChatError> {
    Ok(serde_json::from_str(frame.trim())?)
}

/// Encode an outgoing event as a relay frame.
pub fn encode_event(event: &ClientEvent) -> Result<String, ChatError> {
    Ok(serde_json::to_string(event)?)
}
