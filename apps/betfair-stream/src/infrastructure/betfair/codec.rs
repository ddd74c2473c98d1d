//! Stream Codec Module
//!
//! Encoding and decoding of individual frames. The wire format is one JSON
//! object per line, each line terminated by `\r\n`.
//!
//! Decoding dispatches on the `op` field. Unknown or missing ops are kept
//! as raw JSON rather than rejected, so new server messages never break an
//! existing connection.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::framing::FRAME_DELIMITER;
use super::messages::{RequestMessage, StreamMessage};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame was valid JSON but not an object.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// JSON codec for stream frames.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one frame (without its delimiter) into a `StreamMessage`.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a JSON object. An object whose
    /// known `op` has an unexpected shape decodes to `StreamMessage::Other`.
    pub fn decode(&self, frame: &str) -> Result<StreamMessage, CodecError> {
        let trimmed = frame.trim();

        if !trimmed.starts_with('{') {
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got: {}...",
                truncate(trimmed, 50)
            )));
        }

        let value: Value = serde_json::from_str(trimmed)?;

        let message = match value.get("op").and_then(Value::as_str) {
            Some("connection") => typed(value, StreamMessage::Connection),
            Some("status") => typed(value, StreamMessage::Status),
            Some("mcm") => typed(value, StreamMessage::MarketChange),
            Some("ocm") => typed(value, StreamMessage::OrderChange),
            _ => StreamMessage::Other(value),
        };

        Ok(message)
    }

    /// Encode a request as a complete frame, delimiter included.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode(&self, request: &RequestMessage) -> Result<String, CodecError> {
        let mut frame = serde_json::to_string(request)?;
        frame.push_str(FRAME_DELIMITER);
        Ok(frame)
    }
}

/// Decode `value` as `T`, keeping it raw when its fields do not fit.
fn typed<T, F>(value: Value, wrap: F) -> StreamMessage
where
    T: DeserializeOwned,
    F: FnOnce(T) -> StreamMessage,
{
    match T::deserialize(&value) {
        Ok(message) => wrap(message),
        Err(e) => {
            tracing::debug!(error = %e, "Message shape not recognised, keeping raw JSON");
            StreamMessage::Other(value)
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    text.char_indices()
        .nth(max_chars)
        .map_or(text, |(idx, _)| &text[..idx])
}
