//! Failures raised while turning a frame into a request.

use thiserror::Error;

use runlet_runtime::{InvocationResult, ResponseEnvelope, encode};

/// A frame that could not be turned into a request.
///
/// Each variant is answered with a `decode_error` envelope; none of them
/// stops the request loop.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The frame is not JSON.
    #[error("request is not valid JSON: {source}")]
    MalformedJson {
        /// Parser error.
        #[source]
        source: serde_json::Error,
    },
    /// The frame is JSON but not an object.
    #[error("request must be a JSON object")]
    NotAnObject,
    /// The object does not match the request or control schema.
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// Id recovered from the object, if it had a string `id`.
        id: Option<String>,
        /// Schema violation.
        message: String,
    },
    /// The frame exceeded `max_message_bytes` and was discarded.
    #[error("request exceeds the {limit} byte limit")]
    TooLarge {
        /// Configured limit.
        limit: usize,
    },
}

impl DecodeError {
    /// Id of the offending request when it could be recovered.
    #[must_use]
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::InvalidRequest { id, .. } => id.as_deref(),
            Self::MalformedJson { .. } | Self::NotAnObject | Self::TooLarge { .. } => None,
        }
    }

    /// Envelope answering the offending frame.
    #[must_use]
    pub fn to_envelope(&self) -> ResponseEnvelope {
        encode(
            self.request_id(),
            InvocationResult::decode_error(self.to_string()),
        )
    }
}
