//! Converts invocation outcomes into response envelopes.

use crate::protocol::{EnvelopeBody, ResponseEnvelope};
use crate::result::InvocationResult;

/// Builds the envelope for `result`, tagged with the request `id`.
///
/// `id` is `None` only when the request was too malformed to recover it.
#[must_use]
pub fn encode(id: Option<&str>, result: InvocationResult) -> ResponseEnvelope {
    let body = match result {
        InvocationResult::Success { value } => EnvelopeBody::Result { result: value },
        InvocationResult::Failure {
            kind,
            message,
            trace,
        } => EnvelopeBody::Error {
            error: message,
            kind,
            traceback: trace,
        },
    };
    ResponseEnvelope {
        id: id.map(str::to_owned),
        body,
        duration_ms: None,
    }
}
