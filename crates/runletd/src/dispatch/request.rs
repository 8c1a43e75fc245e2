//! Parses request frames.
//!
//! A frame is either an invocation (`{"id", "input", "deadline_ms"?}`) or a
//! control message (`{"control", "id"?}`). The object is parsed once into a
//! [`Value`] so the id can still be recovered when the rest of the request
//! is malformed.

use serde::Deserialize;
use serde_json::{Map, Value};

use runlet_runtime::InvocationRequest;

use super::errors::DecodeError;

/// Operator commands carried in-band on the request transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlCommand {
    /// Stop the loop after answering.
    Shutdown,
    /// Drop the cached unit and load it again.
    Reload,
    /// Report liveness.
    Ping,
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Call the handler.
    Invoke(InvocationRequest),
    /// Act on the daemon itself.
    Control {
        /// Requested action.
        command: ControlCommand,
        /// Correlation id echoed in the answer.
        id: Option<String>,
    },
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ControlFrame {
    control: ControlCommand,
    #[serde(default)]
    id: Option<String>,
}

/// Decodes one frame.
///
/// # Errors
///
/// Returns [`DecodeError`] when the frame is not a JSON object matching the
/// invocation or control schema.
pub fn decode(frame: &[u8]) -> Result<InboundMessage, DecodeError> {
    let value: Value =
        serde_json::from_slice(frame).map_err(|source| DecodeError::MalformedJson { source })?;
    let Value::Object(object) = value else {
        return Err(DecodeError::NotAnObject);
    };
    let id = recover_id(&object);

    if object.contains_key("control") {
        let control: ControlFrame = serde_json::from_value(Value::Object(object))
            .map_err(|error| invalid(id, &error))?;
        return Ok(InboundMessage::Control {
            command: control.control,
            id: control.id,
        });
    }

    serde_json::from_value(Value::Object(object))
        .map(InboundMessage::Invoke)
        .map_err(|error| invalid(id, &error))
}

fn recover_id(object: &Map<String, Value>) -> Option<String> {
    object.get("id").and_then(Value::as_str).map(str::to_owned)
}

fn invalid(id: Option<String>, error: &serde_json::Error) -> DecodeError {
    DecodeError::InvalidRequest {
        id,
        message: error.to_string(),
    }
}
