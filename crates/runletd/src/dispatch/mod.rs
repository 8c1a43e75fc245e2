//! Decoding of inbound frames into invocations and control messages.

mod errors;
mod request;

pub use errors::DecodeError;
pub use request::{ControlCommand, InboundMessage, decode};
