//! Request transports: framing, and the socket listener for `unix://` and
//! `tcp://` endpoints.
//!
//! Standard IO needs no listener; the process module wires stdin and stdout
//! straight into a request loop.

mod errors;
mod framing;
mod handler;
mod listener;
#[cfg(test)]
mod listener_tests;

pub use self::errors::ListenerError;
pub use self::framing::{FrameError, FrameReader, FrameWriter};
pub(crate) use self::handler::{ConnectionHandler, ConnectionStream, LoopConnectionHandler};
pub(crate) use self::listener::{ListenerHandle, SocketListener};

const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
