//! Per-connection request loops for the socket listener.

use std::io::{self, BufReader, Read, Write};
use std::net::TcpStream;

use tracing::{debug, warn};

use runlet_config::Framing;

use super::LISTENER_TARGET;
use super::framing::FrameReader;
use crate::request_loop::{LoopContext, RequestLoop, ResponseSink};

#[cfg(unix)]
use std::os::unix::net::UnixStream;

/// Stream types accepted by the listener.
#[derive(Debug)]
pub(crate) enum ConnectionStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl ConnectionStream {
    /// Second handle on the same socket, used as the response writer.
    fn try_clone(&self) -> io::Result<Self> {
        match self {
            Self::Tcp(stream) => stream.try_clone().map(Self::Tcp),
            #[cfg(unix)]
            Self::Unix(stream) => stream.try_clone().map(Self::Unix),
        }
    }

    fn peer(&self) -> String {
        match self {
            Self::Tcp(stream) => stream
                .peer_addr()
                .map_or_else(|_| String::from("tcp"), |addr| addr.to_string()),
            #[cfg(unix)]
            Self::Unix(_) => String::from("unix"),
        }
    }
}

impl Read for ConnectionStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.read(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.read(buf),
        }
    }
}

impl Write for ConnectionStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(stream) => stream.write(buf),
            #[cfg(unix)]
            Self::Unix(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.flush(),
            #[cfg(unix)]
            Self::Unix(stream) => stream.flush(),
        }
    }
}

/// Handles accepted socket connections.
pub(crate) trait ConnectionHandler: Send + Sync + 'static {
    /// Serves one connection until it closes. Must not panic.
    fn handle(&self, stream: ConnectionStream);
}

/// Runs a [`RequestLoop`] over each connection, sharing one engine.
#[derive(Debug)]
pub(crate) struct LoopConnectionHandler {
    context: LoopContext,
    framing: Framing,
    max_message_bytes: usize,
}

impl LoopConnectionHandler {
    pub(crate) const fn new(context: LoopContext, framing: Framing, max_message_bytes: usize) -> Self {
        Self {
            context,
            framing,
            max_message_bytes,
        }
    }
}

impl ConnectionHandler for LoopConnectionHandler {
    fn handle(&self, stream: ConnectionStream) {
        let peer = stream.peer();
        let writer = match stream.try_clone() {
            Ok(writer) => writer,
            Err(error) => {
                warn!(
                    target: LISTENER_TARGET,
                    peer = %peer,
                    error = %error,
                    "failed to split connection"
                );
                return;
            }
        };

        debug!(target: LISTENER_TARGET, peer = %peer, "connection opened");
        let reader = FrameReader::new(
            BufReader::new(stream),
            self.framing,
            self.max_message_bytes,
        );
        let sink = ResponseSink::new(writer, self.framing);
        let reason = RequestLoop::new(reader, sink, self.context.clone()).run();
        debug!(
            target: LISTENER_TARGET,
            peer = %peer,
            reason = %reason,
            "connection closed"
        );
    }
}
