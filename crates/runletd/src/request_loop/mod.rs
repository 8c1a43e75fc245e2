//! The request loop state machine.
//!
//! ```text
//! Idle -> Receiving -> Dispatching -> Responding -> Idle
//!            |                          ^
//!            +-- undecodable frame -----+
//! ```
//!
//! `Shutdown` is terminal. It is entered at end of input, on a `shutdown`
//! control message, when another stopper has raised the [`StopFlag`], or
//! when the transport fails. A failing request never stops the loop.

mod pool;
mod tracking;

use std::fmt;
use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::json;
use tracing::{debug, warn};

use runlet_config::Framing;
use runlet_runtime::{InvocationResult, ResponseEnvelope, encode};

use crate::dispatch::{ControlCommand, DecodeError, InboundMessage, decode};
use crate::engine::Engine;
use crate::transport::{FrameError, FrameReader, FrameWriter};

pub use self::pool::DispatchPool;
pub(crate) use self::pool::Job;
pub use self::tracking::{InFlight, StopFlag, Ticket};

const LOOP_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::request_loop");

/// Why a request loop reached `Shutdown`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The transport reached end of input.
    EndOfInput,
    /// A `shutdown` control message was answered.
    ControlShutdown,
    /// The process received a termination signal.
    Signal,
    /// Reading or writing the transport failed.
    TransportFailure(String),
}

impl StopReason {
    /// Whether the stop should turn into a non-zero exit.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::TransportFailure(_))
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EndOfInput => formatter.write_str("end of input"),
            Self::ControlShutdown => formatter.write_str("shutdown requested"),
            Self::Signal => formatter.write_str("termination signal"),
            Self::TransportFailure(message) => write!(formatter, "transport failure: {message}"),
        }
    }
}

/// What happens once a response has been written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterResponse {
    /// Go back to `Idle`.
    Continue,
    /// Raise the daemon-wide stop, then enter `Shutdown`.
    Stop,
}

/// States of a [`RequestLoop`].
#[derive(Debug)]
pub enum LoopState {
    /// Between requests; the stop flag is checked here.
    Idle,
    /// Blocked on the transport for the next frame.
    Receiving,
    /// A decoded message is being acted on.
    Dispatching(InboundMessage),
    /// An envelope is ready to be written.
    Responding {
        /// Envelope to write.
        envelope: ResponseEnvelope,
        /// Transition after the write.
        then: AfterResponse,
        /// Keeps the request counted as in flight until written.
        ticket: Option<Ticket>,
    },
    /// Terminal.
    Shutdown(StopReason),
}

/// Serialises envelopes onto a shared writer.
///
/// Cloned into dispatch jobs so pool threads can answer out of order; the
/// mutex keeps frames whole.
#[derive(Clone)]
pub struct ResponseSink {
    writer: Arc<Mutex<FrameWriter<Box<dyn Write + Send>>>>,
}

impl fmt::Debug for ResponseSink {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.debug_struct("ResponseSink").finish_non_exhaustive()
    }
}

impl ResponseSink {
    /// Frames envelopes onto `writer`.
    #[must_use]
    pub fn new(writer: impl Write + Send + 'static, framing: Framing) -> Self {
        let boxed: Box<dyn Write + Send> = Box::new(writer);
        Self {
            writer: Arc::new(Mutex::new(FrameWriter::new(boxed, framing))),
        }
    }

    /// Writes one envelope as a single frame.
    ///
    /// # Errors
    ///
    /// Returns serialisation or transport write failures.
    pub fn send(&self, envelope: &ResponseEnvelope) -> io::Result<()> {
        let payload = serde_json::to_vec(envelope).map_err(io::Error::other)?;
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .write_frame(&payload)
    }
}

/// Collaborators shared by every loop in the daemon.
#[derive(Debug, Clone)]
pub struct LoopContext {
    engine: Arc<Engine>,
    pool: Option<Arc<DispatchPool>>,
    stop: StopFlag,
    in_flight: InFlight,
}

impl LoopContext {
    /// Bundles what every loop over one engine shares.
    #[must_use]
    pub const fn new(
        engine: Arc<Engine>,
        pool: Option<Arc<DispatchPool>>,
        stop: StopFlag,
        in_flight: InFlight,
    ) -> Self {
        Self {
            engine,
            pool,
            stop,
            in_flight,
        }
    }

    /// Engine executing invocations.
    #[must_use]
    pub const fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Flag that ends every loop sharing this context.
    #[must_use]
    pub const fn stop(&self) -> &StopFlag {
        &self.stop
    }

    /// Requests accepted daemon-wide and not yet answered.
    #[must_use]
    pub const fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    /// Dispatch pool, in `pool:<N>` mode.
    #[must_use]
    pub const fn pool(&self) -> Option<&Arc<DispatchPool>> {
        self.pool.as_ref()
    }
}

/// Reads frames from one transport and answers each exactly once.
#[derive(Debug)]
pub struct RequestLoop<R> {
    reader: FrameReader<R>,
    sink: ResponseSink,
    context: LoopContext,
    pending: InFlight,
}

impl<R: BufRead> RequestLoop<R> {
    /// Creates a loop in the `Idle` state.
    #[must_use]
    pub fn new(reader: FrameReader<R>, sink: ResponseSink, context: LoopContext) -> Self {
        Self {
            reader,
            sink,
            context,
            pending: InFlight::new(),
        }
    }

    /// Runs until `Shutdown`, then waits for this loop's queued requests to
    /// be answered.
    pub fn run(mut self) -> StopReason {
        let mut state = LoopState::Idle;
        let reason = loop {
            state = match self.step(state) {
                LoopState::Shutdown(reason) => break reason,
                next => next,
            };
        };
        self.pending.wait_idle(None);
        debug!(target: LOOP_TARGET, reason = %reason, "request loop finished");
        reason
    }

    /// Performs one transition.
    pub fn step(&mut self, state: LoopState) -> LoopState {
        match state {
            LoopState::Idle => self
                .context
                .stop
                .reason()
                .map_or(LoopState::Receiving, LoopState::Shutdown),
            LoopState::Receiving => self.receive(),
            LoopState::Dispatching(message) => self.dispatch(message),
            LoopState::Responding {
                envelope,
                then,
                ticket,
            } => {
                let written = self.sink.send(&envelope);
                drop(ticket);
                match (written, then) {
                    (Err(error), _) => {
                        LoopState::Shutdown(StopReason::TransportFailure(error.to_string()))
                    }
                    (Ok(()), AfterResponse::Continue) => LoopState::Idle,
                    (Ok(()), AfterResponse::Stop) => {
                        self.context.stop.request(StopReason::ControlShutdown);
                        LoopState::Shutdown(StopReason::ControlShutdown)
                    }
                }
            }
            LoopState::Shutdown(reason) => LoopState::Shutdown(reason),
        }
    }

    fn receive(&mut self) -> LoopState {
        match self.reader.read_frame() {
            Ok(None) => LoopState::Shutdown(StopReason::EndOfInput),
            Ok(Some(frame)) => match decode(&frame) {
                Ok(message) => LoopState::Dispatching(message),
                Err(error) => rejected(&error),
            },
            Err(FrameError::TooLarge { limit }) => rejected(&DecodeError::TooLarge { limit }),
            Err(FrameError::Io { source }) => {
                warn!(target: LOOP_TARGET, error = %source, "transport read failed");
                LoopState::Shutdown(StopReason::TransportFailure(source.to_string()))
            }
        }
    }

    fn dispatch(&self, message: InboundMessage) -> LoopState {
        match message {
            InboundMessage::Invoke(request) => {
                let Some(pool) = self.context.pool.as_ref() else {
                    let ticket = self.context.in_flight.ticket();
                    return LoopState::Responding {
                        envelope: self.context.engine.execute(request),
                        then: AfterResponse::Continue,
                        ticket: Some(ticket),
                    };
                };
                let tickets = vec![self.pending.ticket(), self.context.in_flight.ticket()];
                if let Err(job) = pool.submit(Job::new(request, self.sink.clone(), tickets)) {
                    job.run(&self.context.engine);
                }
                LoopState::Idle
            }
            InboundMessage::Control { command, id } => self.control(command, id.as_deref()),
        }
    }

    fn control(&self, command: ControlCommand, id: Option<&str>) -> LoopState {
        let engine = &self.context.engine;
        let (value, then) = match command {
            ControlCommand::Ping => (engine.status(), AfterResponse::Continue),
            ControlCommand::Reload => (
                json!({ "reloaded": true, "loaded": engine.reload() }),
                AfterResponse::Continue,
            ),
            ControlCommand::Shutdown => (json!({ "status": "stopping" }), AfterResponse::Stop),
        };
        debug!(target: LOOP_TARGET, ?command, "control message handled");
        LoopState::Responding {
            envelope: encode(id, InvocationResult::success(value)),
            then,
            ticket: None,
        }
    }
}

fn rejected(error: &DecodeError) -> LoopState {
    debug!(target: LOOP_TARGET, error = %error, "rejected request frame");
    LoopState::Responding {
        envelope: error.to_envelope(),
        then: AfterResponse::Continue,
        ticket: None,
    }
}
