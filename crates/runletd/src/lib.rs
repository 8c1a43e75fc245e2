//! The runlet daemon.
//!
//! `runletd` serves a single handler unit. It loads configuration through
//! [`runlet_config`], installs structured telemetry on stderr, and then runs
//! request loops over the configured transport: standard IO by default, or
//! a Unix/TCP socket where every connection gets its own loop. All loops
//! share one [`Engine`], which owns the handler cache and the worker
//! processes from [`runlet_runtime`].
//!
//! Each request frame is decoded, dispatched (inline in sequential mode,
//! through a [`DispatchPool`] in pool mode) and answered with exactly one
//! response envelope. Failing requests never stop a loop; end of input, a
//! `shutdown` control message, a termination signal or a broken transport
//! do.

mod bootstrap;
mod dispatch;
mod engine;
mod health;
mod process;
mod request_loop;
mod telemetry;
mod transport;

pub use bootstrap::{
    BootstrapError, ConfigLoader, Daemon, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
    bootstrap_with_engine,
};
pub use dispatch::{ControlCommand, DecodeError, InboundMessage, decode};
pub use engine::{Engine, EngineSettings, process_spawner};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use process::{
    LaunchError, LaunchPlan, ShutdownError, ShutdownSignal, StdioStreams, SystemShutdownSignal,
    run_daemon, run_daemon_with,
};
pub use request_loop::{
    AfterResponse, DispatchPool, InFlight, LoopContext, LoopState, RequestLoop, ResponseSink,
    StopFlag, StopReason, Ticket,
};
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use transport::{FrameError, FrameReader, FrameWriter, ListenerError};

#[cfg(test)]
mod tests;
