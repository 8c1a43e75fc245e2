//! Supervises daemon launch, serving and the shutdown sequence.

use std::io::{self, BufRead, BufReader, Write};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use runlet_config::{Concurrency, Config, Transport};
use runlet_runtime::WorkerSpawner;

use crate::bootstrap::{ConfigLoader, SystemConfigLoader, bootstrap_with, bootstrap_with_engine};
use crate::engine::{Engine, EngineSettings};
use crate::health::{HealthReporter, StructuredHealthReporter};
use crate::request_loop::{
    DispatchPool, InFlight, LoopContext, RequestLoop, ResponseSink, StopFlag, StopReason,
};
use crate::transport::{FrameReader, ListenerHandle, LoopConnectionHandler, SocketListener};

use super::PROCESS_TARGET;
use super::errors::LaunchError;
use super::shutdown::{ShutdownSignal, SystemShutdownSignal};

/// Byte streams used by the `stdio` transport.
pub struct StdioStreams {
    input: Box<dyn BufRead + Send>,
    output: Box<dyn Write + Send>,
}

impl std::fmt::Debug for StdioStreams {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("StdioStreams").finish_non_exhaustive()
    }
}

impl StdioStreams {
    /// Wraps arbitrary streams.
    #[must_use]
    pub fn new(input: impl BufRead + Send + 'static, output: impl Write + Send + 'static) -> Self {
        Self {
            input: Box::new(input),
            output: Box::new(output),
        }
    }

    /// The process's standard input and output.
    #[must_use]
    pub fn system() -> Self {
        Self::new(BufReader::new(io::stdin()), io::stdout())
    }
}

/// Collaborators required to launch the daemon.
pub struct LaunchPlan<'a> {
    /// Source of the configuration.
    pub loader: &'a dyn ConfigLoader,
    /// Lifecycle event sink.
    pub reporter: Arc<dyn HealthReporter>,
    /// Source of the external stop request.
    pub shutdown: Arc<dyn ShutdownSignal>,
    /// Streams for the `stdio` transport; unused for sockets.
    pub stdio: StdioStreams,
    /// Worker source; `None` spawns worker processes as configured.
    pub spawner: Option<Arc<dyn WorkerSpawner>>,
}

/// Runs the daemon using the production collaborators.
///
/// # Errors
///
/// Returns [`LaunchError`] for every condition that must end the process
/// with a non-zero status.
pub fn run_daemon() -> Result<(), LaunchError> {
    let shutdown = SystemShutdownSignal::install()?;
    run_daemon_with(LaunchPlan {
        loader: &SystemConfigLoader,
        reporter: Arc::new(StructuredHealthReporter::new()),
        shutdown: Arc::new(shutdown),
        stdio: StdioStreams::system(),
        spawner: None,
    })
}

/// Runs the daemon with injected collaborators.
///
/// Blocks until a loop, a control message or the shutdown signal requests a
/// stop, then waits up to `shutdown_grace_ms` for in-flight requests and
/// retires every worker process.
///
/// # Errors
///
/// See [`run_daemon`].
pub fn run_daemon_with(plan: LaunchPlan<'_>) -> Result<(), LaunchError> {
    let LaunchPlan {
        loader,
        reporter,
        shutdown,
        stdio,
        spawner,
    } = plan;

    let daemon = match spawner {
        Some(workers) => bootstrap_with_engine(loader, reporter, |config, events| {
            Engine::new(workers, EngineSettings::from_config(config), events)
        }),
        None => bootstrap_with(loader, reporter),
    }?;
    let config = daemon.config();
    let engine = Arc::clone(daemon.engine());
    let stop = StopFlag::new();
    let in_flight = InFlight::new();

    let pool = match config.concurrency() {
        Concurrency::Sequential => None,
        Concurrency::BoundedPool(size) => Some(Arc::new(
            DispatchPool::start(size, &engine).map_err(|source| LaunchError::Thread {
                role: "dispatch",
                source,
            })?,
        )),
    };
    let context = LoopContext::new(
        Arc::clone(&engine),
        pool.clone(),
        stop.clone(),
        in_flight.clone(),
    );

    watch_signal(shutdown, stop.clone())?;
    let listener = serve(config, context, stdio)?;
    info!(
        target: PROCESS_TARGET,
        transport = %config.transport(),
        concurrency = %config.concurrency(),
        log_format = %daemon.telemetry().format(),
        "serving requests"
    );

    let reason = stop.wait();
    info!(target: PROCESS_TARGET, reason = %reason, "stopping");
    if let Some(handle) = listener {
        handle.shutdown();
        handle.join()?;
    }
    drain(config.shutdown_grace(), &in_flight, pool.as_deref());
    engine.shutdown();
    daemon.reporter().loop_stopped(&reason);
    info!(target: PROCESS_TARGET, "shutdown sequence completed");

    match reason {
        StopReason::TransportFailure(message) => Err(LaunchError::Transport { message }),
        StopReason::EndOfInput | StopReason::ControlShutdown | StopReason::Signal => Ok(()),
    }
}

fn watch_signal(shutdown: Arc<dyn ShutdownSignal>, stop: StopFlag) -> Result<(), LaunchError> {
    thread::Builder::new()
        .name(String::from("runlet-signal"))
        .spawn(move || match shutdown.wait() {
            Ok(()) => stop.request(StopReason::Signal),
            Err(error) => {
                warn!(target: PROCESS_TARGET, error = %error, "shutdown signal listener failed");
            }
        })
        .map(drop)
        .map_err(|source| LaunchError::Thread {
            role: "signal",
            source,
        })
}

fn serve(
    config: &Config,
    context: LoopContext,
    stdio: StdioStreams,
) -> Result<Option<ListenerHandle>, LaunchError> {
    let framing = config.framing();
    let limit = config.max_message_bytes;
    match config.transport() {
        Transport::Stdio => {
            let stop = context.stop().clone();
            let reader = FrameReader::new(stdio.input, framing, limit);
            let sink = ResponseSink::new(stdio.output, framing);
            thread::Builder::new()
                .name(String::from("runlet-stdio"))
                .spawn(move || stop.request(RequestLoop::new(reader, sink, context).run()))
                .map_err(|source| LaunchError::Thread {
                    role: "stdio",
                    source,
                })?;
            Ok(None)
        }
        Transport::Socket(endpoint) => {
            let listener = SocketListener::bind(endpoint)?;
            if let Some(addr) = listener.local_addr() {
                info!(target: PROCESS_TARGET, %addr, "bound tcp listener");
            }
            let handler = Arc::new(LoopConnectionHandler::new(context, framing, limit));
            Ok(Some(listener.start(handler)?))
        }
    }
}

fn drain(grace: Duration, in_flight: &InFlight, pool: Option<&DispatchPool>) {
    if !in_flight.wait_idle(Some(grace)) {
        warn!(
            target: PROCESS_TARGET,
            pending = in_flight.count(),
            grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
            "grace period elapsed with requests in flight"
        );
        return;
    }
    if let Some(dispatch) = pool {
        dispatch.shutdown();
    }
}
