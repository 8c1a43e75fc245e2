//! Worker processes speaking the JSONL worker protocol over stdio.
//!
//! [`ProcessSpawner`] starts the runtime for a unit, applies the isolation
//! policy and waits for the handshake. [`ProcessWorker`] then serves calls
//! with a deadline: a reader thread feeds stdout lines into a channel so the
//! host can stop waiting and kill the worker's process group when a call
//! overruns.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStdin, ChildStdout, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::bootstrap;
use super::isolation::{EnvironmentPolicy, ResourceLimits};
use super::{Worker, WorkerSpawner};
use crate::error::{LoadError, WorkerFault};
use crate::protocol::{Handshake, HandshakeFailure, WorkerCall, WorkerReply};
use crate::unit::UnitSource;

/// Tracing target for worker process operations.
const WORKER_TARGET: &str = "runlet_runtime::worker";

/// How long an exiting worker is given to be reaped before it is killed.
const EXIT_GRACE: Duration = Duration::from_millis(500);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Longest slice of an invalid worker line quoted in errors.
const QUOTE_LIMIT: usize = 200;

type LineReceiver = Receiver<io::Result<String>>;

/// Starts isolated worker processes.
#[derive(Debug, Clone)]
pub struct ProcessSpawner {
    interpreter: Option<String>,
    environment: EnvironmentPolicy,
    limits: ResourceLimits,
    load_timeout: Duration,
}

impl ProcessSpawner {
    /// Creates a spawner that waits up to `load_timeout` for each handshake.
    #[must_use]
    pub fn new(load_timeout: Duration) -> Self {
        Self {
            interpreter: None,
            environment: EnvironmentPolicy::default(),
            limits: ResourceLimits::default(),
            load_timeout,
        }
    }

    /// Overrides the `python3`/`node` program.
    #[must_use]
    pub fn with_interpreter(mut self, interpreter: Option<String>) -> Self {
        self.interpreter = interpreter;
        self
    }

    /// Sets which variables workers inherit.
    #[must_use]
    pub fn with_environment(mut self, environment: EnvironmentPolicy) -> Self {
        self.environment = environment;
        self
    }

    /// Sets the rlimits applied before exec.
    #[must_use]
    pub const fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }
}

impl WorkerSpawner for ProcessSpawner {
    fn spawn(&self, source: &UnitSource) -> Result<Box<dyn Worker>, LoadError> {
        let worker = ProcessWorker::start(self, source)?;
        Ok(Box::new(worker))
    }
}

/// A live worker process.
pub struct ProcessWorker {
    label: String,
    child: Child,
    stdin: Option<ChildStdin>,
    lines: LineReceiver,
    limits_enforced: bool,
    finished: bool,
}

impl std::fmt::Debug for ProcessWorker {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ProcessWorker")
            .field("label", &self.label)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl ProcessWorker {
    fn start(spawner: &ProcessSpawner, source: &UnitSource) -> Result<Self, LoadError> {
        let mut command =
            bootstrap::command_for(source, spawner.interpreter.as_deref(), &spawner.environment);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        spawner.limits.install(&mut command);

        let program = command.get_program().to_string_lossy().into_owned();
        debug!(
            target: WORKER_TARGET,
            program = %program,
            unit = %source.path().display(),
            runtime = ?source.runtime(),
            "spawning worker process"
        );

        let mut child = command
            .spawn()
            .map_err(|err| LoadError::spawn_failed(&program, err))?;
        let label = worker_label(source, child.id());

        let Some(stdout) = child.stdout.take() else {
            drop(child.kill());
            drop(child.wait());
            return Err(LoadError::runtime_unavailable(
                "failed to capture worker stdout",
            ));
        };
        let lines = match spawn_line_reader(&label, stdout) {
            Ok(lines) => lines,
            Err(err) => {
                drop(child.kill());
                drop(child.wait());
                return Err(LoadError::runtime_unavailable(format!(
                    "failed to start worker reader: {err}"
                )));
            }
        };
        if let Some(stream) = child.stderr.take() {
            if let Err(err) = spawn_stderr_forwarder(&label, stream) {
                warn!(
                    target: WORKER_TARGET,
                    worker = %label,
                    error = %err,
                    "worker stderr will not be logged"
                );
            }
        }

        let mut worker = Self {
            label,
            stdin: child.stdin.take(),
            child,
            lines,
            limits_enforced: spawner.limits.is_enforced(),
            finished: false,
        };
        worker.await_handshake(spawner.load_timeout, source.entry_symbol())?;
        debug!(target: WORKER_TARGET, worker = %worker.label, "worker ready");
        Ok(worker)
    }

    fn await_handshake(&mut self, timeout: Duration, entry_symbol: &str) -> Result<(), LoadError> {
        let line = match self.next_line(Instant::now() + timeout) {
            Ok(Ok(line)) => line,
            Ok(Err(err)) => {
                self.terminate();
                return Err(LoadError::runtime_unavailable(format!(
                    "failed to read worker handshake: {err}"
                )));
            }
            Err(RecvTimeoutError::Timeout) => {
                self.terminate();
                return Err(LoadError::runtime_unavailable(format!(
                    "handler unit did not finish loading within {}ms",
                    timeout.as_millis()
                )));
            }
            Err(RecvTimeoutError::Disconnected) => {
                let status = self.reap();
                return Err(LoadError::runtime_unavailable(format!(
                    "worker exited before it was ready: {}",
                    describe_exit(status)
                )));
            }
        };

        match serde_json::from_str::<Handshake>(line.trim()) {
            Ok(Handshake::Ready) => Ok(()),
            Ok(Handshake::LoadError {
                kind,
                message,
                traceback,
            }) => {
                self.terminate();
                Err(match kind {
                    HandshakeFailure::MissingEntryPoint => {
                        LoadError::missing_entry_point(entry_symbol)
                    }
                    HandshakeFailure::SyntaxOrImportError => {
                        LoadError::syntax_or_import(message, traceback)
                    }
                })
            }
            Err(err) => {
                self.terminate();
                Err(LoadError::runtime_unavailable(format!(
                    "worker sent an invalid handshake: {err}: {}",
                    quote(&line)
                )))
            }
        }
    }

    /// Waits for the next non-blank stdout line until `deadline`.
    fn next_line(&self, deadline: Instant) -> Result<io::Result<String>, RecvTimeoutError> {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.lines.recv_timeout(remaining)? {
                Ok(line) if line.trim().is_empty() => {}
                other => return Ok(other),
            }
        }
    }

    fn write_call(&mut self, call: &WorkerCall) -> Result<(), WorkerFault> {
        let mut payload = serde_json::to_string(call).map_err(|err| WorkerFault::Protocol {
            message: format!("failed to encode call: {err}"),
        })?;
        payload.push('\n');
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(WorkerFault::Crashed {
                message: String::from("worker stdin is closed"),
            });
        };
        let written = stdin
            .write_all(payload.as_bytes())
            .and_then(|()| stdin.flush());
        match written {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Err(self.exit_fault()),
            Err(err) => {
                self.terminate();
                Err(err.into())
            }
        }
    }

    /// Reaps a worker whose stdout closed and classifies how it ended.
    fn exit_fault(&mut self) -> WorkerFault {
        let status = self.reap();
        classify_exit(status, self.limits_enforced)
    }

    /// Waits briefly for the worker to exit on its own, then kills it.
    fn reap(&mut self) -> Option<ExitStatus> {
        self.stdin = None;
        let started = Instant::now();
        while started.elapsed() < EXIT_GRACE {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    self.finished = true;
                    return Some(status);
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(_) => break,
            }
        }
        self.terminate();
        None
    }

    fn kill_process_group(&mut self) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{Signal, killpg};
            use nix::unistd::Pid;

            if let Ok(pid) = i32::try_from(self.child.id()) {
                if killpg(Pid::from_raw(pid), Signal::SIGKILL).is_ok() {
                    return;
                }
            }
        }
        drop(self.child.kill());
    }
}

impl Worker for ProcessWorker {
    fn call(&mut self, call: &WorkerCall, timeout: Duration) -> Result<WorkerReply, WorkerFault> {
        let deadline = Instant::now() + timeout;
        self.write_call(call)?;

        match self.next_line(deadline) {
            Ok(Ok(line)) => match serde_json::from_str::<WorkerReply>(line.trim()) {
                Ok(reply) => Ok(reply),
                Err(err) => {
                    self.terminate();
                    Err(WorkerFault::Protocol {
                        message: format!("{err}: {}", quote(&line)),
                    })
                }
            },
            Ok(Err(err)) => {
                self.terminate();
                Err(err.into())
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    target: WORKER_TARGET,
                    worker = %self.label,
                    call = %call.id,
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "call exceeded its deadline, killing worker"
                );
                self.terminate();
                Err(WorkerFault::DeadlineExceeded { timeout })
            }
            Err(RecvTimeoutError::Disconnected) => Err(self.exit_fault()),
        }
    }

    fn terminate(&mut self) {
        if self.finished {
            return;
        }
        self.stdin = None;
        self.kill_process_group();
        match self.child.wait() {
            Ok(status) => debug!(
                target: WORKER_TARGET,
                worker = %self.label,
                %status,
                "worker terminated"
            ),
            Err(err) => warn!(
                target: WORKER_TARGET,
                worker = %self.label,
                error = %err,
                "failed to reap worker"
            ),
        }
        self.finished = true;
    }
}

impl Drop for ProcessWorker {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn worker_label(source: &UnitSource, pid: u32) -> String {
    let name = source
        .path()
        .file_name()
        .map_or_else(|| source.path().display().to_string(), |name| {
            name.to_string_lossy().into_owned()
        });
    format!("{name}#{pid}")
}

fn spawn_line_reader(label: &str, stdout: ChildStdout) -> io::Result<LineReceiver> {
    let (sender, receiver) = mpsc::channel();
    thread::Builder::new()
        .name(format!("stdout:{label}"))
        .spawn(move || {
            let mut reader = BufReader::new(stdout);
            loop {
                let mut line = String::new();
                match reader.read_line(&mut line) {
                    Ok(0) => break,
                    Ok(_) => {
                        if sender.send(Ok(line)).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        drop(sender.send(Err(err)));
                        break;
                    }
                }
            }
        })?;
    Ok(receiver)
}

fn spawn_stderr_forwarder(label: &str, stderr: impl Read + Send + 'static) -> io::Result<()> {
    let worker = label.to_owned();
    thread::Builder::new()
        .name(format!("stderr:{label}"))
        .spawn(move || {
            for line in BufReader::new(stderr).lines() {
                match line {
                    Ok(text) => debug!(
                        target: WORKER_TARGET,
                        worker = %worker,
                        stderr = %text,
                        "worker output"
                    ),
                    Err(_) => break,
                }
            }
        })?;
    Ok(())
}

fn quote(line: &str) -> String {
    let trimmed = line.trim();
    match trimmed.char_indices().nth(QUOTE_LIMIT) {
        Some((cut, _)) => format!("{}...", trimmed.get(..cut).unwrap_or(trimmed)),
        None => trimmed.to_owned(),
    }
}

fn describe_exit(status: Option<ExitStatus>) -> String {
    status.map_or_else(
        || String::from("did not exit and was killed"),
        |status| status.to_string(),
    )
}

/// Maps how a worker ended mid-call onto a fault.
///
/// `SIGXCPU` always means the CPU limit fired. A `SIGKILL` the host did not
/// send is attributed to the memory limit when limits are configured.
fn classify_exit(status: Option<ExitStatus>, limits_enforced: bool) -> WorkerFault {
    #[cfg(unix)]
    if let Some(signal) = status.as_ref().and_then(terminating_signal) {
        use nix::sys::signal::Signal;

        return match signal {
            Signal::SIGXCPU => WorkerFault::ResourceExceeded {
                message: String::from("CPU time limit exceeded (SIGXCPU)"),
            },
            Signal::SIGKILL if limits_enforced => WorkerFault::ResourceExceeded {
                message: String::from("killed by SIGKILL while resource limits were in force"),
            },
            other => WorkerFault::Crashed {
                message: format!("terminated by {other}"),
            },
        };
    }
    #[cfg(not(unix))]
    let _ = limits_enforced;
    WorkerFault::Crashed {
        message: describe_exit(status),
    }
}

#[cfg(unix)]
fn terminating_signal(status: &ExitStatus) -> Option<nix::sys::signal::Signal> {
    use std::os::unix::process::ExitStatusExt;

    status
        .signal()
        .and_then(|raw| nix::sys::signal::Signal::try_from(raw).ok())
}
