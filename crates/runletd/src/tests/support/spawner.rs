//! In-memory worker spawners.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use mockall::mock;
use serde_json::{Value, json};

use runlet_runtime::protocol::{ReplyFailure, WorkerCall, WorkerReply};
use runlet_runtime::{LoadError, UnitSource, Worker, WorkerFault, WorkerSpawner};

mock! {
    pub Launcher {}
    impl WorkerSpawner for Launcher {
        fn spawn(&self, source: &UnitSource) -> Result<Box<dyn Worker>, LoadError>;
    }
}

/// What a scripted worker does with each call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Script {
    /// Returns `{"y": input.x * 2}`.
    Double,
    /// Raises a handler error with a traceback.
    Raise,
    /// Overruns every deadline.
    Hang,
    /// Echoes the input after sleeping.
    SlowEcho(Duration),
}

#[derive(Debug, Default)]
struct Counters {
    spawns: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

#[derive(Debug)]
struct ScriptedWorker {
    script: Script,
    counters: Arc<Counters>,
}

impl Worker for ScriptedWorker {
    fn call(&mut self, call: &WorkerCall, timeout: Duration) -> Result<WorkerReply, WorkerFault> {
        let active = self.counters.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak.fetch_max(active, Ordering::SeqCst);
        let outcome = match self.script {
            Script::Double => {
                let x = call.input.get("x").and_then(Value::as_i64).unwrap_or(0);
                Ok(WorkerReply::Success {
                    value: json!({ "y": x * 2 }),
                })
            }
            Script::Raise => Ok(WorkerReply::Failure {
                kind: ReplyFailure::HandlerError,
                message: String::from("boom"),
                traceback: Some(String::from("Traceback (most recent call last):\nValueError: boom")),
            }),
            Script::Hang => {
                thread::sleep(timeout);
                Err(WorkerFault::DeadlineExceeded { timeout })
            }
            Script::SlowEcho(delay) => {
                thread::sleep(delay);
                Ok(WorkerReply::Success {
                    value: call.input.clone(),
                })
            }
        };
        self.counters.active.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    fn terminate(&mut self) {}
}

/// Spawner producing scripted workers, or a fixed load error.
#[derive(Debug, Clone)]
pub(crate) struct ScriptedSpawner {
    script: Script,
    load_error: Option<LoadError>,
    counters: Arc<Counters>,
}

impl ScriptedSpawner {
    pub(crate) fn new(script: Script) -> Self {
        Self {
            script,
            load_error: None,
            counters: Arc::default(),
        }
    }

    pub(crate) fn failing(error: LoadError) -> Self {
        Self {
            load_error: Some(error),
            ..Self::new(Script::Double)
        }
    }

    pub(crate) fn spawn_count(&self) -> usize {
        self.counters.spawns.load(Ordering::SeqCst)
    }

    /// Most calls observed running at once.
    pub(crate) fn peak_concurrency(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }
}

impl WorkerSpawner for ScriptedSpawner {
    fn spawn(&self, _source: &UnitSource) -> Result<Box<dyn Worker>, LoadError> {
        self.counters.spawns.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.load_error {
            return Err(error.clone());
        }
        Ok(Box::new(ScriptedWorker {
            script: self.script,
            counters: Arc::clone(&self.counters),
        }))
    }
}
