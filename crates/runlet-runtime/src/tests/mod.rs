//! Crate-level test doubles and behaviour tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use mockall::mock;
use serde_json::{Value, json};

use crate::error::{LoadError, WorkerFault};
use crate::protocol::{ReplyFailure, WorkerCall, WorkerReply};
use crate::unit::UnitSource;
use crate::worker::{Worker, WorkerSpawner};


mock! {
    pub Launcher {}
    impl WorkerSpawner for Launcher {
        fn spawn(&self, source: &UnitSource) -> Result<Box<dyn Worker>, LoadError>;
    }
}

mock! {
    pub Handle {}
    impl Worker for Handle {
        fn call(&mut self, call: &WorkerCall, timeout: Duration) -> Result<WorkerReply, WorkerFault>;
        fn terminate(&mut self);
    }
}

/// What a [`ScriptedWorker`] does with each call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Script {
    /// Returns `{"y": input.x * 2}`.
    Double,
    /// Raises a handler error with a traceback.
    Raise,
    /// Never replies before the deadline.
    Hang,
    /// Dies mid-call.
    Crash,
    /// Reports a memory error.
    ExhaustMemory,
}

/// In-memory worker following a fixed [`Script`].
#[derive(Debug)]
pub(crate) struct ScriptedWorker {
    script: Script,
    terminated: Arc<AtomicUsize>,
}

impl Worker for ScriptedWorker {
    fn call(&mut self, call: &WorkerCall, timeout: Duration) -> Result<WorkerReply, WorkerFault> {
        match self.script {
            Script::Double => {
                let x = call.input.get("x").and_then(Value::as_i64).unwrap_or(0);
                Ok(WorkerReply::Success {
                    value: json!({ "y": x * 2 }),
                })
            }
            Script::Raise => Ok(WorkerReply::Failure {
                kind: ReplyFailure::HandlerError,
                message: String::from("boom"),
                traceback: Some(String::from(
                    "Traceback (most recent call last):\n  File \"function.py\", line 2\nValueError: boom",
                )),
            }),
            Script::Hang => {
                thread::sleep(timeout);
                Err(WorkerFault::DeadlineExceeded { timeout })
            }
            Script::Crash => Err(WorkerFault::Crashed {
                message: String::from("exit status: 1"),
            }),
            Script::ExhaustMemory => Ok(WorkerReply::Failure {
                kind: ReplyFailure::ResourceExceeded,
                message: String::from("MemoryError"),
                traceback: None,
            }),
        }
    }

    fn terminate(&mut self) {
        self.terminated.fetch_add(1, Ordering::SeqCst);
    }
}

/// Spawner producing [`ScriptedWorker`]s, or a fixed load error.
#[derive(Debug, Clone)]
pub(crate) struct ScriptedSpawner {
    script: Script,
    load_error: Option<LoadError>,
    load_delay: Duration,
    pub(crate) spawns: Arc<AtomicUsize>,
    pub(crate) terminated: Arc<AtomicUsize>,
}

impl ScriptedSpawner {
    pub(crate) fn new(script: Script) -> Self {
        Self {
            script,
            load_error: None,
            load_delay: Duration::ZERO,
            spawns: Arc::new(AtomicUsize::new(0)),
            terminated: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn failing(error: LoadError) -> Self {
        Self {
            load_error: Some(error),
            ..Self::new(Script::Double)
        }
    }

    pub(crate) fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub(crate) fn spawn_count(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }

    pub(crate) fn terminated_count(&self) -> usize {
        self.terminated.load(Ordering::SeqCst)
    }
}

impl WorkerSpawner for ScriptedSpawner {
    fn spawn(&self, _source: &UnitSource) -> Result<Box<dyn Worker>, LoadError> {
        thread::sleep(self.load_delay);
        self.spawns.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.load_error {
            return Err(error.clone());
        }
        Ok(Box::new(ScriptedWorker {
            script: self.script,
            terminated: Arc::clone(&self.terminated),
        }))
    }
}
