//! Handler units: the loaded user code and the workers that host it.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use tracing::debug;

use crate::error::LoadError;
use crate::worker::{Worker, WorkerSpawner};

const UNIT_TARGET: &str = "runlet_runtime::unit";

/// Language runtime that executes a handler unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerRuntime {
    /// A Python module run by `python3`.
    Python,
    /// A JavaScript module run by `node`.
    Node,
    /// An executable that speaks the worker protocol itself.
    Executable,
}

impl HandlerRuntime {
    /// Picks a runtime from the unit's file extension.
    #[must_use]
    pub fn detect(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("py") => Self::Python,
            Some("js" | "cjs" | "mjs") => Self::Node,
            _ => Self::Executable,
        }
    }
}

/// Everything a spawner needs to start a worker for a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSource {
    path: PathBuf,
    runtime: HandlerRuntime,
    entry_symbol: String,
}

impl UnitSource {
    /// Describes the unit at `path`, run by `runtime` through `entry_symbol`.
    #[must_use]
    pub fn new(
        path: impl Into<PathBuf>,
        runtime: HandlerRuntime,
        entry_symbol: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            runtime,
            entry_symbol: entry_symbol.into(),
        }
    }

    /// Path of the unit's source file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runtime that executes the unit.
    #[must_use]
    pub const fn runtime(&self) -> HandlerRuntime {
        self.runtime
    }

    /// Name of the callable resolved inside the unit.
    #[must_use]
    pub fn entry_symbol(&self) -> &str {
        &self.entry_symbol
    }
}

/// Modification time and length of a unit's source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    modified: Option<SystemTime>,
    len: u64,
}

impl Fingerprint {
    /// Reads the fingerprint of `path`, or `None` when it cannot be stat'ed.
    #[must_use]
    pub fn of(path: &Path) -> Option<Self> {
        let metadata = fs::metadata(path).ok()?;
        Some(Self {
            modified: metadata.modified().ok(),
            len: metadata.len(),
        })
    }
}

/// A handler unit loaded by the [`Loader`](crate::Loader).
///
/// The unit owns the idle worker processes that hold the imported code. A
/// unit whose load failed keeps its [`LoadError`] and never spawns.
pub struct HandlerUnit {
    source: UnitSource,
    loaded_at: SystemTime,
    fingerprint: Option<Fingerprint>,
    load_error: Option<LoadError>,
    idle: Mutex<Vec<Box<dyn Worker>>>,
    spawner: Arc<dyn WorkerSpawner>,
    retired: AtomicBool,
}

impl std::fmt::Debug for HandlerUnit {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HandlerUnit")
            .field("source", &self.source)
            .field("loaded_at", &self.loaded_at)
            .field("load_error", &self.load_error)
            .field("idle_workers", &self.idle_count())
            .finish_non_exhaustive()
    }
}

impl HandlerUnit {
    pub(crate) fn loaded(
        source: UnitSource,
        fingerprint: Option<Fingerprint>,
        worker: Box<dyn Worker>,
        spawner: Arc<dyn WorkerSpawner>,
    ) -> Self {
        Self {
            source,
            loaded_at: SystemTime::now(),
            fingerprint,
            load_error: None,
            idle: Mutex::new(vec![worker]),
            spawner,
            retired: AtomicBool::new(false),
        }
    }

    pub(crate) fn failed(
        source: UnitSource,
        fingerprint: Option<Fingerprint>,
        error: LoadError,
        spawner: Arc<dyn WorkerSpawner>,
    ) -> Self {
        Self {
            source,
            loaded_at: SystemTime::now(),
            fingerprint,
            load_error: Some(error),
            idle: Mutex::new(Vec::new()),
            spawner,
            retired: AtomicBool::new(false),
        }
    }

    /// Where the unit came from and how it runs.
    #[must_use]
    pub fn source(&self) -> &UnitSource {
        &self.source
    }

    /// Path of the unit's source file.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.source.path()
    }

    /// When the unit was loaded.
    #[must_use]
    pub const fn loaded_at(&self) -> SystemTime {
        self.loaded_at
    }

    /// File fingerprint taken at load time; `None` when the file could not be read.
    #[must_use]
    pub const fn fingerprint(&self) -> Option<Fingerprint> {
        self.fingerprint
    }

    /// The cached load failure, if the unit never loaded.
    #[must_use]
    pub const fn load_error(&self) -> Option<&LoadError> {
        self.load_error.as_ref()
    }

    /// Whether the unit loaded and can serve calls.
    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        self.load_error.is_none()
    }

    /// Number of workers waiting for a call.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Takes an idle worker, starting a new one when none is free.
    ///
    /// # Errors
    ///
    /// Returns the cached [`LoadError`] for a failed unit, or the error from
    /// spawning a fresh worker.
    pub fn checkout(&self) -> Result<Box<dyn Worker>, LoadError> {
        if let Some(error) = &self.load_error {
            return Err(error.clone());
        }
        let reused = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        match reused {
            Some(worker) => Ok(worker),
            None => {
                debug!(
                    target: UNIT_TARGET,
                    unit = %self.path().display(),
                    "no idle worker, spawning another"
                );
                self.spawner.spawn(&self.source)
            }
        }
    }

    /// Returns a healthy worker to the idle set.
    pub fn checkin(&self, mut worker: Box<dyn Worker>) {
        if self.retired.load(Ordering::Acquire) {
            worker.terminate();
            return;
        }
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(worker);
    }

    /// Terminates every idle worker; checked-out workers stop on checkin.
    pub fn retire(&self) {
        self.retired.store(true, Ordering::Release);
        let drained: Vec<_> = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        let count = drained.len();
        for mut worker in drained {
            worker.terminate();
        }
        debug!(
            target: UNIT_TARGET,
            unit = %self.path().display(),
            workers = count,
            "retired handler unit"
        );
    }
}
