//! Loads handler units and caches them by path.
//!
//! The cache lock is held for the whole load, so concurrent callers for the
//! same unit wait for the first load and then share its result. Failed loads
//! are cached too and reported on every later call until the unit is
//! invalidated.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, warn};

use crate::error::LoadError;
use crate::unit::{Fingerprint, HandlerRuntime, HandlerUnit, UnitSource};
use crate::worker::WorkerSpawner;

const LOADER_TARGET: &str = "runlet_runtime::loader";

/// How the loader interprets handler units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderSettings {
    /// Fixed runtime, or `None` to detect it from the file extension.
    pub runtime: Option<HandlerRuntime>,
    /// Name of the callable to resolve.
    pub entry_symbol: String,
    /// Reload a cached unit when its file fingerprint changes.
    pub reload_on_change: bool,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            runtime: None,
            entry_symbol: String::from("handler"),
            reload_on_change: false,
        }
    }
}

/// Owner of every loaded [`HandlerUnit`].
pub struct Loader {
    spawner: Arc<dyn WorkerSpawner>,
    settings: LoaderSettings,
    units: Mutex<HashMap<PathBuf, Arc<HandlerUnit>>>,
}

impl std::fmt::Debug for Loader {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Loader")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Loader {
    /// Creates an empty cache that spawns workers with `spawner`.
    #[must_use]
    pub fn new(spawner: Arc<dyn WorkerSpawner>, settings: LoaderSettings) -> Self {
        Self {
            spawner,
            settings,
            units: Mutex::new(HashMap::new()),
        }
    }

    /// Settings applied to every load.
    #[must_use]
    pub const fn settings(&self) -> &LoaderSettings {
        &self.settings
    }

    /// Returns the unit at `path`, loading it on first use.
    ///
    /// Top-level code in the unit runs once per load; cache hits do not
    /// re-run it.
    ///
    /// # Errors
    ///
    /// Returns the [`LoadError`] of the current load attempt, or the cached
    /// one if the unit already failed to load.
    pub fn load(&self, path: &Path) -> Result<Arc<HandlerUnit>, LoadError> {
        let mut units = self.units.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(unit) = units.get(path) {
            if !self.is_stale(unit) {
                return outcome(unit);
            }
            info!(
                target: LOADER_TARGET,
                unit = %path.display(),
                "handler unit changed on disk, reloading"
            );
            if let Some(stale) = units.remove(path) {
                stale.retire();
            }
        }

        let unit = Arc::new(self.load_fresh(path));
        units.insert(path.to_path_buf(), Arc::clone(&unit));
        outcome(&unit)
    }

    /// Returns the cached unit without loading anything.
    #[must_use]
    pub fn cached(&self, path: &Path) -> Option<Arc<HandlerUnit>> {
        self.units
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    /// Drops the cached unit so the next [`load`](Self::load) starts over.
    ///
    /// Returns whether a unit was cached.
    pub fn invalidate(&self, path: &Path) -> bool {
        let removed = self
            .units
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path);
        match removed {
            Some(unit) => {
                unit.retire();
                debug!(target: LOADER_TARGET, unit = %path.display(), "invalidated handler unit");
                true
            }
            None => false,
        }
    }

    /// Retires every cached unit and empties the cache.
    pub fn shutdown(&self) {
        let units: Vec<_> = self
            .units
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, unit)| unit)
            .collect();
        for unit in units {
            unit.retire();
        }
    }

    fn is_stale(&self, unit: &HandlerUnit) -> bool {
        self.settings.reload_on_change && Fingerprint::of(unit.path()) != unit.fingerprint()
    }

    fn load_fresh(&self, path: &Path) -> HandlerUnit {
        let runtime = self
            .settings
            .runtime
            .unwrap_or_else(|| HandlerRuntime::detect(path));
        let source = UnitSource::new(path, runtime, self.settings.entry_symbol.as_str());
        let fingerprint = Fingerprint::of(path);
        let spawner = Arc::clone(&self.spawner);

        if fingerprint.is_none() {
            let error = LoadError::syntax_or_import(
                format!("handler unit not found: {}", path.display()),
                None,
            );
            warn!(target: LOADER_TARGET, unit = %path.display(), "handler unit not found");
            return HandlerUnit::failed(source, fingerprint, error, spawner);
        }

        match self.spawner.spawn(&source) {
            Ok(worker) => {
                info!(
                    target: LOADER_TARGET,
                    unit = %path.display(),
                    ?runtime,
                    "handler unit loaded"
                );
                HandlerUnit::loaded(source, fingerprint, worker, spawner)
            }
            Err(error) => {
                warn!(
                    target: LOADER_TARGET,
                    unit = %path.display(),
                    kind = ?error.kind(),
                    error = %error,
                    "handler unit failed to load"
                );
                HandlerUnit::failed(source, fingerprint, error, spawner)
            }
        }
    }
}

fn outcome(unit: &Arc<HandlerUnit>) -> Result<Arc<HandlerUnit>, LoadError> {
    match unit.load_error() {
        Some(error) => Err(error.clone()),
        None => Ok(Arc::clone(unit)),
    }
}

#[cfg(test)]
mod tests;
