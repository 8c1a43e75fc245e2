//! The invocation engine shared by every request loop.
//!
//! One [`Engine`] owns the loader cache and the invoker. In sequential mode
//! a gate serialises invocations across all connections; in pool mode the
//! dispatch pool bounds concurrency instead.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use serde_json::json;
use tracing::debug;

use runlet_config::{Concurrency, Config, RuntimeSelection};
use runlet_runtime::{
    DeadlinePolicy, EnvironmentPolicy, HandlerRuntime, InvocationRequest, InvocationResult,
    Invoker, LoadError, Loader, LoaderSettings, ProcessSpawner, ResourceLimits, ResponseEnvelope,
    WorkerSpawner, encode,
};

use crate::health::HealthReporter;

const ENGINE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::engine");

/// Settings the engine derives from [`Config`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Unit served by this daemon.
    pub handler_path: PathBuf,
    /// How the unit is interpreted.
    pub loader: LoaderSettings,
    /// Per-call deadlines.
    pub deadlines: DeadlinePolicy,
    /// Dispatch mode.
    pub concurrency: Concurrency,
    /// Attach `duration_ms` to envelopes.
    pub report_duration: bool,
}

impl EngineSettings {
    /// Extracts the engine settings from a resolved configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            handler_path: config.handler_path().as_std_path().to_path_buf(),
            loader: LoaderSettings {
                runtime: runtime_for(config.handler_runtime),
                entry_symbol: config.entry_symbol.clone(),
                reload_on_change: config.reload_on_change(),
            },
            deadlines: DeadlinePolicy::new(config.default_timeout(), config.max_timeout()),
            concurrency: config.concurrency(),
            report_duration: config.report_duration(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

const fn runtime_for(selection: RuntimeSelection) -> Option<HandlerRuntime> {
    match selection {
        RuntimeSelection::Auto => None,
        RuntimeSelection::Python => Some(HandlerRuntime::Python),
        RuntimeSelection::Node => Some(HandlerRuntime::Node),
        RuntimeSelection::Executable => Some(HandlerRuntime::Executable),
    }
}

/// Builds the production spawner: isolated worker processes.
#[must_use]
pub fn process_spawner(config: &Config) -> ProcessSpawner {
    let environment = if config.inherit_env() {
        EnvironmentPolicy::InheritAll
    } else if config.env_allowlist.is_empty() {
        EnvironmentPolicy::Isolated
    } else {
        EnvironmentPolicy::AllowList(config.env_allowlist.clone())
    };
    ProcessSpawner::new(config.load_timeout())
        .with_interpreter(config.interpreter.clone())
        .with_environment(environment)
        .with_limits(ResourceLimits {
            memory_bytes: config.memory_limit_bytes(),
            cpu_seconds: config.cpu_limit_secs(),
            open_files: config.max_open_files(),
        })
}

/// Loader, invoker and encoder wired together.
pub struct Engine {
    loader: Loader,
    invoker: Invoker,
    handler_path: PathBuf,
    gate: Option<Mutex<()>>,
    report_duration: bool,
    reporter: Arc<dyn HealthReporter>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Engine")
            .field("handler_path", &self.handler_path)
            .field("sequential", &self.gate.is_some())
            .field("report_duration", &self.report_duration)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Creates an engine over an arbitrary spawner.
    #[must_use]
    pub fn new(
        spawner: Arc<dyn WorkerSpawner>,
        settings: EngineSettings,
        reporter: Arc<dyn HealthReporter>,
    ) -> Self {
        let gate = match settings.concurrency {
            Concurrency::Sequential => Some(Mutex::new(())),
            Concurrency::BoundedPool(_) => None,
        };
        Self {
            loader: Loader::new(spawner, settings.loader),
            invoker: Invoker::new(settings.deadlines),
            handler_path: settings.handler_path,
            gate,
            report_duration: settings.report_duration,
            reporter,
        }
    }

    /// Creates the production engine for `config`.
    #[must_use]
    pub fn from_config(config: &Config, reporter: Arc<dyn HealthReporter>) -> Self {
        Self::new(
            Arc::new(process_spawner(config)),
            EngineSettings::from_config(config),
            reporter,
        )
    }

    /// Path of the unit every request runs.
    #[must_use]
    pub fn handler_path(&self) -> &Path {
        &self.handler_path
    }

    /// Loads the unit ahead of the first request.
    ///
    /// # Errors
    ///
    /// Returns the unit's [`LoadError`]; the failure stays cached either way.
    pub fn preload(&self) -> Result<(), LoadError> {
        self.load_reported().map(|_| ())
    }

    /// Runs one request through load, invoke and encode.
    ///
    /// Never fails: load errors, handler errors and timeouts all become
    /// error envelopes under the request id.
    pub fn execute(&self, request: InvocationRequest) -> ResponseEnvelope {
        let _serial = self
            .gate
            .as_ref()
            .map(|gate| gate.lock().unwrap_or_else(PoisonError::into_inner));

        let deadline = request.deadline();
        let started = Instant::now();
        let result = match self.loader.load(&self.handler_path) {
            Ok(unit) => self.invoker.invoke(&unit, request.input, deadline),
            Err(error) => InvocationResult::from(&error),
        };
        let elapsed = started.elapsed();
        debug!(
            target: ENGINE_TARGET,
            id = %request.id,
            success = result.is_success(),
            kind = ?result.failure_kind(),
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "request handled"
        );

        let envelope = encode(Some(&request.id), result);
        if self.report_duration {
            envelope.with_duration(elapsed)
        } else {
            envelope
        }
    }

    /// Drops the cached unit and loads it again.
    ///
    /// Returns whether the fresh load succeeded.
    pub fn reload(&self) -> bool {
        self.loader.invalidate(&self.handler_path);
        self.load_reported().is_ok()
    }

    /// Whether a successfully loaded unit is cached.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.loader
            .cached(&self.handler_path)
            .is_some_and(|unit| unit.is_loaded())
    }

    /// Answer to a `ping` control message.
    #[must_use]
    pub fn status(&self) -> serde_json::Value {
        json!({ "status": "ok", "loaded": self.is_loaded() })
    }

    /// Retires every worker process.
    pub fn shutdown(&self) {
        self.loader.shutdown();
    }

    fn load_reported(&self) -> Result<(), LoadError> {
        match self.loader.load(&self.handler_path) {
            Ok(_) => {
                self.reporter.unit_loaded(&self.handler_path);
                Ok(())
            }
            Err(error) => {
                self.reporter.unit_load_failed(&self.handler_path, &error);
                Err(error)
            }
        }
    }
}
