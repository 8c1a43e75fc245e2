//! Daemon bootstrap orchestration.

use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;

use runlet_config::{Config, SocketPreparationError};
use runlet_runtime::LoadError;

use crate::engine::Engine;
use crate::health::HealthReporter;
use crate::telemetry::{self, TelemetryError, TelemetryHandle};

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the daemon configuration.
    ///
    /// # Errors
    ///
    /// Returns the aggregated layering error from `ortho_config`.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`]: defaults, file, environment
/// and command line.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Loader returning a configuration resolved elsewhere.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Serves `config` on every call.
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// Socket preparation failed.
    #[error("failed to prepare request socket: {source}")]
    Socket {
        /// Filesystem error reported while preparing the socket directory.
        #[source]
        source: SocketPreparationError,
    },
    /// The handler unit failed its eager load and cannot be reloaded later.
    #[error("handler unit failed to load: {source}")]
    HandlerLoad {
        /// Load failure reported by the worker.
        #[source]
        source: LoadError,
    },
}

/// Result of a successful bootstrap invocation.
pub struct Daemon {
    config: Config,
    engine: Arc<Engine>,
    telemetry: TelemetryHandle,
    reporter: Arc<dyn HealthReporter>,
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Daemon")
            .field("config", &self.config)
            .field("engine", &self.engine)
            .field("telemetry", &self.telemetry)
            .finish_non_exhaustive()
    }
}

impl Daemon {
    /// Accessor for the resolved configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// The engine shared by every request loop.
    #[must_use]
    pub const fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Handle of the installed subscriber.
    #[must_use]
    pub const fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    /// Lifecycle event sink shared with the engine.
    #[must_use]
    pub fn reporter(&self) -> Arc<dyn HealthReporter> {
        Arc::clone(&self.reporter)
    }
}

/// Bootstraps the daemon with production worker processes.
///
/// # Errors
///
/// See [`bootstrap_with_engine`].
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
) -> Result<Daemon, BootstrapError> {
    bootstrap_with_engine(loader, reporter, |config, reporter| {
        Engine::from_config(config, reporter)
    })
}

/// Bootstraps the daemon, building the engine with `build_engine`.
///
/// Order: configuration, telemetry, socket directory, engine, then the
/// eager load when `eager_load` is set. An eager load failure is fatal only
/// when `reload_on_change` is off; otherwise the failure is cached and
/// reported per request until the unit is fixed on disk.
///
/// # Errors
///
/// Returns the first [`BootstrapError`]; the reporter has already been told.
pub fn bootstrap_with_engine<F>(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
    build_engine: F,
) -> Result<Daemon, BootstrapError>
where
    F: FnOnce(&Config, Arc<dyn HealthReporter>) -> Engine,
{
    reporter.bootstrap_starting();
    let fail = |error: BootstrapError| {
        reporter.bootstrap_failed(&error);
        error
    };

    let config = loader
        .load()
        .map_err(|source| fail(BootstrapError::Configuration { source }))?;
    let telemetry = telemetry::initialise(&config)
        .map_err(|source| fail(BootstrapError::Telemetry { source }))?;
    if let Some(endpoint) = config.transport().socket() {
        endpoint
            .prepare_filesystem()
            .map_err(|source| fail(BootstrapError::Socket { source }))?;
    }

    let engine = Arc::new(build_engine(&config, Arc::clone(&reporter)));
    if config.eager_load()
        && let Err(source) = engine.preload()
        && !config.reload_on_change()
    {
        return Err(fail(BootstrapError::HandlerLoad { source }));
    }

    reporter.bootstrap_succeeded(&config);
    Ok(Daemon {
        config,
        engine,
        telemetry,
        reporter,
    })
}
