//! Structured health reporting for daemon lifecycle events.

use std::path::Path;
use std::sync::Arc;

use runlet_config::Config;
use runlet_runtime::LoadError;

use crate::bootstrap::BootstrapError;
use crate::request_loop::StopReason;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after bootstrap completes successfully.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked when a handler unit finished loading.
    fn unit_loaded(&self, path: &Path);

    /// Invoked when a handler unit failed to load.
    fn unit_load_failed(&self, path: &Path, error: &LoadError);

    /// Invoked once the request loop has stopped.
    fn loop_stopped(&self, reason: &StopReason);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn unit_loaded(&self, path: &Path) {
        (**self).unit_loaded(path);
    }

    fn unit_load_failed(&self, path: &Path, error: &LoadError) {
        (**self).unit_load_failed(path, error);
    }

    fn loop_stopped(&self, reason: &StopReason) {
        (**self).loop_stopped(reason);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting daemon bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            handler = %config.handler_path(),
            runtime = %config.handler_runtime,
            transport = %config.transport(),
            concurrency = %config.concurrency(),
            "daemon bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "daemon bootstrap failed"
        );
    }

    fn unit_loaded(&self, path: &Path) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "unit_loaded",
            unit = %path.display(),
            "handler unit ready"
        );
    }

    fn unit_load_failed(&self, path: &Path, error: &LoadError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "unit_load_failed",
            unit = %path.display(),
            kind = ?error.kind(),
            error = %error,
            traceback = error.traceback().unwrap_or_default(),
            "handler unit failed to load"
        );
    }

    fn loop_stopped(&self, reason: &StopReason) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "loop_stopped",
            reason = %reason,
            "request loop stopped"
        );
    }
}
