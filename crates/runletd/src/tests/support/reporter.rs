//! Test double for [`HealthReporter`] that records events for assertions.

use std::path::Path;
use std::sync::Mutex;

use runlet_config::Config;
use runlet_runtime::LoadError;

use crate::bootstrap::BootstrapError;
use crate::health::HealthReporter;
use crate::request_loop::StopReason;

/// Structured health events tracked during scenarios.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HealthEvent {
    BootstrapStarting,
    BootstrapSucceeded,
    BootstrapFailed(String),
    UnitLoaded,
    UnitLoadFailed(String),
    LoopStopped(StopReason),
}

#[derive(Debug, Default)]
pub(crate) struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    pub(crate) fn events(&self) -> Vec<HealthEvent> {
        self.events.lock().expect("reporter mutex").clone()
    }

    fn record(&self, event: HealthEvent) {
        self.events.lock().expect("reporter mutex").push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn bootstrap_starting(&self) {
        self.record(HealthEvent::BootstrapStarting);
    }

    fn bootstrap_succeeded(&self, _config: &Config) {
        self.record(HealthEvent::BootstrapSucceeded);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.record(HealthEvent::BootstrapFailed(error.to_string()));
    }

    fn unit_loaded(&self, _path: &Path) {
        self.record(HealthEvent::UnitLoaded);
    }

    fn unit_load_failed(&self, _path: &Path, error: &LoadError) {
        self.record(HealthEvent::UnitLoadFailed(error.message().to_owned()));
    }

    fn loop_stopped(&self, reason: &StopReason) {
        self.record(HealthEvent::LoopStopped(reason.clone()));
    }
}
