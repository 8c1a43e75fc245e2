//! Domain errors raised while loading handler units and driving workers.
//!
//! I/O errors are wrapped in `Arc` so [`LoadError`] stays `Clone`; a failed
//! load is cached and handed back on every later request.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Category of a handler unit load failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadErrorKind {
    /// The unit loaded but does not expose the entry symbol.
    MissingEntryPoint,
    /// The unit could not be parsed, imported, or initialised.
    SyntaxOrImportError,
    /// No worker could be started for the unit.
    RuntimeUnavailable,
}

/// Failure to load a handler unit into a worker.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct LoadError {
    kind: LoadErrorKind,
    message: String,
    traceback: Option<String>,
    #[source]
    source: Option<Arc<io::Error>>,
}

impl LoadError {
    /// The unit does not define `entry_symbol`.
    #[must_use]
    pub fn missing_entry_point(entry_symbol: &str) -> Self {
        Self {
            kind: LoadErrorKind::MissingEntryPoint,
            message: format!("Function must define a '{entry_symbol}' function"),
            traceback: None,
            source: None,
        }
    }

    /// The unit failed while being parsed or imported.
    #[must_use]
    pub fn syntax_or_import(message: impl Into<String>, traceback: Option<String>) -> Self {
        Self {
            kind: LoadErrorKind::SyntaxOrImportError,
            message: message.into(),
            traceback,
            source: None,
        }
    }

    /// The worker process could not be brought up.
    #[must_use]
    pub fn runtime_unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: LoadErrorKind::RuntimeUnavailable,
            message: message.into(),
            traceback: None,
            source: None,
        }
    }

    /// The worker process could not be spawned at all.
    #[must_use]
    pub fn spawn_failed(program: &str, source: io::Error) -> Self {
        Self {
            kind: LoadErrorKind::RuntimeUnavailable,
            message: format!("failed to start '{program}': {source}"),
            traceback: None,
            source: Some(Arc::new(source)),
        }
    }

    /// Failure category.
    #[must_use]
    pub const fn kind(&self) -> LoadErrorKind {
        self.kind
    }

    /// Human-readable description of the failure.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Diagnostic trace reported by the runtime, if any.
    #[must_use]
    pub fn traceback(&self) -> Option<&str> {
        self.traceback.as_deref()
    }
}

/// Failure observed while a worker executes a single call.
#[derive(Debug, Error)]
pub enum WorkerFault {
    /// The call outlived its deadline and the worker was killed.
    #[error("worker exceeded its {}ms deadline", timeout.as_millis())]
    DeadlineExceeded {
        /// Deadline that elapsed.
        timeout: Duration,
    },

    /// The worker was stopped by a resource limit.
    #[error("worker exceeded a resource limit: {message}")]
    ResourceExceeded {
        /// Description of how the worker ended.
        message: String,
    },

    /// The worker exited without replying.
    #[error("handler process exited unexpectedly: {message}")]
    Crashed {
        /// Description of how the worker ended.
        message: String,
    },

    /// The worker wrote something that is not a protocol reply.
    #[error("handler produced invalid output: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// Communication with the worker failed.
    #[error("I/O error communicating with worker: {source}")]
    Io {
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
}

impl From<io::Error> for WorkerFault {
    fn from(source: io::Error) -> Self {
        Self::Io {
            source: Arc::new(source),
        }
    }
}
