//! Outcome of a single invocation.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LoadError, LoadErrorKind};

/// Machine-readable failure category surfaced in error envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The handler raised during execution.
    HandlerError,
    /// The handler outlived its deadline.
    Timeout,
    /// The handler hit a memory or CPU limit.
    ResourceExceeded,
    /// The request could not be decoded.
    DecodeError,
    /// The unit does not expose the entry symbol.
    MissingEntryPoint,
    /// The unit failed to parse or import.
    SyntaxOrImportError,
    /// No worker could be started for the unit.
    RuntimeUnavailable,
}

impl From<LoadErrorKind> for FailureKind {
    fn from(kind: LoadErrorKind) -> Self {
        match kind {
            LoadErrorKind::MissingEntryPoint => Self::MissingEntryPoint,
            LoadErrorKind::SyntaxOrImportError => Self::SyntaxOrImportError,
            LoadErrorKind::RuntimeUnavailable => Self::RuntimeUnavailable,
        }
    }
}

/// Result of invoking a handler once.
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationResult {
    /// The handler returned normally.
    Success {
        /// Value returned by the handler.
        value: Value,
    },
    /// The invocation failed.
    Failure {
        /// Failure category.
        kind: FailureKind,
        /// Human-readable message.
        message: String,
        /// Diagnostic stack capture, where one exists.
        trace: Option<String>,
    },
}

impl InvocationResult {
    /// Successful call returning `value`.
    #[must_use]
    pub const fn success(value: Value) -> Self {
        Self::Success { value }
    }

    /// Failed call. A blank `trace` is dropped.
    #[must_use]
    pub fn failure(kind: FailureKind, message: impl Into<String>, trace: Option<String>) -> Self {
        Self::Failure {
            kind,
            message: message.into(),
            trace: trace.filter(|text| !text.trim().is_empty()),
        }
    }

    /// Failure for a call cancelled at its deadline.
    #[must_use]
    pub fn timeout(deadline: Duration) -> Self {
        Self::failure(
            FailureKind::Timeout,
            format!(
                "Timeout: handler exceeded its {}ms deadline",
                deadline.as_millis()
            ),
            None,
        )
    }

    /// Failure for a request that could not be decoded.
    #[must_use]
    pub fn decode_error(message: impl Into<String>) -> Self {
        Self::failure(FailureKind::DecodeError, message, None)
    }

    /// Whether the handler returned normally.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Failure category, or `None` for a success.
    #[must_use]
    pub const fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { kind, .. } => Some(*kind),
        }
    }
}

impl From<&LoadError> for InvocationResult {
    fn from(error: &LoadError) -> Self {
        Self::failure(
            error.kind().into(),
            error.message(),
            error.traceback().map(str::to_owned),
        )
    }
}
