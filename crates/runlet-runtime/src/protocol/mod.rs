//! Wire types.
//!
//! Two exchanges are modelled here. The host-facing one carries
//! [`InvocationRequest`] in and [`ResponseEnvelope`] out. The worker-facing
//! one is a JSONL conversation over the worker's standard streams: one
//! [`Handshake`] after the unit loads, then one [`WorkerReply`] per
//! [`WorkerCall`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::result::FailureKind;

/// Request received from the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    /// Correlation id echoed in the response.
    pub id: String,
    /// Value passed to the handler as its sole argument.
    #[serde(default)]
    pub input: Value,
    /// Per-request deadline in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
}

impl InvocationRequest {
    /// Request without a deadline of its own.
    #[must_use]
    pub fn new(id: impl Into<String>, input: Value) -> Self {
        Self {
            id: id.into(),
            input,
            deadline_ms: None,
        }
    }

    /// Requested deadline, if the request carries one.
    #[must_use]
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }
}

/// Response written back to the host, one per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Id of the request; `null` when it could not be recovered.
    pub id: Option<String>,
    /// Result or error payload.
    #[serde(flatten)]
    pub body: EnvelopeBody,
    /// Handler wall time, when reporting is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Payload of a [`ResponseEnvelope`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvelopeBody {
    /// The handler's return value.
    Result {
        /// Returned value.
        result: Value,
    },
    /// A structured failure.
    Error {
        /// Human-readable message.
        error: String,
        /// Failure category.
        kind: FailureKind,
        /// Diagnostic trace, where one exists.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        traceback: Option<String>,
    },
}

impl ResponseEnvelope {
    /// Envelope carrying a successful value.
    #[must_use]
    pub const fn result(id: Option<String>, result: Value) -> Self {
        Self {
            id,
            body: EnvelopeBody::Result { result },
            duration_ms: None,
        }
    }

    /// Attaches the handler wall time.
    #[must_use]
    pub fn with_duration(mut self, elapsed: Duration) -> Self {
        self.duration_ms = Some(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Whether the envelope carries an error.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self.body, EnvelopeBody::Error { .. })
    }

    /// Failure category of an error envelope.
    #[must_use]
    pub const fn error_kind(&self) -> Option<FailureKind> {
        match &self.body {
            EnvelopeBody::Result { .. } => None,
            EnvelopeBody::Error { kind, .. } => Some(*kind),
        }
    }
}

/// First line a worker writes once the unit has been imported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Handshake {
    /// The entry symbol resolved; calls may follow.
    Ready,
    /// The unit could not be loaded.
    LoadError {
        /// Load failure category.
        kind: HandshakeFailure,
        /// Human-readable message.
        message: String,
        /// Diagnostic trace, where one exists.
        #[serde(default)]
        traceback: Option<String>,
    },
}

/// Load failure categories a worker may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeFailure {
    /// The unit has no callable under the entry symbol.
    MissingEntryPoint,
    /// Importing the unit raised.
    SyntaxOrImportError,
}

/// Call sent to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerCall {
    /// Call id, unique per invoker.
    pub id: String,
    /// Handler input.
    pub input: Value,
}

/// Reply a worker writes for each call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WorkerReply {
    /// The handler returned `value`.
    Success {
        /// Returned value.
        #[serde(default)]
        value: Value,
    },
    /// The handler raised.
    Failure {
        /// Failure category.
        kind: ReplyFailure,
        /// Human-readable message.
        message: String,
        /// Stack trace captured by the worker.
        #[serde(default)]
        traceback: Option<String>,
    },
}

/// Failure categories a worker may report for a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyFailure {
    /// The handler raised.
    HandlerError,
    /// The handler ran out of memory or CPU.
    ResourceExceeded,
}

impl From<ReplyFailure> for FailureKind {
    fn from(kind: ReplyFailure) -> Self {
        match kind {
            ReplyFailure::HandlerError => Self::HandlerError,
            ReplyFailure::ResourceExceeded => Self::ResourceExceeded,
        }
    }
}
