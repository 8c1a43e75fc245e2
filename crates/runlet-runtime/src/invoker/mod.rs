//! Calls a loaded handler under a deadline.
//!
//! Cancellation is enforced at the process boundary: a worker that overruns
//! its deadline is killed rather than asked to stop, and the unit spawns a
//! replacement on the next checkout.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::error::WorkerFault;
use crate::protocol::{WorkerCall, WorkerReply};
use crate::result::{FailureKind, InvocationResult};
use crate::unit::HandlerUnit;

const INVOKER_TARGET: &str = "runlet_runtime::invoker";

/// Resolves the deadline applied to each call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadlinePolicy {
    default: Duration,
    max: Duration,
}

impl DeadlinePolicy {
    /// `max` is raised to `default` if it is smaller.
    #[must_use]
    pub fn new(default: Duration, max: Duration) -> Self {
        Self {
            default,
            max: max.max(default),
        }
    }

    /// Picks the requested deadline, or the default, capped at the maximum.
    #[must_use]
    pub fn resolve(&self, requested: Option<Duration>) -> Duration {
        requested.unwrap_or(self.default).min(self.max)
    }
}

impl Default for DeadlinePolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_secs(300))
    }
}

/// Executes calls against handler units.
#[derive(Debug, Default)]
pub struct Invoker {
    deadlines: DeadlinePolicy,
    next_call: AtomicU64,
}

impl Invoker {
    /// Creates an invoker resolving deadlines with `deadlines`.
    #[must_use]
    pub const fn new(deadlines: DeadlinePolicy) -> Self {
        Self {
            deadlines,
            next_call: AtomicU64::new(1),
        }
    }

    /// Deadline resolution in effect.
    #[must_use]
    pub const fn deadlines(&self) -> DeadlinePolicy {
        self.deadlines
    }

    /// Calls the unit's entry point with `input` as its only argument.
    ///
    /// Never fails: every outcome, including load failures and timeouts, is
    /// folded into the returned [`InvocationResult`].
    pub fn invoke(
        &self,
        unit: &HandlerUnit,
        input: Value,
        deadline: Option<Duration>,
    ) -> InvocationResult {
        let timeout = self.deadlines.resolve(deadline);
        let mut worker = match unit.checkout() {
            Ok(worker) => worker,
            Err(error) => return InvocationResult::from(&error),
        };

        let call = WorkerCall {
            id: self.next_call.fetch_add(1, Ordering::Relaxed).to_string(),
            input,
        };
        debug!(
            target: INVOKER_TARGET,
            call = %call.id,
            unit = %unit.path().display(),
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "invoking handler"
        );

        match worker.call(&call, timeout) {
            Ok(reply) => {
                unit.checkin(worker);
                from_reply(reply)
            }
            Err(fault) => {
                worker.terminate();
                from_fault(fault)
            }
        }
    }
}

fn from_reply(reply: WorkerReply) -> InvocationResult {
    match reply {
        WorkerReply::Success { value } => InvocationResult::success(value),
        WorkerReply::Failure {
            kind,
            message,
            traceback,
        } => InvocationResult::failure(kind.into(), message, traceback),
    }
}

fn from_fault(fault: WorkerFault) -> InvocationResult {
    match fault {
        WorkerFault::DeadlineExceeded { timeout } => InvocationResult::timeout(timeout),
        WorkerFault::ResourceExceeded { message } => InvocationResult::failure(
            FailureKind::ResourceExceeded,
            format!("Resource limit exceeded: {message}"),
            None,
        ),
        other @ (WorkerFault::Crashed { .. }
        | WorkerFault::Protocol { .. }
        | WorkerFault::Io { .. }) => {
            InvocationResult::failure(FailureKind::HandlerError, other.to_string(), None)
        }
    }
}

#[cfg(test)]
mod tests;
