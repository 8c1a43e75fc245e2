//! Worker processes: the isolation boundary around user code.
//!
//! A worker hosts one imported handler unit and serves calls one at a time.
//! [`WorkerSpawner`] starts workers and [`Worker`] drives them; both are
//! traits so loader and invoker logic can be exercised without processes.

mod bootstrap;
mod isolation;
mod process;

use std::time::Duration;

use crate::error::{LoadError, WorkerFault};
use crate::protocol::{WorkerCall, WorkerReply};
use crate::unit::UnitSource;

pub use self::isolation::{EnvironmentPolicy, ResourceLimits};
pub use self::process::{ProcessSpawner, ProcessWorker};

/// A running execution context for a handler unit.
pub trait Worker: Send {
    /// Sends `call` and waits up to `timeout` for the reply.
    ///
    /// # Errors
    ///
    /// Returns a [`WorkerFault`] when the deadline elapses, the worker dies,
    /// or the reply breaks the protocol. The worker must not be reused after
    /// a fault.
    fn call(&mut self, call: &WorkerCall, timeout: Duration) -> Result<WorkerReply, WorkerFault>;

    /// Stops the worker and reclaims its resources.
    fn terminate(&mut self);
}

/// Starts workers for a handler unit.
pub trait WorkerSpawner: Send + Sync {
    /// Starts a worker and waits for the unit to finish loading in it.
    ///
    /// # Errors
    ///
    /// Returns a [`LoadError`] when the runtime cannot start or the unit
    /// fails to import or lacks its entry symbol.
    fn spawn(&self, source: &UnitSource) -> Result<Box<dyn Worker>, LoadError>;
}
