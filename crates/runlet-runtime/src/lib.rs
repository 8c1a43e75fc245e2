//! Invocation engine for sandboxed user handlers.
//!
//! A handler unit is a single source file (Python, JavaScript, or a
//! protocol-speaking executable) that exposes an entry point. The
//! [`Loader`] imports it into an isolated worker process once and caches the
//! resulting [`HandlerUnit`]. The [`Invoker`] calls the entry point under a
//! deadline, killing the worker when it overruns, and yields an
//! [`InvocationResult`]. [`encode`] turns that into the [`ResponseEnvelope`]
//! written back to the host.
//!
//! Nothing in this crate touches the host transport; framing and the request
//! loop live in `runletd`.

pub mod encoder;
pub mod error;
pub mod invoker;
pub mod loader;
pub mod protocol;
pub mod result;
pub mod unit;
pub mod worker;

#[cfg(test)]
mod tests;

pub use self::encoder::encode;
pub use self::error::{LoadError, LoadErrorKind, WorkerFault};
pub use self::invoker::{DeadlinePolicy, Invoker};
pub use self::loader::{Loader, LoaderSettings};
pub use self::protocol::{EnvelopeBody, InvocationRequest, ResponseEnvelope};
pub use self::result::{FailureKind, InvocationResult};
pub use self::unit::{HandlerRuntime, HandlerUnit, UnitSource};
pub use self::worker::{
    EnvironmentPolicy, ProcessSpawner, ProcessWorker, ResourceLimits, Worker, WorkerSpawner,
};
