use camino::Utf8PathBuf;

use crate::concurrency::Concurrency;
use crate::handler::RuntimeSelection;
use crate::logging::LogFormat;
use crate::transport::{Framing, Transport};

/// Default location of the handler unit inside a sandbox image.
pub const DEFAULT_HANDLER_PATH: &str = "/app/function/function.py";

/// Name of the callable the loader resolves inside the handler unit.
pub const DEFAULT_ENTRY_SYMBOL: &str = "handler";

/// Deadline applied to a request that does not carry one.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Upper bound applied to any requested deadline.
pub const DEFAULT_MAX_TIMEOUT_MS: u64 = 300_000;

/// Time allowed for a worker to initialise the handler unit.
pub const DEFAULT_LOAD_TIMEOUT_MS: u64 = 30_000;

/// Largest inbound frame accepted by the request loop.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// Time allowed for in-flight requests to drain after a stop signal.
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5_000;

/// Default log filter expression used by the daemon.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Environment variables forwarded to workers under the allow-list policy.
pub const DEFAULT_ENV_ALLOWLIST: &[&str] =
    &["PATH", "LANG", "LC_ALL", "HOME", "PYTHONPATH", "NODE_PATH"];

/// Default handler unit path.
pub fn default_handler_path() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_HANDLER_PATH)
}

/// Runtime chosen from the file extension.
pub fn default_handler_runtime() -> RuntimeSelection {
    RuntimeSelection::Auto
}

/// Default entry point name.
pub fn default_entry_symbol() -> String {
    DEFAULT_ENTRY_SYMBOL.to_owned()
}

/// Default request deadline in milliseconds.
pub fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// Default deadline ceiling in milliseconds.
pub fn default_max_timeout_ms() -> u64 {
    DEFAULT_MAX_TIMEOUT_MS
}

/// Default unit initialisation window in milliseconds.
pub fn default_load_timeout_ms() -> u64 {
    DEFAULT_LOAD_TIMEOUT_MS
}

/// Default inbound frame limit.
pub fn default_max_message_bytes() -> usize {
    DEFAULT_MAX_MESSAGE_BYTES
}

/// Default drain window in milliseconds.
pub fn default_shutdown_grace_ms() -> u64 {
    DEFAULT_SHUTDOWN_GRACE_MS
}

/// [`DEFAULT_ENV_ALLOWLIST`] as owned strings.
pub fn default_env_allowlist() -> Vec<String> {
    DEFAULT_ENV_ALLOWLIST
        .iter()
        .map(|name| (*name).to_owned())
        .collect()
}

/// Sequential dispatch.
pub fn default_concurrency() -> Concurrency {
    Concurrency::Sequential
}

/// Standard streams.
pub fn default_transport() -> Transport {
    Transport::Stdio
}

/// Newline-delimited frames.
pub fn default_framing() -> Framing {
    Framing::Lines
}

/// Default log filter expression used by the daemon.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the daemon.
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}
