//! Layered configuration for the runlet daemon.
//!
//! Values resolve from built-in defaults, then a TOML file named by
//! `--config-path` or `RUNLET_CONFIG_PATH`, then `RUNLET_*` environment
//! variables, and finally command-line flags.

mod concurrency;
mod defaults;
mod handler;
mod logging;
mod socket;
mod transport;

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use concurrency::{Concurrency, ConcurrencyParseError};
pub use defaults::{
    DEFAULT_ENTRY_SYMBOL, DEFAULT_ENV_ALLOWLIST, DEFAULT_HANDLER_PATH, DEFAULT_LOAD_TIMEOUT_MS,
    DEFAULT_LOG_FILTER, DEFAULT_MAX_MESSAGE_BYTES, DEFAULT_MAX_TIMEOUT_MS,
    DEFAULT_SHUTDOWN_GRACE_MS, DEFAULT_TIMEOUT_MS, default_log_filter, default_log_format,
};
pub use handler::RuntimeSelection;
pub use logging::{LogFormat, LogFormatParseError};
pub use socket::{SocketEndpoint, SocketParseError, SocketPreparationError};
pub use transport::{Framing, Transport, TransportParseError};

/// Resolved daemon configuration.
///
/// Numeric limits of zero mean "not enforced". Switches are `Option<bool>`
/// so an absent command-line flag does not mask the file or environment
/// layers; read them through the accessors.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "RUNLET")]
pub struct Config {
    /// Path of the handler unit to load.
    #[serde(default = "defaults::default_handler_path")]
    pub handler_path: Utf8PathBuf,
    /// Runtime used to execute the handler unit.
    #[serde(default = "defaults::default_handler_runtime")]
    pub handler_runtime: RuntimeSelection,
    /// Name of the entry point resolved inside the unit.
    #[serde(default = "defaults::default_entry_symbol")]
    pub entry_symbol: String,
    /// Interpreter override; for executables, the program that runs the unit.
    #[serde(default)]
    pub interpreter: Option<String>,
    /// Load the unit before accepting the first request.
    #[serde(default)]
    pub eager_load: Option<bool>,
    /// Reload the unit when its source changes on disk.
    #[serde(default)]
    pub reload_on_change: Option<bool>,
    /// Time allowed for a worker to initialise the unit.
    #[serde(default = "defaults::default_load_timeout_ms")]
    pub load_timeout_ms: u64,
    /// Deadline applied to requests that do not set one.
    #[serde(default = "defaults::default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Ceiling applied to requested deadlines.
    #[serde(default = "defaults::default_max_timeout_ms")]
    pub max_timeout_ms: u64,
    /// Address-space limit per worker in MiB.
    #[serde(default)]
    pub memory_limit_mb: u64,
    /// CPU time limit per worker in seconds.
    #[serde(default)]
    pub cpu_limit_secs: u64,
    /// Open file descriptor limit per worker.
    #[serde(default)]
    pub max_open_files: u64,
    /// Forward the daemon's whole environment to workers.
    #[serde(default)]
    pub inherit_env: Option<bool>,
    /// Variables forwarded to workers when the environment is not inherited.
    #[serde(default = "defaults::default_env_allowlist")]
    pub env_allowlist: Vec<String>,
    /// Request dispatch mode.
    #[serde(default = "defaults::default_concurrency")]
    pub concurrency: Concurrency,
    /// Where requests arrive.
    #[serde(default = "defaults::default_transport")]
    pub transport: Transport,
    /// Message framing on the transport.
    #[serde(default = "defaults::default_framing")]
    pub framing: Framing,
    /// Largest inbound frame accepted.
    #[serde(default = "defaults::default_max_message_bytes")]
    pub max_message_bytes: usize,
    /// Drain window after a stop signal.
    #[serde(default = "defaults::default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    /// Attach `duration_ms` to every response.
    #[serde(default)]
    pub report_duration: Option<bool>,
    /// Tracing filter expression.
    #[serde(default = "defaults::default_log_filter_string")]
    pub log_filter: String,
    /// Log output format.
    #[serde(default = "defaults::default_log_format")]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            handler_path: defaults::default_handler_path(),
            handler_runtime: defaults::default_handler_runtime(),
            entry_symbol: defaults::default_entry_symbol(),
            interpreter: None,
            eager_load: None,
            reload_on_change: None,
            load_timeout_ms: defaults::default_load_timeout_ms(),
            default_timeout_ms: defaults::default_timeout_ms(),
            max_timeout_ms: defaults::default_max_timeout_ms(),
            memory_limit_mb: 0,
            cpu_limit_secs: 0,
            max_open_files: 0,
            inherit_env: None,
            env_allowlist: defaults::default_env_allowlist(),
            concurrency: defaults::default_concurrency(),
            transport: defaults::default_transport(),
            framing: defaults::default_framing(),
            max_message_bytes: defaults::default_max_message_bytes(),
            shutdown_grace_ms: defaults::default_shutdown_grace_ms(),
            report_duration: None,
            log_filter: defaults::default_log_filter_string(),
            log_format: defaults::default_log_format(),
        }
    }
}

impl Config {
    /// Path of the handler unit.
    #[must_use]
    pub fn handler_path(&self) -> &Utf8Path {
        &self.handler_path
    }

    /// Load the unit before accepting the first request.
    #[must_use]
    pub fn eager_load(&self) -> bool {
        self.eager_load.unwrap_or(false)
    }

    /// Reload the unit when its source changes on disk.
    #[must_use]
    pub fn reload_on_change(&self) -> bool {
        self.reload_on_change.unwrap_or(false)
    }

    /// Forward the daemon's whole environment to workers.
    #[must_use]
    pub fn inherit_env(&self) -> bool {
        self.inherit_env.unwrap_or(false)
    }

    /// Attach `duration_ms` to every response.
    #[must_use]
    pub fn report_duration(&self) -> bool {
        self.report_duration.unwrap_or(false)
    }

    /// Deadline applied to requests without one.
    #[must_use]
    pub const fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Ceiling for requested deadlines. Never below the default deadline.
    #[must_use]
    pub fn max_timeout(&self) -> Duration {
        Duration::from_millis(self.max_timeout_ms.max(self.default_timeout_ms))
    }

    /// Time allowed for unit initialisation.
    #[must_use]
    pub const fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    /// Drain window after a stop signal.
    #[must_use]
    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Address-space limit in bytes, when enforced.
    #[must_use]
    pub const fn memory_limit_bytes(&self) -> Option<u64> {
        match self.memory_limit_mb {
            0 => None,
            mb => Some(mb.saturating_mul(1024 * 1024)),
        }
    }

    /// CPU time limit in seconds, when enforced.
    #[must_use]
    pub const fn cpu_limit_secs(&self) -> Option<u64> {
        match self.cpu_limit_secs {
            0 => None,
            secs => Some(secs),
        }
    }

    /// Open file limit, when enforced.
    #[must_use]
    pub const fn max_open_files(&self) -> Option<u64> {
        match self.max_open_files {
            0 => None,
            files => Some(files),
        }
    }

    /// Request dispatch mode.
    #[must_use]
    pub const fn concurrency(&self) -> Concurrency {
        self.concurrency
    }

    /// Where requests arrive.
    #[must_use]
    pub const fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Message framing on the transport.
    #[must_use]
    pub const fn framing(&self) -> Framing {
        self.framing
    }

    /// Tracing filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn defaults_follow_documented_values() {
        let config = Config::default();
        assert_eq!(config.handler_path(), Utf8Path::new(DEFAULT_HANDLER_PATH));
        assert_eq!(config.default_timeout(), Duration::from_secs(30));
        assert_eq!(config.transport(), &Transport::Stdio);
        assert_eq!(config.concurrency(), Concurrency::Sequential);
        assert_eq!(config.framing(), Framing::Lines);
        assert_eq!(config.memory_limit_bytes(), None);
        assert!(config.env_allowlist.iter().any(|name| name == "PATH"));
    }

    #[rstest]
    #[case(None, false)]
    #[case(Some(false), false)]
    #[case(Some(true), true)]
    fn unset_switches_read_as_off(#[case] value: Option<bool>, #[case] expected: bool) {
        let config = Config {
            eager_load: value,
            reload_on_change: value,
            inherit_env: value,
            report_duration: value,
            ..Config::default()
        };
        assert_eq!(config.eager_load(), expected);
        assert_eq!(config.reload_on_change(), expected);
        assert_eq!(config.inherit_env(), expected);
        assert_eq!(config.report_duration(), expected);
    }

    #[test]
    fn max_timeout_never_undercuts_default() {
        let config = Config {
            default_timeout_ms: 60_000,
            max_timeout_ms: 1_000,
            ..Config::default()
        };
        assert_eq!(config.max_timeout(), Duration::from_secs(60));
    }

    #[rstest]
    #[case(0, None)]
    #[case(128, Some(128 * 1024 * 1024))]
    fn memory_limit_converts_mebibytes(#[case] mb: u64, #[case] expected: Option<u64>) {
        let config = Config {
            memory_limit_mb: mb,
            ..Config::default()
        };
        assert_eq!(config.memory_limit_bytes(), expected);
    }
}
