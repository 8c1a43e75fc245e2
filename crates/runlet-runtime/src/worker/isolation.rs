//! Environment scrubbing and resource limits for worker processes.

use std::process::Command;

/// Which host environment variables a worker may see.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EnvironmentPolicy {
    /// Start from an empty environment.
    #[default]
    Isolated,
    /// Forward only the named variables that are set on the host.
    AllowList(Vec<String>),
    /// Forward the whole host environment.
    InheritAll,
}

impl EnvironmentPolicy {
    pub(crate) fn apply(&self, command: &mut Command) {
        match self {
            Self::InheritAll => {}
            Self::Isolated => {
                command.env_clear();
            }
            Self::AllowList(names) => {
                command.env_clear();
                for name in names {
                    if let Some(value) = std::env::var_os(name) {
                        command.env(name, value);
                    }
                }
            }
        }
    }
}

/// Kernel-enforced limits applied to each worker before it executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceLimits {
    /// Address-space ceiling in bytes.
    pub memory_bytes: Option<u64>,
    /// CPU time ceiling in seconds; the soft limit raises `SIGXCPU`.
    pub cpu_seconds: Option<u64>,
    /// Open file descriptor ceiling.
    pub open_files: Option<u64>,
}

impl ResourceLimits {
    /// Whether any limit is configured.
    #[must_use]
    pub const fn is_enforced(&self) -> bool {
        self.memory_bytes.is_some() || self.cpu_seconds.is_some() || self.open_files.is_some()
    }

    /// Installs the limits and parent-death signal in the child before exec.
    #[cfg(unix)]
    pub(crate) fn install(self, command: &mut Command) {
        use std::os::unix::process::CommandExt;

        // SAFETY: the hook only issues setrlimit and prctl, both of which are
        // async-signal-safe, and allocates nothing.
        unsafe {
            command.pre_exec(move || self.apply_in_child());
        }
    }

    #[cfg(not(unix))]
    pub(crate) fn install(self, _command: &mut Command) {}

    #[cfg(unix)]
    fn apply_in_child(self) -> std::io::Result<()> {
        use nix::sys::resource::{Resource, setrlimit};

        if let Some(bytes) = self.memory_bytes {
            setrlimit(Resource::RLIMIT_AS, bytes, bytes)?;
        }
        if let Some(seconds) = self.cpu_seconds {
            setrlimit(Resource::RLIMIT_CPU, seconds, seconds.saturating_add(1))?;
        }
        if let Some(files) = self.open_files {
            setrlimit(Resource::RLIMIT_NOFILE, files, files)?;
        }
        #[cfg(target_os = "linux")]
        nix::sys::prctl::set_pdeathsig(nix::sys::signal::Signal::SIGKILL)?;
        Ok(())
    }
}
