//! Configuration loaders for bootstrap scenarios.

use std::ffi::OsString;
use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};

use runlet_config::Config;

use crate::bootstrap::ConfigLoader;

/// Loader returning a fixed configuration.
pub(crate) struct TestConfigLoader {
    config: Config,
}

impl TestConfigLoader {
    pub(crate) fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for TestConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(Config {
            log_filter: String::from("runletd=debug"),
            ..self.config.clone()
        })
    }
}

/// Loader that fails by passing an invalid pool size on the command line.
pub(crate) struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = vec![
            OsString::from("runletd"),
            OsString::from("--concurrency"),
            OsString::from("pool:0"),
        ];
        Config::load_from_iter(args)
    }
}
