//! Configuration Loader
//!
//! Layers compiled defaults, an optional TOML file and environment overrides
//! with the `config` crate, then validates the result.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use tracing::debug;

use super::error::{ConfigResult, ConfigurationError};
use super::JobflowConfig;
use crate::constants::CONFIG_ENV_PREFIX;

/// Default file location, used only when it exists
const DEFAULT_CONFIG_PATH: &str = "config/jobflow.toml";

#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    /// Replaces the process environment; used by tests
    env_source: Option<HashMap<String, String>>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from an explicit TOML file, which must exist
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Read overrides from `vars` instead of the process environment
    pub fn with_env_source(mut self, vars: HashMap<String, String>) -> Self {
        self.env_source = Some(vars);
        self
    }

    /// Load from the default locations and the process environment
    pub fn load() -> ConfigResult<JobflowConfig> {
        Self::new().build()
    }

    pub fn build(self) -> ConfigResult<JobflowConfig> {
        let defaults = Config::try_from(&JobflowConfig::default())?;
        let mut builder = Config::builder().add_source(defaults);

        match &self.file {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigurationError::FileNotFound {
                        file_path: path.display().to_string(),
                    });
                }
                debug!(path = %path.display(), "Loading configuration file");
                builder = builder.add_source(File::from(path.as_path()).format(FileFormat::Toml));
            }
            None => {
                builder = builder.add_source(
                    File::with_name(DEFAULT_CONFIG_PATH)
                        .format(FileFormat::Toml)
                        .required(false),
                );
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(CONFIG_ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .source(self.env_source),
        );

        let config: JobflowConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        debug!(
            job_queue = %config.queues.job_queue,
            task_queue = %config.queues.task_queue,
            max_attempts = config.retry.max_attempts,
            "Configuration loaded"
        );
        Ok(config)
    }
}
