//! Configuration Loader
//!
//! Environment-aware loading. Sources are layered, later ones winning:
//!
//! 1. built-in defaults
//! 2. `<dir>/sagaflow.toml`
//! 3. `<dir>/sagaflow.<environment>.toml`
//! 4. `SAGAFLOW__<SECTION>__<KEY>` environment variables
//!
//! Every file is optional. The merged result is validated before it is
//! handed out.

use super::error::{ConfigResult, ConfigurationError};
use super::SagaflowConfig;
use config::{Config, Environment, File, FileFormat};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const BASE_FILE_STEM: &str = "sagaflow";
const ENV_PREFIX: &str = "SAGAFLOW";
const ENV_SEPARATOR: &str = "__";
const DEFAULT_ENVIRONMENT: &str = "development";

/// Loaded, validated configuration plus where it came from
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: SagaflowConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load from `./config` with the environment auto-detected
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory("config", &environment)
    }

    /// Load from a specific directory for an explicit environment
    pub fn load_from_directory<P: AsRef<Path>>(config_dir: P, environment: &str) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.as_ref().to_path_buf();
        debug!(
            environment = environment,
            directory = %config_directory.display(),
            "🔧 Loading configuration"
        );

        let config = Self::load_and_merge(&config_directory, environment)?;
        config.validate()?;

        info!(
            environment = environment,
            directory = %config_directory.display(),
            cluster_key = %config.leader.cluster_key,
            "✅ Configuration loaded"
        );
        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already-built configuration (tests, embedding)
    pub fn from_config(config: SagaflowConfig, environment: &str) -> ConfigResult<ConfigManager> {
        config.validate()?;
        Ok(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: PathBuf::new(),
        })
    }

    pub fn config(&self) -> &SagaflowConfig {
        &self.config
    }

    pub fn into_config(self) -> SagaflowConfig {
        self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// `SAGAFLOW_ENV`, then `APP_ENV`, then `development`
    pub fn detect_environment() -> String {
        ["SAGAFLOW_ENV", "APP_ENV"]
            .iter()
            .find_map(|key| env::var(key).ok().filter(|value| !value.trim().is_empty()))
            .map(|value| value.trim().to_lowercase())
            .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string())
    }

    fn load_and_merge(config_directory: &Path, environment: &str) -> ConfigResult<SagaflowConfig> {
        let defaults = Config::try_from(&SagaflowConfig::default())
            .map_err(|e| ConfigurationError::parse_error("<defaults>", e))?;

        let base = config_directory.join(format!("{BASE_FILE_STEM}.toml"));
        let overlay = config_directory.join(format!("{BASE_FILE_STEM}.{environment}.toml"));
        for path in [&base, &overlay] {
            if path.is_file() {
                debug!(path = %path.display(), "📄 Found configuration file");
            }
        }

        let merged = Config::builder()
            .add_source(defaults)
            .add_source(File::from(base.as_path()).format(FileFormat::Toml).required(false))
            .add_source(File::from(overlay.as_path()).format(FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| Self::classify(e, environment))?;

        merged
            .try_deserialize::<SagaflowConfig>()
            .map_err(|e| Self::classify(e, environment))
    }

    fn classify(error: config::ConfigError, environment: &str) -> ConfigurationError {
        match error {
            config::ConfigError::FileParse { uri, cause } => {
                ConfigurationError::parse_error(uri.unwrap_or_default(), cause)
            }
            config::ConfigError::Foreign(cause) => ConfigurationError::file_read_error("<sources>", cause),
            config::ConfigError::Type { ref key, .. } => {
                ConfigurationError::invalid_value(key.clone().unwrap_or_default(), "", error.to_string())
            }
            other => ConfigurationError::environment_config_error(environment, other),
        }
    }
}
