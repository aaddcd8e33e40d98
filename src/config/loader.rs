//! Configuration Loader
//!
//! Layers an optional TOML file under environment overrides using the `config`
//! crate, then validates the merged result.

use super::error::{ConfigResult, ConfigurationError};
use super::RelayConfig;
use std::path::Path;
use tracing::debug;

/// Environment variable prefix, e.g. `CHECKUP_RELAY_BUDGET__FRESH_LIMIT`
pub const ENV_PREFIX: &str = "CHECKUP_RELAY";

impl RelayConfig {
    /// Load configuration from an optional file plus `CHECKUP_RELAY_*` variables
    pub fn load(file: Option<&Path>) -> ConfigResult<Self> {
        Self::load_with_prefix(file, ENV_PREFIX)
    }

    /// Load configuration with an explicit environment prefix
    ///
    /// Useful in tests so parallel cases never see each other's variables.
    pub fn load_with_prefix(file: Option<&Path>, env_prefix: &str) -> ConfigResult<Self> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = file {
            debug!(path = %path.display(), "Loading relay configuration file");
            builder = builder.add_source(::config::File::from(path).required(true));
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix(env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let merged = builder.build().map_err(|e| {
            let source_name = file
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| format!("{env_prefix}_* environment"));
            ConfigurationError::load_error(source_name, e)
        })?;

        let config: RelayConfig = merged
            .try_deserialize()
            .map_err(ConfigurationError::deserialize_error)?;
        config.validate()?;

        debug!(
            provider = %config.provider.name,
            window_hours = config.budget.window_hours,
            fresh_limit = config.budget.fresh_limit,
            force_refresh_limit = config.budget.force_refresh_limit,
            high_cost_enabled = config.targets.high_cost_enabled,
            "Relay configuration loaded"
        );

        Ok(config)
    }

    /// Parse and validate configuration from TOML text, without environment overrides
    pub fn from_toml_str(contents: &str) -> ConfigResult<Self> {
        let merged = ::config::Config::builder()
            .add_source(::config::File::from_str(
                contents,
                ::config::FileFormat::Toml,
            ))
            .build()
            .map_err(|e| ConfigurationError::load_error("inline TOML", e))?;

        let config: RelayConfig = merged
            .try_deserialize()
            .map_err(ConfigurationError::deserialize_error)?;
        config.validate()?;
        Ok(config)
    }
}
