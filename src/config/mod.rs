//! Configuration for the binding engine.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file support
//! - Environment variable overrides
//! - Store location URLs (`etcd://host:port/root/`)
mod store;
mod watch;
pub use store::*;
pub use watch::*;


use std::env;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

/// Prefix of environment variables overriding file settings (`BINDWATCH__STORE__ROOT`)
pub const ENV_PREFIX: &str = "BINDWATCH";

/// Environment variable naming an optional configuration file
pub const CONFIG_PATH_ENV: &str = "BINDWATCH_CONFIG_PATH";

/// Main configuration container
///
/// Merged from, in increasing priority:
/// 1. Default values from code
/// 2. Configuration file named by `BINDWATCH_CONFIG_PATH`
/// 3. `BINDWATCH__*` environment variables
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Settings {
    /// Store endpoints, root prefix and timeouts
    #[serde(default)]
    pub store: StoreConfig,
    /// Watch stream tuning
    #[serde(default)]
    pub watch: WatchConfig,
}

impl Settings {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Callers MUST call [`validate()`](Self::validate) before use.
    ///
    /// # Examples
    /// ```ignore
    /// let settings = Settings::new()?
    ///     .with_override_config("bindwatch.toml")?
    ///     .validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var(CONFIG_PATH_ENV) {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(env_source());

        let settings: Self = builder.build()?.try_deserialize()?;
        Ok(settings)
    }

    /// Applies additional overrides from a file without validation.
    ///
    /// Merging order (later sources override earlier):
    /// 1. Current values
    /// 2. The given file
    /// 3. Environment variables
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let settings: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(env_source())
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    /// Replaces the store section with the location encoded in `url`.
    ///
    /// Timeouts already configured are kept.
    pub fn with_store_url(
        mut self,
        url: &str,
    ) -> Result<Self> {
        let located = StoreConfig::from_url(url)?;
        self.store.endpoints = located.endpoints;
        self.store.root = located.root;
        Ok(self)
    }

    /// Validates every section and returns the validated instance.
    pub fn validate(self) -> Result<Self> {
        self.store.validate()?;
        self.watch.validate()?;
        Ok(self)
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
}
