//! Runtime configuration schemas.
//!
//! All configuration structs are deserialized via the `config` crate from
//! an optional file plus `TRELLIS__`-prefixed environment variables. Each
//! sub-module represents a logical configuration section.

pub mod logging;
pub mod runtime;

use serde::{Deserialize, Serialize};

pub use self::logging::LoggingConfig;
pub use self::runtime::{HookMode, HookPolicyConfig, RuntimeSettings};

use crate::error::AppError;

/// Root runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Plugin engine settings.
    #[serde(default)]
    pub runtime: RuntimeSettings,
    /// Plugin discovery settings.
    #[serde(default)]
    pub plugins: PluginsConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the deployment configuration and plugin bundles live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// Directory containing plugin bundles. The CLI resolves relative
    /// deployment entry paths against it.
    #[serde(default = "default_plugin_directory")]
    pub directory: String,
    /// Path of the ordered deployment configuration (YAML, JSON, or TOML).
    #[serde(default = "default_deployment_file")]
    pub deployment: String,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            directory: default_plugin_directory(),
            deployment: default_deployment_file(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a file and the environment.
    ///
    /// The file is optional. When `TRELLIS_ENV` is set, a sibling file
    /// named after it (e.g. `config/production.toml`) is layered on top.
    /// Environment variables prefixed with `TRELLIS__` override both
    /// (e.g. `TRELLIS__RUNTIME__ERROR_THRESHOLD=5`).
    pub fn load(path: &str) -> Result<Self, AppError> {
        let overlay = std::env::var("TRELLIS_ENV").ok().map(|env| {
            std::path::Path::new(path)
                .with_file_name(env)
                .to_string_lossy()
                .into_owned()
        });

        tracing::debug!(path = %path, overlay = ?overlay, "Loading runtime configuration");

        let mut builder =
            config::Config::builder().add_source(config::File::with_name(path).required(false));
        if let Some(overlay) = &overlay {
            builder = builder.add_source(config::File::with_name(overlay).required(false));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("TRELLIS")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))
    }
}

fn default_plugin_directory() -> String {
    "./plugins".to_string()
}

fn default_deployment_file() -> String {
    "config/plugins.toml".to_string()
}
