//! Single entry point for building a [`ToolkitConfig`] from its sources.

use super::merge::merge_policy;
use super::sources::{global_file, workspace_file};
use super::ToolkitConfig;
use config::{Config, ConfigError, Environment, File};
use std::path::{Path, PathBuf};

/// Builds configuration from defaults, files and the environment
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for a workspace
    ///
    /// Order, lowest precedence first: built-in defaults, the global file,
    /// `config/config.toml`, `config/{RDTK_ENV}.toml`, then `RDTK__*`
    /// environment variables (`RDTK__DB__META__ENGINE=json`).
    pub fn load(workspace_root: &Path) -> Result<ToolkitConfig, ConfigError> {
        let builder = merge_policy::builder_with_defaults()?;
        let builder = global_file::add_to_builder(builder)?;
        let builder = workspace_file::add_to_builder(builder, workspace_root)?;
        let builder = builder.add_source(
            Environment::with_prefix("RDTK")
                .prefix_separator("__")
                .separator("__"),
        );
        builder.build()?.try_deserialize()
    }

    /// Load configuration from one explicit file on top of the defaults
    pub fn load_from_file(path: &Path) -> Result<ToolkitConfig, ConfigError> {
        merge_policy::builder_with_defaults()?
            .add_source(File::from(path.to_path_buf()).required(true))
            .build()?
            .try_deserialize()
    }

    /// Path of the per-user configuration file
    pub fn global_config_path() -> Option<PathBuf> {
        global_file::global_config_path()
    }

    /// Built-in defaults only
    pub fn default() -> ToolkitConfig {
        Config::builder()
            .build()
            .and_then(|c| c.try_deserialize())
            .unwrap_or_default()
    }
}
