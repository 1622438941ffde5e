//! Configuration System
//!
//! Layered toolkit configuration: built-in defaults, the user's global file,
//! workspace files and `RDTK__`-prefixed environment variables. Covers backend
//! connections per handler class, collection defaults, hashing and logging.

use crate::catalog::ColumnSpec;
use crate::error::ApiError;
use crate::logging::LoggingConfig;
use crate::store::EngineKind;
use serde::{Deserialize, Serialize};
use std::path::Path;

mod facade;
mod merge;
mod sources;

pub use facade::ConfigLoader;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolkitConfig {
    /// Backend connections per database class
    #[serde(default)]
    pub db: DbConfig,

    /// Metadata collection defaults
    #[serde(default)]
    pub meta_df: CollectionDefaults,

    /// Annotation collection defaults
    #[serde(default)]
    pub annotation_df: CollectionDefaults,

    /// Database-index collection defaults
    #[serde(default)]
    pub database_id_df: CollectionDefaults,

    #[serde(default)]
    pub hash: HashConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection blocks for each database class
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DbConfig {
    #[serde(default)]
    pub meta: ConnectionConfig,
    #[serde(default)]
    pub annotation: ConnectionConfig,
    #[serde(default)]
    pub statistics: ConnectionConfig,
    #[serde(default)]
    pub time_series: ConnectionConfig,
}

fn default_engine() -> String {
    "sled".to_string()
}

fn default_host() -> String {
    ".rdtk/db".to_string()
}

fn default_database() -> String {
    "rdtk".to_string()
}

/// Where a database class is stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_engine")]
    pub engine: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            host: default_host(),
            database: default_database(),
            username: None,
            password: None,
        }
    }
}

/// Overrides for a collection's name template and column configuration
///
/// Unset fields fall back to the handler's built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionDefaults {
    #[serde(default)]
    pub df_name: Option<String>,
    #[serde(default)]
    pub index_columns: Option<Vec<String>>,
    #[serde(default)]
    pub columns: Option<Vec<ColumnSpec>>,
}

fn default_digest_size() -> usize {
    4
}

/// Hashing of database IDs into collection names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashConfig {
    #[serde(default = "default_digest_size")]
    pub digest_size: usize,
}

impl Default for HashConfig {
    fn default() -> Self {
        Self {
            digest_size: default_digest_size(),
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    Connection(String, String),
    Collection(String, String),
    Hash(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Connection(class, msg) => write!(f, "db.{}: {}", class, msg),
            ValidationError::Collection(name, msg) => write!(f, "{}: {}", name, msg),
            ValidationError::Hash(msg) => write!(f, "hash: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl ToolkitConfig {
    /// Load from the workspace and user configuration files
    pub fn load(workspace_root: &Path) -> Result<Self, ApiError> {
        let config = ConfigLoader::load(workspace_root)?;
        config.validate().map_err(validation_failed)?;
        Ok(config)
    }

    /// Load one explicit file on top of the defaults
    pub fn load_file(path: &Path) -> Result<Self, ApiError> {
        let config = ConfigLoader::load_from_file(path)?;
        config.validate().map_err(validation_failed)?;
        Ok(config)
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        for (class, connection) in [
            ("meta", &self.db.meta),
            ("annotation", &self.db.annotation),
            ("statistics", &self.db.statistics),
            ("time_series", &self.db.time_series),
        ] {
            if connection.engine.parse::<EngineKind>().is_err() {
                errors.push(ValidationError::Connection(
                    class.to_string(),
                    format!("unsupported engine '{}'", connection.engine),
                ));
            }
        }

        for (name, defaults, templated) in [
            ("meta_df", &self.meta_df, true),
            ("annotation_df", &self.annotation_df, true),
            ("database_id_df", &self.database_id_df, false),
        ] {
            if let Some(columns) = &defaults.index_columns {
                if columns.is_empty() {
                    errors.push(ValidationError::Collection(
                        name.to_string(),
                        "index_columns must not be empty".to_string(),
                    ));
                }
            }
            if let Some(template) = &defaults.df_name {
                if templated && !template.contains("{database_id}") {
                    errors.push(ValidationError::Collection(
                        name.to_string(),
                        format!("df_name '{}' must contain {{database_id}}", template),
                    ));
                }
            }
        }

        if !(1..=32).contains(&self.hash.digest_size) {
            errors.push(ValidationError::Hash(format!(
                "digest_size must be between 1 and 32, got {}",
                self.hash.digest_size
            )));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn validation_failed(errors: Vec<ValidationError>) -> ApiError {
    let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    ApiError::ConfigError(format!(
        "Configuration validation failed:\n{}",
        messages.join("\n")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = ToolkitConfig::default();
        assert_eq!(config.db.meta.engine, "sled");
        assert_eq!(config.hash.digest_size, 4);
        assert!(config.meta_df.df_name.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_collects_errors() {
        let mut config = ToolkitConfig::default();
        config.db.annotation.engine = "mongodb".to_string();
        config.hash.digest_size = 0;
        config.meta_df.df_name = Some("fixed".to_string());
        config.database_id_df.df_name = Some("fixed".to_string());
        config.annotation_df.index_columns = Some(vec![]);
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 4);
    }

    #[test]
    fn test_load_from_toml_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_file = temp_dir.path().join("rdtk.toml");
        std::fs::write(
            &config_file,
            r#"
[db.meta]
engine = "json"
host = "/var/lib/rdtk"

[meta_df]
df_name = "catalog_{database_id}"
index_columns = ["record_id", "path"]

[[meta_df.columns]]
name = "record_id"
dtype = "string"
aggregation = "first"
display_name = "Record"

[hash]
digest_size = 8
"#,
        )
        .unwrap();

        let config = ConfigLoader::load_from_file(&config_file).unwrap();
        assert_eq!(config.db.meta.engine, "json");
        assert_eq!(config.db.meta.host, "/var/lib/rdtk");
        assert_eq!(config.db.meta.database, "rdtk");
        assert_eq!(config.db.annotation, ConnectionConfig::default());
        assert_eq!(config.meta_df.df_name.as_deref(), Some("catalog_{database_id}"));
        assert_eq!(config.meta_df.columns.as_ref().unwrap()[0].display_name, "Record");
        assert_eq!(config.hash.digest_size, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_loader_default() {
        let config = ConfigLoader::default();
        assert_eq!(config.db.time_series, ConnectionConfig::default());
        assert_eq!(config.hash, HashConfig::default());
    }

    // Serializes HOME and RDTK_* environment access across tests
    static HOME_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

    fn with_home<T>(home: &Path, f: impl FnOnce() -> T) -> T {
        let original_home = std::env::var("HOME").ok();
        std::env::set_var("HOME", home);
        let out = f();
        match original_home {
            Some(home) => std::env::set_var("HOME", home),
            None => std::env::remove_var("HOME"),
        }
        out
    }

    #[test]
    fn test_global_config_path() {
        let _guard = HOME_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        let temp_dir = TempDir::new().unwrap();
        let path = with_home(temp_dir.path(), ConfigLoader::global_config_path);
        assert_eq!(
            path.unwrap(),
            temp_dir.path().join(".config").join("rdtk").join("config.toml")
        );
    }

    #[test]
    fn test_workspace_config_overrides_global_config() {
        let _guard = HOME_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        let temp_dir = TempDir::new().unwrap();
        let home = temp_dir.path().join("home");
        let global_dir = home.join(".config").join("rdtk");
        std::fs::create_dir_all(&global_dir).unwrap();
        std::fs::write(
            global_dir.join("config.toml"),
            "[db.meta]\nengine = \"memory\"\nhost = \"global\"\n\n[hash]\ndigest_size = 6\n",
        )
        .unwrap();

        let workspace = temp_dir.path().join("workspace");
        std::fs::create_dir_all(workspace.join("config")).unwrap();
        std::fs::write(
            workspace.join("config").join("config.toml"),
            "[db.meta]\nhost = \"workspace\"\n",
        )
        .unwrap();

        let config = with_home(&home, || ConfigLoader::load(&workspace)).unwrap();
        assert_eq!(config.db.meta.engine, "memory");
        assert_eq!(config.db.meta.host, "workspace");
        assert_eq!(config.hash.digest_size, 6);
        assert_eq!(config.db.annotation.engine, "sled");
    }

    #[test]
    fn test_environment_overrides_files() {
        let _guard = HOME_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        let temp_dir = TempDir::new().unwrap();
        std::env::set_var("RDTK__DB__ANNOTATION__ENGINE", "json");
        let config = with_home(temp_dir.path(), || ConfigLoader::load(temp_dir.path()));
        std::env::remove_var("RDTK__DB__ANNOTATION__ENGINE");
        assert_eq!(config.unwrap().db.annotation.engine, "json");
    }

    #[test]
    fn test_load_rejects_invalid_config() {
        let _guard = HOME_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("config")).unwrap();
        std::fs::write(
            temp_dir.path().join("config").join("config.toml"),
            "[db.statistics]\nengine = \"postgres\"\n",
        )
        .unwrap();
        let result = with_home(temp_dir.path(), || ToolkitConfig::load(temp_dir.path()));
        assert!(matches!(result, Err(ApiError::ConfigError(_))));
    }
}
