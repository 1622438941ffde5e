//! Integration tests for the configuration system

use crate::integration::test_utils::doc;
use rdtk::catalog::uuid::collection_name;
use rdtk::catalog::{AddOptions, Handler, HandlerOptions, MetaHandler};
use rdtk::config::{ConfigLoader, ToolkitConfig};
use rdtk::error::ApiError;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

fn write_config(dir: &TempDir, body: &str) -> std::path::PathBuf {
    let path = dir.path().join("rdtk.toml");
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
fn test_config_file_drives_meta_handler() {
    let temp_dir = TempDir::new().unwrap();
    let host = temp_dir.path().join("db");
    let config_file = write_config(
        &temp_dir,
        &format!(
            r#"
[db.meta]
engine = "json"
host = "{}"
database = "catalog"

[meta_df]
df_name = "files_{{database_id}}"
index_columns = ["record_id", "path"]

[hash]
digest_size = 2

[logging]
level = "debug"
"#,
            host.display()
        ),
    );

    let config = ToolkitConfig::load_file(&config_file).unwrap();
    assert_eq!(config.logging.level, "debug");
    let options = HandlerOptions::new()
        .settings(Arc::new(config))
        .database_id("cfg")
        .base_dir("/data");

    let mut handler = MetaHandler::open(&options).unwrap();
    assert_eq!(
        handler.collection_name(),
        collection_name("files_{database_id}", "cfg", 2).unwrap()
    );
    assert_eq!(handler.config().index_columns(), &["record_id".to_string(), "path".to_string()]);

    handler
        .add_file(
            doc(json!({"record_id": "r1", "path": "/data/r1/a.csv"})),
            AddOptions::default(),
        )
        .unwrap();
    handler.save().unwrap();
    assert!(host.join("catalog.json").is_file());
}

#[test]
fn test_invalid_file_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config_file = write_config(
        &temp_dir,
        "[db.annotation]\nengine = \"postgres\"\n\n[hash]\ndigest_size = 64\n",
    );

    // Parsing succeeds; validation reports both problems
    let raw = ConfigLoader::load_from_file(&config_file).unwrap();
    assert_eq!(raw.validate().unwrap_err().len(), 2);

    match ToolkitConfig::load_file(&config_file) {
        Err(ApiError::ConfigError(message)) => {
            assert!(message.contains("db.annotation"));
            assert!(message.contains("digest_size"));
        }
        other => panic!("expected a configuration error, got {:?}", other),
    }
}

#[test]
fn test_missing_file_is_config_error() {
    let temp_dir = TempDir::new().unwrap();
    let result = ToolkitConfig::load_file(&temp_dir.path().join("absent.toml"));
    assert!(matches!(result, Err(ApiError::ConfigError(_))));
}
