//! Bootstrapping metadata for files that have none.

use super::{Metadata, ModelRegistry};
use crate::error::ApiError;
use crate::model::selector::extension_of;
use crate::types::Document;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info};

const DEFAULT_CONTENT_KEY: &str = "content";

/// Content type implied by a file extension, when one is well known
pub fn guess_content_type(path: &Path) -> Option<&'static str> {
    match extension_of(path).as_str() {
        ".csv" => Some("text/csv"),
        ".json" => Some("application/json"),
        ".mp4" => Some("video/mp4"),
        ".bag" => Some("application/rosbag"),
        ".jsonl" => Some("application/x-ndjson"),
        ".png" => Some("image/png"),
        ".jpg" | ".jpeg" => Some("image/jpeg"),
        ".pgm" | ".ppm" => Some("image/x-portable-anymap"),
        _ => None,
    }
}

/// Content key named by a template's `contents` field
fn content_key(template: &Metadata) -> Result<String, ApiError> {
    Ok(template
        .content_name()?
        .unwrap_or_else(|| DEFAULT_CONTENT_KEY.to_string()))
}

/// Build a metadata document for `path`
///
/// Starts from `template`, fills in `path` and a guessed content type, then
/// lets the model chosen for the file describe its contents and time span.
pub fn generate_metadata(
    registry: &ModelRegistry,
    path: &Path,
    template: Document,
) -> Result<Metadata, ApiError> {
    if !path.exists() {
        return Err(ApiError::FileNotFound(path.to_path_buf()));
    }
    let mut metadata = Metadata::from_document(template);
    metadata.set_path(path);
    if metadata.content_type().is_none() {
        if let Some(content_type) = guess_content_type(path) {
            metadata.insert("content_type", Value::from(content_type));
        }
    }

    let key = content_key(&metadata)?;
    let mut probe = metadata.clone();
    if probe.contents().is_none() {
        probe.insert("contents", Value::from(key.clone()));
    }
    let model = registry.instantiate(&probe)?;
    debug!(model = model.name(), path = %path.display(), "Generating metadata");

    if let Some(contents) = model.contents_meta(path, &key)? {
        metadata.insert("contents", contents);
    }
    if let Some((start, end)) = model.timestamp_meta(path)? {
        metadata.insert("start_timestamp", Value::from(start));
        metadata.insert("end_timestamp", Value::from(end));
    }
    info!(model = model.name(), path = %path.display(), "Generated metadata");
    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_camera_timestamps_described() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("front_timestamps.csv");
        fs::write(&path, "1000\n1500\n2500\n").unwrap();
        let registry = ModelRegistry::with_builtins();
        let template = json!({"record_id": "r1", "contents": "camera/front"});
        let metadata =
            generate_metadata(&registry, &path, template.as_object().cloned().unwrap()).unwrap();

        assert_eq!(metadata.content_type(), Some("text/csv"));
        assert_eq!(metadata.get("record_id"), Some(&json!("r1")));
        assert_eq!(
            metadata.contents(),
            Some(&json!({"camera/front": {"tags": ["camera", "timestamp"]}}))
        );
        assert_eq!(metadata.start_timestamp(), Some(1.0));
        assert_eq!(metadata.end_timestamp(), Some(2.5));
    }

    #[test]
    fn test_missing_file() {
        let registry = ModelRegistry::with_builtins();
        let result = generate_metadata(&registry, Path::new("/nonexistent/a.csv"), Document::new());
        assert!(matches!(result, Err(ApiError::FileNotFound(_))));
    }
}
