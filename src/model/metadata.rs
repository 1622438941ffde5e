//! File metadata documents and their on-disk JSON form.
//!
//! Two field names differ between the file format and the in-memory form:
//! `content-type` is read as `content_type` and `type` as `data_type`. The
//! renaming happens here and nowhere else.

use crate::error::ApiError;
use crate::types::Document;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// (in-memory name, on-disk name)
const ALIASES: [(&str, &str); 2] = [("content_type", "content-type"), ("data_type", "type")];

/// Suffix of the metadata file stored beside a data file
pub const SIDECAR_EXTENSION: &str = ".json";

/// Metadata of one file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    data: Document,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a document in on-disk naming
    ///
    /// Keys already in the in-memory naming pass through unchanged, as does
    /// every unknown key.
    pub fn from_document(document: Document) -> Self {
        let data = document
            .into_iter()
            .map(|(key, value)| {
                let key = ALIASES
                    .iter()
                    .find(|(_, outward)| *outward == key)
                    .map(|(inward, _)| inward.to_string())
                    .unwrap_or(key);
                (key, value)
            })
            .collect();
        Self { data }
    }

    /// Read a metadata JSON file
    pub fn load(path: &Path) -> Result<Self, ApiError> {
        if !path.is_file() {
            return Err(ApiError::FileNotFound(path.to_path_buf()));
        }
        let text = fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&text)
            .map_err(|e| ApiError::DataError(format!("{}: {}", path.display(), e)))?;
        match value {
            Value::Object(document) => Ok(Self::from_document(document)),
            other => Err(ApiError::DataError(format!(
                "{}: expected a JSON object, found {}",
                path.display(),
                crate::catalog::config_doc::infer_dtype(&other)
            ))),
        }
    }

    /// Write as JSON using the on-disk names
    pub fn save(&self, path: &Path) -> Result<(), ApiError> {
        let text = serde_json::to_string_pretty(&Value::Object(self.to_outward_document()))
            .map_err(|e| ApiError::DataError(e.to_string()))?;
        fs::write(path, text)?;
        debug!(path = %path.display(), "Saved metadata");
        Ok(())
    }

    /// Copy of the document in on-disk naming
    pub fn to_outward_document(&self) -> Document {
        self.data
            .iter()
            .map(|(key, value)| {
                let key = ALIASES
                    .iter()
                    .find(|(inward, _)| inward == key)
                    .map(|(_, outward)| outward.to_string())
                    .unwrap_or_else(|| key.clone());
                (key, value.clone())
            })
            .collect()
    }

    pub fn document(&self) -> &Document {
        &self.data
    }

    pub fn into_document(self) -> Document {
        self.data
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    /// Overwrite top-level keys with the given values
    pub fn update(&mut self, overrides: &Document) {
        for (key, value) in overrides {
            self.data.insert(key.clone(), value.clone());
        }
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.str_field("path")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }

    pub fn set_path(&mut self, path: &Path) {
        self.insert("path", Value::from(path.to_string_lossy().into_owned()));
    }

    pub fn contents(&self) -> Option<&Value> {
        self.data.get("contents").filter(|v| !v.is_null())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.str_field("content_type")
    }

    pub fn data_type(&self) -> Option<&str> {
        self.str_field("data_type")
    }

    pub fn start_timestamp(&self) -> Option<f64> {
        self.data.get("start_timestamp").and_then(Value::as_f64)
    }

    pub fn end_timestamp(&self) -> Option<f64> {
        self.data.get("end_timestamp").and_then(Value::as_f64)
    }

    /// Name of the single active content
    ///
    /// Fails when more than one content is present.
    pub fn content_name(&self) -> Result<Option<String>, ApiError> {
        let name = match self.contents() {
            None => None,
            Some(Value::String(name)) => Some(name.clone()),
            Some(Value::Array(items)) => match items.as_slice() {
                [] => None,
                [Value::String(name)] => Some(name.clone()),
                [Value::Object(map)] => map.keys().next().cloned(),
                [_] => None,
                _ => return Err(multiple_contents()),
            },
            Some(Value::Object(map)) => match map.len() {
                0 => None,
                1 => map.keys().next().cloned(),
                _ => return Err(multiple_contents()),
            },
            Some(_) => None,
        };
        Ok(name)
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}

fn multiple_contents() -> ApiError {
    ApiError::InvalidArgument("loading multiple contents at once is not supported".to_string())
}

/// `<file>.json` beside a data file
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(SIDECAR_EXTENSION);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_aliases_applied_on_load_and_reversed_on_save() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.csv.json");
        fs::write(
            &path,
            r#"{"record_id": "r1", "content-type": "text/csv", "type": "raw_data", "x-extra": 1}"#,
        )
        .unwrap();

        let metadata = Metadata::load(&path).unwrap();
        assert_eq!(metadata.content_type(), Some("text/csv"));
        assert_eq!(metadata.data_type(), Some("raw_data"));
        assert_eq!(metadata.get("x-extra"), Some(&json!(1)));

        let out = dir.path().join("out.json");
        metadata.save(&out).unwrap();
        let written: Value = serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(written["content-type"], "text/csv");
        assert_eq!(written["type"], "raw_data");
        assert!(written.get("content_type").is_none());
    }

    #[test]
    fn test_missing_file() {
        let result = Metadata::load(Path::new("/nonexistent/meta.json"));
        assert!(matches!(result, Err(ApiError::FileNotFound(_))));
    }

    #[test]
    fn test_content_name() {
        let single = Metadata::from_document(doc(json!({"contents": {"camera/front": {}}})));
        assert_eq!(single.content_name().unwrap().as_deref(), Some("camera/front"));
        let many = Metadata::from_document(doc(json!({"contents": {"a": {}, "b": {}}})));
        assert!(many.content_name().is_err());
        let listed = Metadata::from_document(doc(json!({"contents": ["only"]})));
        assert_eq!(listed.content_name().unwrap().as_deref(), Some("only"));
        assert_eq!(Metadata::new().content_name().unwrap(), None);
    }

    #[test]
    fn test_sidecar_path() {
        assert_eq!(
            sidecar_path(Path::new("/data/cam.mp4")),
            PathBuf::from("/data/cam.mp4.json")
        );
    }
}
