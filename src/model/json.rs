//! JSON documents loaded as records.

use super::{
    reject_time_range, ContentsSelector, LoadRequest, Model, ModelClass, ModelState, Payload,
    Selectors,
};
use crate::error::ApiError;
use crate::types::Document;
use ndarray::ArrayD;
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Keys that may carry per-record timestamps
const TIMESTAMP_KEYS: &[&str] = &["timestamps", "time_stamps"];

pub fn generic_json() -> Result<ModelClass, ApiError> {
    let selectors = Selectors::new()
        .extensions(&[".json"])
        .content_type("application/json")?
        .contents(ContentsSelector::pattern(".*")?);
    Ok(ModelClass::new("GenericJson", 1, selectors, construct))
}

fn construct(state: ModelState) -> Box<dyn Model> {
    Box::new(JsonModel { state })
}

fn timestamps_of(value: &Value) -> Vec<f64> {
    TIMESTAMP_KEYS
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_array))
        .map(|items| items.iter().filter_map(Value::as_f64).collect())
        .unwrap_or_default()
}

pub struct JsonModel {
    state: ModelState,
}

impl Model for JsonModel {
    fn state(&self) -> &ModelState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ModelState {
        &mut self.state
    }

    fn read(&mut self, request: &LoadRequest) -> Result<(), ApiError> {
        reject_time_range(self.name(), request)?;
        if !request.path.is_file() {
            return Err(ApiError::FileNotFound(request.path.clone()));
        }
        let value: Value = serde_json::from_str(&fs::read_to_string(&request.path)?)?;
        let timestamps = timestamps_of(&value);
        let records = match value {
            Value::Array(items) => items,
            other => vec![other],
        };
        self.state.set_data(timestamps, Payload::Records(records));
        Ok(())
    }

    fn write(&self, path: &Path, _options: &Document) -> Result<(), ApiError> {
        let mut records = self.payload().to_values();
        let value = if records.len() == 1 {
            records.remove(0)
        } else {
            Value::Array(records)
        };
        fs::write(path, serde_json::to_string_pretty(&value)?)?;
        Ok(())
    }

    fn to_ndarray(&self) -> Result<ArrayD<f64>, ApiError> {
        Err(ApiError::DataError(
            "JSON payloads may be semi-structured and do not convert to arrays".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::instance;
    use crate::model::LoadOptions;
    use serde_json::json;
    use tempfile::TempDir;

    fn metadata() -> Value {
        json!({"content_type": "application/json", "contents": "detections"})
    }

    #[test]
    fn test_object_with_timestamps() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("d.json");
        fs::write(&path, r#"{"timestamps": [1.0, 2.0], "boxes": [[0, 0, 4, 4]]}"#).unwrap();
        let mut model = instance(generic_json().unwrap(), metadata());
        model.load(&LoadOptions::new().path(&path)).unwrap();
        assert_eq!(model.timestamps(), &[1.0, 2.0]);
        assert_eq!(model.payload().len(), 1);
        assert!(model.to_ndarray().is_err());
    }

    #[test]
    fn test_array_written_then_read() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("a.json");
        let target = dir.path().join("b.json");
        fs::write(&source, r#"[{"id": 1}, {"id": 2}]"#).unwrap();
        let mut model = instance(generic_json().unwrap(), metadata());
        model.load(&LoadOptions::new().path(&source)).unwrap();
        model.save(Some(&target), &Document::new()).unwrap();
        let written: Value = serde_json::from_str(&fs::read_to_string(&target).unwrap()).unwrap();
        assert_eq!(written, json!([{"id": 1}, {"id": 2}]));
        assert!(model.timestamps().is_empty());
    }
}
