//! Metadata resolution, model dispatch and pre-processing.

use crate::error::ApiError;
use crate::model::{sidecar_path, LoadOptions, Metadata, ModelRegistry, Payload, SampleStream};
use crate::preprocess::{Pipeline, Preprocess};
use crate::types::Document;
use serde_json::{Map, Value};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// What to read and how
#[derive(Debug, Clone)]
pub struct ReadRequest {
    pub path: Option<PathBuf>,
    /// Used instead of the `<file>.json` sidecar when given
    pub metadata: Option<Metadata>,
    /// Single content to load out of the metadata's contents
    pub contents: Option<String>,
    pub start_timestamp: Option<f64>,
    pub end_timestamp: Option<f64>,
    pub target_frame_rate: Option<f64>,
    /// Merged into the metadata before loading
    pub overrides: Document,
    /// Passed to the model's `configure`
    pub model_settings: Document,
    /// Convert the payload to a numeric array before pre-processing
    pub as_ndarray: bool,
}

impl Default for ReadRequest {
    fn default() -> Self {
        Self {
            path: None,
            metadata: None,
            contents: None,
            start_timestamp: None,
            end_timestamp: None,
            target_frame_rate: None,
            overrides: Document::new(),
            model_settings: Document::new(),
            as_ndarray: true,
        }
    }
}

impl ReadRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn contents(mut self, contents: impl Into<String>) -> Self {
        self.contents = Some(contents.into());
        self
    }

    pub fn time_range(mut self, start: Option<f64>, end: Option<f64>) -> Self {
        self.start_timestamp = start;
        self.end_timestamp = end;
        self
    }

    pub fn target_frame_rate(mut self, rate: f64) -> Self {
        self.target_frame_rate = Some(rate);
        self
    }

    pub fn set(mut self, key: impl Into<String>, value: Value) -> Self {
        self.overrides.insert(key.into(), value);
        self
    }

    pub fn setting(mut self, key: impl Into<String>, value: Value) -> Self {
        self.model_settings.insert(key.into(), value);
        self
    }

    pub fn as_ndarray(mut self, as_ndarray: bool) -> Self {
        self.as_ndarray = as_ndarray;
        self
    }

    fn load_options(&self) -> LoadOptions {
        LoadOptions {
            path: self.path.clone(),
            start_timestamp: self.start_timestamp,
            end_timestamp: self.end_timestamp,
            target_frame_rate: self.target_frame_rate,
            overrides: self.overrides.clone(),
        }
    }
}

/// Result of a full read
#[derive(Debug, Clone)]
pub struct ReadOutput {
    pub timestamps: Vec<f64>,
    pub data: Payload,
    pub columns: Vec<String>,
    /// Name of the model that loaded the file
    pub model: &'static str,
}

/// Loads files through the model registry
pub struct FileReader {
    registry: Arc<ModelRegistry>,
    pipeline: Pipeline,
}

impl FileReader {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self {
            registry,
            pipeline: Pipeline::new(),
        }
    }

    /// Append a pre-processing step; steps run in insertion order
    pub fn add_preprocess(&mut self, step: Box<dyn Preprocess>) -> &mut Self {
        self.pipeline.push(step);
        self
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Metadata of a request, narrowed to the requested content
    pub fn resolve_metadata(&self, request: &ReadRequest) -> Result<Metadata, ApiError> {
        let mut metadata = match (&request.metadata, &request.path) {
            (Some(metadata), _) => metadata.clone(),
            (None, Some(path)) => {
                let sidecar = sidecar_path(path);
                if !sidecar.is_file() {
                    return Err(ApiError::IoFailure(io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("no metadata found for {}", path.display()),
                    )));
                }
                Metadata::load(&sidecar)?
            }
            (None, None) => {
                return Err(ApiError::InvalidArgument(
                    "either a path or metadata must be given".to_string(),
                ))
            }
        };
        if let Some(path) = &request.path {
            metadata.set_path(path);
        }
        if let Some(content) = &request.contents {
            narrow_contents(&mut metadata, content)?;
        }
        Ok(metadata)
    }

    pub fn read(&self, request: &ReadRequest) -> Result<ReadOutput, ApiError> {
        let metadata = self.resolve_metadata(request)?;
        let mut model = self.registry.instantiate(&metadata)?;
        model.configure(&request.model_settings)?;
        model.load(&request.load_options())?;

        let columns = model.columns()?;
        let data = if request.as_ndarray {
            Payload::Array(model.to_ndarray()?)
        } else {
            model.payload().clone()
        };
        let (timestamps, data) = self.pipeline.run(model.timestamps().to_vec(), data)?;
        info!(
            model = model.name(),
            samples = data.len(),
            steps = ?self.pipeline.names(),
            "Read file"
        );
        Ok(ReadOutput {
            timestamps,
            data,
            columns,
            model: model.name(),
        })
    }

    /// Lazy read; pre-processing is not applied to streams
    pub fn read_stream(&self, request: &ReadRequest) -> Result<SampleStream, ApiError> {
        let metadata = self.resolve_metadata(request)?;
        let mut model = self.registry.instantiate(&metadata)?;
        model.configure(&request.model_settings)?;
        debug!(model = model.name(), "Streaming file");
        model.load_stream(&request.load_options())
    }
}

/// Restrict `contents` to a single named entry
fn narrow_contents(metadata: &mut Metadata, content: &str) -> Result<(), ApiError> {
    if content.is_empty() {
        return Err(ApiError::InvalidArgument(
            "content name must not be empty".to_string(),
        ));
    }
    let narrowed = match metadata.contents() {
        Some(Value::Object(contents)) => {
            let entry = contents.get(content).cloned().ok_or_else(|| {
                ApiError::InvalidArgument(format!("content '{}' is not in the metadata", content))
            })?;
            let mut single = Map::new();
            single.insert(content.to_string(), entry);
            Value::Object(single)
        }
        _ => Value::from(content),
    };
    metadata.insert("contents", narrowed);
    Ok(())
}
