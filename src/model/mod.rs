//! Model dispatch
//!
//! A model class bundles reader/writer logic for one file shape together
//! with the selectors that decide which metadata it accepts. The registry
//! picks the most specific class for a piece of metadata and builds a fresh
//! model instance per load.

pub mod decoder;
pub mod generate;
pub mod image;
pub mod json;
pub mod message_log;
pub mod metadata;
pub mod payload;
pub mod pointcloud;
pub mod registry;
pub mod selector;
pub mod stream;
pub mod tabular;
pub mod video;

pub use decoder::DecoderRegistry;
pub use generate::generate_metadata;
pub use metadata::{sidecar_path, Metadata};
pub use payload::Payload;
pub use registry::{init, ModelRegistry};
pub use selector::{ContentsSelector, Selectors};
pub use stream::{Sample, SampleStream};

use crate::error::ApiError;
use crate::preprocess::check_frame_rate;
use crate::types::Document;
use ndarray::ArrayD;
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub type ModelConstructor = fn(ModelState) -> Box<dyn Model>;

/// Immutable description of a model class
#[derive(Debug, Clone)]
pub struct ModelClass {
    pub name: &'static str,
    /// Higher priorities are examined first
    pub priority: i32,
    pub selectors: Selectors,
    /// Column post-fixes joined to the content name
    pub columns: Option<Vec<String>>,
    /// Extra check run after the selectors match
    pub probe: Option<fn(&Metadata) -> bool>,
    /// Configurable settings and their defaults
    pub settings: fn() -> Document,
    pub construct: ModelConstructor,
}

impl ModelClass {
    pub fn new(
        name: &'static str,
        priority: i32,
        selectors: Selectors,
        construct: ModelConstructor,
    ) -> Self {
        Self {
            name,
            priority,
            selectors,
            columns: None,
            probe: None,
            settings: Document::new,
            construct,
        }
    }

    pub fn with_columns(mut self, columns: &[&str]) -> Self {
        self.columns = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn with_probe(mut self, probe: fn(&Metadata) -> bool) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn with_settings(mut self, settings: fn() -> Document) -> Self {
        self.settings = settings;
        self
    }

    pub fn is_loadable(&self, metadata: &Metadata) -> bool {
        self.selectors.matches(metadata) && self.probe.map(|probe| probe(metadata)).unwrap_or(true)
    }
}

/// Options of a single load
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub path: Option<PathBuf>,
    pub start_timestamp: Option<f64>,
    pub end_timestamp: Option<f64>,
    pub target_frame_rate: Option<f64>,
    /// Merged into the stored metadata before loading
    pub overrides: Document,
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
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
}

/// Everything a format needs to perform one load
#[derive(Debug, Clone)]
pub struct LoadRequest {
    pub path: PathBuf,
    pub start_timestamp: Option<f64>,
    pub end_timestamp: Option<f64>,
    pub target_frame_rate: Option<f64>,
    pub metadata: Metadata,
}

impl LoadRequest {
    /// Inclusive `[start, end]` check; open ends accept everything
    pub fn in_range(&self, timestamp: f64) -> bool {
        self.start_timestamp.map(|s| timestamp >= s).unwrap_or(true)
            && self.end_timestamp.map(|e| timestamp <= e).unwrap_or(true)
    }

    pub fn has_time_range(&self) -> bool {
        self.start_timestamp.is_some() && self.end_timestamp.is_some()
    }

    /// The single content to load; required by formats with several streams
    pub fn require_content(&self) -> Result<String, ApiError> {
        self.metadata.content_name()?.ok_or_else(|| {
            ApiError::InvalidArgument(format!(
                "{}: a content name must be given",
                self.path.display()
            ))
        })
    }
}

/// Per-instance state shared by every model
#[derive(Clone)]
pub struct ModelState {
    class: Arc<ModelClass>,
    decoders: Arc<DecoderRegistry>,
    metadata: Metadata,
    settings: Document,
    timestamps: Vec<f64>,
    payload: Payload,
    postfixes: Option<Vec<String>>,
}

impl ModelState {
    pub fn new(class: Arc<ModelClass>, decoders: Arc<DecoderRegistry>, metadata: Metadata) -> Self {
        let settings = (class.settings)();
        Self {
            class,
            decoders,
            metadata,
            settings,
            timestamps: Vec::new(),
            payload: Payload::Empty,
            postfixes: None,
        }
    }

    pub fn class(&self) -> &ModelClass {
        &self.class
    }

    pub fn decoders(&self) -> &Arc<DecoderRegistry> {
        &self.decoders
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn settings(&self) -> &Document {
        &self.settings
    }

    pub fn setting(&self, key: &str) -> Option<&Value> {
        self.settings.get(key)
    }

    pub fn timestamps(&self) -> &[f64] {
        &self.timestamps
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn set_data(&mut self, timestamps: Vec<f64>, payload: Payload) {
        self.timestamps = timestamps;
        self.payload = payload;
    }

    /// Replace the class column post-fixes for this instance
    pub fn set_postfixes(&mut self, postfixes: Vec<String>) {
        self.postfixes = Some(postfixes);
    }

    pub fn postfixes(&self) -> Option<&[String]> {
        self.postfixes.as_deref().or(self.class.columns.as_deref())
    }

    /// Overwrite class settings, rejecting keys the class does not declare
    pub fn apply_settings(&mut self, settings: &Document) -> Result<(), ApiError> {
        if let Some(key) = settings.keys().find(|k| !self.settings.contains_key(*k)) {
            return Err(ApiError::UnknownSetting {
                model: self.class.name.to_string(),
                key: key.clone(),
            });
        }
        for (key, value) in settings {
            self.settings.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    /// Merge load options into the metadata and check the class still accepts it
    fn prepare(&mut self, options: &LoadOptions) -> Result<LoadRequest, ApiError> {
        let mut metadata = self.metadata.clone();
        metadata.update(&options.overrides);
        if let Some(path) = &options.path {
            metadata.set_path(path);
        }
        let path = metadata.path().ok_or_else(|| {
            ApiError::InvalidArgument("no path given and the metadata has none".to_string())
        })?;
        if let Some(rate) = options.target_frame_rate {
            check_frame_rate(rate)?;
        }
        if !self.class.is_loadable(&metadata) {
            return Err(ApiError::UnsupportedFile(format!(
                "model '{}' does not support loading {}",
                self.class.name,
                path.display()
            )));
        }
        self.metadata = metadata.clone();
        Ok(LoadRequest {
            path,
            start_timestamp: options.start_timestamp,
            end_timestamp: options.end_timestamp,
            target_frame_rate: options.target_frame_rate,
            metadata,
        })
    }
}

impl fmt::Debug for ModelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelState")
            .field("class", &self.class.name)
            .field("metadata", &self.metadata)
            .field("settings", &self.settings)
            .field("samples", &self.payload.len())
            .finish()
    }
}

/// Uniform load/save contract
///
/// Formats implement `read` and whichever of the optional hooks they
/// support; the provided methods handle metadata merging, selector checks
/// and extension checks.
pub trait Model: Send {
    fn state(&self) -> &ModelState;
    fn state_mut(&mut self) -> &mut ModelState;

    /// Load the whole file into memory
    fn read(&mut self, request: &LoadRequest) -> Result<(), ApiError>;

    /// Load lazily, one sample per chunk
    fn read_stream(&self, request: &LoadRequest) -> Result<SampleStream, ApiError> {
        Err(ApiError::InvalidArgument(format!(
            "{} cannot load {} lazily",
            self.name(),
            request.path.display()
        )))
    }

    /// Serialise the current payload
    fn write(&self, path: &Path, options: &Document) -> Result<(), ApiError> {
        let _ = options;
        Err(ApiError::UnsupportedFile(format!(
            "{} cannot save {}",
            self.name(),
            path.display()
        )))
    }

    /// `contents` sub-document for a file, when the format can describe it
    fn contents_meta(&self, path: &Path, content_key: &str) -> Result<Option<Value>, ApiError> {
        let _ = (path, content_key);
        Ok(None)
    }

    /// `(start, end)` of a file, when the format records it
    fn timestamp_meta(&self, path: &Path) -> Result<Option<(f64, f64)>, ApiError> {
        let _ = path;
        Ok(None)
    }

    /// Qualified name of every data column
    fn columns(&self) -> Result<Vec<String>, ApiError> {
        content_columns(self.state())
    }

    fn to_ndarray(&self) -> Result<ArrayD<f64>, ApiError> {
        self.payload().to_ndarray()
    }

    fn class(&self) -> &ModelClass {
        self.state().class()
    }

    fn name(&self) -> &'static str {
        self.state().class().name
    }

    fn metadata(&self) -> &Metadata {
        self.state().metadata()
    }

    fn timestamps(&self) -> &[f64] {
        self.state().timestamps()
    }

    fn payload(&self) -> &Payload {
        self.state().payload()
    }

    fn set_data(&mut self, timestamps: Vec<f64>, payload: Payload) {
        self.state_mut().set_data(timestamps, payload);
    }

    /// Update configurable settings; unknown keys are rejected
    fn configure(&mut self, settings: &Document) -> Result<(), ApiError> {
        self.state_mut().apply_settings(settings)
    }

    fn load(&mut self, options: &LoadOptions) -> Result<(), ApiError> {
        let request = self.state_mut().prepare(options)?;
        self.read(&request)
    }

    fn load_stream(&mut self, options: &LoadOptions) -> Result<SampleStream, ApiError> {
        let request = self.state_mut().prepare(options)?;
        self.read_stream(&request)
    }

    /// Save to `path`, or to the metadata path when none is given
    fn save(&self, path: Option<&Path>, options: &Document) -> Result<(), ApiError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => self.metadata().path().ok_or_else(|| {
                ApiError::InvalidArgument("no path given and the metadata has none".to_string())
            })?,
        };
        if let Some(extensions) = &self.class().selectors.file_extensions {
            let ext = selector::extension_of(&path);
            if !extensions.contains(&ext) {
                return Err(ApiError::InvalidArgument(format!(
                    "file extension must be one of {:?}, got '{}'",
                    extensions, ext
                )));
            }
        }
        self.write(&path, options)
    }
}

impl fmt::Debug for dyn Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.state().fmt(f)
    }
}

/// Content name joined with each column post-fix
pub(crate) fn content_columns(state: &ModelState) -> Result<Vec<String>, ApiError> {
    let content = state
        .metadata()
        .content_name()?
        .unwrap_or_else(|| "unknown".to_string());
    Ok(match state.postfixes() {
        None => vec![content],
        Some(postfixes) => postfixes
            .iter()
            .map(|p| format!("{}/{}", content, p))
            .collect(),
    })
}

/// Warn about or reject a time range the format cannot slice by
pub(crate) fn reject_time_range(model: &str, request: &LoadRequest) -> Result<(), ApiError> {
    if request.has_time_range() {
        return Err(ApiError::InvalidArgument(format!(
            "{} does not support loading a time range",
            model
        )));
    }
    if request.start_timestamp.is_some() || request.end_timestamp.is_some() {
        tracing::warn!(model, "Ignoring an open time range");
    }
    Ok(())
}

/// Read a numeric setting
pub(crate) fn setting_f64(state: &ModelState, key: &str, default: f64) -> f64 {
    state.setting(key).and_then(Value::as_f64).unwrap_or(default)
}

/// Read a boolean setting
pub(crate) fn setting_bool(state: &ModelState, key: &str, default: bool) -> bool {
    state.setting(key).and_then(Value::as_bool).unwrap_or(default)
}

/// Read a list-of-strings setting; `null` means unset
pub(crate) fn setting_strings(state: &ModelState, key: &str) -> Option<Vec<String>> {
    state.setting(key).and_then(Value::as_array).map(|items| {
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Instance of a class outside any registry
    pub fn instance(class: ModelClass, metadata: serde_json::Value) -> Box<dyn Model> {
        instance_with(class, Arc::new(DecoderRegistry::with_builtins()), metadata)
    }

    pub fn instance_with(
        class: ModelClass,
        decoders: Arc<DecoderRegistry>,
        metadata: serde_json::Value,
    ) -> Box<dyn Model> {
        let class = Arc::new(class);
        let state = ModelState::new(
            class.clone(),
            decoders,
            Metadata::from_document(metadata.as_object().cloned().unwrap_or_default()),
        );
        (class.construct)(state)
    }
}
