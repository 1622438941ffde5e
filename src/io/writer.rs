//! Sidecar-then-payload writer.

use crate::error::ApiError;
use crate::model::{sidecar_path, Metadata, ModelRegistry, Payload};
use crate::types::Document;
use std::sync::Arc;
use tracing::info;

pub struct FileWriter {
    registry: Arc<ModelRegistry>,
}

impl FileWriter {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self { registry }
    }

    /// Write `<file>.json`, then the payload through the selected model
    ///
    /// The file path comes from the metadata; `options` go to the model's
    /// `save`.
    pub fn write(
        &self,
        metadata: &Metadata,
        timestamps: Vec<f64>,
        data: Payload,
        options: &Document,
    ) -> Result<(), ApiError> {
        let path = metadata.path().ok_or_else(|| {
            ApiError::InvalidArgument("metadata must carry the output path".to_string())
        })?;
        metadata.save(&sidecar_path(&path))?;

        let mut model = self.registry.instantiate(metadata)?;
        model.set_data(timestamps, data);
        model.save(Some(&path), options)?;
        info!(model = model.name(), path = %path.display(), "Wrote file");
        Ok(())
    }
}
