//! Still images, decoded through the registered image decoders.

use super::{reject_time_range, LoadRequest, Model, ModelClass, ModelState, Payload, Selectors};
use crate::error::ApiError;
use crate::model::selector::extension_of;
use crate::types::Document;
use serde_json::{json, Value};
use std::path::Path;

pub fn generic_image() -> Result<ModelClass, ApiError> {
    let selectors = Selectors::new().extensions(&[".png", ".jpg", ".ppm", ".pgm"]);
    Ok(ModelClass::new("GenericImage", 1, selectors, construct))
}

fn construct(state: ModelState) -> Box<dyn Model> {
    Box::new(ImageModel { state })
}

pub struct ImageModel {
    state: ModelState,
}

impl Model for ImageModel {
    fn state(&self) -> &ModelState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ModelState {
        &mut self.state
    }

    fn read(&mut self, request: &LoadRequest) -> Result<(), ApiError> {
        reject_time_range(self.name(), request)?;
        let image = self
            .state
            .decoders()
            .image(&request.path)?
            .decode(&request.path)?;
        self.state.set_data(Vec::new(), Payload::Bytes(image));
        Ok(())
    }

    fn write(&self, path: &Path, _options: &Document) -> Result<(), ApiError> {
        let image = match self.payload() {
            Payload::Bytes(image) => image.clone(),
            other => other.to_ndarray()?.mapv(|v| v.clamp(0.0, 255.0).round() as u8),
        };
        self.state.decoders().image(path)?.encode(path, &image)
    }

    fn contents_meta(&self, path: &Path, content_key: &str) -> Result<Option<Value>, ApiError> {
        let image = self.state.decoders().image(path)?.decode(path)?;
        let ext = extension_of(path);
        Ok(Some(json!({
            content_key: {
                "size": image.shape(),
                "tags": ["image", ext.trim_start_matches('.')]
            }
        })))
    }
}
