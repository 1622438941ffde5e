//! Priority-ordered model registry.

use super::{
    image, json, message_log, pointcloud, tabular, video, DecoderRegistry, Metadata, Model,
    ModelClass, ModelState,
};
use crate::error::ApiError;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

type ClassBuilder = fn() -> Result<ModelClass, ApiError>;

const BUILTIN_CLASSES: &[ClassBuilder] = &[
    tabular::generic_csv,
    tabular::camera_timestamp_csv,
    tabular::annotation_csv,
    json::generic_json,
    image::generic_image,
    video::generic_video,
    video::video_with_timestamp_csv,
    message_log::generic_message_log,
    message_log::std_msgs,
    message_log::nav_sat_fix,
    message_log::accel_stamped,
    message_log::range,
    message_log::imu,
    pointcloud::pcd,
];

/// Model classes keyed by priority
///
/// Registration is only possible until the first selection; afterwards the
/// registry is sealed.
pub struct ModelRegistry {
    classes: RwLock<BTreeMap<i32, Vec<Arc<ModelClass>>>>,
    decoders: Arc<DecoderRegistry>,
    sealed: AtomicBool,
}

impl ModelRegistry {
    pub fn new(decoders: Arc<DecoderRegistry>) -> Self {
        Self {
            classes: RwLock::new(BTreeMap::new()),
            decoders,
            sealed: AtomicBool::new(false),
        }
    }

    /// Registry holding every built-in model and decoder
    pub fn with_builtins() -> Self {
        let registry = Self::new(Arc::new(DecoderRegistry::with_builtins()));
        for build in BUILTIN_CLASSES {
            match build().and_then(|class| registry.register(class)) {
                Ok(()) => {}
                Err(e) => warn!(error = %e, "Failed to register built-in model"),
            }
        }
        registry
    }

    /// Process-wide registry, populated with the built-ins on first use
    pub fn global() -> Arc<ModelRegistry> {
        static GLOBAL: OnceLock<Arc<ModelRegistry>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| Arc::new(ModelRegistry::with_builtins()))
            .clone()
    }

    pub fn register(&self, class: ModelClass) -> Result<(), ApiError> {
        if self.sealed.load(Ordering::Acquire) {
            return Err(ApiError::RegistrationClosed(format!(
                "cannot register model '{}' after the first lookup",
                class.name
            )));
        }
        debug!(model = class.name, priority = class.priority, "Registered model");
        self.classes
            .write()
            .entry(class.priority)
            .or_default()
            .push(Arc::new(class));
        Ok(())
    }

    /// First loadable class, highest priority first
    pub fn select(&self, metadata: &Metadata) -> Result<Arc<ModelClass>, ApiError> {
        self.sealed.store(true, Ordering::Release);
        let classes = self.classes.read();
        classes
            .values()
            .rev()
            .flatten()
            .find(|class| class.is_loadable(metadata))
            .cloned()
            .ok_or_else(|| ApiError::NoModelMatched(describe(metadata)))
    }

    /// Fresh instance of the selected class
    pub fn instantiate(&self, metadata: &Metadata) -> Result<Box<dyn Model>, ApiError> {
        let class = self.select(metadata)?;
        debug!(model = class.name, "Selected model");
        Ok(self.build(class, metadata))
    }

    /// Fresh instance of a class looked up by name
    pub fn instantiate_named(
        &self,
        name: &str,
        metadata: &Metadata,
    ) -> Result<Box<dyn Model>, ApiError> {
        self.sealed.store(true, Ordering::Release);
        let class = self
            .classes
            .read()
            .values()
            .flatten()
            .find(|class| class.name == name)
            .cloned()
            .ok_or_else(|| ApiError::NoModelMatched(format!("no model named '{}'", name)))?;
        Ok(self.build(class, metadata))
    }

    fn build(&self, class: Arc<ModelClass>, metadata: &Metadata) -> Box<dyn Model> {
        let construct = class.construct;
        construct(ModelState::new(class, self.decoders.clone(), metadata.clone()))
    }

    /// `(priority, name)` in selection order
    pub fn list(&self) -> Vec<(i32, &'static str)> {
        self.classes
            .read()
            .iter()
            .rev()
            .flat_map(|(priority, classes)| classes.iter().map(move |c| (*priority, c.name)))
            .collect()
    }

    pub fn decoders(&self) -> &Arc<DecoderRegistry> {
        &self.decoders
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("models", &self.list())
            .field("sealed", &self.is_sealed())
            .finish()
    }
}

fn describe(metadata: &Metadata) -> String {
    serde_json::to_string(metadata.document()).unwrap_or_else(|_| "<unprintable>".to_string())
}

/// Populate and return the process-wide registry
///
/// Call once at start-up, before any lookup.
pub fn init() -> Arc<ModelRegistry> {
    ModelRegistry::global()
}
