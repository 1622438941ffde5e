//! Handler construction keyed by `(class, engine)`.

use crate::catalog::{
    AnnotationHandler, DatabaseIndexHandler, Handler, HandlerClass, HandlerOptions, MetaHandler,
};
use crate::error::ApiError;
use crate::store::EngineKind;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Constructor stored in the registry
pub type HandlerConstructor = fn(&HandlerOptions) -> Result<Box<dyn Handler>, ApiError>;

fn open_meta(options: &HandlerOptions) -> Result<Box<dyn Handler>, ApiError> {
    Ok(Box::new(MetaHandler::open(options)?))
}

fn open_annotation(options: &HandlerOptions) -> Result<Box<dyn Handler>, ApiError> {
    Ok(Box::new(AnnotationHandler::open(options)?))
}

fn open_database_index(options: &HandlerOptions) -> Result<Box<dyn Handler>, ApiError> {
    Ok(Box::new(DatabaseIndexHandler::open(options)?))
}

const ENGINES: [EngineKind; 3] = [EngineKind::Memory, EngineKind::Sled, EngineKind::Json];

/// Registry of handler constructors
///
/// Closed for registration once the first handler has been opened.
pub struct HandlerRegistry {
    constructors: RwLock<HashMap<(HandlerClass, EngineKind), HandlerConstructor>>,
    sealed: AtomicBool,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            constructors: RwLock::new(HashMap::new()),
            sealed: AtomicBool::new(false),
        }
    }

    /// Every built-in handler class bound to every built-in engine
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        let classes: [(HandlerClass, HandlerConstructor); 3] = [
            (HandlerClass::Meta, open_meta),
            (HandlerClass::Annotation, open_annotation),
            (HandlerClass::DatabaseId, open_database_index),
        ];
        {
            let mut constructors = registry.constructors.write();
            for (class, constructor) in classes {
                for engine in ENGINES {
                    constructors.insert((class, engine), constructor);
                }
            }
        }
        registry
    }

    pub fn global() -> Arc<HandlerRegistry> {
        static GLOBAL: OnceLock<Arc<HandlerRegistry>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| Arc::new(HandlerRegistry::with_builtins()))
            .clone()
    }

    pub fn register(
        &self,
        class: HandlerClass,
        engine: EngineKind,
        constructor: HandlerConstructor,
    ) -> Result<(), ApiError> {
        if self.sealed.load(Ordering::Acquire) {
            return Err(ApiError::RegistrationClosed(format!(
                "handler {}/{} registered after first use",
                class, engine
            )));
        }
        debug!(class = %class, engine = %engine, "Registering handler");
        self.constructors.write().insert((class, engine), constructor);
        Ok(())
    }

    /// Open a handler, resolving the engine from options, environment and configuration
    pub fn open(&self, class: HandlerClass, options: &HandlerOptions) -> Result<Box<dyn Handler>, ApiError> {
        self.sealed.store(true, Ordering::Release);
        let engine = options.resolved_engine(class)?;
        let constructor = self
            .constructors
            .read()
            .get(&(class, engine))
            .copied()
            .ok_or_else(|| {
                ApiError::InvalidArgument(format!("no {} handler for the {} engine", class, engine))
            })?;
        constructor(options)
    }

    /// Registered `(class, engine)` pairs, sorted
    pub fn supported(&self) -> Vec<(HandlerClass, EngineKind)> {
        let mut keys: Vec<_> = self.constructors.read().keys().copied().collect();
        keys.sort_by_key(|(class, engine)| (*class, engine.as_str()));
        keys
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Open a handler through the process-wide registry
pub fn open_handler(class: HandlerClass, options: &HandlerOptions) -> Result<Box<dyn Handler>, ApiError> {
    HandlerRegistry::global().open(class, options)
}
