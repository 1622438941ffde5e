//! Schema registry
//!
//! Maps `(api_version, kind)` pairs to document validators. Documents that carry
//! both `_api_version` and `_kind` are checked against the matching validator
//! before the catalogue accepts them.
//!
//! The process-wide registry is populated by [`init`]. Registration is closed
//! after the first lookup; tests and embedders that need custom schemas build
//! their own [`SchemaRegistry`] and hand it to the catalogue.

pub mod builtin;
pub mod field;

pub use field::{Extra, FieldSpec, FieldType, ObjectShape};

use crate::error::ApiError;
use crate::types::{Document, API_VERSION_KEY, KIND_KEY};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// A document validator registered under an `(api_version, kind)` pair
pub trait Validator: Send + Sync {
    fn api_version(&self) -> &str;
    fn kind(&self) -> &str;

    /// Check a document, returning every violation found
    fn validate(&self, document: &Document) -> Result<(), Vec<String>>;
}

/// Declarative schema backed by an object shape
#[derive(Debug, Clone)]
pub struct Schema {
    api_version: String,
    kind: String,
    shape: ObjectShape,
}

impl Schema {
    pub fn new(api_version: &str, kind: &str, shape: ObjectShape) -> Self {
        Self {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            shape,
        }
    }

    pub fn shape(&self) -> &ObjectShape {
        &self.shape
    }
}

impl Validator for Schema {
    fn api_version(&self) -> &str {
        &self.api_version
    }

    fn kind(&self) -> &str {
        &self.kind
    }

    fn validate(&self, document: &Document) -> Result<(), Vec<String>> {
        let mut violations = Vec::new();
        self.shape.check_map("", document, &mut violations);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}

type SchemaKey = (String, String);

fn schema_key(api_version: &str, kind: &str) -> SchemaKey {
    (api_version.to_lowercase(), kind.to_lowercase())
}

/// Registry of validators keyed by lowercase `(api_version, kind)`
pub struct SchemaRegistry {
    schemas: RwLock<HashMap<SchemaKey, Arc<dyn Validator>>>,
    sealed: AtomicBool,
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("schemas", &self.schemas.read().keys().collect::<Vec<_>>())
            .field("sealed", &self.sealed.load(Ordering::SeqCst))
            .finish()
    }
}

impl SchemaRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            schemas: RwLock::new(HashMap::new()),
            sealed: AtomicBool::new(false),
        }
    }

    /// Create a registry holding the built-in schemas
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        for schema in builtin::builtin_schemas() {
            // A fresh registry is never sealed
            let _ = registry.register(Arc::new(schema));
        }
        registry
    }

    /// The process-wide registry
    pub fn global() -> Arc<SchemaRegistry> {
        static GLOBAL: OnceLock<Arc<SchemaRegistry>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| Arc::new(SchemaRegistry::with_builtins()))
            .clone()
    }

    /// Register a validator
    ///
    /// Fails once any lookup has been served.
    pub fn register(&self, validator: Arc<dyn Validator>) -> Result<(), ApiError> {
        if self.sealed.load(Ordering::Acquire) {
            return Err(ApiError::RegistrationClosed(format!(
                "schema {}/{} registered after first lookup",
                validator.api_version(),
                validator.kind()
            )));
        }
        let key = schema_key(validator.api_version(), validator.kind());
        debug!(api_version = %key.0, kind = %key.1, "Registering schema");
        self.schemas.write().insert(key, validator);
        Ok(())
    }

    /// Look up a validator
    pub fn get(&self, api_version: &str, kind: &str) -> Result<Arc<dyn Validator>, ApiError> {
        self.sealed.store(true, Ordering::Release);
        self.schemas
            .read()
            .get(&schema_key(api_version, kind))
            .cloned()
            .ok_or_else(|| ApiError::SchemaNotFound {
                api_version: api_version.to_string(),
                kind: kind.to_string(),
            })
    }

    /// Validate a document if it declares both `_api_version` and `_kind`
    ///
    /// Documents without a schema declaration pass unchecked.
    pub fn validate(&self, document: &Document) -> Result<(), ApiError> {
        let (Some(api_version), Some(kind)) = (
            document.get(API_VERSION_KEY).and_then(|v| v.as_str()),
            document.get(KIND_KEY).and_then(|v| v.as_str()),
        ) else {
            return Ok(());
        };
        let validator = self.get(api_version, kind)?;
        validator
            .validate(document)
            .map_err(|violations| ApiError::SchemaViolation {
                kind: kind.to_string(),
                violations,
            })
    }

    /// Registered `(api_version, kind)` pairs, sorted
    pub fn list(&self) -> Vec<(String, String)> {
        let mut keys: Vec<_> = self.schemas.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Populate the process-wide registry
///
/// Safe to call more than once.
pub fn init() -> Arc<SchemaRegistry> {
    SchemaRegistry::global()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let registry = SchemaRegistry::with_builtins();
        assert!(registry.get("RDTK.dev/V1ALPHA2", "file").is_ok());
        assert!(registry.get(builtin::V1ALPHA2, "File").is_ok());
    }

    #[test]
    fn test_unknown_schema() {
        let registry = SchemaRegistry::with_builtins();
        let err = registry
            .validate(&doc(json!({"_api_version": "nope/v0", "_kind": "File"})))
            .unwrap_err();
        assert!(matches!(err, ApiError::SchemaNotFound { .. }));
    }

    #[test]
    fn test_registration_closes_after_lookup() {
        let registry = SchemaRegistry::new();
        let schema = Schema::new("ns/v1", "Thing", ObjectShape::open(vec![]));
        registry.register(Arc::new(schema.clone())).unwrap();
        assert!(!registry.is_sealed());
        registry.get("ns/v1", "Thing").unwrap();
        let err = registry.register(Arc::new(schema)).unwrap_err();
        assert!(matches!(err, ApiError::RegistrationClosed(_)));
    }

    #[test]
    fn test_documents_without_declaration_pass() {
        let registry = SchemaRegistry::new();
        assert!(registry.validate(&doc(json!({"anything": 1}))).is_ok());
        assert!(registry.validate(&doc(json!({"_kind": "file"}))).is_ok());
    }

    #[test]
    fn test_file_schema_requires_path() {
        let registry = SchemaRegistry::with_builtins();
        let err = registry
            .validate(&doc(json!({
                "_api_version": builtin::V1ALPHA2,
                "_kind": "File",
                "record_id": "r1"
            })))
            .unwrap_err();
        match err {
            ApiError::SchemaViolation { violations, .. } => {
                assert_eq!(violations, vec!["path: field required".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
