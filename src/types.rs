//! Core types shared by the catalogue, the storage adapter and the model layer.

use serde_json::{Map, Value};

/// An open mapping from string keys to JSON values
pub type Document = Map<String, Value>;

/// Content-derived identifier of a persisted document
pub const UUID_KEY: &str = "_uuid";
/// Epoch seconds at which a document was first inserted
pub const CREATION_TIME_KEY: &str = "_creation_time";
/// Schema namespace and version
pub const API_VERSION_KEY: &str = "_api_version";
/// Schema kind (also used by the catalogue to tag records and files)
pub const KIND_KEY: &str = "_kind";
/// UUID of the parent record of a file document
pub const RECORD_KEY: &str = "_record";

/// Reserved fields stripped from documents handed to callers
pub const RESERVED_FIELDS: [&str; 2] = [UUID_KEY, CREATION_TIME_KEY];

/// Remove the reserved bookkeeping fields from a document
pub fn strip_reserved(mut document: Document) -> Document {
    for key in RESERVED_FIELDS {
        document.remove(key);
    }
    document
}

/// Resolve a dotted path such as `contents.camera/front.tags` against a document
///
/// Only mapping levels are traversed; use the query engine for array-aware lookups.
pub fn get_path<'a>(document: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut current = document.get(first)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Flatten nested mappings into dot-joined keys
///
/// Non-mapping values, and empty mappings, are emitted unchanged under their key.
pub fn flatten_value(prefix: &str, value: &Value, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                let name = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten_value(&name, child, out);
            }
        }
        other => out.push((prefix.to_string(), other.clone())),
    }
}

/// Flatten a whole document into dot-joined keys
pub fn flatten_document(document: &Document) -> Document {
    let mut pairs = Vec::new();
    for (key, value) in document {
        flatten_value(key, value, &mut pairs);
    }
    pairs.into_iter().collect()
}

/// Current time as epoch seconds
pub fn now_epoch_seconds() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_strip_reserved() {
        let d = doc(json!({"_uuid": "x", "_creation_time": 1.0, "_kind": "file", "a": 1}));
        let stripped = strip_reserved(d);
        assert!(!stripped.contains_key("_uuid"));
        assert!(!stripped.contains_key("_creation_time"));
        assert!(stripped.contains_key("_kind"));
    }

    #[test]
    fn test_get_path_nested() {
        let d = doc(json!({"contents": {"camera/front": {"fps": 10}}}));
        assert_eq!(get_path(&d, "contents.camera/front.fps"), Some(&json!(10)));
        assert_eq!(get_path(&d, "contents.missing"), None);
    }

    #[test]
    fn test_flatten_document() {
        let d = doc(json!({"a": {"b": {"c": 1}, "d": []}, "e": "x", "f": {}}));
        let flat = flatten_document(&d);
        let keys: Vec<_> = flat.keys().cloned().collect();
        assert_eq!(keys, vec!["a.b.c", "a.d", "e", "f"]);
    }
}
