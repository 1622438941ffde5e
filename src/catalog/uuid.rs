//! Content-derived identifiers and hashed collection names.

use crate::error::ApiError;
use crate::types::Document;
use blake2::digest::{Update, VariableOutput};
use blake2::Blake2sVar;
use md5::{Digest, Md5};
use serde_json::Value;

/// `_uuid` of the single document in a configuration collection
pub const CONFIG_UUID: &str = "__config__";

/// Prefix of the sibling collection holding a collection's configuration
pub const CONFIG_PREFIX: &str = "--config--";

/// Name of the configuration collection paired with `name`
pub fn config_collection_name(name: &str) -> String {
    format!("{}{}", CONFIG_PREFIX, name)
}

/// String form of one indexed value
///
/// Floats carry nine fractional digits; mappings contribute their key list.
pub fn uuid_fragment(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) if n.is_f64() => format!("{:.9}", n.as_f64().unwrap_or(f64::NAN)),
        Value::Object(map) => {
            let keys: Vec<String> = map.keys().map(|k| py_quote(k)).collect();
            format!("dict_keys([{}])", keys.join(", "))
        }
        other => py_repr(other),
    }
}

fn py_quote(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn py_repr(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => py_quote(s),
        Value::Array(items) => format!(
            "[{}]",
            items.iter().map(py_repr).collect::<Vec<_>>().join(", ")
        ),
        Value::Object(map) => format!(
            "{{{}}}",
            map.iter()
                .map(|(k, v)| format!("{}: {}", py_quote(k), py_repr(v)))
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

/// Derive the `_uuid` of a document from its index columns
///
/// Absent columns contribute the empty string.
pub fn derive_uuid(document: &Document, index_columns: &[String]) -> String {
    let mut hasher = Md5::new();
    for column in index_columns {
        if let Some(value) = document.get(column) {
            Digest::update(&mut hasher, uuid_fragment(value).as_bytes());
        }
    }
    hex::encode(hasher.finalize())
}

/// Short BLAKE2s digest of a database ID, hex encoded
pub fn hash_database_id(database_id: &str, digest_size: usize) -> Result<String, ApiError> {
    let mut hasher = Blake2sVar::new(digest_size).map_err(|_| {
        ApiError::InvalidDatabaseConfig(format!(
            "digest size must be between 1 and 32 bytes, got {}",
            digest_size
        ))
    })?;
    hasher.update(database_id.as_bytes());
    let mut digest = vec![0u8; digest_size];
    hasher
        .finalize_variable(&mut digest)
        .map_err(|e| ApiError::InvalidDatabaseConfig(format!("digest failed: {}", e)))?;
    Ok(hex::encode(digest))
}

/// Substitute the hashed database ID into a collection name template
pub fn collection_name(
    template: &str,
    database_id: &str,
    digest_size: usize,
) -> Result<String, ApiError> {
    let hashed = hash_database_id(database_id, digest_size)?;
    Ok(template.replace("{database_id}", &hashed))
}
