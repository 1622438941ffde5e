//! Deep merge of documents sharing a `_uuid`.

use crate::types::Document;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// How an insertion treats an in-memory document with the same `_uuid`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    #[default]
    Overwrite,
    Merge,
}

/// Merge `incoming` into `base`
///
/// Mappings merge key by key, lists append the incoming items absent from the
/// base (keeping base order), and anything else is overridden.
pub fn deep_merge(base: &mut Value, incoming: Value) {
    match (base, incoming) {
        (Value::Object(base_map), Value::Object(incoming_map)) => {
            merge_documents(base_map, incoming_map);
        }
        (Value::Array(base_items), Value::Array(incoming_items)) => {
            for item in incoming_items {
                if !base_items.contains(&item) {
                    base_items.push(item);
                }
            }
        }
        (base, incoming) => *base = incoming,
    }
}

/// Merge one document into another with [`deep_merge`] semantics per key
pub fn merge_documents(base: &mut Document, incoming: Document) {
    for (key, value) in incoming {
        match base.get_mut(&key) {
            Some(existing) => deep_merge(existing, value),
            None => {
                base.insert(key, value);
            }
        }
    }
}
