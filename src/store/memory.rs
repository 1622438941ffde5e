//! In-process document engine.

use crate::error::StorageError;
use crate::store::{
    pipeline, uuid_of, Capabilities, EngineKind, ReadRequest, ReadResult, StorageEngine,
};
use crate::types::Document;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Documents in insertion order with a UUID index
#[derive(Debug, Default, Clone)]
pub(crate) struct Table {
    documents: Vec<Document>,
    index: HashMap<String, usize>,
}

impl Table {
    pub(crate) fn upsert(&mut self, document: Document) -> Result<(), StorageError> {
        let uuid = uuid_of(&document)?;
        match self.index.get(&uuid) {
            Some(&position) => self.documents[position] = document,
            None => {
                self.index.insert(uuid, self.documents.len());
                self.documents.push(document);
            }
        }
        Ok(())
    }

    pub(crate) fn remove(&mut self, uuids: &[String]) {
        let before = self.documents.len();
        self.documents.retain(|d| match uuid_of(d) {
            Ok(uuid) => !uuids.contains(&uuid),
            Err(_) => true,
        });
        if self.documents.len() != before {
            self.reindex();
        }
    }

    fn reindex(&mut self) {
        self.index = self
            .documents
            .iter()
            .enumerate()
            .filter_map(|(i, d)| uuid_of(d).ok().map(|u| (u, i)))
            .collect();
    }

    pub(crate) fn documents(&self) -> &[Document] {
        &self.documents
    }
}

/// Engine keeping every collection in memory
///
/// Shared per location through the adapter's engine cache, so separate
/// handlers in one process see the same collections.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    tables: RwLock<HashMap<String, Table>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageEngine for MemoryEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Memory
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            native_query: true,
            native_aggregation: true,
        }
    }

    fn create_table(&self, name: &str) -> Result<(), StorageError> {
        self.tables.write().entry(name.to_string()).or_default();
        Ok(())
    }

    fn read(&self, name: &str, request: &ReadRequest) -> Result<ReadResult, StorageError> {
        let documents = self
            .tables
            .read()
            .get(name)
            .map(|t| t.documents().to_vec())
            .unwrap_or_default();
        Ok(pipeline::execute(documents, request))
    }

    fn upsert(&self, name: &str, documents: &[Document]) -> Result<(), StorageError> {
        let mut tables = self.tables.write();
        let table = tables.entry(name.to_string()).or_default();
        for document in documents {
            table.upsert(document.clone())?;
        }
        Ok(())
    }

    fn remove(&self, name: &str, uuids: &[String]) -> Result<(), StorageError> {
        if let Some(table) = self.tables.write().get_mut(name) {
            table.remove(uuids);
        }
        Ok(())
    }

    fn drop_table(&self, name: &str) -> Result<(), StorageError> {
        self.tables.write().remove(name);
        Ok(())
    }

    fn exist_table(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.tables.read().contains_key(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let engine = MemoryEngine::new();
        engine
            .upsert("t", &[doc(json!({"_uuid": "a", "v": 1})), doc(json!({"_uuid": "b"}))])
            .unwrap();
        engine.upsert("t", &[doc(json!({"_uuid": "a", "v": 2}))]).unwrap();
        let result = engine.read("t", &ReadRequest::scan()).unwrap();
        assert_eq!(result.count_total, Some(2));
        assert_eq!(result.documents[0]["v"], json!(2));
    }

    #[test]
    fn test_remove_and_drop() {
        let engine = MemoryEngine::new();
        engine
            .upsert("t", &[doc(json!({"_uuid": "a"})), doc(json!({"_uuid": "b"}))])
            .unwrap();
        engine.remove("t", &["a".to_string()]).unwrap();
        let result = engine.read("t", &ReadRequest::scan()).unwrap();
        assert_eq!(result.documents, vec![doc(json!({"_uuid": "b"}))]);

        // Index stays consistent after removal
        engine.upsert("t", &[doc(json!({"_uuid": "b", "x": 1}))]).unwrap();
        assert_eq!(engine.read("t", &ReadRequest::scan()).unwrap().documents.len(), 1);

        assert!(engine.exist_table("t").unwrap());
        engine.drop_table("t").unwrap();
        engine.drop_table("t").unwrap();
        assert!(!engine.exist_table("t").unwrap());
    }

    #[test]
    fn test_upsert_requires_uuid() {
        let engine = MemoryEngine::new();
        assert!(matches!(
            engine.upsert("t", &[doc(json!({"v": 1}))]),
            Err(StorageError::MissingUuid)
        ));
    }
}
