//! Sled-backed document engine
//!
//! Each collection is a sled tree. Documents are stored as JSON keyed by
//! their `_uuid`.

use crate::error::StorageError;
use crate::store::{
    pipeline, uuid_of, Capabilities, EngineKind, ReadRequest, ReadResult, StorageEngine,
};
use crate::types::Document;
use std::path::Path;

fn sled_error(context: &str, err: sled::Error) -> StorageError {
    StorageError::IoError(std::io::Error::new(
        std::io::ErrorKind::Other,
        format!("{}: {}", context, err),
    ))
}

/// Sled-based implementation of StorageEngine
pub struct SledEngine {
    db: sled::Db,
}

impl SledEngine {
    /// Open a sled database at the given directory
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path).map_err(|e| sled_error("Failed to open sled database", e))?;
        Ok(Self { db })
    }

    /// Get the underlying sled database (for advanced operations)
    pub fn db(&self) -> &sled::Db {
        &self.db
    }

    fn has_tree(&self, name: &str) -> bool {
        self.db
            .tree_names()
            .iter()
            .any(|n| n.as_ref() == name.as_bytes())
    }

    fn scan(&self, name: &str) -> Result<Vec<Document>, StorageError> {
        if !self.has_tree(name) {
            return Ok(Vec::new());
        }
        let tree = self
            .db
            .open_tree(name)
            .map_err(|e| sled_error("Failed to open collection", e))?;
        let mut documents = Vec::with_capacity(tree.len());
        for entry in tree.iter() {
            let (_, value) = entry.map_err(|e| sled_error("Failed to iterate collection", e))?;
            documents.push(serde_json::from_slice::<Document>(&value)?);
        }
        Ok(documents)
    }
}

impl StorageEngine for SledEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Sled
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            native_query: true,
            native_aggregation: true,
        }
    }

    fn create_table(&self, name: &str) -> Result<(), StorageError> {
        self.db
            .open_tree(name)
            .map_err(|e| sled_error("Failed to create collection", e))?;
        Ok(())
    }

    fn read(&self, name: &str, request: &ReadRequest) -> Result<ReadResult, StorageError> {
        Ok(pipeline::execute(self.scan(name)?, request))
    }

    fn upsert(&self, name: &str, documents: &[Document]) -> Result<(), StorageError> {
        let tree = self
            .db
            .open_tree(name)
            .map_err(|e| sled_error("Failed to open collection", e))?;
        let mut batch = sled::Batch::default();
        for document in documents {
            let key = uuid_of(document)?;
            batch.insert(key.as_bytes(), serde_json::to_vec(document)?);
        }
        tree.apply_batch(batch)
            .map_err(|e| sled_error("Failed to upsert documents", e))?;
        tree.flush()
            .map_err(|e| sled_error("Failed to flush collection", e))?;
        Ok(())
    }

    fn remove(&self, name: &str, uuids: &[String]) -> Result<(), StorageError> {
        if !self.has_tree(name) {
            return Ok(());
        }
        let tree = self
            .db
            .open_tree(name)
            .map_err(|e| sled_error("Failed to open collection", e))?;
        let mut batch = sled::Batch::default();
        for uuid in uuids {
            batch.remove(uuid.as_bytes());
        }
        tree.apply_batch(batch)
            .map_err(|e| sled_error("Failed to remove documents", e))?;
        tree.flush()
            .map_err(|e| sled_error("Failed to flush collection", e))?;
        Ok(())
    }

    fn drop_table(&self, name: &str) -> Result<(), StorageError> {
        self.db
            .drop_tree(name)
            .map_err(|e| sled_error("Failed to drop collection", e))?;
        Ok(())
    }

    fn exist_table(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.has_tree(name))
    }
}
