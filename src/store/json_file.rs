//! File-backed engine without query support
//!
//! Every collection lives in one JSON file as `{collection: {uuid: document}}`.
//! The file is re-read on every operation and rewritten atomically on every
//! write. Reads always return the whole collection; the adapter filters,
//! groups and pages in memory.

use crate::error::StorageError;
use crate::store::{uuid_of, Capabilities, EngineKind, ReadRequest, ReadResult, StorageEngine};
use crate::types::Document;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

type Tables = Map<String, Value>;

/// Single-file JSON document engine
pub struct JsonFileEngine {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileEngine {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Tables, StorageError> {
        if !self.path.exists() {
            return Ok(Tables::new());
        }
        let bytes = fs::read(&self.path)?;
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Tables::new());
        }
        match serde_json::from_slice::<Value>(&bytes)? {
            Value::Object(tables) => Ok(tables),
            _ => Err(StorageError::Backend(format!(
                "{} does not hold a collection mapping",
                self.path.display()
            ))),
        }
    }

    /// Write via a temporary file and rename
    fn store(&self, tables: &Tables) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, serde_json::to_vec_pretty(tables)?)?;
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }

    fn with_tables<T>(
        &self,
        mutate: impl FnOnce(&mut Tables) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let _guard = self.lock.lock();
        let mut tables = self.load()?;
        let out = mutate(&mut tables)?;
        self.store(&tables)?;
        Ok(out)
    }
}

impl StorageEngine for JsonFileEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Json
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            native_query: false,
            native_aggregation: false,
        }
    }

    fn create_table(&self, name: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock();
        let mut tables = self.load()?;
        if !tables.contains_key(name) {
            tables.insert(name.to_string(), Value::Object(Map::new()));
            self.store(&tables)?;
        }
        Ok(())
    }

    fn read(&self, name: &str, _request: &ReadRequest) -> Result<ReadResult, StorageError> {
        let _guard = self.lock.lock();
        let tables = self.load()?;
        let documents: Vec<Document> = match tables.get(name) {
            Some(Value::Object(rows)) => rows
                .values()
                .filter_map(|v| v.as_object().cloned())
                .collect(),
            _ => Vec::new(),
        };
        let count_total = Some(documents.len());
        Ok(ReadResult {
            documents,
            count_total,
        })
    }

    fn upsert(&self, name: &str, documents: &[Document]) -> Result<(), StorageError> {
        self.with_tables(|tables| {
            let entry = tables
                .entry(name.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            if let Value::Object(rows) = entry {
                for document in documents {
                    rows.insert(uuid_of(document)?, Value::Object(document.clone()));
                }
            }
            Ok(())
        })
    }

    fn remove(&self, name: &str, uuids: &[String]) -> Result<(), StorageError> {
        self.with_tables(|tables| {
            if let Some(Value::Object(rows)) = tables.get_mut(name) {
                let kept: Map<String, Value> = rows
                    .iter()
                    .filter(|(uuid, _)| !uuids.contains(uuid))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                *rows = kept;
            }
            Ok(())
        })
    }

    fn drop_table(&self, name: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock();
        let mut tables = self.load()?;
        if tables.contains_key(name) {
            let kept: Tables = tables
                .into_iter()
                .filter(|(k, _)| k != name)
                .collect();
            tables = kept;
            self.store(&tables)?;
        }
        Ok(())
    }

    fn exist_table(&self, name: &str) -> Result<bool, StorageError> {
        let _guard = self.lock.lock();
        Ok(self.load()?.contains_key(name))
    }
}
