//! In-memory catalogue state shared by every handler
//!
//! A [`HandlerCore`] owns the documents loaded by the last `read`, the column
//! configuration, and the dirty sets flushed by `save`. Only `read` and `save`
//! touch the backend; everything else mutates memory.

use crate::catalog::config_doc::{coerce, CollectionConfig, ColumnSpec};
use crate::catalog::merge::{merge_documents, MergeStrategy};
use crate::catalog::uuid::{config_collection_name, derive_uuid, CONFIG_UUID};
use crate::error::ApiError;
use crate::schema::SchemaRegistry;
use crate::store::{connect, Aggregation, Collection, ConnectionParams, ReadOptions};
use crate::types::{now_epoch_seconds, Document, CREATION_TIME_KEY, UUID_KEY};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Options for a single insertion
#[derive(Debug, Clone, Copy, Default)]
pub struct AddOptions {
    pub strategy: MergeStrategy,
    /// Store values as given instead of coercing them to the column dtype
    pub ignore_dtype_mismatch: bool,
}

impl AddOptions {
    pub fn merge() -> Self {
        Self {
            strategy: MergeStrategy::Merge,
            ..Self::default()
        }
    }
}

/// Documents keyed by `_uuid`, in insertion order
#[derive(Debug, Clone, Default)]
pub struct DocumentBuffer {
    documents: Vec<Document>,
    positions: HashMap<String, usize>,
}

impl DocumentBuffer {
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn at(&self, index: usize) -> Option<&Document> {
        self.documents.get(index)
    }

    pub fn get(&self, uuid: &str) -> Option<&Document> {
        self.positions.get(uuid).map(|&i| &self.documents[i])
    }

    pub fn contains(&self, uuid: &str) -> bool {
        self.positions.contains_key(uuid)
    }

    /// Replace in place, or append when the UUID is new
    pub fn insert(&mut self, uuid: String, document: Document) {
        match self.positions.get(&uuid) {
            Some(&i) => self.documents[i] = document,
            None => {
                self.positions.insert(uuid, self.documents.len());
                self.documents.push(document);
            }
        }
    }

    pub fn remove(&mut self, uuid: &str) -> Option<Document> {
        let index = self.positions.remove(uuid)?;
        let removed = self.documents.remove(index);
        for position in self.positions.values_mut() {
            if *position > index {
                *position -= 1;
            }
        }
        Some(removed)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Document> {
        self.documents.iter()
    }
}

/// Backend handles, configuration and dirty state of one collection
pub struct HandlerCore {
    collection: Collection,
    config_collection: Collection,
    config: CollectionConfig,
    schemas: Arc<SchemaRegistry>,
    documents: DocumentBuffer,
    to_upsert: HashSet<String>,
    to_remove: Vec<String>,
    tables_to_drop: Vec<String>,
    count_total: Option<usize>,
}

impl std::fmt::Debug for HandlerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerCore")
            .field("collection", &self.collection)
            .field("documents", &self.documents.len())
            .field("to_upsert", &self.to_upsert.len())
            .field("to_remove", &self.to_remove.len())
            .field("tables_to_drop", &self.tables_to_drop)
            .finish()
    }
}

impl HandlerCore {
    /// Connect to a collection and its configuration sibling
    ///
    /// A configuration already stored in the backend replaces `defaults`; if
    /// it cannot be loaded the defaults are kept and a warning is logged.
    pub fn connect(
        params: &ConnectionParams,
        name: &str,
        defaults: CollectionConfig,
        schemas: Arc<SchemaRegistry>,
    ) -> Result<Self, ApiError> {
        let collection = connect(params, name)?;
        let config_collection = connect(params, &config_collection_name(name))?;
        let mut core = Self {
            collection,
            config_collection,
            config: defaults,
            schemas,
            documents: DocumentBuffer::default(),
            to_upsert: HashSet::new(),
            to_remove: Vec::new(),
            tables_to_drop: Vec::new(),
            count_total: None,
        };
        match core.load_config() {
            Ok(Some(config)) => core.config = config,
            Ok(None) => {}
            Err(e) => warn!(collection = %name, error = %e, "Failed to load config from database"),
        }
        debug!(collection = %name, engine = %params.engine, "Handler connected");
        Ok(core)
    }

    fn load_config(&self) -> Result<Option<CollectionConfig>, ApiError> {
        let result = self
            .config_collection
            .read(&ReadOptions::new(), HashMap::new())?;
        result
            .documents
            .into_iter()
            .find(|d| d.get(UUID_KEY).and_then(Value::as_str) == Some(CONFIG_UUID))
            .map(CollectionConfig::from_document)
            .transpose()
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    pub fn collection_name(&self) -> &str {
        self.collection.name()
    }

    pub fn config(&self) -> &CollectionConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut CollectionConfig {
        &mut self.config
    }

    pub fn schemas(&self) -> &Arc<SchemaRegistry> {
        &self.schemas
    }

    pub fn documents(&self) -> &DocumentBuffer {
        &self.documents
    }

    pub fn count_total(&self) -> Option<usize> {
        self.count_total
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Whether there are changes not yet saved
    pub fn is_dirty(&self) -> bool {
        !self.to_upsert.is_empty() || !self.to_remove.is_empty() || !self.tables_to_drop.is_empty()
    }

    /// Derive the `_uuid` a document would be stored under
    pub fn uuid_for(&self, document: &Document) -> Result<String, ApiError> {
        if let Some(uuid) = document.get(UUID_KEY).and_then(Value::as_str) {
            return Ok(uuid.to_string());
        }
        let index_columns = self.config.index_columns();
        if index_columns.is_empty() {
            return Err(ApiError::InvalidDatabaseConfig(format!(
                "collection '{}' has no index_columns",
                self.collection_name()
            )));
        }
        if !index_columns.iter().any(|c| document.contains_key(c)) {
            return Err(ApiError::InvalidDatabaseConfig(format!(
                "document has none of the index columns {:?}",
                index_columns
            )));
        }
        Ok(derive_uuid(document, index_columns))
    }

    /// Insert a document into memory
    ///
    /// Validation happens before anything is changed, so a rejected document
    /// leaves the buffer and the configuration untouched.
    pub fn add_data(&mut self, document: Document, options: AddOptions) -> Result<String, ApiError> {
        self.schemas.validate(&document)?;

        let mut document = document;
        let uuid = self.uuid_for(&document)?;
        document.insert(UUID_KEY.to_string(), Value::String(uuid.clone()));

        let existing_time = self
            .documents
            .get(&uuid)
            .and_then(|d| d.get(CREATION_TIME_KEY))
            .cloned();
        if !document.contains_key(CREATION_TIME_KEY) {
            let time = existing_time.unwrap_or_else(|| Value::from(now_epoch_seconds()));
            document.insert(CREATION_TIME_KEY.to_string(), time);
        }

        self.discover_columns(&document);
        if !options.ignore_dtype_mismatch {
            self.coerce_document(&mut document, false);
        }

        let document = match (options.strategy, self.documents.get(&uuid)) {
            (MergeStrategy::Merge, Some(base)) => {
                let mut merged = base.clone();
                let creation_time = merged.get(CREATION_TIME_KEY).cloned();
                merge_documents(&mut merged, document);
                if let Some(time) = creation_time {
                    merged.insert(CREATION_TIME_KEY.to_string(), time);
                }
                merged
            }
            _ => document,
        };

        self.documents.insert(uuid.clone(), document);
        self.to_remove.retain(|u| u != &uuid);
        self.to_upsert.insert(uuid.clone());
        Ok(uuid)
    }

    /// Drop a document from memory and queue its deletion
    pub fn remove_data(&mut self, document: &Document) -> Result<String, ApiError> {
        let uuid = self.uuid_for(document)?;
        self.documents.remove(&uuid);
        self.to_upsert.remove(&uuid);
        if !self.to_remove.contains(&uuid) {
            self.to_remove.push(uuid.clone());
        }
        Ok(uuid)
    }

    /// Append a column for every key the configuration has not seen
    fn discover_columns(&mut self, document: &Document) {
        for (key, value) in document {
            if key == UUID_KEY || key == CREATION_TIME_KEY {
                continue;
            }
            if self.config.add_column(ColumnSpec::inferred(key, value)) {
                debug!(collection = %self.collection_name(), column = %key, "New column");
            }
        }
    }

    /// Coerce configured columns in place; failures become null
    ///
    /// With `grouped`, columns aggregated with `push` hold one value per
    /// group member and are coerced element-wise.
    fn coerce_document(&self, document: &mut Document, grouped: bool) {
        for (key, value) in document.iter_mut() {
            let Some(column) = self.config.column(key) else {
                continue;
            };
            let listwise = grouped && column.aggregation == Aggregation::Push;
            let coerced = match (&*value, listwise) {
                (Value::Array(items), true) => items
                    .iter()
                    .map(|item| coerce(item, &column.dtype))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array),
                _ => coerce(value, &column.dtype),
            };
            match coerced {
                Ok(v) => *value = v,
                Err(message) => {
                    warn!(
                        column = %key,
                        dtype = %column.dtype,
                        error = %message,
                        "Dtype coercion failed, storing null"
                    );
                    *value = Value::Null;
                }
            }
        }
    }

    /// Replace the in-memory documents with a backend read
    ///
    /// The stored configuration is reloaded first. On failure nothing changes.
    pub fn read(&mut self, options: &ReadOptions) -> Result<(), ApiError> {
        let config = self.load_config()?.unwrap_or_else(|| self.config.clone());
        let result = self.collection.read(options, config.aggregations())?;

        let previous = std::mem::replace(&mut self.config, config);
        let grouped = options.group_by.is_some();
        let mut buffer = DocumentBuffer::default();
        for mut document in result.documents {
            self.coerce_document(&mut document, grouped);
            let uuid = match document.get(UUID_KEY).and_then(Value::as_str) {
                Some(uuid) => uuid.to_string(),
                None => match self.uuid_for(&document) {
                    Ok(uuid) => uuid,
                    Err(e) => {
                        self.config = previous;
                        return Err(e);
                    }
                },
            };
            buffer.insert(uuid, document);
        }

        self.documents = buffer;
        self.count_total = result.count_total;
        self.to_upsert.clear();
        self.to_remove.clear();
        debug!(
            collection = %self.collection_name(),
            documents = self.documents.len(),
            count_total = ?self.count_total,
            "Read"
        );
        Ok(())
    }

    /// Flush removals, drops, upserts and the configuration, in that order
    ///
    /// Dirty sets are cleared only when every step succeeds.
    pub fn save(&mut self) -> Result<(), ApiError> {
        self.collection.remove(&self.to_remove)?;
        for table in &self.tables_to_drop {
            self.collection.drop_table(table)?;
            debug!(table = %table, "Dropped table");
        }
        let dirty: Vec<Document> = self
            .documents
            .iter()
            .filter(|d| {
                d.get(UUID_KEY)
                    .and_then(Value::as_str)
                    .map(|u| self.to_upsert.contains(u))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        self.collection.upsert(&dirty)?;
        self.config_collection.upsert(&[self.config.to_document()])?;

        debug!(
            collection = %self.collection_name(),
            upserted = dirty.len(),
            removed = self.to_remove.len(),
            dropped = self.tables_to_drop.len(),
            "Saved"
        );
        self.to_upsert.clear();
        self.to_remove.clear();
        self.tables_to_drop.clear();
        Ok(())
    }

    /// Queue a table drop for the next save, with its configuration sibling
    pub fn drop_table(&mut self, name: &str) -> Result<(), ApiError> {
        let paired = config_collection_name(name);
        for table in [name.to_string(), paired] {
            if table != name && !self.collection.exist_table(&table)? {
                continue;
            }
            if !self.tables_to_drop.contains(&table) {
                self.tables_to_drop.push(table);
            }
        }
        Ok(())
    }

    pub fn exist_table(&self, name: &str) -> Result<bool, ApiError> {
        Ok(self.collection.exist_table(name)?)
    }

    /// Force one aggregation onto every configured column
    pub fn set_all_aggregations(&mut self, aggregation: Aggregation) {
        self.config.set_all_aggregations(aggregation);
    }
}
