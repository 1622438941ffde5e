//! File and record metadata catalogue
//!
//! Rows are orient-expanded: a document whose orient value is a list or a
//! mapping contributes one row per entry, and each row exposes only its own
//! entry. Paths are stored relative to `base_dir` and handed out absolute.

use crate::catalog::base::{AddOptions, HandlerCore};
use crate::catalog::config_doc::ColumnSpec;
use crate::catalog::database_index::DatabaseIndexHandler;
use crate::catalog::table::TableView;
use crate::catalog::uuid::{collection_name, derive_uuid};
use crate::catalog::{collection_config, Handler, HandlerClass, HandlerOptions};
use crate::error::ApiError;
use crate::store::{Aggregation, ReadOptions};
use crate::types::{flatten_value, Document, KIND_KEY, RECORD_KEY};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Default collection name template; the hashed database ID is substituted
pub const DEFAULT_META_TEMPLATE: &str = "meta_{database_id}";

const DEFAULT_INDEX_COLUMNS: [&str; 3] = ["_kind", "record_id", "path"];

fn default_columns() -> Vec<ColumnSpec> {
    vec![
        ColumnSpec::new("record_id", "string", Aggregation::First, "Record ID"),
        ColumnSpec::new("path", "string", Aggregation::First, "File Path"),
        ColumnSpec::new("content_type", "string", Aggregation::First, "Content-type"),
        ColumnSpec::new("data_type", "string", Aggregation::First, "Data-type"),
        ColumnSpec::new("start_timestamp", "number", Aggregation::Min, "Start Timestamp"),
        ColumnSpec::new("end_timestamp", "number", Aggregation::Max, "End Timestamp"),
        ColumnSpec::new("contents", "dict", Aggregation::First, "Contents"),
        ColumnSpec::new("description", "string", Aggregation::First, "Description"),
    ]
}

/// Key over which rows are expanded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orient {
    #[default]
    Path,
    RecordId,
    Contents,
    File,
}

impl Orient {
    pub fn as_str(&self) -> &'static str {
        match self {
            Orient::Path => "path",
            Orient::RecordId => "record_id",
            Orient::Contents => "contents",
            Orient::File => "file",
        }
    }
}

impl fmt::Display for Orient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Orient {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "path" => Ok(Orient::Path),
            "record_id" => Ok(Orient::RecordId),
            "contents" => Ok(Orient::Contents),
            "file" => Ok(Orient::File),
            other => Err(ApiError::InvalidArgument(format!("unknown orient: {}", other))),
        }
    }
}

/// Metadata handler for one database ID
pub struct MetaHandler {
    core: HandlerCore,
    database_id: String,
    orient: Orient,
    base_dir: PathBuf,
    canonical_base_dir: PathBuf,
    /// (document position, orient entry) per logical row
    rows: Vec<(usize, Option<usize>)>,
    index: DatabaseIndexHandler,
    options: HandlerOptions,
}

impl fmt::Debug for MetaHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetaHandler")
            .field("database_id", &self.database_id)
            .field("orient", &self.orient)
            .field("base_dir", &self.base_dir)
            .field("core", &self.core)
            .finish()
    }
}

impl MetaHandler {
    pub fn open(options: &HandlerOptions) -> Result<Self, ApiError> {
        let settings = options.toolkit_config();
        let params = options.connection(HandlerClass::Meta)?;
        let template = settings
            .meta_df
            .df_name
            .clone()
            .unwrap_or_else(|| DEFAULT_META_TEMPLATE.to_string());
        let digest_size = settings.hash.digest_size;
        let name = collection_name(&template, &options.database_id, digest_size)?;
        let config = collection_config(&settings.meta_df, &DEFAULT_INDEX_COLUMNS, default_columns());

        let mut core = HandlerCore::connect(&params, &name, config, options.schema_registry())?;
        core.config_mut()
            .set_reserved("_df_name", Value::from(template))?;
        core.config_mut()
            .set_reserved("_hash_digest_size", Value::from(digest_size))?;

        let index = DatabaseIndexHandler::open(&options.clone().read_on_init(false))?;
        let base_dir = resolve_base_dir(options.base_dir.as_deref());
        let canonical_base_dir = dunce::canonicalize(&base_dir).unwrap_or_else(|_| base_dir.clone());

        let mut handler = Self {
            core,
            database_id: options.database_id.clone(),
            orient: options.orient,
            base_dir,
            canonical_base_dir,
            rows: Vec::new(),
            index,
            options: options.clone(),
        };
        if options.read_on_init {
            handler.read(&ReadOptions::new())?;
        }
        Ok(handler)
    }

    pub fn database_id(&self) -> &str {
        &self.database_id
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn orient(&self) -> Orient {
        self.orient
    }

    pub fn set_orient(&mut self, orient: Orient) {
        self.orient = orient;
        self.reindex();
    }

    /// The database index this handler registers itself in
    pub fn database_index(&mut self) -> &mut DatabaseIndexHandler {
        &mut self.index
    }

    /// Insert a file document
    ///
    /// The path must be non-empty. `_kind` becomes `file` and `_record` links
    /// the file to the UUID its parent record has.
    pub fn add_file(&mut self, mut document: Document, options: AddOptions) -> Result<String, ApiError> {
        match document.get("path") {
            Some(Value::String(path)) if !path.is_empty() => {}
            _ => {
                return Err(ApiError::InvalidArgument(
                    "a file requires a non-empty path".to_string(),
                ))
            }
        }
        document.insert(KIND_KEY.to_string(), Value::from("file"));
        let record = self.record_uuid(&document);
        document.insert(RECORD_KEY.to_string(), Value::from(record));
        self.add_data(document, options)
    }

    /// Insert a record document; its path is forced to the empty string
    pub fn add_record(&mut self, mut document: Document, options: AddOptions) -> Result<String, ApiError> {
        match document.get("path") {
            None | Some(Value::Null) => {}
            Some(Value::String(path)) if path.is_empty() => {}
            Some(other) => {
                return Err(ApiError::InvalidArgument(format!(
                    "a record cannot have a path, got {}",
                    other
                )))
            }
        }
        document.insert("path".to_string(), Value::from(""));
        document.insert(KIND_KEY.to_string(), Value::from("record"));
        self.add_data(document, options)
    }

    /// UUID of the record a file belongs to
    fn record_uuid(&self, document: &Document) -> String {
        let index_columns = self.core.config().index_columns();
        let mut record: Document = index_columns
            .iter()
            .filter_map(|c| document.get(c).map(|v| (c.clone(), v.clone())))
            .collect();
        record.insert("path".to_string(), Value::from(""));
        record.insert(KIND_KEY.to_string(), Value::from("record"));
        derive_uuid(&record, index_columns)
    }

    /// Copy every in-memory document into the catalogue of another database ID
    ///
    /// The new catalogue is saved, then this database's index entry is removed,
    /// which drops its collection at the same time.
    pub fn migrate_to_new_database(&mut self, new_database_id: &str) -> Result<MetaHandler, ApiError> {
        let options = self
            .options
            .clone()
            .database_id(new_database_id)
            .read_on_init(false);
        let mut target = MetaHandler::open(&options)?;
        for column in self.core.config().columns() {
            target.core.config_mut().add_column(column.clone());
        }
        let documents: Vec<Document> = self.core.documents().iter().cloned().collect();
        let count = documents.len();
        for document in documents {
            target.add_data(
                document,
                AddOptions {
                    ignore_dtype_mismatch: true,
                    ..Default::default()
                },
            )?;
        }
        target.save()?;

        let mut entry = Document::new();
        entry.insert("database_id".to_string(), Value::from(self.database_id.clone()));
        entry.insert(
            "df_name".to_string(),
            Value::from(self.core.collection_name().to_string()),
        );
        self.index.remove_data(&entry)?;
        self.index.save()?;

        info!(
            from = %self.database_id,
            to = %new_database_id,
            documents = count,
            "Migrated database"
        );
        Ok(target)
    }

    fn reindex(&mut self) {
        let orient = self.orient.as_str();
        self.rows = self
            .core
            .documents()
            .iter()
            .enumerate()
            .flat_map(|(i, document)| {
                let size = match document.get(orient) {
                    Some(Value::Object(map)) => map.len(),
                    Some(Value::Array(items)) => items.len(),
                    _ => 0,
                };
                if size == 0 {
                    vec![(i, None)]
                } else {
                    (0..size).map(|entry| (i, Some(entry))).collect()
                }
            })
            .collect();
    }

    fn to_relative(&self, mut document: Document) -> Document {
        if let Some(value) = document.get_mut("path") {
            *value = map_paths(value, |p| self.relative_path(p));
        }
        document
    }

    fn to_absolute(&self, mut document: Document) -> Document {
        if let Some(value) = document.get_mut("path") {
            *value = map_paths(value, |p| self.absolute_path(p));
        }
        document
    }

    fn relative_path(&self, path: &str) -> String {
        let candidate = Path::new(path);
        if path.is_empty() || !candidate.is_absolute() {
            return path.to_string();
        }
        for base in [&self.base_dir, &self.canonical_base_dir] {
            if let Ok(relative) = candidate.strip_prefix(base) {
                return relative.to_string_lossy().into_owned();
            }
        }
        warn!(
            path = %path,
            base_dir = %self.base_dir.display(),
            "Could not resolve path relative to base_dir, storing it as given"
        );
        path.to_string()
    }

    fn absolute_path(&self, path: &str) -> String {
        if path.is_empty() || Path::new(path).is_absolute() {
            return path.to_string();
        }
        self.base_dir.join(path).to_string_lossy().into_owned()
    }
}

fn resolve_base_dir(base_dir: Option<&Path>) -> PathBuf {
    let base_dir = base_dir.unwrap_or_else(|| Path::new("/"));
    if base_dir.is_absolute() {
        return base_dir.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(base_dir),
        Err(e) => {
            warn!(error = %e, "Cannot resolve the working directory, using base_dir as given");
            base_dir.to_path_buf()
        }
    }
}

/// Apply a path rewrite to a scalar path or a list of paths
fn map_paths(value: &Value, rewrite: impl Fn(&str) -> String) -> Value {
    match value {
        Value::String(path) => Value::String(rewrite(path)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| match item {
                    Value::String(path) => Value::String(rewrite(path)),
                    other => other.clone(),
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Restrict a mapping or list to one entry
fn select_entry(value: &Value, entry: usize) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .nth(entry)
                .map(|(k, v)| {
                    let mut single = Map::new();
                    single.insert(k.clone(), v.clone());
                    single
                })
                .unwrap_or_default(),
        ),
        Value::Array(items) => Value::Array(items.get(entry).cloned().into_iter().collect()),
        other => other.clone(),
    }
}

impl Handler for MetaHandler {
    fn core(&self) -> &HandlerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut HandlerCore {
        &mut self.core
    }

    fn class(&self) -> HandlerClass {
        HandlerClass::Meta
    }

    fn add_data(&mut self, document: Document, options: AddOptions) -> Result<String, ApiError> {
        let is_record = document
            .get(KIND_KEY)
            .and_then(Value::as_str)
            .map(|k| k.eq_ignore_ascii_case("record"))
            .unwrap_or(false);
        if is_record {
            if let Some(Value::String(path)) = document.get("path") {
                if !path.is_empty() {
                    return Err(ApiError::InvalidArgument(format!(
                        "a record cannot have a path, got '{}'",
                        path
                    )));
                }
            }
        }
        let document = self.to_relative(document);
        let uuid = self.core.add_data(document, options)?;
        self.reindex();
        Ok(uuid)
    }

    fn remove_data(&mut self, document: &Document) -> Result<String, ApiError> {
        let document = self.to_relative(document.clone());
        let uuid = self.core.remove_data(&document)?;
        self.reindex();
        Ok(uuid)
    }

    fn read(&mut self, options: &ReadOptions) -> Result<(), ApiError> {
        self.core.read(options)?;
        self.reindex();
        Ok(())
    }

    /// Save, then register this database in the index
    fn save(&mut self) -> Result<(), ApiError> {
        self.core.save()?;
        let df_name = self.core.collection_name().to_string();
        self.index.register(&self.database_id, &df_name)?;
        self.index.save()?;
        debug!(database_id = %self.database_id, collection = %df_name, "Registered database");
        Ok(())
    }

    fn len(&self) -> usize {
        self.rows.len()
    }

    fn get_raw(&self, index: usize) -> Option<Document> {
        let &(position, entry) = self.rows.get(index)?;
        let mut document = self.core.documents().at(position)?.clone();
        if let Some(entry) = entry {
            let orient = self.orient.as_str();
            if let Some(value) = document.get(orient) {
                let selected = select_entry(value, entry);
                document.insert(orient.to_string(), selected);
            }
        }
        Some(self.to_absolute(document))
    }

    /// Rows with the orient entry flattened into dot-joined columns
    fn to_table(&self) -> TableView {
        let orient = self.orient.as_str();
        let rows = self.iter().map(|document| {
            let mut pairs = Vec::new();
            for (key, value) in &document {
                match value {
                    Value::Object(entry) if key == orient && entry.len() == 1 => {
                        for (name, attributes) in entry {
                            pairs.push((key.clone(), Value::from(name.clone())));
                            if attributes.is_object() {
                                flatten_value(key, attributes, &mut pairs);
                            }
                        }
                    }
                    _ => flatten_value(key, value, &mut pairs),
                }
            }
            pairs.into_iter().collect::<Document>()
        });
        TableView::from_flat_rows(rows, self.core.config())
    }

    fn as_meta(&self) -> Option<&MetaHandler> {
        Some(self)
    }

    fn as_meta_mut(&mut self) -> Option<&mut MetaHandler> {
        Some(self)
    }
}
