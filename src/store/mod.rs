//! Storage engine adapter
//!
//! A uniform connect/read/upsert/remove/drop/exist surface over several
//! embedded document stores. Engines are selected by name and shared across
//! handlers within a process, keyed by engine kind and location.

pub mod json_file;
pub mod memory;
pub mod persistence;
pub mod pipeline;
pub mod pql;
pub mod query;

pub use json_file::JsonFileEngine;
pub use memory::MemoryEngine;
pub use persistence::SledEngine;
pub use query::Filter;

use crate::error::StorageError;
use crate::types::Document;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// Aggregation applied to a column when grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    #[default]
    First,
    Last,
    Min,
    Max,
    Push,
}

impl FromStr for Aggregation {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "first" => Ok(Aggregation::First),
            "last" => Ok(Aggregation::Last),
            "min" => Ok(Aggregation::Min),
            "max" => Ok(Aggregation::Max),
            "push" => Ok(Aggregation::Push),
            other => Err(StorageError::InvalidQuery(format!(
                "unknown aggregation: {}",
                other
            ))),
        }
    }
}

/// Sort direction for `order_by`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Caller-facing read options
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Native structured query
    pub query: Option<Value>,
    /// PQL expression, translated to a native query
    pub pql: Option<String>,
    pub group_by: Option<String>,
    pub order_by: Vec<(String, SortOrder)>,
    /// Zero means unlimited
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub disable_count_total: bool,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, query: Value) -> Self {
        self.query = Some(query);
        self
    }

    pub fn pql(mut self, pql: impl Into<String>) -> Self {
        self.pql = Some(pql.into());
        self
    }

    pub fn group_by(mut self, key: impl Into<String>) -> Self {
        self.group_by = Some(key.into());
        self
    }

    pub fn order_by(mut self, key: impl Into<String>, order: SortOrder) -> Self {
        self.order_by.push((key.into(), order));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn disable_count_total(mut self) -> Self {
        self.disable_count_total = true;
        self
    }
}

/// Compiled read request handed to engines
#[derive(Debug, Clone, Default)]
pub struct ReadRequest {
    pub filter: Option<Filter>,
    pub group_by: Option<String>,
    pub aggregations: HashMap<String, Aggregation>,
    pub order_by: Vec<(String, SortOrder)>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub count_total: bool,
}

impl ReadRequest {
    /// Compile caller options, translating PQL when given
    ///
    /// Specifying both a native query and a PQL expression is rejected.
    pub fn compile(
        options: &ReadOptions,
        aggregations: HashMap<String, Aggregation>,
    ) -> Result<Self, StorageError> {
        let filter = match (&options.query, &options.pql) {
            (Some(_), Some(_)) => {
                return Err(StorageError::InvalidQuery(
                    "either query or pql can be specified, not both".to_string(),
                ))
            }
            (Some(query), None) => Some(Filter::parse(query)?),
            (None, Some(expression)) => Some(Filter::parse(&pql::translate_pql(expression)?)?),
            (None, None) => None,
        };
        Ok(Self {
            filter,
            group_by: options.group_by.clone(),
            aggregations,
            order_by: options.order_by.clone(),
            limit: options.limit,
            offset: options.offset,
            count_total: !options.disable_count_total,
        })
    }

    /// Unfiltered full scan
    pub fn scan() -> Self {
        Self {
            count_total: true,
            ..Self::default()
        }
    }
}

/// Materialised read output
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadResult {
    pub documents: Vec<Document>,
    /// Unpaged count, `None` when counting was disabled
    pub count_total: Option<usize>,
}

/// What an engine can evaluate natively
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub native_query: bool,
    pub native_aggregation: bool,
}

/// Storage engine interface
///
/// Every operation addresses a collection by name. Engines are shared, so
/// implementations must be internally synchronised.
pub trait StorageEngine: Send + Sync {
    fn kind(&self) -> EngineKind;
    fn capabilities(&self) -> Capabilities;

    /// Create the collection if absent
    fn create_table(&self, name: &str) -> Result<(), StorageError>;

    /// Read a collection; engines without native query support may ignore the request
    fn read(&self, name: &str, request: &ReadRequest) -> Result<ReadResult, StorageError>;

    /// Replace-or-insert each document keyed on `_uuid`
    fn upsert(&self, name: &str, documents: &[Document]) -> Result<(), StorageError>;

    /// Delete documents by `_uuid`
    fn remove(&self, name: &str, uuids: &[String]) -> Result<(), StorageError>;

    /// Remove a collection; dropping a missing collection succeeds
    fn drop_table(&self, name: &str) -> Result<(), StorageError>;

    fn exist_table(&self, name: &str) -> Result<bool, StorageError>;
}

/// Available engine bindings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Memory,
    Sled,
    Json,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Memory => "memory",
            EngineKind::Sled => "sled",
            EngineKind::Json => "json",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" | "mem" => Ok(EngineKind::Memory),
            "sled" => Ok(EngineKind::Sled),
            "json" | "jsonfile" | "json_file" => Ok(EngineKind::Json),
            other => Err(StorageError::UnsupportedEngine(other.to_string())),
        }
    }
}

/// Where and how to reach a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub engine: EngineKind,
    pub host: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ConnectionParams {
    pub fn new(engine: EngineKind, host: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            engine,
            host: host.into(),
            database: database.into(),
            username: None,
            password: None,
        }
    }

    /// Resolved on-disk location for file-backed engines
    fn location(&self) -> PathBuf {
        let host = PathBuf::from(&self.host);
        match self.engine {
            EngineKind::Memory => host,
            EngineKind::Sled => host.join(&self.database),
            EngineKind::Json => {
                if host.extension().map(|e| e == "json").unwrap_or(false) {
                    host
                } else {
                    host.join(format!("{}.json", self.database))
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EngineKey {
    kind: EngineKind,
    location: String,
}

fn engines() -> &'static Mutex<HashMap<EngineKey, Arc<dyn StorageEngine>>> {
    static ENGINES: OnceLock<Mutex<HashMap<EngineKey, Arc<dyn StorageEngine>>>> = OnceLock::new();
    ENGINES.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Open (or reuse) the engine for a set of connection parameters
pub fn open_engine(params: &ConnectionParams) -> Result<Arc<dyn StorageEngine>, StorageError> {
    let location = params.location();
    let key = EngineKey {
        kind: params.engine,
        location: match params.engine {
            EngineKind::Memory => format!("{}/{}", params.host, params.database),
            _ => location.to_string_lossy().into_owned(),
        },
    };

    let mut cache = engines().lock();
    if let Some(engine) = cache.get(&key) {
        return Ok(engine.clone());
    }

    if params.username.is_some() || params.password.is_some() {
        debug!(engine = %params.engine, "Credentials are ignored by embedded engines");
    }

    let engine: Arc<dyn StorageEngine> = match params.engine {
        EngineKind::Memory => Arc::new(MemoryEngine::new()),
        EngineKind::Sled => Arc::new(SledEngine::open(&location)?),
        EngineKind::Json => Arc::new(JsonFileEngine::new(location)),
    };
    debug!(engine = %params.engine, location = %key.location, "Opened storage engine");
    cache.insert(key, engine.clone());
    Ok(engine)
}

/// Handle to one collection of an engine
#[derive(Clone)]
pub struct Collection {
    engine: Arc<dyn StorageEngine>,
    name: String,
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("engine", &self.engine.kind())
            .field("name", &self.name)
            .finish()
    }
}

/// Connect to a collection, creating it if absent
pub fn connect(params: &ConnectionParams, collection: &str) -> Result<Collection, StorageError> {
    let engine = open_engine(params)?;
    Collection::open(engine, collection)
}

impl Collection {
    /// Bind a collection on an already opened engine, creating it if absent
    pub fn open(engine: Arc<dyn StorageEngine>, name: &str) -> Result<Self, StorageError> {
        engine.create_table(name)?;
        Ok(Self {
            engine,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn engine(&self) -> &Arc<dyn StorageEngine> {
        &self.engine
    }

    /// Read documents
    ///
    /// Filtering, grouping and paging run in memory when the engine cannot
    /// evaluate them natively.
    pub fn read(
        &self,
        options: &ReadOptions,
        aggregations: HashMap<String, Aggregation>,
    ) -> Result<ReadResult, StorageError> {
        let request = ReadRequest::compile(options, aggregations)?;
        let capabilities = self.engine.capabilities();

        if request.group_by.is_some() && !capabilities.native_aggregation {
            warn!(
                engine = %self.engine.kind(),
                collection = %self.name,
                "Engine cannot aggregate natively, grouping in memory"
            );
        }

        if capabilities.native_query {
            self.engine.read(&self.name, &request)
        } else {
            let scan = self.engine.read(&self.name, &ReadRequest::scan())?;
            Ok(pipeline::execute(scan.documents, &request))
        }
    }

    pub fn upsert(&self, documents: &[Document]) -> Result<(), StorageError> {
        if documents.is_empty() {
            return Ok(());
        }
        self.engine.upsert(&self.name, documents)
    }

    pub fn remove(&self, uuids: &[String]) -> Result<(), StorageError> {
        if uuids.is_empty() {
            return Ok(());
        }
        self.engine.remove(&self.name, uuids)
    }

    /// Drop any collection of the same engine
    pub fn drop_table(&self, name: &str) -> Result<(), StorageError> {
        self.engine.drop_table(name)
    }

    /// Check any collection of the same engine
    pub fn exist_table(&self, name: &str) -> Result<bool, StorageError> {
        self.engine.exist_table(name)
    }
}

/// Extract the `_uuid` of a document as a string key
pub(crate) fn uuid_of(document: &Document) -> Result<String, StorageError> {
    match document.get(crate::types::UUID_KEY) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) if !other.is_null() => Ok(other.to_string()),
        _ => Err(StorageError::MissingUuid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_engine_kind_parsing() {
        assert_eq!("Sled".parse::<EngineKind>().unwrap(), EngineKind::Sled);
        assert_eq!("jsonfile".parse::<EngineKind>().unwrap(), EngineKind::Json);
        assert!(matches!(
            "mongodb".parse::<EngineKind>(),
            Err(StorageError::UnsupportedEngine(_))
        ));
    }

    #[test]
    fn test_compile_rejects_query_and_pql_together() {
        let options = ReadOptions::new().query(json!({"a": 1})).pql("a == 1");
        assert!(matches!(
            ReadRequest::compile(&options, HashMap::new()),
            Err(StorageError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_json_location_resolution() {
        let params = ConnectionParams::new(EngineKind::Json, "/tmp/db", "meta");
        assert_eq!(params.location(), PathBuf::from("/tmp/db/meta.json"));
        let params = ConnectionParams::new(EngineKind::Json, "/tmp/db/catalog.json", "meta");
        assert_eq!(params.location(), PathBuf::from("/tmp/db/catalog.json"));
    }

    #[test]
    fn test_memory_engines_are_shared_per_location() {
        let params = ConnectionParams::new(EngineKind::Memory, "store-mod-test", "db");
        let a = connect(&params, "t").unwrap();
        a.upsert(&[json!({"_uuid": "1"}).as_object().cloned().unwrap()])
            .unwrap();
        let b = connect(&params, "t").unwrap();
        let result = b.read(&ReadOptions::new(), HashMap::new()).unwrap();
        assert_eq!(result.documents.len(), 1);
    }
}
