//! Metadata catalogue
//!
//! Handlers keep an in-memory view of one collection, derive content-based
//! UUIDs, discover and coerce columns, and flush changes through the storage
//! adapter on `save`. Three handler classes exist: file/record metadata,
//! annotations, and the index of known database IDs.

pub mod annotation;
pub mod base;
pub mod config_doc;
pub mod database_index;
pub mod factory;
pub mod merge;
pub mod meta;
pub mod table;
pub mod uuid;

pub use annotation::AnnotationHandler;
pub use base::{AddOptions, DocumentBuffer, HandlerCore};
pub use config_doc::{CollectionConfig, ColumnSpec};
pub use database_index::DatabaseIndexHandler;
pub use factory::{open_handler, HandlerRegistry};
pub use merge::MergeStrategy;
pub use meta::{MetaHandler, Orient};
pub use table::TableView;

use crate::config::{CollectionDefaults, ConnectionConfig, ToolkitConfig};
use crate::error::ApiError;
use crate::schema::SchemaRegistry;
use crate::store::{ConnectionParams, EngineKind, ReadOptions};
use crate::types::{strip_reserved, Document};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Handler class, as named in configuration and environment variables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HandlerClass {
    Meta,
    DatabaseId,
    Annotation,
}

impl HandlerClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandlerClass::Meta => "meta",
            HandlerClass::DatabaseId => "database_id",
            HandlerClass::Annotation => "annotation",
        }
    }

    /// Infix of the `RDTK_<CLASS>_DB_*` environment variables
    ///
    /// The database index lives next to the metadata and shares its variables.
    pub fn env_class(&self) -> &'static str {
        match self {
            HandlerClass::Meta | HandlerClass::DatabaseId => "META",
            HandlerClass::Annotation => "ANNOTATION",
        }
    }
}

impl fmt::Display for HandlerClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HandlerClass {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "meta" => Ok(HandlerClass::Meta),
            "database_id" => Ok(HandlerClass::DatabaseId),
            "annotation" => Ok(HandlerClass::Annotation),
            "statistics" | "time_series" => Err(ApiError::InvalidArgument(format!(
                "the {} database class has no catalogue handler",
                s
            ))),
            other => Err(ApiError::InvalidArgument(format!(
                "unknown database class: {}",
                other
            ))),
        }
    }
}

/// Construction options shared by every handler
///
/// Connection fields left unset are resolved from `RDTK_<CLASS>_DB_*`
/// environment variables, then from the loaded configuration.
#[derive(Debug, Clone)]
pub struct HandlerOptions {
    pub engine: Option<String>,
    pub host: Option<String>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database_id: String,
    pub base_dir: Option<PathBuf>,
    pub orient: Orient,
    pub read_on_init: bool,
    pub schemas: Option<Arc<SchemaRegistry>>,
    pub settings: Option<Arc<ToolkitConfig>>,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self {
            engine: None,
            host: None,
            database: None,
            username: None,
            password: None,
            database_id: "default".to_string(),
            base_dir: None,
            orient: Orient::default(),
            read_on_init: true,
            schemas: None,
            settings: None,
        }
    }
}

impl HandlerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn engine(mut self, engine: impl Into<String>) -> Self {
        self.engine = Some(engine.into());
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn database_id(mut self, database_id: impl Into<String>) -> Self {
        self.database_id = database_id.into();
        self
    }

    pub fn base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }

    pub fn orient(mut self, orient: Orient) -> Self {
        self.orient = orient;
        self
    }

    pub fn read_on_init(mut self, read_on_init: bool) -> Self {
        self.read_on_init = read_on_init;
        self
    }

    pub fn schemas(mut self, schemas: Arc<SchemaRegistry>) -> Self {
        self.schemas = Some(schemas);
        self
    }

    pub fn settings(mut self, settings: Arc<ToolkitConfig>) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Loaded configuration, or built-in defaults when none was given
    pub fn toolkit_config(&self) -> Arc<ToolkitConfig> {
        self.settings
            .clone()
            .unwrap_or_else(|| Arc::new(ToolkitConfig::default()))
    }

    pub fn schema_registry(&self) -> Arc<SchemaRegistry> {
        self.schemas.clone().unwrap_or_else(SchemaRegistry::global)
    }

    /// Engine name after environment and configuration fallback
    pub fn resolved_engine(&self, class: HandlerClass) -> Result<EngineKind, ApiError> {
        let settings = self.toolkit_config();
        let block = connection_block(&settings, class);
        let name = self
            .engine
            .clone()
            .or_else(|| env_setting(class, "ENGINE"))
            .unwrap_or_else(|| block.engine.clone());
        Ok(name.parse::<EngineKind>()?)
    }

    /// Full connection parameters for a handler class
    pub fn connection(&self, class: HandlerClass) -> Result<ConnectionParams, ApiError> {
        let settings = self.toolkit_config();
        let block = connection_block(&settings, class);
        let engine = self.resolved_engine(class)?;
        let host = self
            .host
            .clone()
            .or_else(|| env_setting(class, "HOST"))
            .unwrap_or_else(|| block.host.clone());
        let database = self
            .database
            .clone()
            .or_else(|| env_setting(class, "DATABASE"))
            .unwrap_or_else(|| block.database.clone());
        if database.trim().is_empty() {
            return Err(ApiError::DatabaseNotInitialised(format!(
                "no database configured for the {} handler",
                class
            )));
        }
        let mut params = ConnectionParams::new(engine, host, database);
        params.username = self
            .username
            .clone()
            .or_else(|| env_setting(class, "USERNAME"))
            .or_else(|| block.username.clone());
        params.password = self
            .password
            .clone()
            .or_else(|| env_setting(class, "PASSWORD"))
            .or_else(|| block.password.clone());
        Ok(params)
    }
}

fn env_setting(class: HandlerClass, field: &str) -> Option<String> {
    std::env::var(format!("RDTK_{}_DB_{}", class.env_class(), field))
        .ok()
        .filter(|v| !v.is_empty())
}

fn connection_block(settings: &ToolkitConfig, class: HandlerClass) -> &ConnectionConfig {
    match class {
        HandlerClass::Meta | HandlerClass::DatabaseId => &settings.db.meta,
        HandlerClass::Annotation => &settings.db.annotation,
    }
}

/// Built-in column configuration overlaid with configured overrides
pub(crate) fn collection_config(
    defaults: &CollectionDefaults,
    index_columns: &[&str],
    columns: Vec<ColumnSpec>,
) -> CollectionConfig {
    CollectionConfig::new(
        defaults
            .index_columns
            .clone()
            .unwrap_or_else(|| index_columns.iter().map(|c| c.to_string()).collect()),
        defaults.columns.clone().unwrap_or(columns),
    )
}

/// Uniform catalogue surface
///
/// Implementors expose their [`HandlerCore`]; everything else has a default
/// that specialisations override where their semantics differ.
pub trait Handler {
    fn core(&self) -> &HandlerCore;
    fn core_mut(&mut self) -> &mut HandlerCore;

    fn class(&self) -> HandlerClass;

    /// Insert a document into memory and return its `_uuid`
    fn add_data(&mut self, document: Document, options: AddOptions) -> Result<String, ApiError> {
        self.core_mut().add_data(document, options)
    }

    /// Remove a document by explicit or derived `_uuid`
    fn remove_data(&mut self, document: &Document) -> Result<String, ApiError> {
        self.core_mut().remove_data(document)
    }

    fn read(&mut self, options: &ReadOptions) -> Result<(), ApiError> {
        self.core_mut().read(options)
    }

    fn save(&mut self) -> Result<(), ApiError> {
        self.core_mut().save()
    }

    /// Number of logical rows
    fn len(&self) -> usize {
        self.core().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Row at a position, with internal fields preserved
    fn get_raw(&self, index: usize) -> Option<Document> {
        self.core().documents().at(index).cloned()
    }

    /// Row at a position, with `_uuid` and `_creation_time` stripped
    fn get(&self, index: usize) -> Option<Document> {
        self.get_raw(index).map(strip_reserved)
    }

    /// Fresh iterator over every row
    fn iter(&self) -> Box<dyn Iterator<Item = Document> + '_> {
        Box::new((0..self.len()).filter_map(move |i| self.get(i)))
    }

    /// Unpaged count reported by the last read
    fn count_total(&self) -> Option<usize> {
        self.core().count_total()
    }

    fn config(&self) -> &CollectionConfig {
        self.core().config()
    }

    fn collection_name(&self) -> &str {
        self.core().collection_name()
    }

    fn exist_table(&self, name: &str) -> Result<bool, ApiError> {
        self.core().exist_table(name)
    }

    /// Queue a table, and its configuration sibling, for dropping on save
    fn drop_table(&mut self, name: &str) -> Result<(), ApiError> {
        self.core_mut().drop_table(name)
    }

    /// Rows rendered under the configured display names
    fn to_table(&self) -> TableView {
        TableView::from_documents(self.iter(), self.config())
    }

    fn as_meta(&self) -> Option<&MetaHandler> {
        None
    }

    fn as_meta_mut(&mut self) -> Option<&mut MetaHandler> {
        None
    }
}
