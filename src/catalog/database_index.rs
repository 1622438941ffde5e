//! Index of known database IDs and the collections that hold them.

use crate::catalog::base::HandlerCore;
use crate::catalog::config_doc::ColumnSpec;
use crate::catalog::{collection_config, Handler, HandlerClass, HandlerOptions};
use crate::error::ApiError;
use crate::store::{Aggregation, ReadOptions};
use crate::types::Document;
use serde_json::Value;
use tracing::{info, warn};

/// Fixed collection name of the database index
pub const DATABASE_INDEX_COLLECTION: &str = "database_id_df";

fn default_columns() -> Vec<ColumnSpec> {
    vec![
        ColumnSpec::new("database_id", "string", Aggregation::First, "Database ID"),
        ColumnSpec::new("df_name", "string", Aggregation::First, "Collection"),
    ]
}

/// Handler over the `{database_id, df_name}` pairs
///
/// Removing an entry drops the collection it points to, together with that
/// collection's configuration sibling, at the next save.
#[derive(Debug)]
pub struct DatabaseIndexHandler {
    core: HandlerCore,
}

impl DatabaseIndexHandler {
    pub fn open(options: &HandlerOptions) -> Result<Self, ApiError> {
        let settings = options.toolkit_config();
        let params = options.connection(HandlerClass::DatabaseId)?;
        let name = settings
            .database_id_df
            .df_name
            .clone()
            .unwrap_or_else(|| DATABASE_INDEX_COLLECTION.to_string());
        let config = collection_config(&settings.database_id_df, &["database_id"], default_columns());
        let core = HandlerCore::connect(&params, &name, config, options.schema_registry())?;

        let mut handler = Self { core };
        if options.read_on_init {
            handler.read(&ReadOptions::new())?;
        }
        Ok(handler)
    }

    /// Register a database ID, replacing any previous entry for it
    pub fn register(&mut self, database_id: &str, df_name: &str) -> Result<String, ApiError> {
        let mut document = Document::new();
        document.insert("database_id".to_string(), Value::from(database_id));
        document.insert("df_name".to_string(), Value::from(df_name));
        self.add_data(document, Default::default())
    }

    /// Database IDs currently in memory
    pub fn database_ids(&self) -> Vec<String> {
        self.core
            .documents()
            .iter()
            .filter_map(|d| d.get("database_id").and_then(Value::as_str))
            .map(str::to_string)
            .collect()
    }

    /// Collection registered for a database ID
    pub fn df_name_of(&self, database_id: &str) -> Option<String> {
        self.core
            .documents()
            .iter()
            .find(|d| d.get("database_id").and_then(Value::as_str) == Some(database_id))
            .and_then(|d| d.get("df_name"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

impl Handler for DatabaseIndexHandler {
    fn core(&self) -> &HandlerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut HandlerCore {
        &mut self.core
    }

    fn class(&self) -> HandlerClass {
        HandlerClass::DatabaseId
    }

    fn remove_data(&mut self, document: &Document) -> Result<String, ApiError> {
        let uuid = self.core.uuid_for(document)?;
        let df_name = document
            .get("df_name")
            .or_else(|| self.core.documents().get(&uuid).and_then(|d| d.get("df_name")))
            .and_then(Value::as_str)
            .map(str::to_string);

        match df_name {
            Some(df_name) => {
                info!(collection = %df_name, "Dropping collection of removed database");
                self.core.drop_table(&df_name)?;
            }
            None => warn!(uuid = %uuid, "Removed index entry has no df_name, skipping cascade"),
        }
        self.core.remove_data(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options(host: &str) -> HandlerOptions {
        HandlerOptions::new().engine("memory").host(host).database("index")
    }

    #[test]
    fn test_register_and_lookup() {
        let mut index = DatabaseIndexHandler::open(&options("index-register")).unwrap();
        index.register("a", "meta_aaaa").unwrap();
        index.register("a", "meta_aaaa").unwrap();
        index.register("b", "meta_bbbb").unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.df_name_of("b").as_deref(), Some("meta_bbbb"));
        index.save().unwrap();

        let reopened = DatabaseIndexHandler::open(&options("index-register")).unwrap();
        assert_eq!(reopened.database_ids(), vec!["a", "b"]);
    }

    #[test]
    fn test_remove_cascades_to_collection() {
        let opts = options("index-cascade");
        let mut index = DatabaseIndexHandler::open(&opts).unwrap();
        let engine = crate::store::open_engine(&opts.connection(HandlerClass::DatabaseId).unwrap())
            .unwrap();
        engine.create_table("meta_x").unwrap();
        engine.create_table("--config--meta_x").unwrap();
        index.register("x", "meta_x").unwrap();
        index.save().unwrap();

        index
            .remove_data(json!({"database_id": "x"}).as_object().unwrap())
            .unwrap();
        index.save().unwrap();
        assert!(!index.exist_table("meta_x").unwrap());
        assert!(!index.exist_table("--config--meta_x").unwrap());
        assert!(index.is_empty());
    }

    #[test]
    fn test_remove_without_df_name_skips_cascade() {
        let mut index = DatabaseIndexHandler::open(&options("index-skip")).unwrap();
        index
            .add_data(
                json!({"database_id": "lonely"}).as_object().cloned().unwrap(),
                Default::default(),
            )
            .unwrap();
        index
            .remove_data(json!({"database_id": "lonely"}).as_object().unwrap())
            .unwrap();
        index.save().unwrap();
        assert!(index.is_empty());
    }
}
