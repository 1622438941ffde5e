//! Annotation catalogue.

use crate::catalog::base::{AddOptions, HandlerCore};
use crate::catalog::config_doc::ColumnSpec;
use crate::catalog::uuid::collection_name;
use crate::catalog::{collection_config, Handler, HandlerClass, HandlerOptions};
use crate::error::ApiError;
use crate::store::{Aggregation, ReadOptions};
use crate::types::Document;
use serde_json::Value;

/// Default collection name template; the hashed database ID is substituted
pub const DEFAULT_ANNOTATION_TEMPLATE: &str = "{database_id}";

fn default_columns() -> Vec<ColumnSpec> {
    vec![
        ColumnSpec::new("annotation_id", "string", Aggregation::Last, "Annotation ID"),
        ColumnSpec::new("record_id", "string", Aggregation::Last, "Record ID"),
        ColumnSpec::new("generation", "integer", Aggregation::Last, "Generation"),
        ColumnSpec::new("timestamp_from", "number", Aggregation::Last, "From"),
        ColumnSpec::new("timestamp_to", "number", Aggregation::Last, "To"),
        ColumnSpec::new("created_at", "number", Aggregation::Last, "Created At"),
        ColumnSpec::new("created_by", "string", Aggregation::Last, "Created By"),
    ]
}

/// Handler over the annotations of one database
///
/// Every column aggregates with `last`, so grouping by `annotation_id`
/// yields the latest generation of each annotation.
#[derive(Debug)]
pub struct AnnotationHandler {
    core: HandlerCore,
    database_id: String,
}

impl AnnotationHandler {
    pub fn open(options: &HandlerOptions) -> Result<Self, ApiError> {
        let settings = options.toolkit_config();
        let params = options.connection(HandlerClass::Annotation)?;
        let template = settings
            .annotation_df
            .df_name
            .clone()
            .unwrap_or_else(|| DEFAULT_ANNOTATION_TEMPLATE.to_string());
        let digest_size = settings.hash.digest_size;
        let name = collection_name(&template, &options.database_id, digest_size)?;
        let config = collection_config(
            &settings.annotation_df,
            &["annotation_id", "generation"],
            default_columns(),
        );

        let mut core = HandlerCore::connect(&params, &name, config, options.schema_registry())?;
        core.config_mut()
            .set_reserved("_df_name", Value::from(template))?;
        core.config_mut()
            .set_reserved("_hash_digest_size", Value::from(digest_size))?;

        let mut handler = Self {
            core,
            database_id: options.database_id.clone(),
        };
        if options.read_on_init {
            handler.read(&ReadOptions::new())?;
        }
        Ok(handler)
    }

    pub fn database_id(&self) -> &str {
        &self.database_id
    }
}

impl Handler for AnnotationHandler {
    fn core(&self) -> &HandlerCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut HandlerCore {
        &mut self.core
    }

    fn class(&self) -> HandlerClass {
        HandlerClass::Annotation
    }

    fn add_data(&mut self, document: Document, options: AddOptions) -> Result<String, ApiError> {
        let uuid = self.core.add_data(document, options)?;
        self.core.set_all_aggregations(Aggregation::Last);
        Ok(uuid)
    }
}
