//! CLI route: single route table and run context. Dispatches to the catalogue,
//! the model registry and presentation.

use crate::catalog::{DatabaseIndexHandler, Handler, HandlerOptions, MetaHandler, Orient};
use crate::cli::output::{render_json, render_table};
use crate::cli::parse::{Commands, DatabaseArgs, DbCommands, ListTarget, OutputFormat};
use crate::config::ToolkitConfig;
use crate::error::ApiError;
use crate::ingest::{ingest_directory, ingest_reader};
use crate::model::{generate_metadata, sidecar_path, ModelRegistry};
use crate::store::ReadOptions;
use crate::types::Document;
use serde_json::{json, Value};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Runtime context for CLI execution: workspace, configuration and registries
pub struct RunContext {
    workspace_root: PathBuf,
    settings: Arc<ToolkitConfig>,
    models: Arc<ModelRegistry>,
}

impl RunContext {
    /// Create run context from workspace root and optional config path
    pub fn new(workspace_root: PathBuf, config_path: Option<PathBuf>) -> Result<Self, ApiError> {
        let settings = match config_path {
            Some(path) => ToolkitConfig::load_file(&path)?,
            None => ToolkitConfig::load(&workspace_root)?,
        };
        Ok(Self::with_settings(workspace_root, settings, crate::model::init()))
    }

    /// Context over already-loaded configuration and a given model registry
    pub fn with_settings(
        workspace_root: PathBuf,
        settings: ToolkitConfig,
        models: Arc<ModelRegistry>,
    ) -> Self {
        Self {
            workspace_root,
            settings: Arc::new(settings),
            models,
        }
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    fn handler_options(&self, database: &DatabaseArgs) -> HandlerOptions {
        let base_dir = database
            .base_dir
            .clone()
            .unwrap_or_else(|| self.workspace_root.clone());
        HandlerOptions::new()
            .database_id(database.database_id.clone())
            .base_dir(base_dir)
            .settings(self.settings.clone())
    }

    /// Execute a command and return its rendered output
    pub fn execute(&self, command: &Commands) -> Result<String, ApiError> {
        self.execute_with_input(command, std::io::stdin().lock())
    }

    /// Execute with an explicit input stream for commands that read one
    pub fn execute_with_input(&self, command: &Commands, input: impl Read) -> Result<String, ApiError> {
        match command {
            Commands::Db { command } => self.handle_db_command(command, input),
            Commands::Models { format } => self.handle_models(*format),
            Commands::Meta {
                file,
                contents,
                record_id,
                save,
            } => self.handle_meta(file, contents.as_deref(), record_id.as_deref(), *save),
        }
    }

    fn handle_db_command(&self, command: &DbCommands, input: impl Read) -> Result<String, ApiError> {
        match command {
            DbCommands::List {
                target,
                database,
                pql,
                offset,
                limit,
                format,
            } => {
                let mut options = ReadOptions::new();
                if let Some(offset) = offset {
                    options = options.offset(*offset);
                }
                if let Some(limit) = limit {
                    options = options.limit(*limit);
                }
                let kind_filter = match target {
                    ListTarget::Databases => None,
                    ListTarget::Records => Some("_kind == 'record'"),
                    ListTarget::Files | ListTarget::Contents => Some("_kind == 'file'"),
                };
                if let Some(pql) = combine_pql(pql.as_deref(), kind_filter) {
                    options = options.pql(pql);
                }
                debug!(list = ?target, options = ?options, "Listing catalogue");

                let view = if *target == ListTarget::Databases {
                    let mut index = DatabaseIndexHandler::open(
                        &self.handler_options(database).read_on_init(false),
                    )?;
                    index.read(&options)?;
                    index.to_table()
                } else {
                    let orient = if *target == ListTarget::Contents {
                        Orient::Contents
                    } else {
                        Orient::Path
                    };
                    let mut handler = MetaHandler::open(
                        &self
                            .handler_options(database)
                            .orient(orient)
                            .read_on_init(false),
                    )?;
                    handler.read(&options)?;
                    handler.to_table()
                };
                render_table(&view, *format)
            }
            DbCommands::Ingest { root, database } => {
                let mut handler = MetaHandler::open(&self.handler_options(database))?;
                let report = ingest_directory(&mut handler, root)?;
                let mut lines = vec![format!(
                    "Ingested {} file(s) and {} record(s) into '{}'",
                    report.files,
                    report.records,
                    handler.database_id()
                )];
                for (path, reason) in &report.failed {
                    lines.push(format!("  skipped {}: {}", path.display(), reason));
                }
                Ok(lines.join("\n"))
            }
            DbCommands::Add { database } => {
                let mut handler = MetaHandler::open(&self.handler_options(database))?;
                let uuids = ingest_reader(&mut handler, input)?;
                handler.save()?;
                info!(count = uuids.len(), "Added documents");
                Ok(uuids.join("\n"))
            }
        }
    }

    fn handle_models(&self, format: OutputFormat) -> Result<String, ApiError> {
        let models = self.models.list();
        match format {
            OutputFormat::Json => render_json(&Value::Array(
                models
                    .iter()
                    .map(|(priority, name)| json!({"name": name, "priority": priority}))
                    .collect(),
            )),
            OutputFormat::Text => {
                let mut table = comfy_table::Table::new();
                table.load_preset(comfy_table::presets::UTF8_BORDERS_ONLY);
                table.set_header(vec!["Priority", "Model"]);
                for (priority, name) in &models {
                    table.add_row(vec![priority.to_string(), name.to_string()]);
                }
                Ok(table.to_string())
            }
        }
    }

    fn handle_meta(
        &self,
        file: &Path,
        contents: Option<&str>,
        record_id: Option<&str>,
        save: bool,
    ) -> Result<String, ApiError> {
        let mut template = Document::new();
        if let Some(contents) = contents {
            template.insert("contents".to_string(), Value::from(contents));
        }
        if let Some(record_id) = record_id {
            template.insert("record_id".to_string(), Value::from(record_id));
        }
        let metadata = generate_metadata(&self.models, file, template)?;
        if save {
            metadata.save(&sidecar_path(file))?;
        }
        render_json(&Value::Object(metadata.to_outward_document()))
    }
}

/// Conjunction of a user PQL expression and an internal filter
fn combine_pql(user: Option<&str>, internal: Option<&str>) -> Option<String> {
    let user = user.map(str::trim).filter(|p| !p.is_empty());
    match (user, internal) {
        (Some(user), Some(internal)) => Some(format!("({}) and {}", user, internal)),
        (Some(user), None) => Some(user.to_string()),
        (None, Some(internal)) => Some(internal.to_string()),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::parse::Cli;
    use clap::Parser;
    use std::fs;
    use tempfile::TempDir;

    fn context(dir: &Path, host: &str) -> RunContext {
        let mut settings = ToolkitConfig::default();
        settings.db.meta.engine = "memory".to_string();
        settings.db.meta.host = host.to_string();
        RunContext::with_settings(
            dir.to_path_buf(),
            settings,
            Arc::new(ModelRegistry::with_builtins()),
        )
    }

    fn run(context: &RunContext, args: &[&str], input: &str) -> Result<String, ApiError> {
        let cli = Cli::try_parse_from(args).unwrap();
        context.execute_with_input(&cli.command, input.as_bytes())
    }

    #[test]
    fn test_combine_pql() {
        assert_eq!(combine_pql(None, None), None);
        assert_eq!(
            combine_pql(Some("record_id == 'r1'"), Some("_kind == 'file'")).unwrap(),
            "(record_id == 'r1') and _kind == 'file'"
        );
        assert_eq!(combine_pql(Some("  "), Some("a == 1")).unwrap(), "a == 1");
    }

    #[test]
    fn test_add_then_list_records_and_files() {
        let dir = TempDir::new().unwrap();
        let context = context(dir.path(), "cli-add-list");
        let input = r#"[{"record_id": "r1"}, {"record_id": "r1", "path": "r1/a.csv"}]"#;
        let uuids = run(&context, &["rdtk", "db", "add"], input).unwrap();
        assert_eq!(uuids.lines().count(), 2);

        let records = run(
            &context,
            &["rdtk", "db", "list", "records", "--format", "json"],
            "",
        )
        .unwrap();
        let records: Value = serde_json::from_str(&records).unwrap();
        assert_eq!(records.as_array().unwrap().len(), 1);

        let files = run(&context, &["rdtk", "db", "list", "files"], "").unwrap();
        assert!(files.contains("a.csv"));

        let databases = run(
            &context,
            &["rdtk", "db", "list", "databases", "--format", "json"],
            "",
        )
        .unwrap();
        assert!(databases.contains("default"));
    }

    #[test]
    fn test_models_listed_by_priority() {
        let dir = TempDir::new().unwrap();
        let context = context(dir.path(), "cli-models");
        let output = run(&context, &["rdtk", "models", "--format", "json"], "").unwrap();
        let models: Value = serde_json::from_str(&output).unwrap();
        assert_eq!(models[0]["name"], "AnnotationCsv");
        assert_eq!(models[0]["priority"], 3);
    }

    #[test]
    fn test_meta_generates_and_saves_sidecar() {
        let dir = TempDir::new().unwrap();
        let data = dir.path().join("front_timestamps.csv");
        fs::write(&data, "1000\n2000\n").unwrap();
        let context = context(dir.path(), "cli-meta");
        let output = run(
            &context,
            &[
                "rdtk",
                "meta",
                data.to_str().unwrap(),
                "--contents",
                "camera/front",
                "--save",
            ],
            "",
        )
        .unwrap();
        let generated: Value = serde_json::from_str(&output).unwrap();
        assert_eq!(generated["content-type"], "text/csv");
        assert_eq!(generated["end_timestamp"], 2.0);
        assert!(sidecar_path(&data).is_file());
    }

    #[test]
    fn test_empty_stdin_is_rejected() {
        let dir = TempDir::new().unwrap();
        let context = context(dir.path(), "cli-empty");
        assert!(matches!(
            run(&context, &["rdtk", "db", "add"], ""),
            Err(ApiError::EmptyStream(_))
        ));
    }
}
