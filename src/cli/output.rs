//! CLI output: error mapping and rendering of tables in the requested format.

use crate::catalog::TableView;
use crate::cli::parse::OutputFormat;
use crate::error::ApiError;
use serde_json::Value;

/// Map domain errors to a string for CLI output
pub fn map_error(e: &ApiError) -> String {
    match e {
        ApiError::SchemaViolation { kind, violations } => format!(
            "Document does not match schema {}:\n  {}",
            kind,
            violations.join("\n  ")
        ),
        other => other.to_string(),
    }
}

pub fn render_table(view: &TableView, format: OutputFormat) -> Result<String, ApiError> {
    match format {
        OutputFormat::Json => render_json(&view.to_json()),
        OutputFormat::Text if view.is_empty() => Ok("No entries.".to_string()),
        OutputFormat::Text => Ok(view.render()),
    }
}

pub fn render_json(value: &Value) -> Result<String, ApiError> {
    Ok(serde_json::to_string_pretty(value)?)
}
