//! Flattened tabular projection of handler rows.

use crate::catalog::config_doc::CollectionConfig;
use crate::types::{flatten_document, Document};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use serde_json::{Map, Value};

/// Column names (after display-name renaming) plus row values
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableView {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl TableView {
    /// Flatten nested mappings and rename columns to their display names
    pub fn from_documents(
        documents: impl IntoIterator<Item = Document>,
        config: &CollectionConfig,
    ) -> Self {
        Self::from_flat_rows(documents.into_iter().map(|d| flatten_document(&d)), config)
    }

    /// Build from rows that are already flat
    ///
    /// Configured columns come first in configuration order, followed by
    /// any other key in order of first appearance.
    pub fn from_flat_rows(rows: impl IntoIterator<Item = Document>, config: &CollectionConfig) -> Self {
        let rows: Vec<Document> = rows.into_iter().collect();
        let mut keys: Vec<String> = config
            .columns()
            .iter()
            .map(|c| c.name.clone())
            .filter(|name| rows.iter().any(|r| r.contains_key(name)))
            .collect();
        for row in &rows {
            for key in row.keys() {
                if !keys.contains(key) {
                    keys.push(key.clone());
                }
            }
        }

        let columns = keys
            .iter()
            .map(|k| config.display_name(k).to_string())
            .collect();
        let rows = rows
            .iter()
            .map(|row| {
                keys.iter()
                    .map(|k| row.get(k).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows as JSON objects keyed by display name
    pub fn to_json(&self) -> Value {
        Value::Array(
            self.rows
                .iter()
                .map(|row| {
                    let object: Map<String, Value> = self
                        .columns
                        .iter()
                        .cloned()
                        .zip(row.iter().cloned())
                        .collect();
                    Value::Object(object)
                })
                .collect(),
        )
    }

    /// Render with comfy-table
    pub fn render(&self) -> String {
        let mut table = Table::new();
        table.load_preset(UTF8_BORDERS_ONLY);
        table.set_header(self.columns.clone());
        for row in &self.rows {
            table.add_row(row.iter().map(cell_text).collect::<Vec<_>>());
        }
        table.to_string()
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
