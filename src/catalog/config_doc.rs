//! Column configuration of a collection
//!
//! Stored as the single document of the sibling `--config--<name>` collection.
//! Holds the ordered column list, the index columns hashed into `_uuid`, and
//! free-form settings. Keys beginning with an underscore are read-only once set.

use crate::catalog::uuid::CONFIG_UUID;
use crate::error::ApiError;
use crate::store::Aggregation;
use crate::types::{Document, UUID_KEY};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

fn default_dtype() -> String {
    "string".to_string()
}

/// One column of the configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(default = "default_dtype")]
    pub dtype: String,
    #[serde(default)]
    pub aggregation: Aggregation,
    #[serde(default)]
    pub display_name: String,
}

impl ColumnSpec {
    pub fn new(name: &str, dtype: &str, aggregation: Aggregation, display_name: &str) -> Self {
        Self {
            name: name.to_string(),
            dtype: dtype.to_string(),
            aggregation,
            display_name: display_name.to_string(),
        }
    }

    /// Column discovered from a value, aggregated with `first`
    pub fn inferred(name: &str, value: &Value) -> Self {
        Self::new(name, infer_dtype(value), Aggregation::First, name)
    }

    /// Display name, falling back to the column name
    pub fn label(&self) -> &str {
        if self.display_name.is_empty() {
            &self.name
        } else {
            &self.display_name
        }
    }
}

/// Column configuration plus free-form settings
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CollectionConfig {
    #[serde(default)]
    columns: Vec<ColumnSpec>,
    #[serde(default)]
    index_columns: Vec<String>,
    #[serde(flatten)]
    extra: Document,
}

impl CollectionConfig {
    pub fn new(index_columns: Vec<String>, columns: Vec<ColumnSpec>) -> Self {
        Self {
            columns,
            index_columns,
            extra: Document::new(),
        }
    }

    /// Parse a stored configuration document
    pub fn from_document(mut document: Document) -> Result<Self, ApiError> {
        document.remove(UUID_KEY);
        document.remove(crate::types::CREATION_TIME_KEY);
        serde_json::from_value(Value::Object(document)).map_err(|e| {
            ApiError::InvalidDatabaseConfig(format!("malformed configuration document: {}", e))
        })
    }

    /// Serialise for storage under the fixed configuration UUID
    pub fn to_document(&self) -> Document {
        let mut document = match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Document::new(),
        };
        document.insert(UUID_KEY.to_string(), Value::String(CONFIG_UUID.to_string()));
        document
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn index_columns(&self) -> &[String] {
        &self.index_columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Append a column unless one with the same name exists
    pub fn add_column(&mut self, column: ColumnSpec) -> bool {
        if self.column(&column.name).is_some() {
            return false;
        }
        self.columns.push(column);
        true
    }

    pub fn set_aggregation(&mut self, name: &str, aggregation: Aggregation) {
        if let Some(column) = self.columns.iter_mut().find(|c| c.name == name) {
            column.aggregation = aggregation;
        }
    }

    pub fn set_all_aggregations(&mut self, aggregation: Aggregation) {
        for column in &mut self.columns {
            column.aggregation = aggregation;
        }
    }

    /// Aggregation per column, as handed to the storage adapter
    pub fn aggregations(&self) -> HashMap<String, Aggregation> {
        self.columns
            .iter()
            .map(|c| (c.name.clone(), c.aggregation))
            .collect()
    }

    pub fn display_name<'a>(&'a self, name: &'a str) -> &'a str {
        self.column(name).map(|c| c.label()).unwrap_or(name)
    }

    /// Read any configuration key
    pub fn get(&self, key: &str) -> Option<Value> {
        match key {
            "columns" => serde_json::to_value(&self.columns).ok(),
            "index_columns" => serde_json::to_value(&self.index_columns).ok(),
            other => self.extra.get(other).cloned(),
        }
    }

    /// Set a caller-visible key
    ///
    /// Underscore-prefixed keys are reserved and rejected.
    pub fn set(&mut self, key: &str, value: Value) -> Result<(), ApiError> {
        if key.starts_with('_') {
            return Err(ApiError::ReservedKey(key.to_string()));
        }
        match key {
            "columns" => {
                self.columns = serde_json::from_value(value).map_err(|e| {
                    ApiError::InvalidDatabaseConfig(format!("invalid columns: {}", e))
                })?;
            }
            "index_columns" => {
                let columns: Vec<String> = serde_json::from_value(value).map_err(|e| {
                    ApiError::InvalidDatabaseConfig(format!("invalid index_columns: {}", e))
                })?;
                if columns.is_empty() {
                    return Err(ApiError::InvalidDatabaseConfig(
                        "index_columns must not be empty".to_string(),
                    ));
                }
                self.index_columns = columns;
            }
            other => {
                self.extra.insert(other.to_string(), value);
            }
        }
        Ok(())
    }

    /// Set a reserved key once; changing an existing value is rejected
    pub(crate) fn set_reserved(&mut self, key: &str, value: Value) -> Result<(), ApiError> {
        match self.extra.get(key) {
            Some(existing) if existing != &value => Err(ApiError::ReservedKey(key.to_string())),
            Some(_) => Ok(()),
            None => {
                self.extra.insert(key.to_string(), value);
                Ok(())
            }
        }
    }
}

/// Dtype name for a runtime value
pub fn infer_dtype(value: &Value) -> &'static str {
    match value {
        Value::Null => "none",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

/// Coerce a value to a dtype
///
/// Null always passes through. Unknown dtypes leave the value untouched.
pub fn coerce(value: &Value, dtype: &str) -> Result<Value, String> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let dtype = dtype.trim().to_lowercase();

    if let Some(inner) = dtype.strip_suffix("[]") {
        return match value {
            Value::Array(items) => items
                .iter()
                .map(|item| coerce(item, inner))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            scalar => Ok(Value::Array(vec![coerce(scalar, inner)?])),
        };
    }

    match dtype.as_str() {
        "string" | "str" | "text" => Ok(match value {
            Value::String(_) => value.clone(),
            Value::Number(n) => Value::String(n.to_string()),
            Value::Bool(b) => Value::String(b.to_string()),
            other => Value::String(other.to_string()),
        }),
        "integer" | "int" => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
            Value::Number(n) => n
                .as_f64()
                .filter(|f| f.is_finite())
                .map(|f| Value::from(f.trunc() as i64))
                .ok_or_else(|| format!("cannot convert {} to integer", n)),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .or_else(|_| {
                    s.trim()
                        .parse::<f64>()
                        .map(|f| Value::from(f.trunc() as i64))
                })
                .map_err(|_| format!("cannot convert '{}' to integer", s)),
            Value::Bool(b) => Ok(Value::from(i64::from(*b))),
            other => Err(format!("cannot convert {} to integer", other)),
        },
        "number" | "float" | "double" => match value {
            Value::Number(n) => n
                .as_f64()
                .map(Value::from)
                .ok_or_else(|| format!("cannot convert {} to number", n)),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::from)
                .map_err(|_| format!("cannot convert '{}' to number", s)),
            Value::Bool(b) => Ok(Value::from(if *b { 1.0 } else { 0.0 })),
            other => Err(format!("cannot convert {} to number", other)),
        },
        "boolean" | "bool" => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::Number(n) => Ok(Value::Bool(n.as_f64().map(|f| f != 0.0).unwrap_or(false))),
            Value::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(Value::Bool(true)),
                "false" | "0" | "no" | "" => Ok(Value::Bool(false)),
                _ => Err(format!("cannot convert '{}' to boolean", s)),
            },
            other => Err(format!("cannot convert {} to boolean", other)),
        },
        "list" | "array" => match value {
            Value::Array(_) => Ok(value.clone()),
            scalar => Ok(Value::Array(vec![scalar.clone()])),
        },
        "dict" | "object" | "mapping" => match value {
            Value::Object(_) => Ok(value.clone()),
            other => Err(format!("cannot convert {} to dict", other)),
        },
        "datetime" | "timestamp" => coerce_datetime(value),
        _ => Ok(value.clone()),
    }
}

/// Datetimes are normalised to epoch seconds
fn coerce_datetime(value: &Value) -> Result<Value, String> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .map(Value::from)
            .ok_or_else(|| format!("cannot convert {} to datetime", n)),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Ok(Value::from(epoch_seconds(dt.timestamp(), dt.timestamp_subsec_micros())));
            }
            for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
                if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
                    let utc = naive.and_utc();
                    return Ok(Value::from(epoch_seconds(
                        utc.timestamp(),
                        utc.timestamp_subsec_micros(),
                    )));
                }
            }
            if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                if let Some(naive) = date.and_hms_opt(0, 0, 0) {
                    return Ok(Value::from(naive.and_utc().timestamp() as f64));
                }
            }
            s.parse::<f64>()
                .map(Value::from)
                .map_err(|_| format!("cannot convert '{}' to datetime", s))
        }
        other => Err(format!("cannot convert {} to datetime", other)),
    }
}

fn epoch_seconds(seconds: i64, micros: u32) -> f64 {
    seconds as f64 + f64::from(micros) / 1_000_000.0
}
