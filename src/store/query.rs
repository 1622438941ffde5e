//! Native structured queries
//!
//! A Mongo-like filter language over JSON documents. Filters are parsed once
//! from their JSON form into a [`Filter`] tree and then evaluated per document.

use crate::error::StorageError;
use crate::types::Document;
use regex::{Regex, RegexBuilder};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Parsed filter tree
#[derive(Debug, Clone)]
pub enum Filter {
    /// Matches every document
    All,
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Nor(Vec<Filter>),
    Field { path: Vec<String>, condition: Condition },
}

/// Condition applied to the values found at a field path
#[derive(Debug, Clone)]
pub enum Condition {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Regex(Regex),
    Exists(bool),
    Not(Box<Condition>),
    All(Vec<Condition>),
}

impl Filter {
    /// Parse a native query object
    pub fn parse(query: &Value) -> Result<Filter, StorageError> {
        let map = query
            .as_object()
            .ok_or_else(|| StorageError::InvalidQuery("query must be a mapping".to_string()))?;
        Self::parse_map(map)
    }

    fn parse_map(map: &Map<String, Value>) -> Result<Filter, StorageError> {
        let mut clauses = Vec::with_capacity(map.len());
        for (key, value) in map {
            let clause = match key.as_str() {
                "$and" => Filter::And(Self::parse_list(key, value)?),
                "$or" => Filter::Or(Self::parse_list(key, value)?),
                "$nor" => Filter::Nor(Self::parse_list(key, value)?),
                op if op.starts_with('$') => {
                    return Err(StorageError::InvalidQuery(format!(
                        "unknown top-level operator: {}",
                        op
                    )))
                }
                field => Filter::Field {
                    path: field.split('.').map(str::to_string).collect(),
                    condition: Condition::parse(value)?,
                },
            };
            clauses.push(clause);
        }
        Ok(match clauses.len() {
            0 => Filter::All,
            1 => clauses.remove(0),
            _ => Filter::And(clauses),
        })
    }

    fn parse_list(op: &str, value: &Value) -> Result<Vec<Filter>, StorageError> {
        let items = value
            .as_array()
            .ok_or_else(|| StorageError::InvalidQuery(format!("{} expects a list", op)))?;
        items.iter().map(Filter::parse).collect()
    }

    /// Evaluate the filter against a document
    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::And(filters) => filters.iter().all(|f| f.matches(document)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(document)),
            Filter::Nor(filters) => !filters.iter().any(|f| f.matches(document)),
            Filter::Field { path, condition } => {
                let values = resolve(document, path);
                condition.evaluate(&values)
            }
        }
    }
}

impl Condition {
    fn parse(value: &Value) -> Result<Condition, StorageError> {
        let Some(map) = value.as_object() else {
            return Ok(Condition::Eq(value.clone()));
        };
        if map.is_empty() || !map.keys().all(|k| k.starts_with('$')) {
            return Ok(Condition::Eq(value.clone()));
        }

        let options = map.get("$options").and_then(|v| v.as_str()).unwrap_or("");
        let mut conditions = Vec::new();
        for (op, operand) in map {
            let condition = match op.as_str() {
                "$eq" => Condition::Eq(operand.clone()),
                "$ne" => Condition::Ne(operand.clone()),
                "$gt" => Condition::Gt(operand.clone()),
                "$gte" => Condition::Gte(operand.clone()),
                "$lt" => Condition::Lt(operand.clone()),
                "$lte" => Condition::Lte(operand.clone()),
                "$in" => Condition::In(expect_list(op, operand)?),
                "$nin" => Condition::Nin(expect_list(op, operand)?),
                "$regex" => {
                    let pattern = operand.as_str().ok_or_else(|| {
                        StorageError::InvalidQuery("$regex expects a string".to_string())
                    })?;
                    Condition::Regex(compile_regex(pattern, options)?)
                }
                "$options" => continue,
                "$exists" => Condition::Exists(truthy(operand)),
                "$not" => Condition::Not(Box::new(Condition::parse(operand)?)),
                other => {
                    return Err(StorageError::InvalidQuery(format!(
                        "unknown operator: {}",
                        other
                    )))
                }
            };
            conditions.push(condition);
        }
        Ok(if conditions.len() == 1 {
            conditions.remove(0)
        } else {
            Condition::All(conditions)
        })
    }

    fn evaluate(&self, values: &[&Value]) -> bool {
        match self {
            Condition::Eq(expected) => eq_any(values, expected),
            Condition::Ne(expected) => !eq_any(values, expected),
            Condition::Gt(bound) => cmp_any(values, bound, |o| o == Ordering::Greater),
            Condition::Gte(bound) => cmp_any(values, bound, |o| o != Ordering::Less),
            Condition::Lt(bound) => cmp_any(values, bound, |o| o == Ordering::Less),
            Condition::Lte(bound) => cmp_any(values, bound, |o| o != Ordering::Greater),
            Condition::In(candidates) => candidates.iter().any(|c| eq_any(values, c)),
            Condition::Nin(candidates) => !candidates.iter().any(|c| eq_any(values, c)),
            Condition::Regex(re) => values.iter().any(|v| match v {
                Value::String(s) => re.is_match(s),
                Value::Array(items) => items
                    .iter()
                    .any(|i| i.as_str().map(|s| re.is_match(s)).unwrap_or(false)),
                _ => false,
            }),
            // Null counts as absent
            Condition::Exists(wanted) => values.iter().any(|v| !v.is_null()) == *wanted,
            Condition::Not(inner) => !inner.evaluate(values),
            Condition::All(conditions) => conditions.iter().all(|c| c.evaluate(values)),
        }
    }
}

fn expect_list(op: &str, operand: &Value) -> Result<Vec<Value>, StorageError> {
    operand
        .as_array()
        .cloned()
        .ok_or_else(|| StorageError::InvalidQuery(format!("{} expects a list", op)))
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// Compile a regex with Mongo-style option letters
pub fn compile_regex(pattern: &str, options: &str) -> Result<Regex, StorageError> {
    let mut builder = RegexBuilder::new(pattern);
    for flag in options.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            other => {
                return Err(StorageError::InvalidQuery(format!(
                    "unsupported regex option: {}",
                    other
                )))
            }
        };
    }
    builder
        .build()
        .map_err(|e| StorageError::InvalidQuery(format!("invalid regex '{}': {}", pattern, e)))
}

/// Collect the values found at a path, descending into arrays along the way
fn resolve<'a>(document: &'a Document, path: &[String]) -> Vec<&'a Value> {
    let Some((first, rest)) = path.split_first() else {
        return Vec::new();
    };
    let mut current: Vec<&Value> = document.get(first).into_iter().collect();
    for segment in rest {
        let mut next = Vec::new();
        for value in current {
            match value {
                Value::Object(map) => next.extend(map.get(segment)),
                Value::Array(items) => {
                    for item in items {
                        if let Some(found) = item.as_object().and_then(|m| m.get(segment)) {
                            next.push(found);
                        }
                    }
                }
                _ => {}
            }
        }
        current = next;
    }
    current
}

fn eq_any(values: &[&Value], expected: &Value) -> bool {
    if values.is_empty() {
        return expected.is_null();
    }
    values.iter().any(|v| {
        values_equal(v, expected)
            || matches!(v, Value::Array(items) if items.iter().any(|i| values_equal(i, expected)))
    })
}

fn cmp_any(values: &[&Value], bound: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    values.iter().any(|v| {
        let direct = compare_same_type(v, bound).map(&accept).unwrap_or(false);
        direct
            || matches!(v, Value::Array(items) if items
                .iter()
                .any(|i| compare_same_type(i, bound).map(&accept).unwrap_or(false)))
    })
}

/// Equality that treats `1` and `1.0` as the same number
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Compare two values of the same JSON type
fn compare_same_type(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Number(_)) => 1,
        Some(Value::String(_)) => 2,
        Some(Value::Object(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Bool(_)) => 5,
    }
}

/// Total order across JSON values, used for sorting and min/max aggregation
///
/// Missing and null sort first, then numbers, strings, mappings, lists and booleans.
pub fn total_cmp(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(f64::NAN), y.as_f64().unwrap_or(f64::NAN));
            x.total_cmp(&y)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Array(x)), Some(Value::Array(y))) => {
            for (i, j) in x.iter().zip(y.iter()) {
                let ord = total_cmp(Some(i), Some(j));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Some(x @ Value::Object(_)), Some(y @ Value::Object(_))) => {
            x.to_string().cmp(&y.to_string())
        }
        _ => Ordering::Equal,
    }
}
