//! In-process read pipeline: filter, group, count, sort, page.
//!
//! Engines with native query support run this against their own scan; the
//! adapter runs it for engines that can only return whole collections.

use crate::store::query::total_cmp;
use crate::store::{Aggregation, ReadRequest, ReadResult, SortOrder};
use crate::types::Document;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

/// Execute a compiled request over a full collection scan
pub fn execute(documents: Vec<Document>, request: &ReadRequest) -> ReadResult {
    let mut selected: Vec<Document> = match &request.filter {
        Some(filter) => documents.into_iter().filter(|d| filter.matches(d)).collect(),
        None => documents,
    };

    if let Some(key) = &request.group_by {
        selected = group(selected, key, request);
    }

    let count_total = if request.count_total {
        Some(selected.len())
    } else {
        None
    };

    if !request.order_by.is_empty() {
        selected.sort_by(|a, b| {
            for (field, order) in &request.order_by {
                let ord = total_cmp(a.get(field), b.get(field));
                let ord = match order {
                    SortOrder::Ascending => ord,
                    SortOrder::Descending => ord.reverse(),
                };
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        });
    }

    let offset = request.offset.unwrap_or(0);
    let documents: Vec<Document> = match request.limit {
        Some(limit) if limit > 0 => selected.into_iter().skip(offset).take(limit).collect(),
        _ => selected.into_iter().skip(offset).collect(),
    };

    ReadResult {
        documents,
        count_total,
    }
}

/// Group documents by a key, aggregating every other column
///
/// Groups keep the order in which their key first appears.
pub fn group(documents: Vec<Document>, key: &str, request: &ReadRequest) -> Vec<Document> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<Document>> = HashMap::new();
    for document in documents {
        let group_key = document
            .get(key)
            .map(|v| v.to_string())
            .unwrap_or_else(|| Value::Null.to_string());
        if !groups.contains_key(&group_key) {
            order.push(group_key.clone());
        }
        groups.entry(group_key).or_default().push(document);
    }

    debug!(key, groups = order.len(), "Grouped documents");

    order
        .into_iter()
        .filter_map(|k| groups.remove(&k))
        .map(|members| aggregate_group(&members, key, request))
        .collect()
}

fn aggregate_group(members: &[Document], key: &str, request: &ReadRequest) -> Document {
    let mut columns: Vec<&String> = Vec::new();
    for member in members {
        for column in member.keys() {
            if column != key && !columns.contains(&column) {
                columns.push(column);
            }
        }
    }

    let mut out = Document::new();
    out.insert(
        key.to_string(),
        members
            .first()
            .and_then(|m| m.get(key))
            .cloned()
            .unwrap_or(Value::Null),
    );

    for column in columns {
        let values: Vec<&Value> = members.iter().filter_map(|m| m.get(column)).collect();
        let aggregation = request
            .aggregations
            .get(column.as_str())
            .copied()
            .unwrap_or(Aggregation::First);
        out.insert(column.clone(), aggregate_values(aggregation, &values));
    }
    out
}

/// Apply one aggregation function to the values of a column within a group
pub fn aggregate_values(aggregation: Aggregation, values: &[&Value]) -> Value {
    match aggregation {
        Aggregation::First => values.first().map(|v| (*v).clone()).unwrap_or(Value::Null),
        Aggregation::Last => values.last().map(|v| (*v).clone()).unwrap_or(Value::Null),
        Aggregation::Min => values
            .iter()
            .min_by(|a, b| total_cmp(Some(**a), Some(**b)))
            .map(|v| (*v).clone())
            .unwrap_or(Value::Null),
        Aggregation::Max => values
            .iter()
            .max_by(|a, b| total_cmp(Some(**a), Some(**b)))
            .map(|v| (*v).clone())
            .unwrap_or(Value::Null),
        Aggregation::Push => Value::Array(
            values
                .iter()
                .map(|v| match v {
                    // Nested mappings are stringified so grouped rows stay flat
                    Value::Object(_) => Value::String(v.to_string()),
                    other => (*other).clone(),
                })
                .collect(),
        ),
    }
}
