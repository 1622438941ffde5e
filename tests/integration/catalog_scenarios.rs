//! End-to-end catalogue behaviour: grouping, PQL, schemas, orient and cascade

use crate::integration::test_utils::{doc, memory_options};
use rdtk::catalog::uuid::config_collection_name;
use rdtk::catalog::{
    open_handler, AddOptions, DatabaseIndexHandler, Handler, HandlerClass, MetaHandler, Orient,
};
use rdtk::error::ApiError;
use rdtk::schema::{FieldSpec, FieldType, ObjectShape, Schema, SchemaRegistry};
use rdtk::store::{ReadOptions, SortOrder};
use serde_json::json;
use std::sync::Arc;

#[test]
fn test_group_by_record_counts_groups() {
    let mut handler = MetaHandler::open(&memory_options("scenario-group")).unwrap();
    for (record, path) in [("r1", "/data/a"), ("r2", "/data/b"), ("r2", "/data/c")] {
        handler
            .add_file(doc(json!({"record_id": record, "path": path})), AddOptions::default())
            .unwrap();
    }
    handler.save().unwrap();

    handler
        .read(&ReadOptions::new().group_by("record_id"))
        .unwrap();
    assert_eq!(handler.len(), 2);
    assert_eq!(handler.count_total(), Some(2));
}

#[test]
fn test_pql_regex_filter() {
    let mut handler = MetaHandler::open(&memory_options("scenario-pql")).unwrap();
    for record in ["016_a", "017_b", "aux"] {
        handler
            .add_record(doc(json!({"record_id": record})), AddOptions::default())
            .unwrap();
    }
    handler.save().unwrap();

    handler
        .read(&ReadOptions::new().pql(r#"record_id == regex("01.*")"#))
        .unwrap();
    assert_eq!(handler.len(), 2);

    handler
        .read(
            &ReadOptions::new()
                .pql("not record_id like 'aux'")
                .order_by("record_id", SortOrder::Descending),
        )
        .unwrap();
    let ids: Vec<_> = handler.iter().map(|d| d["record_id"].clone()).collect();
    assert_eq!(ids, vec![json!("017_b"), json!("016_a")]);
}

#[test]
fn test_pql_and_query_are_exclusive() {
    let mut handler = MetaHandler::open(&memory_options("scenario-exclusive")).unwrap();
    let result = handler.read(
        &ReadOptions::new()
            .pql("record_id == 'r1'")
            .query(json!({"record_id": "r1"})),
    );
    assert!(matches!(result, Err(ApiError::StorageError(_))));
}

#[test]
fn test_schema_violation_leaves_buffer_unchanged() {
    let registry = SchemaRegistry::new();
    registry
        .register(Arc::new(Schema::new(
            "ns/v1",
            "File",
            ObjectShape::open(vec![
                FieldSpec::required("record_id", FieldType::non_empty_string()),
                FieldSpec::required("path", FieldType::non_empty_string()),
            ]),
        )))
        .unwrap();
    let options = memory_options("scenario-schema").schemas(Arc::new(registry));
    let mut handler = MetaHandler::open(&options).unwrap();

    let result = handler.add_data(
        doc(json!({"_api_version": "ns/v1", "_kind": "File", "record_id": "r1"})),
        AddOptions::default(),
    );
    assert!(matches!(result, Err(ApiError::SchemaViolation { .. })));
    assert!(handler.is_empty());

    // lookup is case-insensitive
    handler
        .add_data(
            doc(json!({"_api_version": "NS/V1", "_kind": "file", "record_id": "r1", "path": "/data/x"})),
            AddOptions::default(),
        )
        .unwrap();
    assert_eq!(handler.len(), 1);
}

#[test]
fn test_unknown_schema_is_reported() {
    let options = memory_options("scenario-unknown-schema").schemas(Arc::new(SchemaRegistry::new()));
    let mut handler = MetaHandler::open(&options).unwrap();
    let result = handler.add_data(
        doc(json!({"_api_version": "ns/v9", "_kind": "Nope", "record_id": "r1"})),
        AddOptions::default(),
    );
    assert!(matches!(result, Err(ApiError::SchemaNotFound { .. })));
}

#[test]
fn test_orient_contents_expands_rows() {
    let options = memory_options("scenario-orient").orient(Orient::Contents);
    let mut handler = MetaHandler::open(&options).unwrap();
    handler
        .add_file(
            doc(json!({
                "record_id": "r1",
                "path": "/data/r1/log.jsonl",
                "contents": {"a": {"tags": ["x"]}, "b": {"tags": ["y"]}}
            })),
            AddOptions::default(),
        )
        .unwrap();

    let rows: Vec<_> = handler.iter().collect();
    assert_eq!(rows.len(), 2);
    for row in &rows {
        assert_eq!(row["contents"].as_object().unwrap().len(), 1);
    }
    assert_eq!(rows[0]["contents"], json!({"a": {"tags": ["x"]}}));
    assert_eq!(rows[1]["contents"], json!({"b": {"tags": ["y"]}}));
}

#[test]
fn test_removing_index_entry_drops_catalogue() {
    let options = memory_options("scenario-cascade");
    let mut handler = MetaHandler::open(&options).unwrap();
    handler
        .add_file(
            doc(json!({"record_id": "r1", "path": "/data/r1/a.csv"})),
            AddOptions::default(),
        )
        .unwrap();
    handler.save().unwrap();
    let name = handler.collection_name().to_string();

    let mut index = DatabaseIndexHandler::open(&options).unwrap();
    assert_eq!(index.df_name_of("pytest").as_deref(), Some(name.as_str()));
    index
        .remove_data(&doc(json!({"database_id": "pytest"})))
        .unwrap();
    index.save().unwrap();

    handler.read(&ReadOptions::new()).unwrap();
    assert!(handler.is_empty());
    assert!(!handler.exist_table(&name).unwrap());
    assert!(!handler.exist_table(&config_collection_name(&name)).unwrap());
}

#[test]
fn test_upsert_merges_same_uuid() {
    let mut handler = MetaHandler::open(&memory_options("scenario-merge")).unwrap();
    let first = handler
        .add_file(
            doc(json!({"record_id": "r1", "path": "/data/a", "tags": ["x"], "note": "one"})),
            AddOptions::default(),
        )
        .unwrap();
    let second = handler
        .add_file(
            doc(json!({"record_id": "r1", "path": "/data/a", "tags": ["y", "x"]})),
            AddOptions::merge(),
        )
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(handler.len(), 1);
    let merged = handler.get(0).unwrap();
    assert_eq!(merged["tags"], json!(["x", "y"]));
    assert_eq!(merged["note"], "one");
}

#[test]
fn test_handler_classes_through_factory() {
    let options = memory_options("scenario-factory");
    let meta = open_handler(HandlerClass::Meta, &options).unwrap();
    assert!(meta.as_meta().is_some());
    let annotation = open_handler(HandlerClass::Annotation, &options).unwrap();
    assert_eq!(annotation.class(), HandlerClass::Annotation);
    assert!(annotation.as_meta().is_none());
}

#[test]
fn test_unsupported_engine() {
    let options = memory_options("scenario-engine").engine("mongodb");
    let result = MetaHandler::open(&options);
    assert!(matches!(result, Err(ApiError::StorageError(_))));
}
