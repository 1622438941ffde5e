//! Property-based tests for catalogue identity and merging

use proptest::prelude::*;
use proptest::test_runner::{Config, TestRunner};
use rdtk::catalog::uuid::derive_uuid;
use rdtk::catalog::{AddOptions, Handler, HandlerOptions, MetaHandler, Orient};
use rdtk::types::{Document, CREATION_TIME_KEY};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};

static HOSTS: AtomicUsize = AtomicUsize::new(0);

/// Memory catalogue on a host no other case uses
fn fresh_handler(prefix: &str, orient: Orient) -> MetaHandler {
    let host = format!("{}-{}", prefix, HOSTS.fetch_add(1, Ordering::Relaxed));
    MetaHandler::open(
        &HandlerOptions::new()
            .engine("memory")
            .host(host)
            .database("meta")
            .database_id("prop")
            .base_dir("/data")
            .orient(orient),
    )
    .unwrap()
}

fn runner(cases: u32) -> TestRunner {
    TestRunner::new(Config {
        cases,
        ..Config::default()
    })
}

fn doc(value: Value) -> Document {
    value.as_object().cloned().unwrap()
}

/// Test that the UUID depends on the index columns only
#[test]
fn test_uuid_determinism_property() {
    let mut runner = TestRunner::default();
    let index = vec!["record_id".to_string(), "path".to_string()];

    runner
        .run(
            &("[a-z0-9_]{1,12}", "[a-z/]{0,20}", any::<i64>(), any::<bool>()),
            |(record, path, extra, flag)| {
                let plain = doc(json!({"record_id": record, "path": path}));
                let decorated = doc(json!({"flag": flag, "path": path, "note": extra, "record_id": record}));
                let uuid = derive_uuid(&plain, &index);
                assert_eq!(uuid, derive_uuid(&plain, &index));
                assert_eq!(uuid, derive_uuid(&decorated, &index));
                assert_eq!(uuid.len(), 32);
                Ok(())
            },
        )
        .unwrap();
}

/// Test that adding the same document twice leaves one entry
#[test]
fn test_upsert_idempotence_property() {
    let mut runner = runner(64);

    runner
        .run(&("[a-z0-9]{1,8}", any::<i32>()), |(record, value)| {
            let mut handler = fresh_handler("prop-upsert", Orient::Path);
            let document = doc(json!({"record_id": record, "path": "/data/a.csv", "value": value}));
            let first = handler.add_file(document.clone(), AddOptions::default()).unwrap();
            let second = handler.add_file(document, AddOptions::default()).unwrap();
            assert_eq!(first, second);
            assert_eq!(handler.len(), 1);
            assert_eq!(handler.get(0).unwrap()["value"], json!(value));
            Ok(())
        })
        .unwrap();
}

/// Test that merging documents with disjoint keys is order independent
#[test]
fn test_merge_commutativity_property() {
    let mut runner = runner(64);
    let fields = prop::collection::btree_map("[a-z]{1,6}", any::<i32>(), 0..5);

    runner
        .run(&(fields.clone(), fields), |(left, right)| {
            let mut a = doc(json!({"record_id": "r1", "path": "/data/a.csv"}));
            let mut b = a.clone();
            for (key, value) in &left {
                a.insert(format!("x_{}", key), json!(value));
            }
            for (key, value) in &right {
                b.insert(format!("y_{}", key), json!(value));
            }

            let mut forward = fresh_handler("prop-merge", Orient::Path);
            forward.add_file(a.clone(), AddOptions::merge()).unwrap();
            forward.add_file(b.clone(), AddOptions::merge()).unwrap();

            let mut backward = fresh_handler("prop-merge", Orient::Path);
            backward.add_file(b, AddOptions::merge()).unwrap();
            backward.add_file(a, AddOptions::merge()).unwrap();

            let mut forward = forward.get(0).unwrap();
            let mut backward = backward.get(0).unwrap();
            forward.remove(CREATION_TIME_KEY);
            backward.remove(CREATION_TIME_KEY);
            assert_eq!(forward, backward);
            Ok(())
        })
        .unwrap();
}

/// Test that paths under the base directory come back unchanged
#[test]
fn test_path_round_trip_property() {
    let mut runner = runner(64);

    runner
        .run(&"[a-z]{1,8}(/[a-z0-9]{1,8}){0,3}\\.csv", |relative| {
            let mut handler = fresh_handler("prop-path", Orient::Path);
            let absolute = format!("/data/{}", relative);
            handler
                .add_file(doc(json!({"record_id": "r1", "path": absolute})), AddOptions::default())
                .unwrap();
            let stored = handler.core().documents().at(0).unwrap()["path"].clone();
            assert_eq!(stored, json!(relative));
            assert_eq!(handler.get(0).unwrap()["path"], json!(absolute));
            Ok(())
        })
        .unwrap();
}

/// Test that contents orientation yields one row per content
#[test]
fn test_orient_contents_length_property() {
    let mut runner = runner(32);

    runner
        .run(&prop::collection::btree_set("[a-z]{1,6}", 1..6), |names| {
            let mut handler = fresh_handler("prop-orient", Orient::Contents);
            let contents: serde_json::Map<String, Value> = names
                .iter()
                .map(|name| (format!("/{}", name), json!({"tags": [name]})))
                .collect();
            handler
                .add_file(
                    doc(json!({"record_id": "r1", "path": "/data/log.jsonl", "contents": contents})),
                    AddOptions::default(),
                )
                .unwrap();
            assert_eq!(handler.len(), names.len());
            assert!(handler
                .iter()
                .all(|row| row["contents"].as_object().map(|c| c.len()) == Some(1)));
            Ok(())
        })
        .unwrap();
}
