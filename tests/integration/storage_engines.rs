//! The same catalogue operations against each embedded engine

use crate::integration::test_utils::doc;
use rdtk::catalog::{AddOptions, Handler, HandlerOptions, MetaHandler};
use rdtk::store::{ReadOptions, SortOrder};
use serde_json::json;
use std::path::Path;
use tempfile::TempDir;

fn options(engine: &str, host: &Path) -> HandlerOptions {
    HandlerOptions::new()
        .engine(engine)
        .host(host.to_string_lossy().into_owned())
        .database("meta")
        .database_id("engines")
        .base_dir("/data")
}

fn populate(handler: &mut MetaHandler) {
    for (record, path, start) in [
        ("r1", "/data/r1/a.csv", 10.0),
        ("r2", "/data/r2/b.csv", 30.0),
        ("r2", "/data/r2/c.csv", 20.0),
    ] {
        handler
            .add_file(
                doc(json!({"record_id": record, "path": path, "start_timestamp": start})),
                AddOptions::default(),
            )
            .unwrap();
    }
    handler.save().unwrap();
}

fn exercise(engine: &str) {
    let dir = TempDir::new().unwrap();
    let mut handler = MetaHandler::open(&options(engine, dir.path())).unwrap();
    populate(&mut handler);

    let mut reopened = MetaHandler::open(&options(engine, dir.path())).unwrap();
    assert_eq!(reopened.len(), 3);
    assert!(reopened.iter().any(|d| d["path"] == "/data/r1/a.csv"));

    reopened
        .read(&ReadOptions::new().pql("start_timestamp >= 20"))
        .unwrap();
    assert_eq!(reopened.len(), 2);

    reopened
        .read(
            &ReadOptions::new()
                .order_by("start_timestamp", SortOrder::Ascending)
                .offset(1)
                .limit(1),
        )
        .unwrap();
    assert_eq!(reopened.len(), 1);
    assert_eq!(reopened.get(0).unwrap()["start_timestamp"], 20.0);
    assert_eq!(reopened.count_total(), Some(3));

    reopened
        .read(&ReadOptions::new().group_by("record_id"))
        .unwrap();
    assert_eq!(reopened.len(), 2);
    let r2 = reopened.iter().find(|d| d["record_id"] == "r2").unwrap();
    // start_timestamp aggregates with min
    assert_eq!(r2["start_timestamp"], 20.0);
}

#[test]
fn test_sled_engine() {
    exercise("sled");
}

#[test]
fn test_json_engine() {
    exercise("json");
}

#[test]
fn test_json_engine_writes_single_file() {
    let dir = TempDir::new().unwrap();
    let mut handler = MetaHandler::open(&options("json", dir.path())).unwrap();
    populate(&mut handler);
    let file = dir.path().join("meta.json");
    assert!(file.is_file());
    let stored: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(file).unwrap()).unwrap();
    assert!(stored
        .as_object()
        .unwrap()
        .contains_key(handler.collection_name()));
}

#[test]
fn test_count_total_can_be_disabled() {
    let dir = TempDir::new().unwrap();
    let mut handler = MetaHandler::open(&options("sled", dir.path())).unwrap();
    populate(&mut handler);
    handler
        .read(&ReadOptions::new().disable_count_total())
        .unwrap();
    assert_eq!(handler.len(), 3);
    assert_eq!(handler.count_total(), None);
}
