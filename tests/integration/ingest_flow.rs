//! Generate sidecars, ingest a directory, then read every catalogued file

use crate::integration::test_utils::{doc, write_ten_hz_table};
use rdtk::catalog::{Handler, HandlerOptions, MetaHandler};
use rdtk::ingest::{ingest_directory, ingest_reader};
use rdtk::io::{FileReader, ReadRequest};
use rdtk::model::{generate_metadata, sidecar_path, Metadata, ModelRegistry};
use rdtk::store::ReadOptions;
use serde_json::json;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn handler(host: &str, base_dir: &Path) -> MetaHandler {
    MetaHandler::open(
        &HandlerOptions::new()
            .engine("memory")
            .host(host)
            .database("meta")
            .database_id("flow")
            .base_dir(base_dir),
    )
    .unwrap()
}

#[test]
fn test_generate_ingest_and_read_back() {
    let root = TempDir::new().unwrap();
    let record_dir = root.path().join("r1");
    fs::create_dir_all(&record_dir).unwrap();
    let registry = Arc::new(ModelRegistry::with_builtins());

    let speed = write_ten_hz_table(&record_dir, "speed.csv", 10);
    let front = record_dir.join("front.csv");
    fs::write(&front, "1000\n1100\n1200\n").unwrap();

    for (path, template) in [
        (&speed, json!({"record_id": "r1", "contents": "speed"})),
        (
            &front,
            json!({"record_id": "r1", "contents": {"camera/front": {"tags": ["camera"]}}}),
        ),
    ] {
        generate_metadata(&registry, path, doc(template))
            .unwrap()
            .save(&sidecar_path(path))
            .unwrap();
    }
    fs::write(root.path().join("r1.json"), r#"{"record_id": "r1", "vehicle": "v7"}"#).unwrap();

    let mut catalogue = handler("flow-generate", root.path());
    let report = ingest_directory(&mut catalogue, root.path()).unwrap();
    assert_eq!(report.files, 2);
    assert_eq!(report.records, 1);
    assert!(report.failed.is_empty());

    catalogue
        .read(&ReadOptions::new().pql("_kind == 'file'"))
        .unwrap();
    assert_eq!(catalogue.len(), 2);

    let reader = FileReader::new(registry);
    let mut models = Vec::new();
    for document in catalogue.iter() {
        let path = document["path"].as_str().unwrap().to_string();
        assert!(Path::new(&path).is_absolute());
        assert!(Path::new(&path).is_file());
        let output = reader
            .read(&ReadRequest::new().metadata(Metadata::from_document(document)))
            .unwrap();
        assert_eq!(output.data.len(), output.timestamps.len());
        models.push(output.model);
    }
    models.sort_unstable();
    assert_eq!(models, vec!["CameraTimestampCsv", "GenericCsv"]);

    catalogue
        .read(&ReadOptions::new().pql("_kind == 'record' and vehicle == 'v7'"))
        .unwrap();
    assert_eq!(catalogue.len(), 1);
}

#[test]
fn test_ingest_from_reader_then_save() {
    let mut catalogue = handler("flow-reader", Path::new("/data"));
    let input = r#"[
        {"record_id": "r1"},
        {"record_id": "r1", "path": "/data/r1/a.csv", "content-type": "text/csv"}
    ]"#;
    let ids = ingest_reader(&mut catalogue, input.as_bytes()).unwrap();
    assert_eq!(ids.len(), 2);
    assert!(catalogue.core().is_dirty());
    catalogue.save().unwrap();

    let mut reopened = handler("flow-reader", Path::new("/data"));
    reopened.read(&ReadOptions::new()).unwrap();
    assert_eq!(reopened.len(), 2);
    let file = reopened
        .iter()
        .find(|d| d["_kind"] == "file")
        .unwrap();
    assert_eq!(file["path"], "/data/r1/a.csv");
}
