//! Reading and writing files through the model registry

use crate::integration::test_utils::{doc, write_ten_hz_table};
use ndarray::{Array3, ArrayD};
use rdtk::error::ApiError;
use rdtk::io::{FileReader, FileWriter, ReadRequest};
use rdtk::model::{
    generate_metadata, sidecar_path, ContentsSelector, DecoderRegistry, LoadOptions,
    LoadRequest, Metadata, Model, ModelClass, ModelRegistry, ModelState, Payload, Selectors,
};
use serde_json::json;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn builtins() -> Arc<ModelRegistry> {
    Arc::new(ModelRegistry::with_builtins())
}

fn metadata(value: serde_json::Value) -> Metadata {
    Metadata::from_document(doc(value))
}

#[test]
fn test_sidecar_read_with_target_frame_rate() {
    let dir = TempDir::new().unwrap();
    let path = write_ten_hz_table(dir.path(), "speed.csv", 10);
    metadata(json!({"path": path, "content_type": "text/csv", "contents": "speed"}))
        .save(&sidecar_path(&path))
        .unwrap();

    let output = FileReader::new(builtins())
        .read(&ReadRequest::new().path(&path).target_frame_rate(2.0))
        .unwrap();
    assert_eq!(output.timestamps.len(), 2);
    assert!(output.timestamps[1] - output.timestamps[0] >= 0.5);
    assert_eq!(output.data.len(), output.timestamps.len());
}

#[test]
fn test_generic_table_rejects_closed_time_range() {
    let dir = TempDir::new().unwrap();
    let path = write_ten_hz_table(dir.path(), "speed.csv", 10);
    let result = FileReader::new(builtins()).read(
        &ReadRequest::new()
            .metadata(metadata(json!({"path": path, "content_type": "text/csv", "contents": "speed"})))
            .time_range(Some(0.2), Some(0.4)),
    );
    assert!(matches!(result, Err(ApiError::InvalidArgument(_))));
}

#[test]
fn test_camera_timestamps_generated_then_read() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("front.csv");
    fs::write(&path, "1000\n1100\n1200\n1300\n").unwrap();
    let registry = builtins();

    let generated = generate_metadata(
        &registry,
        &path,
        doc(json!({"contents": {"camera/front": {"tags": ["camera"]}}})),
    )
    .unwrap();
    assert_eq!(generated.content_type(), Some("text/csv"));
    assert_eq!(generated.start_timestamp(), Some(1.0));
    assert_eq!(generated.end_timestamp(), Some(1.3));

    let output = FileReader::new(registry)
        .read(&ReadRequest::new().metadata(generated))
        .unwrap();
    assert_eq!(output.model, "CameraTimestampCsv");
    assert_eq!(output.columns, vec!["camera/front/timestamp"]);
    assert_eq!(output.timestamps.len(), 4);
    assert_eq!(output.timestamps[0], 1.0);
}

fn write_drive_log(dir: &Path) -> std::path::PathBuf {
    let lines = [
        json!({"topic": "/gps", "msg_type": "sensor_msgs/NavSatFix", "timestamp": 1.0,
               "message": {"latitude": 35.0, "longitude": 139.0}}),
        json!({"topic": "/speed", "msg_type": "std_msgs/Float64", "timestamp": 1.2,
               "message": {"data": 4.5}}),
        json!({"topic": "/gps", "msg_type": "sensor_msgs/NavSatFix", "timestamp": 2.0,
               "message": {"latitude": 35.1, "longitude": 139.1}}),
    ];
    let body: String = lines.iter().map(|l| format!("{}\n", l)).collect();
    let path = dir.join("drive.jsonl");
    fs::write(&path, body).unwrap();
    path
}

#[test]
fn test_message_log_narrowed_to_one_topic() {
    let dir = TempDir::new().unwrap();
    let path = write_drive_log(dir.path());
    let registry = builtins();
    let generated = generate_metadata(&registry, &path, Default::default()).unwrap();
    let contents = generated.contents().unwrap().as_object().unwrap();
    assert!(contents.contains_key("/gps"));
    assert!(contents.contains_key("/speed"));

    let output = FileReader::new(registry)
        .read(&ReadRequest::new().metadata(generated).contents("/gps"))
        .unwrap();
    assert_eq!(output.model, "NavSatFix");
    assert_eq!(output.columns, vec!["/gps/latitude", "/gps/longitude"]);
    assert_eq!(output.data.to_ndarray().unwrap().shape(), &[2, 2]);
}

#[test]
fn test_image_written_then_read() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mask.pgm");
    let registry = builtins();
    let image: ArrayD<u8> = Array3::from_shape_fn((2, 3, 1), |(y, x, _)| (y * 3 + x) as u8).into_dyn();

    FileWriter::new(registry.clone())
        .write(
            &metadata(json!({"path": path})),
            Vec::new(),
            Payload::Bytes(image),
            &Default::default(),
        )
        .unwrap();
    assert!(sidecar_path(&path).is_file());

    let output = FileReader::new(registry)
        .read(&ReadRequest::new().path(&path))
        .unwrap();
    assert_eq!(output.model, "GenericImage");
    assert!(output.timestamps.is_empty());
    let array = output.data.to_ndarray().unwrap();
    assert_eq!(array.shape(), &[2, 3, 1]);
    assert_eq!(array[[1, 2, 0]], 5.0);
}

struct ConstantModel {
    state: ModelState,
}

impl Model for ConstantModel {
    fn state(&self) -> &ModelState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ModelState {
        &mut self.state
    }

    fn read(&mut self, _request: &LoadRequest) -> Result<(), ApiError> {
        self.state
            .set_data(vec![0.0, 1.0], Payload::from_values(vec![json!(7.0), json!(8.0)]));
        Ok(())
    }
}

fn construct_constant(state: ModelState) -> Box<dyn Model> {
    Box::new(ConstantModel { state })
}

#[test]
fn test_private_registry_selects_by_priority() {
    let registry = ModelRegistry::new(Arc::new(DecoderRegistry::with_builtins()));
    let any = || {
        Selectors::new()
            .extensions(&[".dat"])
            .contents(ContentsSelector::pattern(".*").unwrap())
    };
    registry
        .register(ModelClass::new("Fallback", 0, any(), construct_constant))
        .unwrap();
    registry
        .register(ModelClass::new("Constant", 5, any(), construct_constant))
        .unwrap();

    let dat = metadata(json!({"path": "/d/x.dat", "contents": "value"}));
    let mut model = registry.instantiate(&dat).unwrap();
    assert_eq!(model.name(), "Constant");
    model.load(&LoadOptions::new()).unwrap();
    assert_eq!(model.timestamps(), &[0.0, 1.0]);
    assert_eq!(model.columns().unwrap(), vec!["value"]);

    assert!(registry.is_sealed());
    let late = registry.register(ModelClass::new("Late", 9, any(), construct_constant));
    assert!(matches!(late, Err(ApiError::RegistrationClosed(_))));

    let other = metadata(json!({"path": "/d/x.bin", "contents": "value"}));
    assert!(matches!(
        registry.select(&other),
        Err(ApiError::NoModelMatched(_))
    ));
}
