//! Message logs: one topic at a time, through a [`MessageLogDecoder`].
//!
//! The generic model flattens each message into a dotted-key record. Typed
//! models pick fixed fields out of well-known message types.

use super::decoder::{LogMessage, MessageIter, MessageLogDecoder};
use super::{
    content_columns, setting_strings, ContentsSelector, LoadRequest, Model, ModelClass,
    ModelState, Payload, Sample, SampleStream, Selectors,
};
use crate::error::ApiError;
use crate::preprocess::BucketFilter;
use crate::types::{flatten_value, Document};
use serde_json::{json, Map, Value};
use std::path::Path;
use std::sync::Arc;

const LOG_EXTENSIONS: &[&str] = &[".bag", ".jsonl"];
const IMU_COMPONENTS: &[&str] = &["orientation", "angular_velocity", "linear_acceleration"];

/// How a message becomes one sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Extractor {
    Flatten,
    Data,
    NavSatFix,
    AccelStamped,
    Range,
    Imu,
}

fn log_selectors(msg_type: &str) -> Result<Selectors, ApiError> {
    let contents = ContentsSelector::mapping(json!({".*": {"msg_type": msg_type}}))?;
    Ok(Selectors::new().extensions(LOG_EXTENSIONS).contents(contents))
}

fn generic_settings() -> Document {
    let mut settings = Document::new();
    settings.insert("exclude_keys".to_string(), json!(["header"]));
    settings
}

fn imu_settings() -> Document {
    let mut settings = Document::new();
    settings.insert("orientation".to_string(), json!(["x", "y", "z", "w"]));
    settings.insert("angular_velocity".to_string(), json!(["x", "y", "z"]));
    settings.insert("linear_acceleration".to_string(), json!(["x", "y", "z"]));
    settings
}

pub fn generic_message_log() -> Result<ModelClass, ApiError> {
    Ok(
        ModelClass::new("GenericMessageLog", 1, log_selectors(".*")?, construct_generic)
            .with_settings(generic_settings),
    )
}

pub fn std_msgs() -> Result<ModelClass, ApiError> {
    Ok(ModelClass::new(
        "StdMsgs",
        2,
        log_selectors("std_msgs/.*")?,
        construct_std_msgs,
    ))
}

pub fn nav_sat_fix() -> Result<ModelClass, ApiError> {
    Ok(ModelClass::new(
        "NavSatFix",
        2,
        log_selectors("sensor_msgs/NavSatFix")?,
        construct_nav_sat_fix,
    )
    .with_columns(&["latitude", "longitude"]))
}

pub fn accel_stamped() -> Result<ModelClass, ApiError> {
    Ok(ModelClass::new(
        "AccelStamped",
        2,
        log_selectors("geometry_msgs/AccelStamped")?,
        construct_accel_stamped,
    )
    .with_columns(&["accel_linear_x", "accel_linear_y", "accel_linear_z"]))
}

pub fn range() -> Result<ModelClass, ApiError> {
    Ok(ModelClass::new(
        "Range",
        2,
        log_selectors("sensor_msgs/Range")?,
        construct_range,
    )
    .with_columns(&["range"]))
}

pub fn imu() -> Result<ModelClass, ApiError> {
    Ok(
        ModelClass::new("Imu", 2, log_selectors("sensor_msgs/Imu")?, construct_imu)
            .with_settings(imu_settings),
    )
}

fn construct_generic(state: ModelState) -> Box<dyn Model> {
    Box::new(MessageLogModel::new(state, Extractor::Flatten))
}

fn construct_std_msgs(state: ModelState) -> Box<dyn Model> {
    Box::new(MessageLogModel::new(state, Extractor::Data))
}

fn construct_nav_sat_fix(state: ModelState) -> Box<dyn Model> {
    Box::new(MessageLogModel::new(state, Extractor::NavSatFix))
}

fn construct_accel_stamped(state: ModelState) -> Box<dyn Model> {
    Box::new(MessageLogModel::new(state, Extractor::AccelStamped))
}

fn construct_range(state: ModelState) -> Box<dyn Model> {
    Box::new(MessageLogModel::new(state, Extractor::Range))
}

fn construct_imu(state: ModelState) -> Box<dyn Model> {
    Box::new(MessageLogModel::new(state, Extractor::Imu))
}

fn number_at(message: &Value, pointer: &str) -> Value {
    message
        .pointer(pointer)
        .and_then(Value::as_f64)
        .map(Value::from)
        .unwrap_or(Value::Null)
}

/// `(component, axis)` pairs in output order
fn imu_axes(settings: &Document) -> Vec<(String, String)> {
    IMU_COMPONENTS
        .iter()
        .flat_map(|component| {
            settings
                .get(*component)
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(Value::as_str)
                .map(move |axis| (component.to_string(), axis.to_string()))
        })
        .collect()
}

/// Message-to-sample conversion, detached from the model so streams own it
#[derive(Debug, Clone)]
struct Converter {
    extractor: Extractor,
    exclude_keys: Vec<String>,
    imu_axes: Vec<(String, String)>,
}

impl Converter {
    fn convert(&self, message: &Value) -> Value {
        match self.extractor {
            Extractor::Flatten => {
                let mut flat = Vec::new();
                match message {
                    Value::Object(fields) => {
                        for (key, value) in fields {
                            if !self.exclude_keys.contains(key) {
                                flatten_value(key, value, &mut flat);
                            }
                        }
                    }
                    other => flatten_value("data", other, &mut flat),
                }
                Value::Object(flat.into_iter().collect::<Map<String, Value>>())
            }
            Extractor::Data => message.get("data").cloned().unwrap_or(Value::Null),
            Extractor::NavSatFix => {
                json!([number_at(message, "/latitude"), number_at(message, "/longitude")])
            }
            Extractor::AccelStamped => json!([
                number_at(message, "/accel/linear/x"),
                number_at(message, "/accel/linear/y"),
                number_at(message, "/accel/linear/z"),
            ]),
            Extractor::Range => number_at(message, "/range"),
            Extractor::Imu => Value::Array(
                self.imu_axes
                    .iter()
                    .map(|(component, axis)| {
                        number_at(message, &format!("/{}/{}", component, axis))
                    })
                    .collect(),
            ),
        }
    }
}

/// Messages of one topic inside the requested window and rate
struct TopicSamples {
    messages: MessageIter,
    filter: BucketFilter,
    start: Option<f64>,
    end: Option<f64>,
}

impl Iterator for TopicSamples {
    type Item = Result<(f64, LogMessage), ApiError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let message = match self.messages.next()? {
                Ok(message) => message,
                Err(e) => return Some(Err(e)),
            };
            let ts = message.timestamp();
            if self.start.map(|s| ts < s).unwrap_or(false)
                || self.end.map(|e| ts > e).unwrap_or(false)
            {
                continue;
            }
            if self.filter.keep(ts) {
                return Some(Ok((ts, message)));
            }
        }
    }
}

pub struct MessageLogModel {
    state: ModelState,
    extractor: Extractor,
}

impl MessageLogModel {
    fn new(state: ModelState, extractor: Extractor) -> Self {
        Self { state, extractor }
    }

    fn decoder(&self, path: &Path) -> Result<Arc<dyn MessageLogDecoder>, ApiError> {
        self.state.decoders().message_log(path)
    }

    fn converter(&self) -> Converter {
        Converter {
            extractor: self.extractor,
            exclude_keys: setting_strings(&self.state, "exclude_keys").unwrap_or_default(),
            imu_axes: imu_axes(self.state.settings()),
        }
    }

    fn samples(&self, request: &LoadRequest) -> Result<TopicSamples, ApiError> {
        let topic = request.require_content()?;
        let messages = self.decoder(&request.path)?.messages(&request.path, Some(&topic))?;
        Ok(TopicSamples {
            messages,
            filter: BucketFilter::new(request.target_frame_rate),
            start: request.start_timestamp,
            end: request.end_timestamp,
        })
    }
}

impl Model for MessageLogModel {
    fn state(&self) -> &ModelState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ModelState {
        &mut self.state
    }

    fn read(&mut self, request: &LoadRequest) -> Result<(), ApiError> {
        let converter = self.converter();
        let mut timestamps = Vec::new();
        let mut values = Vec::new();
        for sample in self.samples(request)? {
            let (ts, message) = sample?;
            timestamps.push(ts);
            values.push(converter.convert(&message.message));
        }
        let payload = match self.extractor {
            Extractor::Flatten => Payload::Records(values),
            _ => Payload::from_values(values),
        };
        self.state.set_data(timestamps, payload);
        Ok(())
    }

    fn read_stream(&self, request: &LoadRequest) -> Result<SampleStream, ApiError> {
        let converter = self.converter();
        let samples = self.samples(request)?;
        Ok(SampleStream::new(samples.map(move |sample| {
            let (ts, message) = sample?;
            let value = converter.convert(&message.message);
            let data = match converter.extractor {
                Extractor::Flatten => Payload::Records(vec![value]),
                _ => Payload::from_values(vec![value]),
            };
            Ok(Sample::new(ts, data))
        })))
    }

    /// Re-emit the payload as messages of the active topic
    fn write(&self, path: &Path, _options: &Document) -> Result<(), ApiError> {
        let topic = self.metadata().content_name()?.ok_or_else(|| {
            ApiError::InvalidArgument("a topic must be given to save a message log".to_string())
        })?;
        let msg_type = self
            .metadata()
            .contents()
            .and_then(|c| c.get(&topic))
            .and_then(|c| c.get("msg_type"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let messages: Vec<LogMessage> = self
            .timestamps()
            .iter()
            .zip(self.payload().to_values())
            .map(|(ts, message)| LogMessage {
                topic: topic.clone(),
                msg_type: msg_type.clone(),
                log_time: *ts,
                header_stamp: None,
                message,
            })
            .collect();
        self.decoder(path)?.write(path, &messages)
    }

    fn contents_meta(&self, path: &Path, content_key: &str) -> Result<Option<Value>, ApiError> {
        let topics = self.decoder(path)?.topics(path)?;
        let selected: Vec<_> = if topics.iter().any(|t| t.topic == content_key) {
            topics.into_iter().filter(|t| t.topic == content_key).collect()
        } else {
            topics
        };
        let contents: Map<String, Value> = selected
            .into_iter()
            .map(|t| {
                let tags: Vec<&str> = t.msg_type.split('/').filter(|s| !s.is_empty()).collect();
                (
                    t.topic,
                    json!({"msg_type": t.msg_type, "msg_md5sum": null, "count": t.count, "tags": tags}),
                )
            })
            .collect();
        Ok(Some(Value::Object(contents)))
    }

    fn timestamp_meta(&self, path: &Path) -> Result<Option<(f64, f64)>, ApiError> {
        let topics = self.decoder(path)?.topics(path)?;
        Ok(topics.iter().fold(None, |span, t| match span {
            None => Some((t.start, t.end)),
            Some((start, end)) => Some((f64::min(start, t.start), f64::max(end, t.end))),
        }))
    }

    fn columns(&self) -> Result<Vec<String>, ApiError> {
        match self.extractor {
            Extractor::Flatten => match self.payload() {
                Payload::Records(records) => Ok(records
                    .first()
                    .and_then(Value::as_object)
                    .map(|first| first.keys().cloned().collect())
                    .unwrap_or_default()),
                _ => content_columns(&self.state),
            },
            Extractor::Imu => {
                let content = self
                    .metadata()
                    .content_name()?
                    .unwrap_or_else(|| "unknown".to_string());
                Ok(imu_axes(self.state.settings())
                    .into_iter()
                    .map(|(component, axis)| format!("{}/{}_{}", content, component, axis))
                    .collect())
            }
            _ => content_columns(&self.state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::instance;
    use crate::model::LoadOptions;
    use std::fs;
    use tempfile::TempDir;

    fn write_log(dir: &TempDir) -> std::path::PathBuf {
        let lines = [
            json!({"topic": "/gps", "msg_type": "sensor_msgs/NavSatFix", "timestamp": 1.0,
                   "message": {"header": {"stamp": 0.0, "frame_id": "gps"}, "latitude": 35.0, "longitude": 139.0, "status": {"status": 0}}}),
            json!({"topic": "/imu", "msg_type": "sensor_msgs/Imu", "timestamp": 1.1,
                   "message": {"header": {"stamp": 1.05},
                               "orientation": {"x": 0.0, "y": 0.0, "z": 0.0, "w": 1.0},
                               "angular_velocity": {"x": 0.1, "y": 0.2, "z": 0.3},
                               "linear_acceleration": {"x": 0.0, "y": 0.0, "z": 9.8}}}),
            json!({"topic": "/gps", "msg_type": "sensor_msgs/NavSatFix", "timestamp": 1.6,
                   "message": {"header": {"stamp": 1.5}, "latitude": 35.1, "longitude": 139.1, "status": {"status": 0}}}),
            json!({"topic": "/gps", "msg_type": "sensor_msgs/NavSatFix", "timestamp": 2.2,
                   "message": {"header": {"stamp": 2.1}, "latitude": 35.2, "longitude": 139.2, "status": {"status": 1}}}),
        ];
        let body: String = lines.iter().map(|l| format!("{}\n", l)).collect();
        let path = dir.path().join("drive.jsonl");
        fs::write(&path, body).unwrap();
        path
    }

    fn gps_metadata(path: &Path) -> Value {
        json!({"path": path, "contents": {"/gps": {"msg_type": "sensor_msgs/NavSatFix"}}})
    }

    #[test]
    fn test_generic_flattens_and_excludes_header() {
        let dir = TempDir::new().unwrap();
        let path = write_log(&dir);
        let mut model = instance(generic_message_log().unwrap(), gps_metadata(&path));
        model.load(&LoadOptions::new()).unwrap();
        // zero header stamp falls back to the log time
        assert_eq!(model.timestamps(), &[1.0, 1.5, 2.1]);
        assert_eq!(
            model.columns().unwrap(),
            vec!["latitude", "longitude", "status.status"]
        );
        assert_eq!(model.to_ndarray().unwrap().shape(), &[3, 3]);
    }

    #[test]
    fn test_nav_sat_fix_columns_and_time_range() {
        let dir = TempDir::new().unwrap();
        let path = write_log(&dir);
        let mut model = instance(nav_sat_fix().unwrap(), gps_metadata(&path));
        model
            .load(&LoadOptions::new().time_range(Some(1.2), Some(2.5)))
            .unwrap();
        assert_eq!(model.timestamps(), &[1.5, 2.1]);
        assert_eq!(
            model.columns().unwrap(),
            vec!["/gps/latitude", "/gps/longitude"]
        );
        let array = model.to_ndarray().unwrap();
        assert_eq!(array.shape(), &[2, 2]);
        assert_eq!(array[[0, 0]], 35.1);
    }

    #[test]
    fn test_imu_components_configurable() {
        let dir = TempDir::new().unwrap();
        let path = write_log(&dir);
        let mut model = instance(
            imu().unwrap(),
            json!({"path": path, "contents": {"/imu": {"msg_type": "sensor_msgs/Imu"}}}),
        );
        let settings = json!({"orientation": [], "linear_acceleration": ["z"]});
        model.configure(settings.as_object().unwrap()).unwrap();
        model.load(&LoadOptions::new()).unwrap();
        assert_eq!(
            model.columns().unwrap(),
            vec![
                "/imu/angular_velocity_x",
                "/imu/angular_velocity_y",
                "/imu/angular_velocity_z",
                "/imu/linear_acceleration_z"
            ]
        );
        assert_eq!(
            model.to_ndarray().unwrap().iter().copied().collect::<Vec<_>>(),
            vec![0.1, 0.2, 0.3, 9.8]
        );
    }

    #[test]
    fn test_stream_downsamples() {
        let dir = TempDir::new().unwrap();
        let path = write_log(&dir);
        let mut model = instance(nav_sat_fix().unwrap(), gps_metadata(&path));
        let mut stream = model
            .load_stream(&LoadOptions::new().target_frame_rate(1.0))
            .unwrap();
        let first = stream.next().unwrap().unwrap();
        assert_eq!(first.timestamps, vec![1.0]);
        let rest: Vec<Sample> = stream.by_ref().collect::<Result<_, _>>().unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].timestamps, vec![2.1]);
        assert!(stream.is_closed());
    }

    #[test]
    fn test_topic_required_and_contents_meta() {
        let dir = TempDir::new().unwrap();
        let path = write_log(&dir);
        let mut model = instance(generic_message_log().unwrap(), json!({"path": path}));
        assert!(matches!(
            model.load(&LoadOptions::new()),
            Err(ApiError::InvalidArgument(_))
        ));
        let contents = model.contents_meta(&path, "content").unwrap().unwrap();
        assert_eq!(contents["/gps"]["count"], json!(3));
        assert_eq!(contents["/imu"]["msg_type"], json!("sensor_msgs/Imu"));
        assert_eq!(model.timestamp_meta(&path).unwrap(), Some((1.0, 2.1)));
    }
}
