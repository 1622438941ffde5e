//! Comma-separated tables.
//!
//! Headerless numeric tables keep the first column as the timestamp. Camera
//! timestamp tables hold a single millisecond column; annotation tables have
//! a header row and load as records.

use super::{
    content_columns, reject_time_range, ContentsSelector, LoadRequest, Model, ModelClass,
    ModelState, Payload, Sample, SampleStream, Selectors,
};
use crate::error::ApiError;
use crate::preprocess::BucketFilter;
use crate::types::Document;
use ndarray::{Array1, Array2, ArrayD};
use serde_json::{json, Map, Value};
use std::fs::File;
use std::path::{Path, PathBuf};

const CSV_CONTENT_TYPE: &str = "text/csv";
const MILLIS: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CsvKind {
    Generic,
    CameraTimestamps,
    Annotation,
}

fn csv_selectors() -> Result<Selectors, ApiError> {
    Selectors::new()
        .extensions(&[".csv"])
        .content_type(CSV_CONTENT_TYPE)
}

pub fn generic_csv() -> Result<ModelClass, ApiError> {
    let selectors = csv_selectors()?.contents(ContentsSelector::pattern(".*")?);
    Ok(ModelClass::new("GenericCsv", 1, selectors, construct_csv))
}

pub fn camera_timestamp_csv() -> Result<ModelClass, ApiError> {
    let contents = ContentsSelector::mapping(json!({"camera/.*": {"tags": [".*"]}}))?;
    let selectors = csv_selectors()?.contents(contents);
    Ok(
        ModelClass::new("CameraTimestampCsv", 2, selectors, construct_camera_timestamps)
            .with_columns(&["timestamp"]),
    )
}

pub fn annotation_csv() -> Result<ModelClass, ApiError> {
    let contents = ContentsSelector::mapping(json!({".*annotation": {"tags": [".*"]}}))?;
    let selectors = csv_selectors()?.data_type("annotation")?.contents(contents);
    Ok(ModelClass::new("AnnotationCsv", 3, selectors, construct_annotation))
}

pub fn construct_csv(state: ModelState) -> Box<dyn Model> {
    Box::new(CsvModel::new(state, CsvKind::Generic))
}

fn construct_camera_timestamps(state: ModelState) -> Box<dyn Model> {
    Box::new(CsvModel::new(state, CsvKind::CameraTimestamps))
}

fn construct_annotation(state: ModelState) -> Box<dyn Model> {
    Box::new(CsvModel::new(state, CsvKind::Annotation))
}

/// Numeric rows of a headerless table
struct NumericRows {
    path: PathBuf,
    records: csv::StringRecordsIntoIter<File>,
    line: usize,
}

impl NumericRows {
    fn open(path: &Path) -> Result<Self, ApiError> {
        if !path.is_file() {
            return Err(ApiError::FileNotFound(path.to_path_buf()));
        }
        let reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .trim(csv::Trim::All)
            .from_path(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            records: reader.into_records(),
            line: 0,
        })
    }
}

impl Iterator for NumericRows {
    type Item = Result<Vec<f64>, ApiError>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = match self.records.next()? {
            Ok(record) => record,
            Err(e) => return Some(Err(e.into())),
        };
        self.line += 1;
        let row = record
            .iter()
            .enumerate()
            .map(|(col, cell)| {
                cell.parse::<f64>().map_err(|_| {
                    ApiError::DataError(format!(
                        "{}:{}:{}: '{}' is not a number",
                        self.path.display(),
                        self.line,
                        col + 1,
                        cell
                    ))
                })
            })
            .collect();
        Some(row)
    }
}

fn first_column(row: &[f64]) -> f64 {
    row.first().copied().unwrap_or(f64::NAN)
}

/// First column of a headerless millisecond table, in seconds
pub(crate) fn read_millisecond_column(path: &Path) -> Result<Vec<f64>, ApiError> {
    NumericRows::open(path)?
        .map(|row| row.map(|row| first_column(&row) / MILLIS))
        .collect()
}

fn rows_to_array(rows: Vec<Vec<f64>>) -> Result<ArrayD<f64>, ApiError> {
    let width = rows.first().map(Vec::len).unwrap_or(0);
    let height = rows.len();
    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    Ok(Array2::from_shape_vec((height, width), flat)?.into_dyn())
}

/// Typed cell of an annotation table
fn cell_value(cell: &str) -> Value {
    if cell.is_empty() {
        Value::Null
    } else if let Ok(int) = cell.parse::<i64>() {
        Value::from(int)
    } else if let Ok(float) = cell.parse::<f64>() {
        Value::from(float)
    } else {
        Value::from(cell)
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `[start, end]` in seconds, open ends unbounded
fn time_bounds(request: &LoadRequest) -> (f64, f64) {
    let start = request
        .start_timestamp
        .or_else(|| request.metadata.start_timestamp());
    let end = request
        .end_timestamp
        .or_else(|| request.metadata.end_timestamp());
    (
        start.unwrap_or(f64::NEG_INFINITY),
        end.unwrap_or(f64::INFINITY),
    )
}

pub struct CsvModel {
    state: ModelState,
    kind: CsvKind,
    headers: Vec<String>,
}

impl CsvModel {
    fn new(state: ModelState, kind: CsvKind) -> Self {
        Self {
            state,
            kind,
            headers: Vec::new(),
        }
    }

    fn read_table(&mut self, request: &LoadRequest) -> Result<(), ApiError> {
        reject_time_range(self.name(), request)?;
        let mut filter = BucketFilter::new(request.target_frame_rate);
        let mut timestamps = Vec::new();
        let mut rows = Vec::new();
        for row in NumericRows::open(&request.path)? {
            let row = row?;
            let ts = first_column(&row);
            if filter.keep(ts) {
                timestamps.push(ts);
                rows.push(row);
            }
        }
        self.state.set_data(timestamps, Payload::Array(rows_to_array(rows)?));
        Ok(())
    }

    fn read_camera_timestamps(&mut self, request: &LoadRequest) -> Result<(), ApiError> {
        let (start, end) = time_bounds(request);
        let mut filter = BucketFilter::new(request.target_frame_rate);
        let mut seconds = Vec::new();
        for row in NumericRows::open(&request.path)? {
            let ts = first_column(&row?) / MILLIS;
            if ts >= start && ts <= end && filter.keep(ts) {
                seconds.push(ts);
            }
        }
        let data = Array1::from(seconds.clone()).into_dyn();
        self.state.set_data(seconds, Payload::Array(data));
        Ok(())
    }

    fn read_annotations(&mut self, request: &LoadRequest) -> Result<(), ApiError> {
        reject_time_range(self.name(), request)?;
        if !request.path.is_file() {
            return Err(ApiError::FileNotFound(request.path.clone()));
        }
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&request.path)?;
        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let mut records = Vec::new();
        for record in reader.records() {
            let record = record?;
            let row: Map<String, Value> = headers
                .iter()
                .cloned()
                .zip(record.iter().map(cell_value))
                .collect();
            records.push(Value::Object(row));
        }
        self.headers = headers;
        self.state.set_data(Vec::new(), Payload::Records(records));
        Ok(())
    }

    fn write_numeric(&self, path: &Path) -> Result<(), ApiError> {
        let mut array = self.to_ndarray()?;
        if self.kind == CsvKind::CameraTimestamps {
            array.mapv_inplace(|s| s * MILLIS);
        }
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(path)?;
        match array.ndim() {
            1 => {
                for value in array.iter() {
                    writer.write_record([value.to_string()])?;
                }
            }
            2 => {
                for row in array.rows() {
                    writer.write_record(row.iter().map(|v| v.to_string()))?;
                }
            }
            n => {
                return Err(ApiError::InvalidArgument(format!(
                    "cannot write a {}-dimensional array as CSV",
                    n
                )))
            }
        }
        writer.flush()?;
        Ok(())
    }

    fn write_records(&self, path: &Path) -> Result<(), ApiError> {
        let records = self.payload().to_values();
        let headers: Vec<String> = match (self.headers.is_empty(), records.first()) {
            (false, _) => self.headers.clone(),
            (true, Some(Value::Object(first))) => first.keys().cloned().collect(),
            (true, _) => Vec::new(),
        };
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(&headers)?;
        for record in &records {
            let row = headers
                .iter()
                .map(|h| record.get(h).map(cell_text).unwrap_or_default());
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl Model for CsvModel {
    fn state(&self) -> &ModelState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ModelState {
        &mut self.state
    }

    fn read(&mut self, request: &LoadRequest) -> Result<(), ApiError> {
        match self.kind {
            CsvKind::Generic => self.read_table(request),
            CsvKind::CameraTimestamps => self.read_camera_timestamps(request),
            CsvKind::Annotation => self.read_annotations(request),
        }
    }

    fn read_stream(&self, request: &LoadRequest) -> Result<SampleStream, ApiError> {
        let mut filter = BucketFilter::new(request.target_frame_rate);
        match self.kind {
            CsvKind::Generic => {
                reject_time_range(self.name(), request)?;
                let rows = NumericRows::open(&request.path)?;
                Ok(SampleStream::new(rows.filter_map(move |row| {
                    let row = match row {
                        Ok(row) => row,
                        Err(e) => return Some(Err(e)),
                    };
                    let ts = first_column(&row);
                    filter.keep(ts).then(|| {
                        Ok(Sample::new(ts, Payload::Array(Array1::from(row).into_dyn())))
                    })
                })))
            }
            CsvKind::CameraTimestamps => {
                let (start, end) = time_bounds(request);
                let rows = NumericRows::open(&request.path)?;
                Ok(SampleStream::new(rows.filter_map(move |row| {
                    let millis = match row {
                        Ok(row) => first_column(&row),
                        Err(e) => return Some(Err(e)),
                    };
                    let seconds = millis / MILLIS;
                    (seconds >= start && seconds <= end && filter.keep(seconds)).then(|| {
                        Ok(Sample::new(
                            seconds,
                            Payload::Array(Array1::from(vec![seconds]).into_dyn()),
                        ))
                    })
                })))
            }
            CsvKind::Annotation => {
                let mut model = CsvModel::new(self.state.clone(), CsvKind::Annotation);
                model.read_annotations(request)?;
                let records = model.payload().to_values();
                Ok(SampleStream::new(records.into_iter().map(|record| {
                    Ok(Sample {
                        timestamps: Vec::new(),
                        data: Payload::Records(vec![record]),
                    })
                })))
            }
        }
    }

    fn write(&self, path: &Path, _options: &Document) -> Result<(), ApiError> {
        match self.kind {
            CsvKind::Annotation => self.write_records(path),
            _ => self.write_numeric(path),
        }
    }

    fn contents_meta(&self, path: &Path, content_key: &str) -> Result<Option<Value>, ApiError> {
        let tags = match self.kind {
            CsvKind::Generic => return Ok(None),
            CsvKind::CameraTimestamps => json!(["camera", "timestamp"]),
            CsvKind::Annotation => {
                let mut reader = csv::Reader::from_path(path)?;
                let headers: Vec<String> =
                    reader.headers()?.iter().map(str::to_string).collect();
                return Ok(Some(json!({
                    content_key: {"tags": ["annotation"], "columns": headers}
                })));
            }
        };
        Ok(Some(json!({ content_key: {"tags": tags} })))
    }

    fn timestamp_meta(&self, path: &Path) -> Result<Option<(f64, f64)>, ApiError> {
        let scale = match self.kind {
            CsvKind::Annotation => return Ok(None),
            CsvKind::Generic => 1.0,
            CsvKind::CameraTimestamps => MILLIS,
        };
        let mut span: Option<(f64, f64)> = None;
        for row in NumericRows::open(path)? {
            let ts = first_column(&row?) / scale;
            span = Some(match span {
                None => (ts, ts),
                Some((start, end)) => (start.min(ts), end.max(ts)),
            });
        }
        Ok(span)
    }

    fn columns(&self) -> Result<Vec<String>, ApiError> {
        if self.kind == CsvKind::Annotation && !self.headers.is_empty() {
            return Ok(self.headers.clone());
        }
        content_columns(&self.state)
    }
}
