//! Video containers, decoded through the registered video decoders.
//!
//! The generic model stamps frames with `index / fps`. The sidecar model
//! takes per-frame timestamps from `<stem>_timestamps.csv` instead and
//! produces channels-first RGB frames.

use super::decoder::{ChannelOrder, VideoInfo, VideoStream};
use super::{
    setting_bool, setting_f64, ContentsSelector, LoadRequest, Model, ModelClass, ModelState,
    Payload, Sample, SampleStream, Selectors,
};
use crate::error::ApiError;
use crate::preprocess::BucketFilter;
use crate::types::Document;
use ndarray::{Array3, ArrayD, Axis, IxDyn};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

const VIDEO_CONTENT_TYPE: &str = "video/mp4";
const DEFAULT_FPS: f64 = 30.0;
/// Rate used by the sidecar model when frames are not raw
const DEFAULT_TARGET_FRAME_RATE: f64 = 2.0;
const TIMESTAMPS_SUFFIX: &str = "_timestamps.csv";

fn video_selectors() -> Result<Selectors, ApiError> {
    Selectors::new()
        .extensions(&[".mp4"])
        .content_type(VIDEO_CONTENT_TYPE)
}

pub fn generic_video() -> Result<ModelClass, ApiError> {
    Ok(ModelClass::new("GenericVideo", 1, video_selectors()?, construct_generic))
}

pub fn video_with_timestamp_csv() -> Result<ModelClass, ApiError> {
    let contents = ContentsSelector::mapping(json!({"camera/.*": {"tags": [".*"]}}))?;
    Ok(ModelClass::new(
        "VideoWithTimestampCsv",
        2,
        video_selectors()?.contents(contents),
        construct_sidecar,
    )
    .with_probe(has_timestamp_sidecar)
    .with_settings(sidecar_settings))
}

fn sidecar_settings() -> Document {
    let mut settings = Document::new();
    settings.insert("resize_rate".to_string(), json!(0.5));
    settings.insert("raw".to_string(), json!(false));
    settings
}

fn construct_generic(state: ModelState) -> Box<dyn Model> {
    Box::new(VideoModel {
        state,
        sidecar: false,
    })
}

fn construct_sidecar(state: ModelState) -> Box<dyn Model> {
    Box::new(VideoModel {
        state,
        sidecar: true,
    })
}

/// `<dir>/<stem>_timestamps.csv` beside a video
pub fn timestamps_path(video: &Path) -> PathBuf {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    video.with_file_name(format!("{}{}", stem, TIMESTAMPS_SUFFIX))
}

fn has_timestamp_sidecar(metadata: &super::Metadata) -> bool {
    metadata
        .path()
        .map(|p| timestamps_path(&p).is_file())
        .unwrap_or(false)
}

fn frame_time(index: usize, fps: f64) -> f64 {
    if fps > 0.0 {
        index as f64 / fps
    } else {
        0.0
    }
}

fn stack_frames(frames: Vec<Array3<u8>>) -> Result<ArrayD<u8>, ApiError> {
    if frames.is_empty() {
        return Ok(ArrayD::zeros(IxDyn(&[0])));
    }
    let views: Vec<_> = frames.iter().map(|f| f.view()).collect();
    Ok(ndarray::stack(Axis(0), &views)?.into_dyn())
}

/// Nearest-neighbour resize of an `(H, W, C)` frame
fn resize(frame: &Array3<u8>, rate: f64) -> Array3<u8> {
    let (height, width, channels) = frame.dim();
    if height == 0 || width == 0 {
        return frame.clone();
    }
    let scaled = |n: usize| ((n as f64 * rate).round() as usize).max(1);
    let (new_height, new_width) = (scaled(height), scaled(width));
    Array3::from_shape_fn((new_height, new_width, channels), |(y, x, c)| {
        let sy = ((y as f64 / rate) as usize).min(height - 1);
        let sx = ((x as f64 / rate) as usize).min(width - 1);
        frame[[sy, sx, c]]
    })
}

/// Resize, BGR to RGB, then `(H, W, C)` to `(C, H, W)`
#[derive(Debug, Clone, Copy)]
struct FrameTransform {
    resize_rate: Option<f64>,
    swap_channels: bool,
}

impl FrameTransform {
    fn apply(&self, frame: Array3<u8>) -> Array3<u8> {
        let mut frame = match self.resize_rate {
            Some(rate) if rate != 1.0 => resize(&frame, rate),
            _ => frame,
        };
        if self.swap_channels {
            frame.invert_axis(Axis(2));
        }
        frame.permuted_axes([2, 0, 1]).as_standard_layout().to_owned()
    }
}

/// Frames of a generic video inside the requested window and rate
struct FrameReader {
    stream: Box<dyn VideoStream>,
    fps: f64,
    index: usize,
    start: Option<f64>,
    end: Option<f64>,
    filter: BucketFilter,
    done: bool,
}

impl Iterator for FrameReader {
    type Item = Result<(f64, Array3<u8>), ApiError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let frame = match self.stream.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };
            let ts = frame_time(self.index, self.fps);
            self.index += 1;
            if self.start.map(|s| ts < s).unwrap_or(false) {
                continue;
            }
            if self.end.map(|e| ts > e).unwrap_or(false) {
                self.done = true;
                break;
            }
            if self.filter.keep(ts) {
                return Some(Ok((ts, frame)));
            }
        }
        None
    }
}

/// Frames picked by index, in order
struct PlannedFrames {
    stream: Box<dyn VideoStream>,
    plan: std::vec::IntoIter<(usize, f64)>,
    position: usize,
    transform: FrameTransform,
}

impl Iterator for PlannedFrames {
    type Item = Result<(f64, Array3<u8>), ApiError>;

    fn next(&mut self) -> Option<Self::Item> {
        let (index, ts) = self.plan.next()?;
        if index != self.position {
            if let Err(e) = self.stream.seek(index) {
                return Some(Err(e));
            }
        }
        self.position = index + 1;
        match self.stream.next_frame() {
            Ok(Some(frame)) => Some(Ok((ts, self.transform.apply(frame)))),
            Ok(None) => Some(Err(ApiError::DataError(format!(
                "frame {} is past the end of the video",
                index
            )))),
            Err(e) => Some(Err(e)),
        }
    }
}

pub struct VideoModel {
    state: ModelState,
    sidecar: bool,
}

impl VideoModel {
    fn open(&self, path: &Path) -> Result<Box<dyn VideoStream>, ApiError> {
        if !path.is_file() {
            return Err(ApiError::FileNotFound(path.to_path_buf()));
        }
        self.state.decoders().video(path)?.open(path)
    }

    fn frames(
        &self,
        request: &LoadRequest,
    ) -> Result<Box<dyn Iterator<Item = Result<(f64, Array3<u8>), ApiError>> + Send>, ApiError>
    {
        let mut stream = self.open(&request.path)?;
        let info = stream.info();
        if self.sidecar {
            let transform = self.transform(&info);
            let plan = self.plan(request, &info)?;
            return Ok(Box::new(PlannedFrames {
                stream,
                plan: plan.into_iter(),
                position: 0,
                transform,
            }));
        }
        let first = request
            .start_timestamp
            .map(|s| (s * info.fps).floor().max(0.0) as usize)
            .unwrap_or(0);
        if first > 0 {
            stream.seek(first)?;
        }
        Ok(Box::new(FrameReader {
            stream,
            fps: info.fps,
            index: first,
            start: request.start_timestamp,
            end: request.end_timestamp,
            filter: BucketFilter::new(request.target_frame_rate),
            done: false,
        }))
    }

    fn raw(&self) -> bool {
        setting_bool(&self.state, "raw", false)
    }

    fn transform(&self, info: &VideoInfo) -> FrameTransform {
        FrameTransform {
            resize_rate: (!self.raw()).then(|| setting_f64(&self.state, "resize_rate", 0.5)),
            swap_channels: info.channel_order == ChannelOrder::Bgr,
        }
    }

    /// `(frame index, timestamp)` of every frame to read
    fn plan(&self, request: &LoadRequest, info: &VideoInfo) -> Result<Vec<(usize, f64)>, ApiError> {
        let timestamps = super::tabular::read_millisecond_column(&timestamps_path(&request.path))?;
        if timestamps.len() != info.frame_count {
            return Err(ApiError::DataError(format!(
                "{} has {} frames but {} timestamps",
                request.path.display(),
                info.frame_count,
                timestamps.len()
            )));
        }
        let rate = match (request.target_frame_rate, self.raw()) {
            (Some(rate), _) => Some(rate),
            (None, false) => Some(DEFAULT_TARGET_FRAME_RATE),
            (None, true) => None,
        };
        let mut filter = BucketFilter::new(rate);
        Ok(timestamps
            .into_iter()
            .enumerate()
            .filter(|(_, ts)| request.in_range(*ts))
            .filter(|(_, ts)| filter.keep(*ts))
            .collect())
    }
}

impl Model for VideoModel {
    fn state(&self) -> &ModelState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ModelState {
        &mut self.state
    }

    /// `resize_rate` must be a positive, finite number
    fn configure(&mut self, settings: &Document) -> Result<(), ApiError> {
        if let Some(value) = settings.get("resize_rate") {
            match value.as_f64() {
                Some(rate) if rate.is_finite() && rate > 0.0 => {}
                _ => {
                    return Err(ApiError::InvalidArgument(format!(
                        "resize_rate must be a positive number, got {}",
                        value
                    )))
                }
            }
        }
        self.state.apply_settings(settings)
    }

    fn read(&mut self, request: &LoadRequest) -> Result<(), ApiError> {
        let mut timestamps = Vec::new();
        let mut frames = Vec::new();
        for frame in self.frames(request)? {
            let (ts, frame) = frame?;
            timestamps.push(ts);
            frames.push(frame);
        }
        self.state.set_data(timestamps, Payload::Bytes(stack_frames(frames)?));
        Ok(())
    }

    fn read_stream(&self, request: &LoadRequest) -> Result<SampleStream, ApiError> {
        let frames = self.frames(request)?;
        Ok(SampleStream::new(frames.map(|frame| {
            let (ts, frame) = frame?;
            Ok(Sample::new(ts, Payload::Bytes(frame.insert_axis(Axis(0)).into_dyn())))
        })))
    }

    /// `fps` option, default 30
    fn write(&self, path: &Path, options: &Document) -> Result<(), ApiError> {
        if self.sidecar {
            return Err(ApiError::UnsupportedFile(format!(
                "{} cannot save {}",
                self.name(),
                path.display()
            )));
        }
        let frames = match self.payload() {
            Payload::Bytes(frames) => frames.clone(),
            other => other.to_ndarray()?.mapv(|v| v.clamp(0.0, 255.0).round() as u8),
        };
        let fps = options
            .get("fps")
            .and_then(Value::as_f64)
            .unwrap_or(DEFAULT_FPS);
        self.state.decoders().video(path)?.encode(path, &frames, fps)
    }

    fn contents_meta(&self, path: &Path, content_key: &str) -> Result<Option<Value>, ApiError> {
        if self.sidecar {
            return Ok(None);
        }
        let info = self.open(path)?.info();
        Ok(Some(json!({
            content_key: {
                "tags": ["video"],
                "fps": info.fps,
                "n_frames": info.frame_count,
                "duration": info.duration(),
                "height": info.height,
                "width": info.width,
                "n_channels": info.channels
            }
        })))
    }

    fn timestamp_meta(&self, path: &Path) -> Result<Option<(f64, f64)>, ApiError> {
        if self.sidecar {
            let timestamps = super::tabular::read_millisecond_column(&timestamps_path(path))?;
            return Ok(timestamps
                .first()
                .zip(timestamps.last())
                .map(|(s, e)| (*s, *e)));
        }
        Ok(Some((0.0, self.open(path)?.info().duration())))
    }
}
