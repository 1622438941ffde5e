//! Format decoders behind the image, video and message-log models.
//!
//! Models never parse container formats themselves. They look a decoder up
//! by file extension, so external codecs plug in by registering here.

pub mod jsonl;
pub mod netpbm;

use crate::error::ApiError;
use crate::model::selector::extension_of;
use ndarray::{Array3, ArrayD};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Still image codec; images are `(H, W, C)` byte arrays
pub trait ImageDecoder: Send + Sync {
    fn extensions(&self) -> Vec<&'static str>;

    fn decode(&self, path: &Path) -> Result<ArrayD<u8>, ApiError>;

    fn encode(&self, path: &Path, image: &ArrayD<u8>) -> Result<(), ApiError> {
        let _ = image;
        Err(ApiError::UnsupportedFile(format!(
            "writing {} is not supported",
            path.display()
        )))
    }
}

/// Channel order of decoded frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelOrder {
    #[default]
    Rgb,
    Bgr,
}

/// Container properties reported by a video decoder
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VideoInfo {
    pub fps: f64,
    pub frame_count: usize,
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub channel_order: ChannelOrder,
}

impl VideoInfo {
    pub fn duration(&self) -> f64 {
        if self.fps > 0.0 {
            self.frame_count as f64 / self.fps
        } else {
            0.0
        }
    }
}

/// An open video; frames are `(H, W, C)`
pub trait VideoStream: Send {
    fn info(&self) -> VideoInfo;

    /// Position so that the next read returns frame `index`
    fn seek(&mut self, index: usize) -> Result<(), ApiError>;

    fn next_frame(&mut self) -> Result<Option<Array3<u8>>, ApiError>;
}

pub trait VideoDecoder: Send + Sync {
    fn extensions(&self) -> Vec<&'static str>;

    fn open(&self, path: &Path) -> Result<Box<dyn VideoStream>, ApiError>;

    /// Write `(N, H, W, C)` frames
    fn encode(&self, path: &Path, frames: &ArrayD<u8>, fps: f64) -> Result<(), ApiError> {
        let _ = (frames, fps);
        Err(ApiError::UnsupportedFile(format!(
            "writing {} is not supported",
            path.display()
        )))
    }
}

/// One message of a message log
#[derive(Debug, Clone, PartialEq)]
pub struct LogMessage {
    pub topic: String,
    pub msg_type: String,
    /// Time the message was recorded
    pub log_time: f64,
    /// Stamp carried in the message header, when it has one
    pub header_stamp: Option<f64>,
    pub message: Value,
}

impl LogMessage {
    /// Header stamp, falling back to the log time when absent or zero
    pub fn timestamp(&self) -> f64 {
        match self.header_stamp {
            Some(stamp) if stamp != 0.0 => stamp,
            _ => self.log_time,
        }
    }
}

/// Per-topic summary of a message log
#[derive(Debug, Clone, PartialEq)]
pub struct TopicInfo {
    pub topic: String,
    pub msg_type: String,
    pub count: usize,
    pub start: f64,
    pub end: f64,
}

pub type MessageIter = Box<dyn Iterator<Item = Result<LogMessage, ApiError>> + Send>;

pub trait MessageLogDecoder: Send + Sync {
    fn extensions(&self) -> Vec<&'static str>;

    /// Iterate messages, restricted to one topic when given
    fn messages(&self, path: &Path, topic: Option<&str>) -> Result<MessageIter, ApiError>;

    fn topics(&self, path: &Path) -> Result<Vec<TopicInfo>, ApiError>;

    fn write(&self, path: &Path, messages: &[LogMessage]) -> Result<(), ApiError> {
        let _ = messages;
        Err(ApiError::UnsupportedFile(format!(
            "writing {} is not supported",
            path.display()
        )))
    }
}

/// Decoders keyed by lowercase extension
#[derive(Default)]
pub struct DecoderRegistry {
    images: RwLock<HashMap<String, Arc<dyn ImageDecoder>>>,
    videos: RwLock<HashMap<String, Arc<dyn VideoDecoder>>>,
    logs: RwLock<HashMap<String, Arc<dyn MessageLogDecoder>>>,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the Netpbm and JSON-lines decoders
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register_image(Arc::new(netpbm::NetpbmCodec));
        registry.register_message_log(Arc::new(jsonl::JsonLinesLog));
        registry
    }

    pub fn register_image(&self, decoder: Arc<dyn ImageDecoder>) {
        let mut images = self.images.write();
        for ext in decoder.extensions() {
            images.insert(ext.to_lowercase(), decoder.clone());
        }
    }

    pub fn register_video(&self, decoder: Arc<dyn VideoDecoder>) {
        let mut videos = self.videos.write();
        for ext in decoder.extensions() {
            videos.insert(ext.to_lowercase(), decoder.clone());
        }
    }

    pub fn register_message_log(&self, decoder: Arc<dyn MessageLogDecoder>) {
        let mut logs = self.logs.write();
        for ext in decoder.extensions() {
            logs.insert(ext.to_lowercase(), decoder.clone());
        }
    }

    pub fn image(&self, path: &Path) -> Result<Arc<dyn ImageDecoder>, ApiError> {
        lookup(&self.images, path, "image")
    }

    pub fn video(&self, path: &Path) -> Result<Arc<dyn VideoDecoder>, ApiError> {
        lookup(&self.videos, path, "video")
    }

    pub fn message_log(&self, path: &Path) -> Result<Arc<dyn MessageLogDecoder>, ApiError> {
        lookup(&self.logs, path, "message log")
    }
}

fn lookup<T: ?Sized>(
    table: &RwLock<HashMap<String, Arc<T>>>,
    path: &Path,
    what: &str,
) -> Result<Arc<T>, ApiError> {
    let ext = extension_of(path);
    table.read().get(&ext).cloned().ok_or_else(|| {
        ApiError::UnsupportedFile(format!(
            "no {} decoder registered for '{}' ({})",
            what,
            ext,
            path.display()
        ))
    })
}

fn sorted_keys<V>(table: &HashMap<String, V>) -> Vec<String> {
    let mut keys: Vec<String> = table.keys().cloned().collect();
    keys.sort();
    keys
}

impl fmt::Debug for DecoderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderRegistry")
            .field("images", &sorted_keys(&self.images.read()))
            .field("videos", &sorted_keys(&self.videos.read()))
            .field("logs", &sorted_keys(&self.logs.read()))
            .finish()
    }
}
