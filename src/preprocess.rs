//! Pre-processing applied by the file reader after a model load.
//!
//! Each step maps `(timestamps, data)` to `(timestamps, data)` and steps run
//! in the order they were added.

use crate::error::ApiError;
use crate::model::Payload;
use ndarray::{ArrayD, Axis};
use std::fmt;
use std::str::FromStr;

pub trait Preprocess: Send + Sync {
    fn name(&self) -> &'static str;

    fn process(&self, timestamps: Vec<f64>, data: Payload) -> Result<(Vec<f64>, Payload), ApiError>;
}

/// Identity
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl Preprocess for PassThrough {
    fn name(&self) -> &'static str {
        "pass_through"
    }

    fn process(&self, timestamps: Vec<f64>, data: Payload) -> Result<(Vec<f64>, Payload), ApiError> {
        Ok((timestamps, data))
    }
}

/// Add a constant to every numeric value
#[derive(Debug, Clone, Copy)]
pub struct AddBias {
    pub bias: f64,
}

impl AddBias {
    pub fn new(bias: f64) -> Self {
        Self { bias }
    }
}

impl Preprocess for AddBias {
    fn name(&self) -> &'static str {
        "add_bias"
    }

    fn process(&self, timestamps: Vec<f64>, data: Payload) -> Result<(Vec<f64>, Payload), ApiError> {
        let shifted = data.to_ndarray()?.mapv(|v| v + self.bias);
        Ok((timestamps, Payload::Array(shifted)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DownsampleMode {
    /// First sample of every bucket
    #[default]
    Skipping,
    /// Mean of every bucket, stamped with its middle timestamp
    Averaging,
}

impl fmt::Display for DownsampleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownsampleMode::Skipping => f.write_str("skipping"),
            DownsampleMode::Averaging => f.write_str("averaging"),
        }
    }
}

impl FromStr for DownsampleMode {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "skipping" => Ok(DownsampleMode::Skipping),
            "averaging" => Ok(DownsampleMode::Averaging),
            other => Err(ApiError::InvalidArgument(format!(
                "unknown downsample mode '{}' (expected 'skipping' or 'averaging')",
                other
            ))),
        }
    }
}

/// Reduce to one sample per `1 / target_frame_rate` seconds
#[derive(Debug, Clone, Copy)]
pub struct Downsample {
    pub target_frame_rate: f64,
    pub mode: DownsampleMode,
}

impl Downsample {
    pub fn new(target_frame_rate: f64, mode: DownsampleMode) -> Result<Self, ApiError> {
        check_frame_rate(target_frame_rate)?;
        Ok(Self {
            target_frame_rate,
            mode,
        })
    }
}

impl Preprocess for Downsample {
    fn name(&self) -> &'static str {
        "downsample"
    }

    fn process(&self, timestamps: Vec<f64>, data: Payload) -> Result<(Vec<f64>, Payload), ApiError> {
        if timestamps.len() != data.len() {
            return Err(ApiError::DataError(format!(
                "cannot downsample {} samples against {} timestamps",
                data.len(),
                timestamps.len()
            )));
        }
        let groups = bucket_groups(&timestamps, self.target_frame_rate);
        match self.mode {
            DownsampleMode::Skipping => {
                let keep: Vec<usize> = groups.iter().map(|g| g[0]).collect();
                let kept_timestamps = keep.iter().map(|&i| timestamps[i]).collect();
                Ok((kept_timestamps, data.select(&keep)))
            }
            DownsampleMode::Averaging => {
                let array = data.to_ndarray()?;
                let mut means = Vec::with_capacity(groups.len());
                let mut stamps = Vec::with_capacity(groups.len());
                for group in &groups {
                    let mean = array
                        .select(Axis(0), group)
                        .mean_axis(Axis(0))
                        .ok_or_else(|| ApiError::DataError("empty bucket".to_string()))?;
                    means.push(mean);
                    stamps.push(timestamps[group[group.len() / 2]]);
                }
                let views: Vec<_> = means.iter().map(|m| m.view()).collect();
                let stacked: ArrayD<f64> = if views.is_empty() {
                    array.select(Axis(0), &[])
                } else {
                    ndarray::stack(Axis(0), &views)
                        .map_err(|e| ApiError::DataError(e.to_string()))?
                };
                Ok((stamps, Payload::Array(stacked)))
            }
        }
    }
}

/// Reject rates that cannot define buckets: zero, negative and non-finite
pub fn check_frame_rate(target_frame_rate: f64) -> Result<(), ApiError> {
    if target_frame_rate.is_finite() && target_frame_rate > 0.0 {
        Ok(())
    } else {
        Err(ApiError::InvalidArgument(format!(
            "target frame rate must be positive, got {}",
            target_frame_rate
        )))
    }
}

/// Bucket of a timestamp at a rate
fn bucket_of(timestamp: f64, rate: f64) -> i64 {
    (timestamp * rate).floor() as i64
}

/// Consecutive runs of samples sharing a bucket
fn bucket_groups(timestamps: &[f64], rate: f64) -> Vec<Vec<usize>> {
    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut current: Option<i64> = None;
    for (i, &ts) in timestamps.iter().enumerate() {
        let bucket = bucket_of(ts, rate);
        match (current, groups.last_mut()) {
            (Some(b), Some(group)) if b == bucket => group.push(i),
            _ => {
                groups.push(vec![i]);
                current = Some(bucket);
            }
        }
    }
    groups
}

/// Indices surviving downsampling: the first sample of every bucket
pub fn downsample_indices(timestamps: &[f64], target_frame_rate: f64) -> Vec<usize> {
    bucket_groups(timestamps, target_frame_rate)
        .into_iter()
        .map(|g| g[0])
        .collect()
}

/// Streaming form of [`downsample_indices`] for timestamps seen one at a time
///
/// Buckets are `floor(ts * rate)`, so at most one sample survives per
/// bucket. Two kept samples can be closer than `1 / rate` when the series is
/// not aligned to bucket boundaries (10 Hz from 0.3 s at 2 Hz keeps 0.3 and
/// 0.5).
#[derive(Debug, Clone, Copy, Default)]
pub struct BucketFilter {
    rate: Option<f64>,
    last: Option<i64>,
}

impl BucketFilter {
    /// `None` keeps every sample
    pub fn new(target_frame_rate: Option<f64>) -> Self {
        Self {
            rate: target_frame_rate,
            last: None,
        }
    }

    /// Whether the sample opens a new bucket
    pub fn keep(&mut self, timestamp: f64) -> bool {
        let rate = match self.rate {
            Some(rate) => rate,
            None => return true,
        };
        let bucket = bucket_of(timestamp, rate);
        let fresh = self.last != Some(bucket);
        self.last = Some(bucket);
        fresh
    }
}

/// Ordered list of steps, empty meaning identity
#[derive(Default)]
pub struct Pipeline {
    steps: Vec<Box<dyn Preprocess>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: Box<dyn Preprocess>) {
        self.steps.push(step);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub fn run(&self, timestamps: Vec<f64>, data: Payload) -> Result<(Vec<f64>, Payload), ApiError> {
        self.steps
            .iter()
            .try_fold((timestamps, data), |(ts, d), step| step.process(ts, d))
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
