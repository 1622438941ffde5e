//! Lazy per-sample sequences.

use crate::error::ApiError;
use crate::model::payload::Payload;
use std::fmt;

/// One chunk of a lazy load: parallel timestamps and samples
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub timestamps: Vec<f64>,
    pub data: Payload,
}

impl Sample {
    pub fn new(timestamp: f64, data: Payload) -> Self {
        Self {
            timestamps: vec![timestamp],
            data,
        }
    }
}

type SampleIter = Box<dyn Iterator<Item = Result<Sample, ApiError>> + Send>;

/// Finite, non-restartable sequence of samples
///
/// The underlying iterator owns any open file handle. It is dropped when the
/// sequence ends, when it yields its first error, or on [`SampleStream::close`].
pub struct SampleStream {
    inner: Option<SampleIter>,
}

impl SampleStream {
    pub fn new(iter: impl Iterator<Item = Result<Sample, ApiError>> + Send + 'static) -> Self {
        Self {
            inner: Some(Box::new(iter)),
        }
    }

    pub fn empty() -> Self {
        Self { inner: None }
    }

    /// Release the source early
    pub fn close(&mut self) {
        self.inner = None;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }
}

impl Iterator for SampleStream {
    type Item = Result<Sample, ApiError>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.inner.as_mut()?.next();
        match item {
            None => {
                self.inner = None;
                None
            }
            Some(Err(e)) => {
                self.inner = None;
                Some(Err(e))
            }
            ok => ok,
        }
    }
}

impl fmt::Debug for SampleStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleStream")
            .field("closed", &self.is_closed())
            .finish()
    }
}
