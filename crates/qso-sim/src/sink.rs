//! Capturing audio sink

use qso_audio::{AudioError, AudioSink};

/// An audio sink that keeps everything written to it
///
/// With a capacity set, each write accepts at most that many samples,
/// which lets tests exercise back-pressure.
#[derive(Debug, Default, Clone)]
pub struct CaptureSink {
    samples: Vec<f32>,
    writes: usize,
    flushes: usize,
    capacity: Option<usize>,
}

impl CaptureSink {
    /// Create a sink that accepts everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sink that accepts at most `capacity` samples per write
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Default::default()
        }
    }

    /// Change the per-write limit
    pub fn set_capacity(&mut self, capacity: Option<usize>) {
        self.capacity = capacity;
    }

    /// Everything captured so far
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Number of samples captured
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True if nothing was captured
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of write calls
    pub fn writes(&self) -> usize {
        self.writes
    }

    /// Number of flushes (one per drained playback queue)
    pub fn flushes(&self) -> usize {
        self.flushes
    }

    /// Forget captured samples
    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

impl AudioSink for CaptureSink {
    fn write_samples(&mut self, samples: &[f32]) -> Result<usize, AudioError> {
        self.writes += 1;
        let take = self.capacity.map_or(samples.len(), |cap| cap.min(samples.len()));
        self.samples.extend_from_slice(&samples[..take]);
        Ok(take)
    }

    fn flush(&mut self) {
        self.flushes += 1;
    }
}
