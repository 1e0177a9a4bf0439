//! Audio sink abstraction
//!
//! The sink is the local transmit path. It never blocks: when its buffer is
//! full it accepts fewer samples than offered and later reports, through the
//! owner, that it has become writable again.

use crate::error::AudioError;

/// Non-blocking destination for audio samples
pub trait AudioSink {
    /// Offer `samples` to the sink.
    ///
    /// Returns the number of samples accepted, which may be anything from
    /// zero up to `samples.len()`. A short write means the sink is full.
    fn write_samples(&mut self, samples: &[f32]) -> Result<usize, AudioError>;

    /// Signal that no more samples will follow for now
    fn flush(&mut self) {}
}

impl<S: AudioSink + ?Sized> AudioSink for Box<S> {
    fn write_samples(&mut self, samples: &[f32]) -> Result<usize, AudioError> {
        (**self).write_samples(samples)
    }

    fn flush(&mut self) {
        (**self).flush()
    }
}
