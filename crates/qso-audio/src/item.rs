//! Audio queue items
//!
//! Each item is a finite producer of mono `f32` samples. Items are read in
//! blocks by the [`MessagePlayer`](crate::MessagePlayer); when the sink only
//! accepts part of a block, the unconsumed tail is pushed back into the item
//! with [`QueueItem::unread_samples`] so the next read starts from exactly the
//! same sample.

use std::f64::consts::PI;
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::AudioError;

/// Size in bytes of one raw clip sample (signed 16-bit little endian)
const RAW_SAMPLE_BYTES: usize = 2;

/// Convert a duration in milliseconds to a sample count
pub fn samples_for_ms(length_ms: u32, sample_rate: u32) -> usize {
    (u64::from(sample_rate) * u64::from(length_ms) / 1000) as usize
}

/// A block of silence
#[derive(Debug, Clone)]
pub struct SilenceItem {
    total: usize,
    remaining: usize,
}

impl SilenceItem {
    /// Create `length_ms` milliseconds of silence
    pub fn new(length_ms: u32, sample_rate: u32) -> Self {
        let total = samples_for_ms(length_ms, sample_rate);
        Self {
            total,
            remaining: total,
        }
    }

    fn read_samples(&mut self, buf: &mut [f32]) -> usize {
        let count = buf.len().min(self.remaining);
        buf[..count].fill(0.0);
        self.remaining -= count;
        count
    }

    fn unread_samples(&mut self, count: usize) {
        self.remaining = (self.remaining + count).min(self.total);
    }
}

/// A sine tone
#[derive(Debug, Clone)]
pub struct ToneItem {
    frequency_hz: u32,
    /// Amplitude in thousandths of full scale
    amplitude: u32,
    sample_rate: u32,
    length: usize,
    pos: usize,
}

impl ToneItem {
    /// Create a tone of `frequency_hz` lasting `length_ms` milliseconds.
    ///
    /// `amplitude` is given in thousandths of full scale (1000 = 0 dBFS).
    pub fn new(frequency_hz: u32, amplitude: u32, length_ms: u32, sample_rate: u32) -> Self {
        Self {
            frequency_hz,
            amplitude: amplitude.min(1000),
            sample_rate,
            length: samples_for_ms(length_ms, sample_rate),
            pos: 0,
        }
    }

    /// Tone frequency in Hz
    pub fn frequency_hz(&self) -> u32 {
        self.frequency_hz
    }

    fn read_samples(&mut self, buf: &mut [f32]) -> usize {
        let count = buf.len().min(self.length - self.pos);
        let gain = f64::from(self.amplitude) / 1000.0;
        let step = 2.0 * PI * f64::from(self.frequency_hz) / f64::from(self.sample_rate.max(1));
        for sample in &mut buf[..count] {
            *sample = (gain * (step * self.pos as f64).sin()) as f32;
            self.pos += 1;
        }
        count
    }

    fn unread_samples(&mut self, count: usize) {
        self.pos = self.pos.saturating_sub(count);
    }
}

/// A clip of raw signed 16-bit little-endian mono samples stored in a file.
///
/// The file is opened lazily by [`QueueItem::prepare`] when the clip reaches
/// the head of the queue.
#[derive(Debug)]
pub struct FileClip {
    path: PathBuf,
    file: Option<File>,
    bytes: Vec<u8>,
}

impl FileClip {
    /// Create a clip for the given path; nothing is opened yet
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
            bytes: Vec::new(),
        }
    }

    /// Path of the clip
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&mut self) -> Result<(), AudioError> {
        if self.file.is_none() {
            let file = File::open(&self.path).map_err(|source| AudioError::ClipOpen {
                path: self.path.clone(),
                source,
            })?;
            debug!("Opened audio clip {:?}", self.path);
            self.file = Some(file);
        }
        Ok(())
    }

    fn read_samples(&mut self, buf: &mut [f32]) -> usize {
        let Some(file) = self.file.as_mut() else {
            return 0;
        };

        self.bytes.resize(buf.len() * RAW_SAMPLE_BYTES, 0);
        let mut filled = 0;
        while filled < self.bytes.len() {
            match file.read(&mut self.bytes[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(source) => {
                    let err = AudioError::ClipRead {
                        path: self.path.clone(),
                        source,
                    };
                    warn!("{}", err);
                    return 0;
                }
            }
        }

        // A trailing odd byte at end of file is not a sample
        let count = filled / RAW_SAMPLE_BYTES;
        for (sample, raw) in buf
            .iter_mut()
            .zip(self.bytes[..count * RAW_SAMPLE_BYTES].chunks_exact(RAW_SAMPLE_BYTES))
        {
            *sample = f32::from(i16::from_le_bytes([raw[0], raw[1]])) / 32768.0;
        }
        if filled % RAW_SAMPLE_BYTES != 0 {
            // Leave the file positioned after the last whole sample
            if let Err(source) = file.seek(SeekFrom::Current(-1)) {
                warn!("seek in audio clip {:?} failed: {}", self.path, source);
            }
        }
        count
    }

    fn unread_samples(&mut self, count: usize) {
        let Some(file) = self.file.as_mut() else {
            return;
        };
        let offset = (count * RAW_SAMPLE_BYTES) as i64;
        if let Err(source) = file.seek(SeekFrom::Current(-offset)) {
            let err = AudioError::ClipRead {
                path: self.path.clone(),
                source,
            };
            warn!("{}", err);
        }
    }
}

/// One entry in the playback queue
#[derive(Debug)]
pub enum QueueItem {
    /// A block of silence
    Silence(SilenceItem),
    /// A synthesized sine tone
    Tone(ToneItem),
    /// A raw PCM clip read from disk
    File(FileClip),
}

impl QueueItem {
    /// Create a silence item
    pub fn silence(length_ms: u32, sample_rate: u32) -> Self {
        Self::Silence(SilenceItem::new(length_ms, sample_rate))
    }

    /// Create a tone item
    pub fn tone(frequency_hz: u32, amplitude: u32, length_ms: u32, sample_rate: u32) -> Self {
        Self::Tone(ToneItem::new(frequency_hz, amplitude, length_ms, sample_rate))
    }

    /// Create a file clip item
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(FileClip::new(path))
    }

    /// Short label for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Silence(_) => "silence",
            Self::Tone(_) => "tone",
            Self::File(_) => "file",
        }
    }

    /// Acquire whatever the item needs before its first read.
    ///
    /// Only file clips can fail here; a failed item must be skipped.
    pub fn prepare(&mut self) -> Result<(), AudioError> {
        match self {
            Self::File(clip) => clip.open(),
            Self::Silence(_) | Self::Tone(_) => Ok(()),
        }
    }

    /// Fill the front of `buf` with samples and return how many were written.
    ///
    /// Never returns more than `buf.len()` or more than the item has left.
    /// A return of zero means the item is exhausted.
    pub fn read_samples(&mut self, buf: &mut [f32]) -> usize {
        match self {
            Self::Silence(item) => item.read_samples(buf),
            Self::Tone(item) => item.read_samples(buf),
            Self::File(item) => item.read_samples(buf),
        }
    }

    /// Push back the last `count` samples returned by `read_samples`
    pub fn unread_samples(&mut self, count: usize) {
        match self {
            Self::Silence(item) => item.unread_samples(count),
            Self::Tone(item) => item.unread_samples(count),
            Self::File(item) => item.unread_samples(count),
        }
    }
}
