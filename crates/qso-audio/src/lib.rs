//! Announcement audio for radio link modules
//!
//! This crate provides the audio side of a link module's local transmit path:
//!
//! - **QueueItem**: finite sample producers (silence, tones, raw PCM clips)
//! - **MessagePlayer**: serializes queued items onto one non-blocking sink,
//!   resuming partially written blocks after back-pressure
//! - **AudioSink**: the trait the local transmit path implements
//!
//! # Example
//!
//! ```rust
//! use qso_audio::{AudioError, AudioSink, MessagePlayer};
//!
//! struct Discard;
//!
//! impl AudioSink for Discard {
//!     fn write_samples(&mut self, samples: &[f32]) -> Result<usize, AudioError> {
//!         Ok(samples.len())
//!     }
//! }
//!
//! let mut player = MessagePlayer::new(8000, Discard);
//! player.begin();
//! player.play_tone(1000, 500, 100);
//! player.play_silence(200);
//! player.end();
//! assert!(player.is_idle());
//! ```

pub mod error;
pub mod item;
pub mod player;
pub mod sink;

pub use error::AudioError;
pub use item::{samples_for_ms, FileClip, QueueItem, SilenceItem, ToneItem};
pub use player::{MessagePlayer, PlaybackEvent, WRITE_BLOCK_SIZE};
pub use sink::AudioSink;
