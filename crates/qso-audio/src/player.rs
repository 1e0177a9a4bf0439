//! Message playback engine
//!
//! Serializes a FIFO of [`QueueItem`]s onto a single [`AudioSink`]. Writes
//! never block: when the sink takes less than a full block the remainder is
//! pushed back into the head item and playback resumes on the next
//! [`MessagePlayer::write_buffer_full`] notification.
//!
//! Callers that enqueue several items as one message bracket them with
//! [`MessagePlayer::begin`] / [`MessagePlayer::end`]. While the nesting level is
//! above zero, any request to advance playback is only remembered and is
//! executed when the outermost `end` returns the level to zero.

use std::collections::VecDeque;
use std::path::PathBuf;

use tracing::{debug, trace, warn};

use crate::item::QueueItem;
use crate::sink::AudioSink;

/// Number of samples read from an item per write attempt
pub const WRITE_BLOCK_SIZE: usize = 4 * 160;

/// Notifications from the player to its owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// The queue ran empty (or was cleared)
    AllMessagesWritten,
    /// An item was dropped because it could not be played
    ItemSkipped {
        /// Kind of the skipped item
        kind: &'static str,
    },
}

/// Result of pumping the head item into the sink
enum WriteOutcome {
    /// The sink is full; the head item still has samples left
    Blocked,
    /// The head item is exhausted or failed and must be removed
    Finished,
}

/// Plays queued announcement audio into a sink
#[derive(Debug)]
pub struct MessagePlayer<S> {
    sample_rate: u32,
    sink: S,
    queue: VecDeque<QueueItem>,
    nesting_level: u32,
    pending_play_next: bool,
    buf: Vec<f32>,
    events: Vec<PlaybackEvent>,
}

impl<S: AudioSink> MessagePlayer<S> {
    /// Create a player writing to `sink` at `sample_rate`
    pub fn new(sample_rate: u32, sink: S) -> Self {
        Self {
            sample_rate,
            sink,
            queue: VecDeque::new(),
            nesting_level: 0,
            pending_play_next: false,
            buf: vec![0.0; WRITE_BLOCK_SIZE],
            events: Vec::new(),
        }
    }

    /// Sample rate used for tones and silence
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Borrow the sink
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Mutably borrow the sink
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Number of items waiting (including the one being played)
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// True when nothing is queued
    pub fn is_idle(&self) -> bool {
        self.queue.is_empty()
    }

    /// Current begin/end nesting level
    pub fn nesting_level(&self) -> u32 {
        self.nesting_level
    }

    /// Queue a raw PCM clip
    pub fn play_file(&mut self, path: impl Into<PathBuf>) {
        self.enqueue(QueueItem::file(path));
    }

    /// Queue `length_ms` of silence
    pub fn play_silence(&mut self, length_ms: u32) {
        self.enqueue(QueueItem::silence(length_ms, self.sample_rate));
    }

    /// Queue a tone. `amplitude` is in thousandths of full scale.
    pub fn play_tone(&mut self, frequency_hz: u32, amplitude: u32, length_ms: u32) {
        self.enqueue(QueueItem::tone(
            frequency_hz,
            amplitude,
            length_ms,
            self.sample_rate,
        ));
    }

    /// Append an item; starts playback if the queue was empty
    pub fn enqueue(&mut self, item: QueueItem) {
        trace!("Queueing {} item", item.kind());
        self.queue.push_back(item);
        if self.queue.len() == 1 {
            self.play_msg();
        }
    }

    /// Open a batch of enqueue calls
    pub fn begin(&mut self) {
        if self.nesting_level == 0 {
            self.pending_play_next = false;
        }
        self.nesting_level += 1;
    }

    /// Close a batch; the outermost close runs any deferred playback
    pub fn end(&mut self) {
        if self.nesting_level == 0 {
            warn!("MessagePlayer::end called without matching begin");
            return;
        }
        self.nesting_level -= 1;
        if self.nesting_level == 0 && self.pending_play_next {
            self.pending_play_next = false;
            self.play_msg();
        }
    }

    /// Notification from the sink side that its buffer filled or drained
    pub fn write_buffer_full(&mut self, is_full: bool) {
        if !is_full && !self.queue.is_empty() {
            self.play_msg();
        }
    }

    /// Drop every queued item
    pub fn clear(&mut self) {
        if !self.queue.is_empty() {
            debug!("Clearing {} queued playback items", self.queue.len());
        }
        self.queue.clear();
        self.all_msgs_written();
    }

    /// Take all pending notifications
    pub fn drain_events(&mut self) -> Vec<PlaybackEvent> {
        std::mem::take(&mut self.events)
    }

    fn all_msgs_written(&mut self) {
        self.sink.flush();
        self.events.push(PlaybackEvent::AllMessagesWritten);
    }

    fn play_msg(&mut self) {
        if self.nesting_level > 0 {
            self.pending_play_next = true;
            return;
        }

        loop {
            let Some(item) = self.queue.front_mut() else {
                self.all_msgs_written();
                return;
            };

            if let Err(e) = item.prepare() {
                warn!("Skipping audio item: {}", e);
                let kind = item.kind();
                self.queue.pop_front();
                self.events.push(PlaybackEvent::ItemSkipped { kind });
                continue;
            }

            match write_item(item, &mut self.sink, &mut self.buf) {
                WriteOutcome::Blocked => return,
                WriteOutcome::Finished => {
                    if let Some(done) = self.queue.pop_front() {
                        trace!("Finished {} item", done.kind());
                    }
                }
            }
        }
    }
}

/// Pump `item` into `sink` until the sink fills up or the item runs dry
fn write_item<S: AudioSink>(item: &mut QueueItem, sink: &mut S, buf: &mut [f32]) -> WriteOutcome {
    loop {
        let read = item.read_samples(buf);
        if read == 0 {
            return WriteOutcome::Finished;
        }

        match sink.write_samples(&buf[..read]) {
            Ok(written) if written >= read => {}
            Ok(written) => {
                trace!("Sink full after {} of {} samples", written, read);
                item.unread_samples(read - written);
                return WriteOutcome::Blocked;
            }
            Err(e) => {
                warn!("Dropping {} item: {}", item.kind(), e);
                return WriteOutcome::Finished;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AudioError;
    use proptest::prelude::*;

    /// Sink that accepts at most `capacity` samples per write (None = unlimited)
    #[derive(Default)]
    struct TestSink {
        samples: Vec<f32>,
        writes: usize,
        capacity: Option<usize>,
        halve: bool,
        fail: bool,
    }

    impl AudioSink for TestSink {
        fn write_samples(&mut self, samples: &[f32]) -> Result<usize, AudioError> {
            if self.fail {
                return Err(AudioError::SinkWrite("device gone".into()));
            }
            self.writes += 1;
            let mut take = samples.len();
            if self.halve {
                take = samples.len().div_ceil(2);
            }
            if let Some(cap) = self.capacity {
                take = take.min(cap);
            }
            self.samples.extend_from_slice(&samples[..take]);
            Ok(take)
        }
    }

    fn reference(mut item: QueueItem) -> Vec<f32> {
        let mut out = Vec::new();
        let mut buf = [0.0f32; 97];
        loop {
            let n = item.read_samples(&mut buf);
            if n == 0 {
                return out;
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    #[test]
    fn test_enqueue_plays_immediately() {
        let mut player = MessagePlayer::new(8000, TestSink::default());
        player.play_silence(100);
        assert_eq!(player.sink().samples.len(), 800);
        assert!(player.is_idle());
        assert_eq!(
            player.drain_events(),
            vec![PlaybackEvent::AllMessagesWritten]
        );
    }

    #[test]
    fn test_begin_end_defers_playback() {
        let mut player = MessagePlayer::new(8000, TestSink::default());
        player.begin();
        player.play_tone(1000, 500, 10);
        player.begin();
        player.play_silence(10);
        player.end();
        player.play_tone(440, 500, 10);
        assert_eq!(player.sink().writes, 0);
        assert_eq!(player.queue_len(), 3);

        player.end();
        assert_eq!(player.nesting_level(), 0);
        assert!(player.is_idle());

        let mut expected = reference(QueueItem::tone(1000, 500, 10, 8000));
        expected.extend(reference(QueueItem::silence(10, 8000)));
        expected.extend(reference(QueueItem::tone(440, 500, 10, 8000)));
        assert_eq!(player.sink().samples, expected);
    }

    #[test]
    fn test_unbalanced_end_is_ignored() {
        let mut player = MessagePlayer::new(8000, TestSink::default());
        player.end();
        assert_eq!(player.nesting_level(), 0);
        player.play_silence(10);
        assert_eq!(player.sink().samples.len(), 80);
    }

    #[test]
    fn test_missing_file_is_skipped() {
        let mut player = MessagePlayer::new(8000, TestSink::default());
        player.begin();
        player.play_file("/nonexistent/qso-audio/missing.raw");
        player.play_silence(100);
        player.end();

        assert_eq!(player.sink().samples.len(), 800);
        assert!(player.sink().samples.iter().all(|s| *s == 0.0));
        let events = player.drain_events();
        assert!(events.contains(&PlaybackEvent::ItemSkipped { kind: "file" }));
        assert_eq!(events.last(), Some(&PlaybackEvent::AllMessagesWritten));
    }

    #[test]
    fn test_half_accepting_sink_delivers_everything_once() {
        let sink = TestSink {
            halve: true,
            ..Default::default()
        };
        let mut player = MessagePlayer::new(8000, sink);
        player.play_tone(1000, 800, 200);

        let mut notifications = 0;
        while !player.is_idle() {
            player.write_buffer_full(false);
            notifications += 1;
            assert!(notifications < 10_000);
        }

        let expected = reference(QueueItem::tone(1000, 800, 200, 8000));
        assert_eq!(player.sink().samples, expected);
    }

    #[test]
    fn test_full_notification_does_not_play() {
        let sink = TestSink {
            capacity: Some(0),
            ..Default::default()
        };
        let mut player = MessagePlayer::new(8000, sink);
        player.play_silence(10);
        let writes = player.sink().writes;
        player.write_buffer_full(true);
        assert_eq!(player.sink().writes, writes);
        assert_eq!(player.queue_len(), 1);
    }

    #[test]
    fn test_sink_error_skips_item() {
        let sink = TestSink {
            fail: true,
            ..Default::default()
        };
        let mut player = MessagePlayer::new(8000, sink);
        player.play_silence(10);
        assert!(player.is_idle());
    }

    #[test]
    fn test_clear_reports_empty() {
        let sink = TestSink {
            capacity: Some(10),
            ..Default::default()
        };
        let mut player = MessagePlayer::new(8000, sink);
        player.play_silence(100);
        player.play_tone(1000, 500, 100);
        player.drain_events();
        assert_eq!(player.queue_len(), 2);

        player.clear();
        assert!(player.is_idle());
        assert_eq!(
            player.drain_events(),
            vec![PlaybackEvent::AllMessagesWritten]
        );
    }

    proptest! {
        #[test]
        fn backpressure_never_loses_or_duplicates(
            capacity in 1usize..700,
            length_ms in 1u32..300,
        ) {
            let sink = TestSink { capacity: Some(capacity), ..Default::default() };
            let mut player = MessagePlayer::new(8000, sink);
            player.play_tone(700, 600, length_ms);
            while !player.is_idle() {
                player.write_buffer_full(false);
            }
            let expected = reference(QueueItem::tone(700, 600, length_ms, 8000));
            prop_assert_eq!(&player.sink().samples, &expected);
        }
    }
}
