//! Operator announcements
//!
//! Each announcement is rendered as one bracketed batch of clips, tones and
//! silences so that it reaches the transmitter as a single message.

use std::path::Path;

use qso_audio::{AudioSink, MessagePlayer};

/// Most candidates read out for an ambiguous callsign
pub const MAX_ANNOUNCED_CANDIDATES: usize = 9;

const ERROR_TONE_HZ: u32 = 440;
const ERROR_TONE_AMPLITUDE: u32 = 500;
const ERROR_TONE_MS: u32 = 150;
const GAP_MS: u32 = 300;

/// Something to tell the local operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Announcement {
    /// Command help
    Help,
    /// List of connected callsigns (empty: no connections)
    ConnectedStations(Vec<String>),
    /// Our own callsign
    OwnNode(String),
    /// Outgoing connection started
    Connecting(String),
    /// Session connected
    Connected(String),
    /// Session ended
    Disconnected(String),
    /// Node id not in the directory
    NotFound(String),
    /// No callsign matched the entered prefix
    NoMatch,
    /// Several callsigns matched the entered prefix
    Ambiguous(Vec<String>),
    /// Outgoing connection could not be made
    ConnectFailed(String),
    /// No free connection slot
    Busy,
    /// Command not understood
    UnknownCommand(String),
    /// Connect-by-callsign is waiting for a prefix
    EnterCallsign,
    /// Connect-by-callsign was cancelled or timed out
    CbcCancelled,
}

impl Announcement {
    /// Error announcements start with a short tone
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::NoMatch
                | Self::ConnectFailed(_)
                | Self::Busy
                | Self::UnknownCommand(_)
        )
    }

    /// Queue this announcement on `player` using clips from `sound_dir`
    pub fn render<S: AudioSink>(&self, player: &mut MessagePlayer<S>, sound_dir: &Path) {
        let mut out = Renderer { player, sound_dir };
        out.player.begin();
        if self.is_error() {
            out.player
                .play_tone(ERROR_TONE_HZ, ERROR_TONE_AMPLITUDE, ERROR_TONE_MS);
            out.player.play_silence(GAP_MS / 2);
        }
        match self {
            Self::Help => out.clip("help"),
            Self::ConnectedStations(calls) if calls.is_empty() => out.clip("no_connections"),
            Self::ConnectedStations(calls) => {
                out.clip("connected_stations");
                out.list(calls);
            }
            Self::OwnNode(call) => {
                out.clip("own_node");
                out.spell(call);
            }
            Self::Connecting(call) => {
                out.clip("connecting_to");
                out.spell(call);
            }
            Self::Connected(call) => {
                out.spell(call);
                out.clip("connected");
            }
            Self::Disconnected(call) => {
                out.spell(call);
                out.clip("disconnected");
            }
            Self::NotFound(id) => {
                out.spell(id);
                out.clip("not_found");
            }
            Self::NoMatch => out.clip("no_match"),
            Self::Ambiguous(calls) => {
                out.clip("select_station");
                out.list(&calls[..calls.len().min(MAX_ANNOUNCED_CANDIDATES)]);
            }
            Self::ConnectFailed(call) => {
                out.clip("connect_failed");
                out.spell(call);
            }
            Self::Busy => out.clip("busy"),
            Self::UnknownCommand(cmd) => {
                out.clip("unknown_command");
                out.spell(cmd);
            }
            Self::EnterCallsign => out.clip("enter_callsign"),
            Self::CbcCancelled => out.clip("cancelled"),
        }
        out.player.end();
    }
}

struct Renderer<'a, S> {
    player: &'a mut MessagePlayer<S>,
    sound_dir: &'a Path,
}

impl<S: AudioSink> Renderer<'_, S> {
    fn clip(&mut self, name: &str) {
        self.player
            .play_file(self.sound_dir.join(format!("{}.raw", name)));
    }

    fn spell(&mut self, text: &str) {
        for c in text.chars().filter(char::is_ascii_alphanumeric) {
            self.clip(&format!("phonetic_{}", c.to_ascii_lowercase()));
        }
    }

    fn list(&mut self, calls: &[String]) {
        for (idx, call) in calls.iter().enumerate() {
            self.player.play_silence(GAP_MS);
            self.spell(&(idx + 1).to_string());
            self.spell(call);
        }
    }
}
