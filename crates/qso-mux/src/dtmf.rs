//! DTMF command collection and parsing

use tracing::{debug, warn};

/// Digit that terminates a command
pub const COMMAND_TERMINATOR: char = '#';

/// Longest command accepted before the buffer is discarded
const MAX_COMMAND_LEN: usize = 32;

/// Shortest digit string treated as a node id
const MIN_NODE_ID_DIGITS: usize = 3;

/// A finished entry from the collector
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DtmfEntry {
    /// Digits entered before the terminator
    Command(String),
    /// The command ran past the length limit; everything up to the
    /// terminator was dropped
    Overlong,
}

/// Accumulates DTMF digits until the terminator arrives
#[derive(Debug, Clone, Default)]
pub struct DtmfCollector {
    buf: String,
    overflowed: bool,
}

impl DtmfCollector {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Digits collected so far
    pub fn pending(&self) -> &str {
        &self.buf
    }

    /// Discard collected digits
    pub fn reset(&mut self) {
        self.buf.clear();
        self.overflowed = false;
    }

    /// Add one digit; returns the finished entry when the terminator arrives
    pub fn push(&mut self, digit: char) -> Option<DtmfEntry> {
        let digit = digit.to_ascii_uppercase();
        if digit == COMMAND_TERMINATOR {
            let cmd = std::mem::take(&mut self.buf);
            if std::mem::take(&mut self.overflowed) {
                return Some(DtmfEntry::Overlong);
            }
            return Some(DtmfEntry::Command(cmd));
        }
        if !matches!(digit, '0'..='9' | 'A'..='D' | '*') {
            debug!("Ignoring non-DTMF character {:?}", digit);
            return None;
        }
        if self.overflowed {
            return None;
        }
        if self.buf.len() >= MAX_COMMAND_LEN {
            warn!("DTMF command too long, discarding \"{}\"", self.buf);
            self.buf.clear();
            self.overflowed = true;
            return None;
        }
        self.buf.push(digit);
        None
    }
}

/// A command entered in normal state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DtmfCommand {
    /// Disconnect the most recently added session
    DisconnectLast,
    /// Play help
    Help,
    /// List connected stations
    ListConnected,
    /// Announce our own callsign
    OwnNode,
    /// Enter connect-by-callsign mode and wait for a prefix
    ConnectByCallMode,
    /// Connect by callsign using the key sequence after `6*`
    ConnectByCall(String),
    /// Connect to a node id
    ConnectById(u32),
    /// Anything else
    Unknown(String),
}

/// Parse a command entered in normal state
pub fn parse_command(cmd: &str) -> DtmfCommand {
    match cmd {
        "" => DtmfCommand::DisconnectLast,
        "0" => DtmfCommand::Help,
        "1" => DtmfCommand::ListConnected,
        "2" => DtmfCommand::OwnNode,
        "6" => DtmfCommand::ConnectByCallMode,
        _ => {
            if let Some(keys) = cmd.strip_prefix("6*") {
                return if keys.is_empty() {
                    DtmfCommand::ConnectByCallMode
                } else {
                    DtmfCommand::ConnectByCall(keys.to_string())
                };
            }
            if cmd.len() >= MIN_NODE_ID_DIGITS && cmd.chars().all(|c| c.is_ascii_digit()) {
                if let Ok(id) = cmd.parse() {
                    return DtmfCommand::ConnectById(id);
                }
            }
            DtmfCommand::Unknown(cmd.to_string())
        }
    }
}

/// A command entered while connect-by-callsign is pending
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CbcCommand {
    /// Leave connect-by-callsign mode
    Cancel,
    /// Pick candidate `n` (1-based) from the last ambiguous list
    Select(usize),
    /// Match a new callsign prefix
    Prefix(String),
}

/// Parse a command entered while connect-by-callsign is pending
pub fn parse_cbc_command(cmd: &str) -> CbcCommand {
    if cmd.is_empty() {
        return CbcCommand::Cancel;
    }
    match cmd.strip_prefix('*') {
        Some(index) => index
            .parse()
            .map(CbcCommand::Select)
            .unwrap_or(CbcCommand::Cancel),
        None => CbcCommand::Prefix(cmd.to_string()),
    }
}
