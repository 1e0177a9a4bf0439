//! Controller state and status snapshots

use serde::{Deserialize, Serialize};

use crate::qso::{Direction, Qso, QsoHandle, QsoState};
use crate::talker::TalkerPolicy;

/// How the next DTMF command is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ControllerState {
    /// Commands come from the normal command table
    #[default]
    Normal,
    /// Commands are callsign prefixes or candidate selections
    ConnectByCallPending,
}

impl ControllerState {
    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::ConnectByCallPending => "Connect by callsign",
        }
    }
}

/// Summary of one session
///
/// This is a simplified snapshot of a [`Qso`] that can be sent across channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QsoSummary {
    /// Session handle
    pub handle: QsoHandle,
    /// Remote callsign
    pub callsign: String,
    /// Who initiated the session
    pub direction: Direction,
    /// Directory node id, known for outgoing calls
    pub station_id: Option<u32>,
    /// Current state
    pub state: QsoState,
    /// Whether the remote side is sending audio
    pub is_receiving: bool,
}

impl QsoSummary {
    /// Create from a session
    pub fn from_qso(qso: &Qso) -> Self {
        Self {
            handle: qso.handle(),
            callsign: qso.callsign().to_string(),
            direction: qso.direction(),
            station_id: qso.station_id(),
            state: qso.state(),
            is_receiving: qso.is_receiving(),
        }
    }
}

/// Snapshot of the whole module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleStatus {
    /// Whether the module is active
    pub active: bool,
    /// Command state
    pub state: ControllerState,
    /// Live sessions in registration order
    pub sessions: Vec<QsoSummary>,
    /// Current talker
    pub talker: Option<QsoHandle>,
    /// How the next talker is chosen
    pub talker_policy: TalkerPolicy,
    /// Local squelch open
    pub squelch_open: bool,
    /// Outgoing connection being set up
    pub outgoing_pending: Option<QsoHandle>,
    /// Cached directory entries
    pub directory_size: usize,
    /// Announcement items waiting to be played
    pub playback_queue_len: usize,
}

impl ModuleStatus {
    /// Number of connected sessions
    pub fn connected(&self) -> usize {
        self.sessions
            .iter()
            .filter(|s| s.state.is_connected())
            .count()
    }
}
