//! Inbound notifications and outbound events of the module controller
//!
//! Everything that happens to the module (radio events, link protocol
//! callbacks, timers) arrives as a [`ModuleInput`] and is processed to
//! completion by `ModuleController::handle`. Everything observers may care
//! about leaves as a [`ModuleEvent`].

use std::time::Instant;

use crate::announce::Announcement;
use crate::qso::{Direction, QsoHandle, QsoState};
use crate::state::ControllerState;
use crate::station::{PeerInfo, StationData, StationStatus};
use crate::transport::LinkState;

/// Notifications delivered to the module controller
#[derive(Debug, Clone)]
pub enum ModuleInput {
    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------
    /// The framework activated the module
    Activate,
    /// The framework deactivated the module
    Deactivate,

    // -------------------------------------------------------------------------
    // Local radio
    // -------------------------------------------------------------------------
    /// Receiver squelch opened (true) or closed (false)
    Squelch(bool),
    /// A DTMF digit was detected
    DtmfDigit(char),
    /// A block of local receiver audio
    AudioFromRx(Vec<f32>),
    /// The local transmit audio buffer filled up or drained
    WriteBufferFull(bool),

    // -------------------------------------------------------------------------
    // Directory
    // -------------------------------------------------------------------------
    /// A complete station list was received
    StationListUpdated(Vec<StationData>),
    /// The directory request failed
    DirectoryError(String),
    /// Our status as seen by the directory changed
    DirectoryStatus(StationStatus),

    // -------------------------------------------------------------------------
    // Link protocol
    // -------------------------------------------------------------------------
    /// A remote station wants to connect
    IncomingConnection(PeerInfo),
    /// The protocol state of a session changed
    LinkStateChanged {
        /// Session
        qso: QsoHandle,
        /// New protocol state
        state: LinkState,
    },
    /// A chat message arrived on a session
    ChatReceived {
        /// Session
        qso: QsoHandle,
        /// Message text
        msg: String,
    },
    /// The remote side of a session started or stopped sending audio
    IsReceiving {
        /// Session
        qso: QsoHandle,
        /// Whether audio is being received
        receiving: bool,
    },
    /// Decoded audio from a session
    AudioFromRemote {
        /// Session
        qso: QsoHandle,
        /// Samples
        samples: Vec<f32>,
    },

    // -------------------------------------------------------------------------
    // Operator / API requests
    // -------------------------------------------------------------------------
    /// Connect to a node id
    ConnectToNode(u32),
    /// Connect to the station matching a callsign prefix
    ConnectByCallsign(String),
    /// Disconnect one session
    Disconnect(QsoHandle),
    /// Disconnect every session
    DisconnectAll,

    // -------------------------------------------------------------------------
    // Timers
    // -------------------------------------------------------------------------
    /// Time to refresh the directory
    DirectoryRefreshTimer,
    /// The connect-by-callsign wait expired
    CbcTimeout,
    /// Periodic idle check
    IdleCheck {
        /// Current time
        now: Instant,
    },
}

/// Events emitted by the module controller
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleEvent {
    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------
    /// The module became active
    Activated {
        /// Activated by an incoming connection
        remote: bool,
    },
    /// The module became inactive
    Deactivated,
    /// The command state changed
    StateChanged(ControllerState),

    // -------------------------------------------------------------------------
    // Sessions
    // -------------------------------------------------------------------------
    /// A session was created
    QsoAdded {
        /// Session
        handle: QsoHandle,
        /// Remote callsign
        callsign: String,
        /// Who initiated it
        direction: Direction,
    },
    /// A session changed state
    QsoStateChanged {
        /// Session
        handle: QsoHandle,
        /// Previous state
        from: QsoState,
        /// New state
        to: QsoState,
    },
    /// A session was released
    QsoRemoved {
        /// Session
        handle: QsoHandle,
        /// Remote callsign
        callsign: String,
    },
    /// The current talker changed
    TalkerChanged {
        /// Previous talker
        from: Option<QsoHandle>,
        /// New talker
        to: Option<QsoHandle>,
    },
    /// A chat message was received
    ChatReceived {
        /// Session
        handle: QsoHandle,
        /// Remote callsign
        callsign: String,
        /// Message
        msg: String,
    },
    /// An incoming connection was refused
    IncomingRejected {
        /// Remote callsign
        callsign: String,
        /// Why
        reason: String,
    },
    /// An outgoing connection request was refused
    OutgoingRejected {
        /// Why
        reason: String,
    },

    // -------------------------------------------------------------------------
    // Directory
    // -------------------------------------------------------------------------
    /// A new station list is in the cache
    DirectoryRefreshed {
        /// Number of stations
        stations: usize,
    },
    /// A refresh failed; the previous list is kept
    DirectoryError {
        /// Error message
        message: String,
    },
    /// Our status as seen by the directory
    DirectoryStatus(StationStatus),

    // -------------------------------------------------------------------------
    // Audio
    // -------------------------------------------------------------------------
    /// An announcement was queued
    Announcement(Announcement),
    /// The announcement queue is empty
    PlaybackIdle,

    /// A non-fatal error
    Error {
        /// Source of the error
        source: String,
        /// Error message
        message: String,
    },
}

impl ModuleEvent {
    /// Check if this is a session lifecycle event
    pub fn is_qso_lifecycle(&self) -> bool {
        matches!(
            self,
            ModuleEvent::QsoAdded { .. }
                | ModuleEvent::QsoStateChanged { .. }
                | ModuleEvent::QsoRemoved { .. }
        )
    }

    /// Get the session handle if this event concerns one session
    pub fn qso_handle(&self) -> Option<QsoHandle> {
        match self {
            ModuleEvent::QsoAdded { handle, .. }
            | ModuleEvent::QsoStateChanged { handle, .. }
            | ModuleEvent::QsoRemoved { handle, .. }
            | ModuleEvent::ChatReceived { handle, .. } => Some(*handle),
            ModuleEvent::TalkerChanged { to, .. } => *to,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_classification() {
        let added = ModuleEvent::QsoAdded {
            handle: QsoHandle(3),
            callsign: "W1AW".into(),
            direction: Direction::Outgoing,
        };
        assert!(added.is_qso_lifecycle());
        assert_eq!(added.qso_handle(), Some(QsoHandle(3)));

        let idle = ModuleEvent::PlaybackIdle;
        assert!(!idle.is_qso_lifecycle());
        assert_eq!(idle.qso_handle(), None);
    }

    #[test]
    fn test_talker_handle_extraction() {
        let change = ModuleEvent::TalkerChanged {
            from: Some(QsoHandle(1)),
            to: None,
        };
        assert_eq!(change.qso_handle(), None);
    }
}
