//! Session (QSO) state machine
//!
//! A [`Qso`] tracks one outgoing or incoming connection. It never talks to the
//! controller directly: every transition returns the notifications the owner
//! has to act on, and [`QsoNotification::DestroyMe`] is the only signal that
//! the owner may drop it.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::TransportError;
use crate::station::PeerInfo;
use crate::transport::{LinkState, LinkTransport};

/// Stable identifier for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QsoHandle(pub u32);

impl QsoHandle {
    /// Get the raw handle value
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for QsoHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Who initiated the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// We called the remote station
    Outgoing,
    /// The remote station called us
    Incoming,
}

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QsoState {
    /// Waiting for the link protocol to connect (or for approval)
    Connecting,
    /// Connected, remote side silent
    Idle,
    /// Connected, remote side sending audio
    Talking,
    /// Teardown requested, waiting for the link to close
    Disconnecting,
    /// Gone; waiting to be reaped by the owner
    Destroyed,
}

impl QsoState {
    /// Connected states can carry audio
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Idle | Self::Talking)
    }

    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connecting => "Connecting",
            Self::Idle => "Idle",
            Self::Talking => "Talking",
            Self::Disconnecting => "Disconnecting",
            Self::Destroyed => "Destroyed",
        }
    }
}

/// What a transition asks the owner to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QsoNotification {
    /// The session moved between states
    StateChanged {
        /// Previous state
        from: QsoState,
        /// New state
        to: QsoState,
    },
    /// The remote side started or stopped sending audio
    IsReceiving(bool),
    /// The session is finished and must be released
    DestroyMe,
}

/// One active or pending connection to a remote station
#[derive(Debug, Clone)]
pub struct Qso {
    handle: QsoHandle,
    peer: PeerInfo,
    station_id: Option<u32>,
    direction: Direction,
    state: QsoState,
    is_receiving: bool,
    talk_started: Option<Instant>,
    last_activity: Instant,
}

impl Qso {
    /// Create a session for an outgoing call
    pub fn outgoing(handle: QsoHandle, peer: PeerInfo, station_id: u32) -> Self {
        Self::new(handle, peer, Some(station_id), Direction::Outgoing)
    }

    /// Create a session for an accepted incoming call
    pub fn incoming(handle: QsoHandle, peer: PeerInfo) -> Self {
        Self::new(handle, peer, None, Direction::Incoming)
    }

    fn new(
        handle: QsoHandle,
        peer: PeerInfo,
        station_id: Option<u32>,
        direction: Direction,
    ) -> Self {
        Self {
            handle,
            peer,
            station_id,
            direction,
            state: QsoState::Connecting,
            is_receiving: false,
            talk_started: None,
            last_activity: Instant::now(),
        }
    }

    /// Session handle
    pub fn handle(&self) -> QsoHandle {
        self.handle
    }

    /// Remote identity
    pub fn peer(&self) -> &PeerInfo {
        &self.peer
    }

    /// Remote callsign
    pub fn callsign(&self) -> &str {
        &self.peer.callsign
    }

    /// Directory node id, known for outgoing calls
    pub fn station_id(&self) -> Option<u32> {
        self.station_id
    }

    /// Who initiated the session
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Current state
    pub fn state(&self) -> QsoState {
        self.state
    }

    /// Whether the remote side is currently sending audio
    pub fn is_receiving(&self) -> bool {
        self.is_receiving
    }

    /// When the current transmission of the remote side started
    pub fn talk_started(&self) -> Option<Instant> {
        self.talk_started
    }

    /// Last time audio passed through this session
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Connected and able to carry audio
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Not yet destroyed
    pub fn is_alive(&self) -> bool {
        self.state != QsoState::Destroyed
    }

    /// Record audio activity
    pub fn touch(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// Apply a state report from the link protocol
    pub fn link_state_changed(&mut self, link: LinkState) -> Vec<QsoNotification> {
        debug!(
            "Session {} ({}) link state {:?} in {}",
            self.handle,
            self.peer.callsign,
            link,
            self.state.name()
        );
        match link {
            LinkState::Connected => self.mark_connected(),
            LinkState::ByeReceived => match self.state {
                QsoState::Idle | QsoState::Talking => {
                    let mut notes = self.stop_receiving();
                    notes.extend(self.set_state(QsoState::Disconnecting));
                    notes
                }
                _ => Vec::new(),
            },
            LinkState::Disconnected => {
                let mut notes = Vec::new();
                if self.is_connected() {
                    notes.extend(self.stop_receiving());
                    notes.extend(self.set_state(QsoState::Disconnecting));
                }
                notes.extend(self.destroy());
                notes
            }
            LinkState::Connecting => Vec::new(),
        }
    }

    /// Move a pending session to connected
    pub fn mark_connected(&mut self) -> Vec<QsoNotification> {
        if self.state == QsoState::Connecting {
            self.last_activity = Instant::now();
            self.set_state(QsoState::Idle).into_iter().collect()
        } else {
            Vec::new()
        }
    }

    /// Track the remote side starting or stopping to send audio
    pub fn set_receiving(&mut self, receiving: bool, now: Instant) -> Vec<QsoNotification> {
        if !self.is_connected() || receiving == self.is_receiving {
            return Vec::new();
        }

        self.is_receiving = receiving;
        self.last_activity = now;
        let mut notes = Vec::with_capacity(2);
        if receiving {
            self.talk_started = Some(now);
            notes.extend(self.set_state(QsoState::Talking));
        } else {
            self.talk_started = None;
            notes.extend(self.set_state(QsoState::Idle));
        }
        notes.push(QsoNotification::IsReceiving(receiving));
        notes
    }

    /// Local request to end the session.
    ///
    /// A pending session is cancelled outright; a connected one waits in
    /// `Disconnecting` for the link to confirm.
    pub fn disconnect(&mut self) -> Vec<QsoNotification> {
        match self.state {
            QsoState::Connecting => self.destroy(),
            QsoState::Idle | QsoState::Talking => {
                let mut notes = self.stop_receiving();
                notes.extend(self.set_state(QsoState::Disconnecting));
                notes
            }
            QsoState::Disconnecting | QsoState::Destroyed => Vec::new(),
        }
    }

    /// Finish the session immediately
    pub fn destroy(&mut self) -> Vec<QsoNotification> {
        if self.state == QsoState::Destroyed {
            return Vec::new();
        }
        let mut notes = self.stop_receiving();
        notes.extend(self.set_state(QsoState::Destroyed));
        notes.push(QsoNotification::DestroyMe);
        notes
    }

    /// Send audio if connected. Returns whether anything was sent.
    pub fn send_audio<T: LinkTransport>(
        &self,
        transport: &mut T,
        samples: &[f32],
    ) -> Result<bool, TransportError> {
        if !self.is_connected() {
            return Ok(false);
        }
        transport.send_audio(self.handle, samples)?;
        Ok(true)
    }

    /// Send a chat message if connected
    pub fn send_chat<T: LinkTransport>(
        &self,
        transport: &mut T,
        msg: &str,
    ) -> Result<bool, TransportError> {
        if !self.is_connected() {
            return Ok(false);
        }
        transport.send_chat(self.handle, msg)?;
        Ok(true)
    }

    /// Send an info message if connected
    pub fn send_info<T: LinkTransport>(
        &self,
        transport: &mut T,
        info: &str,
    ) -> Result<bool, TransportError> {
        if !self.is_connected() {
            return Ok(false);
        }
        transport.send_info(self.handle, info)?;
        Ok(true)
    }

    fn stop_receiving(&mut self) -> Vec<QsoNotification> {
        if self.is_receiving {
            self.is_receiving = false;
            self.talk_started = None;
            vec![QsoNotification::IsReceiving(false)]
        } else {
            Vec::new()
        }
    }

    fn set_state(&mut self, to: QsoState) -> Option<QsoNotification> {
        let from = self.state;
        if from == to {
            return None;
        }
        self.state = to;
        Some(QsoNotification::StateChanged { from, to })
    }
}
