//! Seams to the external link protocol
//!
//! The connection handshake, keepalives and voice framing live in an external
//! library. The module controller only drives it through these traits; every
//! asynchronous result comes back as a [`ModuleInput`](crate::ModuleInput).

use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::qso::QsoHandle;
use crate::station::{PeerInfo, StationData, StationStatus};

/// Connection state as reported by the link protocol for one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    /// No connection (handshake failed, remote hung up, or timed out)
    Disconnected,
    /// Handshake in progress
    Connecting,
    /// The remote side said goodbye; teardown in progress
    ByeReceived,
    /// Connection established
    Connected,
}

/// Session-level primitives of the link protocol
pub trait LinkTransport {
    /// Start an outgoing connection for the session `qso`
    fn connect(&mut self, qso: QsoHandle, station: &StationData) -> Result<(), TransportError>;

    /// Accept an incoming connection, binding it to the session `qso`
    fn accept(&mut self, qso: QsoHandle, peer: &PeerInfo) -> Result<(), TransportError>;

    /// Refuse an incoming connection without creating a session
    fn reject(&mut self, peer: &PeerInfo, reason: &str);

    /// Send one block of audio on a connected session
    fn send_audio(&mut self, qso: QsoHandle, samples: &[f32]) -> Result<(), TransportError>;

    /// Send a chat message
    fn send_chat(&mut self, qso: QsoHandle, msg: &str) -> Result<(), TransportError>;

    /// Send an info (status text) message
    fn send_info(&mut self, qso: QsoHandle, info: &str) -> Result<(), TransportError>;

    /// Tear down the session
    fn disconnect(&mut self, qso: QsoHandle);
}

/// Station directory primitives
pub trait DirectoryService {
    /// Request a fresh station list. The result arrives later as
    /// `StationListUpdated` or `DirectoryError`.
    fn refresh(&mut self);

    /// Publish our own status and description
    fn publish_status(&mut self, status: StationStatus, description: &str);
}
