//! Station and peer descriptions

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Directory status of a station
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StationStatus {
    /// Not known
    #[default]
    Unknown,
    /// Online and accepting connections
    Online,
    /// Online but not accepting more connections
    Busy,
    /// Offline
    Offline,
}

impl StationStatus {
    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Online => "Online",
            Self::Busy => "Busy",
            Self::Offline => "Offline",
        }
    }
}

/// One entry of the station directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationData {
    /// Callsign as registered
    pub callsign: String,
    /// Numeric node id
    pub id: u32,
    /// Address the station is reachable at
    pub ip: IpAddr,
    /// Free-form description (location, frequency, ...)
    pub description: String,
    /// Current status
    pub status: StationStatus,
}

impl StationData {
    /// Create an online station entry
    pub fn new(callsign: impl Into<String>, id: u32, ip: IpAddr) -> Self {
        Self {
            callsign: callsign.into(),
            id,
            ip,
            description: String::new(),
            status: StationStatus::Online,
        }
    }

    /// Builder-style description setter
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Builder-style status setter
    pub fn with_status(mut self, status: StationStatus) -> Self {
        self.status = status;
        self
    }
}

impl fmt::Display for StationData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.callsign, self.id)
    }
}

/// Identity of a remote peer as announced by the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Remote callsign
    pub callsign: String,
    /// Remote address
    pub ip: IpAddr,
    /// Operator name
    pub name: String,
}

impl PeerInfo {
    /// Create a peer description
    pub fn new(callsign: impl Into<String>, ip: IpAddr, name: impl Into<String>) -> Self {
        Self {
            callsign: callsign.into(),
            ip,
            name: name.into(),
        }
    }
}

impl From<&StationData> for PeerInfo {
    fn from(station: &StationData) -> Self {
        Self {
            callsign: station.callsign.clone(),
            ip: station.ip,
            name: String::new(),
        }
    }
}
