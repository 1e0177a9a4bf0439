//! Scripted station directory

use std::net::{IpAddr, Ipv4Addr};

use qso_mux::{DirectoryService, ModuleInput, PeerInfo, StationData, StationStatus};
use tracing::debug;

/// A directory service with a fixed station list
///
/// Refresh requests are only counted; call [`SimDirectory::respond`] to get
/// the notification a real directory would deliver later.
#[derive(Debug, Default)]
pub struct SimDirectory {
    stations: Vec<StationData>,
    refresh_requests: usize,
    unanswered: usize,
    fail_with: Option<String>,
    published: Vec<(StationStatus, String)>,
}

impl SimDirectory {
    /// Create a directory serving `stations`
    pub fn new(stations: Vec<StationData>) -> Self {
        Self {
            stations,
            ..Default::default()
        }
    }

    /// Replace the served station list
    pub fn set_stations(&mut self, stations: Vec<StationData>) {
        self.stations = stations;
    }

    /// Make the next answers fail with `message` (None to succeed again)
    pub fn set_failure(&mut self, message: Option<&str>) {
        self.fail_with = message.map(str::to_string);
    }

    /// Number of refreshes requested so far
    pub fn refresh_requests(&self) -> usize {
        self.refresh_requests
    }

    /// Status updates published so far
    pub fn published(&self) -> &[(StationStatus, String)] {
        &self.published
    }

    /// Most recently published status
    pub fn last_status(&self) -> Option<StationStatus> {
        self.published.last().map(|(status, _)| *status)
    }

    /// Answer one outstanding refresh request
    pub fn respond(&mut self) -> Option<ModuleInput> {
        if self.unanswered == 0 {
            return None;
        }
        self.unanswered -= 1;
        Some(match &self.fail_with {
            Some(message) => ModuleInput::DirectoryError(message.clone()),
            None => ModuleInput::StationListUpdated(self.stations.clone()),
        })
    }
}

impl DirectoryService for SimDirectory {
    fn refresh(&mut self) {
        debug!("[SIM] directory refresh requested");
        self.refresh_requests += 1;
        self.unanswered += 1;
    }

    fn publish_status(&mut self, status: StationStatus, description: &str) {
        debug!("[SIM] publish {} \"{}\"", status.name(), description);
        self.published.push((status, description.to_string()));
    }
}

/// Address used for simulated station `id`
pub fn sim_ip(id: u32) -> IpAddr {
    let [_, b, c, d] = id.to_be_bytes();
    IpAddr::V4(Ipv4Addr::new(10, b, c, d))
}

/// A directory entry for a simulated station
pub fn station(callsign: &str, id: u32) -> StationData {
    StationData::new(callsign, id, sim_ip(id))
}

/// A peer calling in from a simulated address
pub fn peer(callsign: &str, id: u32) -> PeerInfo {
    PeerInfo::new(callsign, sim_ip(id), "Sim Operator")
}
