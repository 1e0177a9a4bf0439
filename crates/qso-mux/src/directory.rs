//! Station directory cache
//!
//! Holds the last complete station list received from the directory
//! service. A refresh replaces the snapshot in one step; a failed refresh
//! leaves it untouched.

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::station::StationData;

/// Map a callsign to the digits a DTMF keypad produces for it.
///
/// Letters map to their phone keypad key (`2`=ABC ... `9`=WXYZ), digits map
/// to themselves and everything else is dropped.
pub fn keypad_code(callsign: &str) -> String {
    callsign
        .chars()
        .filter_map(|c| match c.to_ascii_uppercase() {
            d @ '0'..='9' => Some(d),
            'A'..='C' => Some('2'),
            'D'..='F' => Some('3'),
            'G'..='I' => Some('4'),
            'J'..='L' => Some('5'),
            'M'..='O' => Some('6'),
            'P'..='S' => Some('7'),
            'T'..='V' => Some('8'),
            'W'..='Z' => Some('9'),
            _ => None,
        })
        .collect()
}

/// Snapshot of known stations
#[derive(Debug, Clone, Default)]
pub struct DirectoryCache {
    stations: Vec<StationData>,
    refreshed_at: Option<Instant>,
    refresh_pending: bool,
}

impl DirectoryCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// All cached stations in directory order
    pub fn stations(&self) -> &[StationData] {
        &self.stations
    }

    /// Number of cached stations
    pub fn len(&self) -> usize {
        self.stations.len()
    }

    /// True if no snapshot has any stations
    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    /// When the current snapshot was received
    pub fn refreshed_at(&self) -> Option<Instant> {
        self.refreshed_at
    }

    /// Whether a refresh has been requested and not yet answered
    pub fn refresh_pending(&self) -> bool {
        self.refresh_pending
    }

    /// Record that a refresh was requested. Returns false if one is
    /// already outstanding.
    pub fn begin_refresh(&mut self) -> bool {
        if self.refresh_pending {
            debug!("Directory refresh already in progress");
            return false;
        }
        self.refresh_pending = true;
        true
    }

    /// Replace the snapshot
    pub fn replace(&mut self, stations: Vec<StationData>, now: Instant) {
        info!("Directory updated: {} stations", stations.len());
        self.stations = stations;
        self.refreshed_at = Some(now);
        self.refresh_pending = false;
    }

    /// A refresh failed; keep the old snapshot
    pub fn refresh_failed(&mut self, message: &str) {
        warn!(
            "Directory refresh failed, keeping {} cached stations: {}",
            self.stations.len(),
            message
        );
        self.refresh_pending = false;
    }

    /// Look up a station by node id
    pub fn find_by_id(&self, id: u32) -> Option<&StationData> {
        self.stations.iter().find(|s| s.id == id)
    }

    /// Look up a station by exact callsign (case-insensitive)
    pub fn find_by_callsign(&self, callsign: &str) -> Option<&StationData> {
        self.stations
            .iter()
            .find(|s| s.callsign.eq_ignore_ascii_case(callsign))
    }

    /// Stations whose callsign starts with `prefix`.
    ///
    /// The prefix matches either the callsign text (case-insensitive) or,
    /// when it consists of digits only, the callsign's keypad code.
    pub fn match_prefix(&self, prefix: &str) -> Vec<StationData> {
        let prefix = prefix.trim();
        if prefix.is_empty() {
            return Vec::new();
        }
        let upper = prefix.to_ascii_uppercase();
        let digits_only = prefix.chars().all(|c| c.is_ascii_digit());

        self.stations
            .iter()
            .filter(|s| {
                s.callsign.to_ascii_uppercase().starts_with(&upper)
                    || (digits_only && keypad_code(&s.callsign).starts_with(prefix))
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(calls: &[&str]) -> DirectoryCache {
        let mut cache = DirectoryCache::new();
        let stations = calls
            .iter()
            .enumerate()
            .map(|(i, c)| StationData::new(*c, 1000 + i as u32, "10.0.0.1".parse().unwrap()))
            .collect();
        cache.replace(stations, Instant::now());
        cache
    }

    #[test]
    fn test_keypad_code() {
        assert_eq!(keypad_code("W1AW"), "9129");
        assert_eq!(keypad_code("sm0svx-l"), "7607895");
        assert_eq!(keypad_code("*ECHOTEST*"), "32468378");
    }

    #[test]
    fn test_prefix_match_literal() {
        let cache = cache(&["W1AW", "W1ABC", "K1ABC"]);
        assert_eq!(cache.match_prefix("w1a").len(), 2);
        let one = cache.match_prefix("W1AW");
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].callsign, "W1AW");
        assert!(cache.match_prefix("").is_empty());
        assert!(cache.match_prefix("N0").is_empty());
    }

    #[test]
    fn test_prefix_match_keypad() {
        let cache = cache(&["W1AW", "W1ABC", "K1ABC"]);
        assert_eq!(cache.match_prefix("912").len(), 2);
        assert_eq!(cache.match_prefix("9129").len(), 1);
        assert_eq!(cache.match_prefix("51").len(), 1);
    }

    #[test]
    fn test_failed_refresh_keeps_snapshot() {
        let mut cache = cache(&["W1AW"]);
        assert!(cache.begin_refresh());
        assert!(!cache.begin_refresh());
        cache.refresh_failed("connection refused");
        assert!(!cache.refresh_pending());
        assert_eq!(cache.len(), 1);
        assert!(cache.find_by_callsign("w1aw").is_some());
        assert_eq!(cache.find_by_id(1000).map(|s| s.callsign.as_str()), Some("W1AW"));
    }
}
