//! Module configuration
//!
//! The enclosing framework owns the configuration file; this module only
//! defines the settings the link module consumes and how they are decoded
//! from JSON.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::talker::TalkerPolicy;

/// Link module configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModuleConfig {
    /// Our own callsign
    pub callsign: String,
    /// Location string published to the directory
    pub location: String,
    /// Name of the system operator
    pub sysop_name: String,
    /// Free-form station description
    pub description: String,
    /// Networks allowed to connect, in CIDR notation. Empty allows everyone.
    pub allow_ips: Vec<String>,
    /// Whether an incoming connection may activate an inactive module
    pub remote_activation: bool,
    /// Maximum number of sessions, connected or pending
    pub max_connections: usize,
    /// Maximum number of connected sessions
    pub max_qsos: usize,
    /// Treat accepted incoming connections as connected without waiting for
    /// the link protocol to confirm
    pub auto_accept: bool,
    /// Disconnect sessions without audio for this long (0 disables)
    pub link_idle_timeout_secs: u64,
    /// Interval between directory refreshes
    pub dir_refresh_interval_secs: u64,
    /// How long connect-by-callsign waits for more digits
    pub cbc_timeout_secs: u64,
    /// Directory holding the announcement clips
    pub sound_dir: PathBuf,
    /// Audio sample rate
    pub sample_rate: u32,
    /// How the next talker is chosen when the current one stops
    pub talker_policy: TalkerPolicy,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            callsign: "N0CALL-L".to_string(),
            location: String::new(),
            sysop_name: String::new(),
            description: String::new(),
            allow_ips: Vec::new(),
            remote_activation: false,
            max_connections: 4,
            max_qsos: 2,
            auto_accept: false,
            link_idle_timeout_secs: 0,
            dir_refresh_interval_secs: 600,
            cbc_timeout_secs: 60,
            sound_dir: PathBuf::from("sounds"),
            sample_rate: 8000,
            talker_policy: TalkerPolicy::default(),
        }
    }
}

impl ModuleConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Check value ranges and build the allow list
    pub fn validate(&self) -> Result<AllowList, ConfigError> {
        if self.callsign.trim().is_empty() {
            return Err(ConfigError::Invalid("callsign must not be empty".into()));
        }
        if self.max_qsos == 0 {
            return Err(ConfigError::Invalid("max_qsos must be at least 1".into()));
        }
        if self.max_qsos > self.max_connections {
            return Err(ConfigError::Invalid(format!(
                "max_qsos ({}) exceeds max_connections ({})",
                self.max_qsos, self.max_connections
            )));
        }
        if self.sample_rate == 0 {
            return Err(ConfigError::Invalid("sample_rate must not be zero".into()));
        }
        AllowList::parse(&self.allow_ips)
    }

    /// Connect-by-callsign timeout
    pub fn cbc_timeout(&self) -> Duration {
        Duration::from_secs(self.cbc_timeout_secs)
    }

    /// Directory refresh interval (never shorter than one second)
    pub fn dir_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.dir_refresh_interval_secs.max(1))
    }

    /// Idle timeout, if enabled
    pub fn link_idle_timeout(&self) -> Option<Duration> {
        (self.link_idle_timeout_secs > 0).then(|| Duration::from_secs(self.link_idle_timeout_secs))
    }
}

/// One allowed network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpNetwork {
    addr: IpAddr,
    prefix_len: u8,
}

impl IpNetwork {
    /// Check whether `ip` lies inside this network
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.addr, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = prefix_mask(self.prefix_len, 32) as u32;
                u32::from(net) & mask == u32::from(ip) & mask
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = prefix_mask(self.prefix_len, 128);
                u128::from(net) & mask == u128::from(ip) & mask
            }
            _ => false,
        }
    }
}

fn prefix_mask(prefix_len: u8, bits: u32) -> u128 {
    if prefix_len == 0 {
        0
    } else {
        let all = if bits == 128 { u128::MAX } else { (1u128 << bits) - 1 };
        all & !((1u128 << (bits - u32::from(prefix_len))) - 1)
    }
}

impl FromStr for IpNetwork {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::Invalid(format!("bad network \"{}\"", s));
        let (addr, prefix) = match s.trim().split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s.trim(), None),
        };
        let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
        let max = if addr.is_ipv4() { 32 } else { 128 };
        let prefix_len = match prefix {
            Some(p) => p.parse::<u8>().map_err(|_| invalid())?,
            None => max,
        };
        if prefix_len > max {
            return Err(invalid());
        }
        Ok(Self { addr, prefix_len })
    }
}

/// Address filter for incoming connections
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    networks: Vec<IpNetwork>,
}

impl AllowList {
    /// Parse a list of CIDR strings
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self, ConfigError> {
        let networks = entries
            .iter()
            .map(|e| e.as_ref().parse())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { networks })
    }

    /// An empty list permits every address
    pub fn permits(&self, ip: IpAddr) -> bool {
        self.networks.is_empty() || self.networks.iter().any(|n| n.contains(ip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = ModuleConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dir_refresh_interval(), Duration::from_secs(600));
        assert_eq!(config.link_idle_timeout(), None);
    }

    #[test]
    fn test_from_json_with_partial_fields() {
        let config = ModuleConfig::from_json_str(
            r#"{ "callsign": "SM0XYZ-L", "max_connections": 2, "max_qsos": 1,
                 "allow_ips": ["192.168.1.0/24"], "talker_policy": "EarliestStart" }"#,
        )
        .unwrap();
        assert_eq!(config.callsign, "SM0XYZ-L");
        assert_eq!(config.max_qsos, 1);
        assert_eq!(config.cbc_timeout_secs, 60);
        assert_eq!(config.talker_policy, TalkerPolicy::EarliestStart);
    }

    #[test]
    fn test_rejects_bad_limits() {
        let config = ModuleConfig {
            max_connections: 1,
            max_qsos: 2,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = ModuleConfig {
            max_qsos: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_network() {
        let config = ModuleConfig {
            allow_ips: vec!["10.0.0.0/33".into()],
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(ModuleConfig::from_json_str("{ not json").is_err());
    }

    #[test]
    fn test_allow_list() {
        let list = AllowList::parse(&["192.168.1.0/24", "10.1.2.3", "fd00::/8"]).unwrap();
        assert!(list.permits("192.168.1.77".parse().unwrap()));
        assert!(!list.permits("192.168.2.1".parse().unwrap()));
        assert!(list.permits("10.1.2.3".parse().unwrap()));
        assert!(!list.permits("10.1.2.4".parse().unwrap()));
        assert!(list.permits("fd12::1".parse().unwrap()));
        assert!(!list.permits("2001:db8::1".parse().unwrap()));

        let open = AllowList::default();
        assert!(open.permits("8.8.8.8".parse().unwrap()));

        let any = AllowList::parse(&["0.0.0.0/0"]).unwrap();
        assert!(any.permits("1.2.3.4".parse().unwrap()));
    }
}
