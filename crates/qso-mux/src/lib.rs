//! Link Module Core
//!
//! This crate provides the connection and audio orchestration core of a
//! radio-to-internet voice link module. It admits and multiplexes
//! simultaneous sessions ("QSOs") with remote stations, picks which of them
//! feeds the local transmitter, and interleaves spoken announcements into
//! the same audio path.
//!
//! # Architecture
//!
//! [`ModuleController`] owns everything: the sessions, the
//! [`DirectoryCache`], the [`TalkerArbiter`] and the announcement player.
//! The external link protocol and station directory are reached through the
//! [`LinkTransport`] and [`DirectoryService`] traits; their asynchronous
//! results come back as [`ModuleInput`]s.
//!
//! - **Admission**: incoming calls are checked against the allow list and
//!   the `max_connections` / `max_qsos` limits before a session is created
//! - **Talker arbitration**: the first session to start talking keeps the
//!   floor until it stops
//! - **DTMF commands**: node ids, connect by callsign, station lists
//!
//! # Event-Driven Architecture
//!
//! All notifications go through [`ModuleController::handle`] and run to
//! completion one at a time. Results are buffered as [`ModuleEvent`]s and
//! collected with [`ModuleController::drain_events`]. [`run_module_actor`]
//! wraps the controller in a tokio task that also drives its timers.
//!
//! # Example
//!
//! ```rust,no_run
//! use qso_mux::{
//!     DirectoryService, LinkTransport, ModuleConfig, ModuleController, ModuleInput,
//! };
//! # use qso_audio::AudioSink;
//! # fn demo<T: LinkTransport, D: DirectoryService, S: AudioSink>(transport: T, dir: D, sink: S) {
//! let config = ModuleConfig::from_json_str(r#"{ "callsign": "SM0XYZ-L" }"#).unwrap();
//! let mut module = ModuleController::new(config, transport, dir, sink).unwrap();
//! module.initialize();
//! module.handle(ModuleInput::Activate);
//!
//! // Dial node 9999
//! for digit in "9999#".chars() {
//!     module.handle(ModuleInput::DtmfDigit(digit));
//! }
//! for event in module.drain_events() {
//!     println!("{:?}", event);
//! }
//! # }
//! ```

pub mod actor;
pub mod announce;
pub mod config;
pub mod directory;
pub mod dtmf;
pub mod engine;
pub mod error;
pub mod events;
pub mod qso;
pub mod state;
pub mod station;
pub mod talker;
pub mod transport;

// Re-export actor types
pub use actor::{run_module_actor, ModuleCommand};

// Re-export event types
pub use events::{ModuleEvent, ModuleInput};

// Re-export engine types
pub use announce::{Announcement, MAX_ANNOUNCED_CANDIDATES};
pub use config::{AllowList, IpNetwork, ModuleConfig};
pub use directory::{keypad_code, DirectoryCache};
pub use dtmf::{
    parse_cbc_command, parse_command, CbcCommand, DtmfCollector, DtmfCommand, DtmfEntry,
};
pub use engine::ModuleController;
pub use error::{ConfigError, ModuleError, TransportError};
pub use qso::{Direction, Qso, QsoHandle, QsoNotification, QsoState};
pub use state::{ControllerState, ModuleStatus, QsoSummary};
pub use station::{PeerInfo, StationData, StationStatus};
pub use talker::{TalkerArbiter, TalkerChange, TalkerPolicy};
pub use transport::{DirectoryService, LinkState, LinkTransport};
