//! Link Module Simulation Library
//!
//! This crate provides test doubles for driving a link module without a real
//! link protocol, directory server or sound card. It includes:
//!
//! - **SimTransport**: Records every connect, accept, reject and send call
//! - **SimDirectory**: Serves a fixed station list on request
//! - **CaptureSink**: Keeps the transmitted audio, optionally with a
//!   per-write limit for back-pressure tests
//!
//! # Example
//!
//! ```rust
//! use qso_mux::{ModuleConfig, ModuleController, ModuleInput};
//! use qso_sim::{station, CaptureSink, SimDirectory, SimTransport};
//!
//! let dir = SimDirectory::new(vec![station("W1AW", 1234)]);
//! let mut module =
//!     ModuleController::new(ModuleConfig::default(), SimTransport::new(), dir, CaptureSink::new())
//!         .unwrap();
//! module.initialize();
//! if let Some(answer) = module.directory_service_mut().respond() {
//!     module.handle(answer);
//! }
//! assert_eq!(module.directory_cache().len(), 1);
//! ```

pub mod directory;
pub mod sink;
pub mod transport;

pub use directory::{peer, sim_ip, station, SimDirectory};
pub use sink::CaptureSink;
pub use transport::{SimTransport, TransportCall};
