//! Error types for the link module

use std::io;
use std::net::IpAddr;

use thiserror::Error;

use crate::qso::QsoHandle;

/// Error reported by the external link transport
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The transport could not start a connection
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// The transport has no session for the given handle
    #[error("unknown session {0}")]
    UnknownSession(QsoHandle),

    /// Sending on an established session failed
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Errors that can occur in the module controller
#[derive(Debug, Error)]
pub enum ModuleError {
    /// Session not found
    #[error("session not found: {0}")]
    QsoNotFound(QsoHandle),

    /// Station not in the directory
    #[error("station not found: {0}")]
    StationNotFound(String),

    /// Another outgoing connection is still being set up
    #[error("an outgoing connection is already pending")]
    OutgoingPending,

    /// All connection slots are in use
    #[error("too many connections ({0})")]
    TooManyConnections(usize),

    /// All QSO slots are in use
    #[error("too many connected stations ({0})")]
    TooManyQsos(usize),

    /// A session to this station already exists
    #[error("already connected to {0}")]
    AlreadyConnected(String),

    /// The peer address is not on the allow list
    #[error("address {0} is not allowed")]
    AccessDenied(IpAddr),

    /// The module is not active
    #[error("module is not active")]
    NotActive,

    /// A command could not be understood
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// Transport error
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Errors while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Parse error
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of range or malformed
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
