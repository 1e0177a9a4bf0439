//! Recording link transport

use qso_mux::{LinkTransport, PeerInfo, QsoHandle, StationData, TransportError};
use tracing::debug;

/// One call made on a [`SimTransport`]
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    /// Outgoing connection started
    Connect {
        /// Session
        qso: QsoHandle,
        /// Callsign dialed
        callsign: String,
    },
    /// Incoming connection accepted
    Accept {
        /// Session
        qso: QsoHandle,
        /// Remote callsign
        callsign: String,
    },
    /// Incoming connection refused
    Reject {
        /// Remote callsign
        callsign: String,
        /// Reason given
        reason: String,
    },
    /// Audio block sent
    Audio {
        /// Session
        qso: QsoHandle,
        /// Number of samples
        samples: usize,
    },
    /// Chat message sent
    Chat {
        /// Session
        qso: QsoHandle,
        /// Message
        msg: String,
    },
    /// Info message sent
    Info {
        /// Session
        qso: QsoHandle,
        /// Message
        msg: String,
    },
    /// Session torn down
    Disconnect {
        /// Session
        qso: QsoHandle,
    },
}

/// A link transport that records every call
#[derive(Debug, Default)]
pub struct SimTransport {
    calls: Vec<TransportCall>,
    fail_connect: bool,
    fail_send: bool,
}

impl SimTransport {
    /// Create a transport that accepts everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `connect` fail
    pub fn set_fail_connect(&mut self, fail: bool) {
        self.fail_connect = fail;
    }

    /// Make every following send fail
    pub fn set_fail_send(&mut self, fail: bool) {
        self.fail_send = fail;
    }

    /// All recorded calls in order
    pub fn calls(&self) -> &[TransportCall] {
        &self.calls
    }

    /// Forget recorded calls
    pub fn clear(&mut self) {
        self.calls.clear();
    }

    /// Callsigns dialed, in order
    pub fn connected_to(&self) -> Vec<String> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                TransportCall::Connect { callsign, .. } => Some(callsign.clone()),
                _ => None,
            })
            .collect()
    }

    /// Callsigns refused, in order
    pub fn rejected(&self) -> Vec<String> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                TransportCall::Reject { callsign, .. } => Some(callsign.clone()),
                _ => None,
            })
            .collect()
    }

    /// Sessions torn down, in order
    pub fn disconnected(&self) -> Vec<QsoHandle> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                TransportCall::Disconnect { qso } => Some(*qso),
                _ => None,
            })
            .collect()
    }

    /// Total audio samples sent to `qso`
    pub fn audio_sent_to(&self, qso: QsoHandle) -> usize {
        self.calls
            .iter()
            .map(|c| match c {
                TransportCall::Audio { qso: q, samples } if *q == qso => *samples,
                _ => 0,
            })
            .sum()
    }

    /// Chat messages sent to `qso`
    pub fn chats_to(&self, qso: QsoHandle) -> Vec<String> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                TransportCall::Chat { qso: q, msg } if *q == qso => Some(msg.clone()),
                _ => None,
            })
            .collect()
    }

    /// Info messages sent to `qso`
    pub fn infos_to(&self, qso: QsoHandle) -> Vec<String> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                TransportCall::Info { qso: q, msg } if *q == qso => Some(msg.clone()),
                _ => None,
            })
            .collect()
    }

    fn send(&mut self, call: TransportCall) -> Result<(), TransportError> {
        if self.fail_send {
            return Err(TransportError::SendFailed("simulated failure".into()));
        }
        self.calls.push(call);
        Ok(())
    }
}

impl LinkTransport for SimTransport {
    fn connect(&mut self, qso: QsoHandle, station: &StationData) -> Result<(), TransportError> {
        debug!("[SIM] connect {} to {}", qso, station);
        if self.fail_connect {
            return Err(TransportError::ConnectFailed(format!(
                "{} unreachable",
                station.callsign
            )));
        }
        self.calls.push(TransportCall::Connect {
            qso,
            callsign: station.callsign.clone(),
        });
        Ok(())
    }

    fn accept(&mut self, qso: QsoHandle, peer: &PeerInfo) -> Result<(), TransportError> {
        debug!("[SIM] accept {} as {}", peer.callsign, qso);
        self.calls.push(TransportCall::Accept {
            qso,
            callsign: peer.callsign.clone(),
        });
        Ok(())
    }

    fn reject(&mut self, peer: &PeerInfo, reason: &str) {
        debug!("[SIM] reject {}: {}", peer.callsign, reason);
        self.calls.push(TransportCall::Reject {
            callsign: peer.callsign.clone(),
            reason: reason.to_string(),
        });
    }

    fn send_audio(&mut self, qso: QsoHandle, samples: &[f32]) -> Result<(), TransportError> {
        self.send(TransportCall::Audio {
            qso,
            samples: samples.len(),
        })
    }

    fn send_chat(&mut self, qso: QsoHandle, msg: &str) -> Result<(), TransportError> {
        self.send(TransportCall::Chat {
            qso,
            msg: msg.to_string(),
        })
    }

    fn send_info(&mut self, qso: QsoHandle, info: &str) -> Result<(), TransportError> {
        self.send(TransportCall::Info {
            qso,
            msg: info.to_string(),
        })
    }

    fn disconnect(&mut self, qso: QsoHandle) {
        debug!("[SIM] disconnect {}", qso);
        self.calls.push(TransportCall::Disconnect { qso });
    }
}
