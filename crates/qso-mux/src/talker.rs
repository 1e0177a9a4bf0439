//! Talker arbitration
//!
//! Exactly one receiving session at a time feeds the local transmitter. A
//! talker keeps the floor until it stops; only then is a successor chosen
//! from the sessions that are still talking.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::qso::{Qso, QsoHandle, QsoState};

/// How a successor is picked when the current talker stops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TalkerPolicy {
    /// First talking session in registration order
    #[default]
    RegistrationOrder,
    /// Session that started talking first; ties go to registration order
    EarliestStart,
}

/// A change of the current talker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TalkerChange {
    /// Previous talker
    pub from: Option<QsoHandle>,
    /// New talker
    pub to: Option<QsoHandle>,
}

/// Tracks the current talker
#[derive(Debug, Clone, Default)]
pub struct TalkerArbiter {
    policy: TalkerPolicy,
    current: Option<QsoHandle>,
}

impl TalkerArbiter {
    /// Create an arbiter with the given policy
    pub fn new(policy: TalkerPolicy) -> Self {
        Self {
            policy,
            current: None,
        }
    }

    /// The session currently holding the floor
    pub fn current(&self) -> Option<QsoHandle> {
        self.current
    }

    /// Active policy
    pub fn policy(&self) -> TalkerPolicy {
        self.policy
    }

    /// Pick a talker among `qsos` according to the policy
    pub fn select(&self, qsos: &[Qso]) -> Option<QsoHandle> {
        let talking = qsos.iter().filter(|q| q.state() == QsoState::Talking);
        match self.policy {
            TalkerPolicy::RegistrationOrder => talking.map(Qso::handle).next(),
            TalkerPolicy::EarliestStart => talking
                .enumerate()
                .min_by_key(|(idx, q)| (q.talk_started(), *idx))
                .map(|(_, q)| q.handle()),
        }
    }

    /// A session started or stopped receiving remote audio
    pub fn receiving_changed(
        &mut self,
        qsos: &[Qso],
        handle: QsoHandle,
        receiving: bool,
    ) -> Option<TalkerChange> {
        if receiving {
            if self.current.is_none() {
                return self.set(Some(handle));
            }
            None
        } else if self.current == Some(handle) {
            self.set(self.select(qsos))
        } else {
            None
        }
    }

    /// A session is going away
    pub fn session_removed(&mut self, qsos: &[Qso], handle: QsoHandle) -> Option<TalkerChange> {
        if self.current != Some(handle) {
            return None;
        }
        let next = self.select(qsos).filter(|h| *h != handle);
        self.set(next)
    }

    /// Drop the current talker unconditionally
    pub fn clear(&mut self) -> Option<TalkerChange> {
        self.set(None)
    }

    fn set(&mut self, to: Option<QsoHandle>) -> Option<TalkerChange> {
        let from = self.current;
        if from == to {
            return None;
        }
        self.current = to;
        match to {
            Some(h) => info!("Talker is now session {}", h),
            None => info!("No talker"),
        }
        Some(TalkerChange { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::station::PeerInfo;
    use std::time::{Duration, Instant};

    fn connected(id: u32) -> Qso {
        let peer = PeerInfo::new(format!("CALL{}", id), "10.0.0.1".parse().unwrap(), "");
        let mut q = Qso::incoming(QsoHandle(id), peer);
        q.mark_connected();
        q
    }

    #[test]
    fn test_first_talker_wins() {
        let mut arb = TalkerArbiter::default();
        let mut qsos = vec![connected(1), connected(2)];
        let now = Instant::now();

        qsos[1].set_receiving(true, now);
        let change = arb.receiving_changed(&qsos, QsoHandle(2), true);
        assert_eq!(change.unwrap().to, Some(QsoHandle(2)));

        qsos[0].set_receiving(true, now);
        assert!(arb.receiving_changed(&qsos, QsoHandle(1), true).is_none());
        assert_eq!(arb.current(), Some(QsoHandle(2)));

        qsos[1].set_receiving(false, now);
        let change = arb.receiving_changed(&qsos, QsoHandle(2), false).unwrap();
        assert_eq!(change.from, Some(QsoHandle(2)));
        assert_eq!(change.to, Some(QsoHandle(1)));
    }

    #[test]
    fn test_earliest_start_policy() {
        let arb = TalkerArbiter::new(TalkerPolicy::EarliestStart);
        let mut qsos = vec![connected(1), connected(2), connected(3)];
        let now = Instant::now();
        qsos[0].set_receiving(true, now + Duration::from_millis(20));
        qsos[2].set_receiving(true, now);
        assert_eq!(arb.select(&qsos), Some(QsoHandle(3)));

        let arb = TalkerArbiter::new(TalkerPolicy::RegistrationOrder);
        assert_eq!(arb.select(&qsos), Some(QsoHandle(1)));
    }

    #[test]
    fn test_removed_talker_hands_over() {
        let mut arb = TalkerArbiter::default();
        let mut qsos = vec![connected(1), connected(2)];
        let now = Instant::now();
        qsos[0].set_receiving(true, now);
        arb.receiving_changed(&qsos, QsoHandle(1), true);
        qsos[1].set_receiving(true, now);

        qsos[0].destroy();
        let change = arb.session_removed(&qsos, QsoHandle(1)).unwrap();
        assert_eq!(change.to, Some(QsoHandle(2)));
        assert!(arb.session_removed(&qsos, QsoHandle(1)).is_none());
    }
}
