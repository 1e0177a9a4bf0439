//! Link module actor
//!
//! Runs a [`ModuleController`] inside a tokio task. Commands arrive on an mpsc
//! channel and are dispatched one at a time; the directory refresh, idle
//! check and connect-by-callsign timers are driven from the same `select!`
//! loop, so the controller never sees two notifications at once.

use std::time::Duration;

use qso_audio::AudioSink;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::engine::ModuleController;
use crate::events::{ModuleEvent, ModuleInput};
use crate::state::ModuleStatus;
use crate::transport::{DirectoryService, LinkTransport};

/// Interval of the idle check
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Commands sent to the module actor
#[derive(Debug)]
pub enum ModuleCommand {
    /// Deliver a notification to the controller
    Input(ModuleInput),

    /// Query a status snapshot
    QueryStatus {
        /// Channel to send the snapshot back on
        response: oneshot::Sender<ModuleStatus>,
    },

    /// Shutdown the actor
    Shutdown,
}

/// Run the module actor
///
/// The controller is initialized on start and cleaned up when the command
/// channel closes or [`ModuleCommand::Shutdown`] arrives. Every event the
/// controller produces is forwarded to `event_tx`.
pub async fn run_module_actor<T, D, S>(
    mut controller: ModuleController<T, D, S>,
    mut cmd_rx: mpsc::Receiver<ModuleCommand>,
    event_tx: mpsc::Sender<ModuleEvent>,
) where
    T: LinkTransport,
    D: DirectoryService,
    S: AudioSink,
{
    info!("Link module actor started");
    controller.initialize();
    forward_events(&mut controller, &event_tx).await;

    let refresh_period = controller.config().dir_refresh_interval();
    let mut refresh_timer = interval_at(Instant::now() + refresh_period, refresh_period);
    refresh_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut idle_timer = interval(IDLE_CHECK_INTERVAL);
    idle_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let cbc_deadline = controller.cbc_deadline();

        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break; };
                match cmd {
                    ModuleCommand::Input(input) => controller.handle(input),
                    ModuleCommand::QueryStatus { response } => {
                        let _ = response.send(controller.status());
                    }
                    ModuleCommand::Shutdown => {
                        info!("Link module actor shutting down");
                        break;
                    }
                }
            }
            _ = refresh_timer.tick() => {
                controller.handle(ModuleInput::DirectoryRefreshTimer);
            }
            now = idle_timer.tick() => {
                controller.handle(ModuleInput::IdleCheck { now: now.into_std() });
            }
            _ = wait_for_deadline(cbc_deadline) => {
                debug!("Connect-by-callsign deadline reached");
                controller.handle(ModuleInput::CbcTimeout);
            }
        }

        forward_events(&mut controller, &event_tx).await;
    }

    controller.cleanup();
    forward_events(&mut controller, &event_tx).await;
    info!("Link module actor stopped");
}

/// Sleep until `deadline`, or forever if there is none
async fn wait_for_deadline(deadline: Option<std::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

async fn forward_events<T, D, S>(
    controller: &mut ModuleController<T, D, S>,
    event_tx: &mpsc::Sender<ModuleEvent>,
) where
    T: LinkTransport,
    D: DirectoryService,
    S: AudioSink,
{
    for event in controller.drain_events() {
        let _ = event_tx.send(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModuleConfig;
    use crate::error::TransportError;
    use crate::qso::QsoHandle;
    use crate::state::ControllerState;
    use crate::station::{PeerInfo, StationData, StationStatus};
    use crate::talker::TalkerPolicy;
    use qso_audio::AudioError;

    struct NullLink;

    impl LinkTransport for NullLink {
        fn connect(&mut self, _: QsoHandle, _: &StationData) -> Result<(), TransportError> {
            Ok(())
        }
        fn accept(&mut self, _: QsoHandle, _: &PeerInfo) -> Result<(), TransportError> {
            Ok(())
        }
        fn reject(&mut self, _: &PeerInfo, _: &str) {}
        fn send_audio(&mut self, _: QsoHandle, _: &[f32]) -> Result<(), TransportError> {
            Ok(())
        }
        fn send_chat(&mut self, _: QsoHandle, _: &str) -> Result<(), TransportError> {
            Ok(())
        }
        fn send_info(&mut self, _: QsoHandle, _: &str) -> Result<(), TransportError> {
            Ok(())
        }
        fn disconnect(&mut self, _: QsoHandle) {}
    }

    struct NullDir;

    impl DirectoryService for NullDir {
        fn refresh(&mut self) {}
        fn publish_status(&mut self, _: StationStatus, _: &str) {}
    }

    struct NullSink;

    impl AudioSink for NullSink {
        fn write_samples(&mut self, samples: &[f32]) -> Result<usize, AudioError> {
            Ok(samples.len())
        }
    }

    fn spawn_actor(
        config: ModuleConfig,
    ) -> (
        mpsc::Sender<ModuleCommand>,
        mpsc::Receiver<ModuleEvent>,
        tokio::task::JoinHandle<()>,
    ) {
        let config = ModuleConfig {
            sound_dir: "/nonexistent".into(),
            ..config
        };
        let controller = ModuleController::new(config, NullLink, NullDir, NullSink).unwrap();
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, event_rx) = mpsc::channel(256);
        let handle = tokio::spawn(run_module_actor(controller, cmd_rx, event_tx));
        (cmd_tx, event_rx, handle)
    }

    async fn query(cmd_tx: &mpsc::Sender<ModuleCommand>) -> ModuleStatus {
        let (resp_tx, resp_rx) = oneshot::channel();
        cmd_tx
            .send(ModuleCommand::QueryStatus { response: resp_tx })
            .await
            .unwrap();
        resp_rx.await.unwrap()
    }

    #[tokio::test]
    async fn test_incoming_connection_via_actor() {
        let (cmd_tx, mut event_rx, actor) = spawn_actor(ModuleConfig::default());

        cmd_tx
            .send(ModuleCommand::Input(ModuleInput::Activate))
            .await
            .unwrap();
        cmd_tx
            .send(ModuleCommand::Input(ModuleInput::IncomingConnection(
                PeerInfo::new("W1AW", "10.0.0.9".parse().unwrap(), "Hiram"),
            )))
            .await
            .unwrap();

        let status = query(&cmd_tx).await;
        assert!(status.active);
        assert_eq!(status.sessions.len(), 1);
        assert_eq!(status.sessions[0].callsign, "W1AW");
        assert_eq!(status.sessions[0].station_id, None);
        assert_eq!(status.talker_policy, TalkerPolicy::RegistrationOrder);

        let mut saw_added = false;
        while let Ok(event) = event_rx.try_recv() {
            if let ModuleEvent::QsoAdded { callsign, .. } = event {
                assert_eq!(callsign, "W1AW");
                saw_added = true;
            }
        }
        assert!(saw_added);

        cmd_tx.send(ModuleCommand::Shutdown).await.unwrap();
        actor.await.unwrap();

        // Cleanup on shutdown tears the session down
        let mut removed = false;
        while let Some(event) = event_rx.recv().await {
            if matches!(event, ModuleEvent::QsoRemoved { .. }) {
                removed = true;
            }
        }
        assert!(removed);
    }

    #[tokio::test]
    async fn test_cbc_deadline_fires() {
        let (cmd_tx, mut event_rx, actor) = spawn_actor(ModuleConfig {
            cbc_timeout_secs: 1,
            ..Default::default()
        });

        cmd_tx
            .send(ModuleCommand::Input(ModuleInput::Activate))
            .await
            .unwrap();
        for digit in ['6', '#'] {
            cmd_tx
                .send(ModuleCommand::Input(ModuleInput::DtmfDigit(digit)))
                .await
                .unwrap();
        }
        assert_eq!(
            query(&cmd_tx).await.state,
            ControllerState::ConnectByCallPending
        );

        let back_to_normal = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(event) = event_rx.recv().await {
                if event == ModuleEvent::StateChanged(ControllerState::Normal) {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap_or(false);
        assert!(back_to_normal);

        cmd_tx.send(ModuleCommand::Shutdown).await.unwrap();
        actor.await.unwrap();
    }
}
