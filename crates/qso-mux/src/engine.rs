//! Module controller
//!
//! The core state machine of the link module. It owns every session, the
//! directory cache and the announcement player, and processes one
//! [`ModuleInput`] at a time through [`ModuleController::handle`].
//!
//! Sessions are kept in registration order and addressed by [`QsoHandle`].
//! A session that asks to be destroyed during a dispatch stays in the list
//! (in `Destroyed` state) until the dispatch finishes, so handlers further
//! down the same chain can still look it up.

use std::time::Instant;

use qso_audio::{AudioSink, MessagePlayer, PlaybackEvent};
use tracing::{debug, info, trace, warn};

use crate::announce::Announcement;
use crate::config::{AllowList, ModuleConfig};
use crate::directory::DirectoryCache;
use crate::dtmf::{
    parse_cbc_command, parse_command, CbcCommand, DtmfCollector, DtmfCommand, DtmfEntry,
};
use crate::error::{ConfigError, ModuleError};
use crate::events::{ModuleEvent, ModuleInput};
use crate::qso::{Direction, Qso, QsoHandle, QsoNotification, QsoState};
use crate::state::{ControllerState, ModuleStatus, QsoSummary};
use crate::station::{PeerInfo, StationData, StationStatus};
use crate::talker::{TalkerArbiter, TalkerChange};
use crate::transport::{DirectoryService, LinkState, LinkTransport};

/// Info message sent to a session that connected while all QSO slots are taken
const BUSY_INFO: &str = "Busy: too many connected stations, try again later";

/// The link module core
pub struct ModuleController<T, D, S> {
    config: ModuleConfig,
    allow_list: AllowList,
    transport: T,
    directory_service: D,
    player: MessagePlayer<S>,
    directory: DirectoryCache,
    qsos: Vec<Qso>,
    next_handle: u32,
    talker: TalkerArbiter,
    outgoing_pending: Option<QsoHandle>,
    state: ControllerState,
    active: bool,
    online: bool,
    squelch_open: bool,
    talker_suppress: bool,
    squelch_suppress: bool,
    dtmf: DtmfCollector,
    cbc_candidates: Vec<StationData>,
    cbc_deadline: Option<Instant>,
    pending_connect_id: Option<u32>,
    last_message: Option<String>,
    published: Option<(StationStatus, Vec<String>)>,
    reap_list: Vec<QsoHandle>,
    event_buffer: Vec<ModuleEvent>,
}

impl<T, D, S> ModuleController<T, D, S>
where
    T: LinkTransport,
    D: DirectoryService,
    S: AudioSink,
{
    /// Create a controller. Fails if the configuration does not validate.
    pub fn new(
        config: ModuleConfig,
        transport: T,
        directory_service: D,
        sink: S,
    ) -> Result<Self, ConfigError> {
        let allow_list = config.validate()?;
        let player = MessagePlayer::new(config.sample_rate, sink);
        let talker = TalkerArbiter::new(config.talker_policy);

        Ok(Self {
            config,
            allow_list,
            transport,
            directory_service,
            player,
            directory: DirectoryCache::new(),
            qsos: Vec::new(),
            next_handle: 1,
            talker,
            outgoing_pending: None,
            state: ControllerState::Normal,
            active: false,
            online: false,
            squelch_open: false,
            talker_suppress: false,
            squelch_suppress: false,
            dtmf: DtmfCollector::new(),
            cbc_candidates: Vec::new(),
            cbc_deadline: None,
            pending_connect_id: None,
            last_message: None,
            published: None,
            reap_list: Vec::new(),
            event_buffer: Vec::new(),
        })
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Get the configuration
    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    /// Borrow the link transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutably borrow the link transport
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Borrow the directory service
    pub fn directory_service(&self) -> &D {
        &self.directory_service
    }

    /// Mutably borrow the directory service
    pub fn directory_service_mut(&mut self) -> &mut D {
        &mut self.directory_service
    }

    /// Borrow the announcement player
    pub fn player(&self) -> &MessagePlayer<S> {
        &self.player
    }

    /// Borrow the directory cache
    pub fn directory_cache(&self) -> &DirectoryCache {
        &self.directory
    }

    /// Live sessions in registration order
    pub fn qsos(&self) -> impl Iterator<Item = &Qso> {
        self.qsos.iter().filter(|q| q.is_alive())
    }

    /// Look up a live session
    pub fn qso(&self, handle: QsoHandle) -> Option<&Qso> {
        self.qsos
            .iter()
            .find(|q| q.handle() == handle && q.is_alive())
    }

    /// Session currently feeding the local transmitter
    pub fn current_talker(&self) -> Option<QsoHandle> {
        self.talker.current()
    }

    /// Outgoing session still being set up
    pub fn outgoing_pending(&self) -> Option<QsoHandle> {
        self.outgoing_pending
    }

    /// Command state
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Whether the module is active
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether the local squelch is open
    pub fn squelch_is_open(&self) -> bool {
        self.squelch_open
    }

    /// When connect-by-callsign gives up waiting
    pub fn cbc_deadline(&self) -> Option<Instant> {
        self.cbc_deadline
    }

    /// Candidates offered by the last ambiguous callsign match
    pub fn cbc_candidates(&self) -> &[StationData] {
        &self.cbc_candidates
    }

    /// Node id waiting for the next directory refresh
    pub fn pending_connect_id(&self) -> Option<u32> {
        self.pending_connect_id
    }

    /// Last chat message received
    pub fn last_message(&self) -> Option<&str> {
        self.last_message.as_deref()
    }

    /// Number of connected sessions
    pub fn num_connected(&self) -> usize {
        self.qsos.iter().filter(|q| q.is_connected()).count()
    }

    /// Take a status snapshot
    pub fn status(&self) -> ModuleStatus {
        ModuleStatus {
            active: self.active,
            state: self.state,
            sessions: self.qsos().map(QsoSummary::from_qso).collect(),
            talker: self.talker.current(),
            talker_policy: self.talker.policy(),
            squelch_open: self.squelch_open,
            outgoing_pending: self.outgoing_pending,
            directory_size: self.directory.len(),
            playback_queue_len: self.player.queue_len(),
        }
    }

    /// Take all buffered events
    pub fn drain_events(&mut self) -> Vec<ModuleEvent> {
        std::mem::take(&mut self.event_buffer)
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Go online: publish our status and request the first station list
    pub fn initialize(&mut self) {
        info!(
            "Initializing link module {} ({})",
            self.config.callsign, self.config.location
        );
        self.online = true;
        self.published = None;
        self.publish_status();
        self.request_refresh();
        self.finish_dispatch();
    }

    /// Go offline. Every session is torn down and all timers are cancelled.
    /// Calling it again is a no-op.
    pub fn cleanup(&mut self) {
        self.deactivate();
        self.leave_cbc();
        self.pending_connect_id = None;

        let handles: Vec<QsoHandle> = self.qsos().map(Qso::handle).collect();
        for handle in handles {
            if let Some(idx) = self.index_of(handle) {
                let notes = self.qsos[idx].destroy();
                self.apply_notes(handle, notes);
            }
        }

        if self.online {
            info!("Link module {} going offline", self.config.callsign);
            self.online = false;
            self.directory_service
                .publish_status(StationStatus::Offline, &self.config.description);
        }
        self.finish_dispatch();
    }

    // -------------------------------------------------------------------------
    // Dispatch
    // -------------------------------------------------------------------------

    /// Process one notification to completion
    pub fn handle(&mut self, input: ModuleInput) {
        match input {
            ModuleInput::Activate => self.activate(false),
            ModuleInput::Deactivate => self.deactivate(),

            ModuleInput::Squelch(open) => self.squelch_changed(open),
            ModuleInput::DtmfDigit(digit) => self.dtmf_digit(digit),
            ModuleInput::AudioFromRx(samples) => self.audio_from_rx(&samples),
            ModuleInput::WriteBufferFull(is_full) => self.player.write_buffer_full(is_full),

            ModuleInput::StationListUpdated(stations) => self.station_list_updated(stations),
            ModuleInput::DirectoryError(message) => self.directory_error(message),
            ModuleInput::DirectoryStatus(status) => {
                info!("Directory status changed to {}", status.name());
                self.emit(ModuleEvent::DirectoryStatus(status));
            }

            ModuleInput::IncomingConnection(peer) => self.incoming_connection(peer),
            ModuleInput::LinkStateChanged { qso, state } => self.link_state_changed(qso, state),
            ModuleInput::ChatReceived { qso, msg } => self.chat_received(qso, msg),
            ModuleInput::IsReceiving { qso, receiving } => self.is_receiving(qso, receiving),
            ModuleInput::AudioFromRemote { qso, samples } => self.audio_from_remote(qso, &samples),

            ModuleInput::ConnectToNode(id) => {
                if let Err(e) = self.connect_to_id(id) {
                    self.report_outgoing_error(e);
                }
            }
            ModuleInput::ConnectByCallsign(prefix) => self.connect_by_callsign(&prefix),
            ModuleInput::Disconnect(handle) => {
                if let Err(e) = self.disconnect_qso(handle) {
                    warn!("Disconnect failed: {}", e);
                    self.emit(ModuleEvent::Error {
                        source: "disconnect".into(),
                        message: e.to_string(),
                    });
                }
            }
            ModuleInput::DisconnectAll => self.disconnect_all(),

            ModuleInput::DirectoryRefreshTimer => {
                if !self.directory.begin_refresh() {
                    warn!("Previous directory refresh never completed, requesting again");
                }
                self.directory_service.refresh();
            }
            ModuleInput::CbcTimeout => self.cbc_timeout(),
            ModuleInput::IdleCheck { now } => self.idle_check(now),
        }
        self.finish_dispatch();
    }

    /// Reap destroyed sessions and publish the results of this dispatch
    fn finish_dispatch(&mut self) {
        for handle in std::mem::take(&mut self.reap_list) {
            if let Some(idx) = self.index_of(handle) {
                let qso = self.qsos.remove(idx);
                info!("Session {} ({}) removed", handle, qso.callsign());
                self.emit(ModuleEvent::QsoRemoved {
                    handle,
                    callsign: qso.callsign().to_string(),
                });
            }
        }

        self.publish_status();

        let mut idle = false;
        for event in self.player.drain_events() {
            match event {
                PlaybackEvent::AllMessagesWritten => idle = true,
                PlaybackEvent::ItemSkipped { kind } => debug!("Skipped {} announcement item", kind),
            }
        }
        if idle && self.player.is_idle() {
            self.emit(ModuleEvent::PlaybackIdle);
        }
    }

    fn emit(&mut self, event: ModuleEvent) {
        self.event_buffer.push(event);
    }

    // -------------------------------------------------------------------------
    // Activation
    // -------------------------------------------------------------------------

    fn activate(&mut self, remote: bool) {
        if self.active {
            return;
        }
        if remote {
            info!("Link module activated by incoming connection");
        } else {
            info!("Link module activated");
        }
        self.active = true;
        self.dtmf.reset();
        self.set_state(ControllerState::Normal);
        self.emit(ModuleEvent::Activated { remote });
    }

    fn deactivate(&mut self) {
        if !self.active {
            return;
        }
        info!("Link module deactivated");
        self.active = false;
        self.dtmf.reset();
        self.leave_cbc();
        self.pending_connect_id = None;
        self.disconnect_all();
        self.player.clear();
        self.emit(ModuleEvent::Deactivated);
    }

    // -------------------------------------------------------------------------
    // Local radio
    // -------------------------------------------------------------------------

    fn squelch_changed(&mut self, open: bool) {
        debug!("Squelch {}", if open { "open" } else { "closed" });
        self.squelch_open = open;
        if open && !self.squelch_suppress {
            self.squelch_suppress = true;
            self.player.begin();
        } else if !open && self.squelch_suppress {
            self.squelch_suppress = false;
            self.player.end();
        }
    }

    fn audio_from_rx(&mut self, samples: &[f32]) {
        if !self.squelch_open {
            trace!("Dropping {} receiver samples, squelch closed", samples.len());
            return;
        }
        let now = Instant::now();
        for qso in self.qsos.iter_mut().filter(|q| q.is_connected()) {
            qso.touch(now);
            if let Err(e) = qso.send_audio(&mut self.transport, samples) {
                warn!("Sending audio to {} failed: {}", qso.callsign(), e);
            }
        }
    }

    fn dtmf_digit(&mut self, digit: char) {
        if !self.active {
            debug!("Ignoring DTMF digit {:?} while inactive", digit);
            return;
        }
        match self.dtmf.push(digit) {
            Some(DtmfEntry::Command(cmd)) => {
                info!("DTMF command received: \"{}\"", cmd);
                match self.state {
                    ControllerState::Normal => self.command(parse_command(&cmd)),
                    ControllerState::ConnectByCallPending => {
                        self.cbc_command(parse_cbc_command(&cmd))
                    }
                }
            }
            Some(DtmfEntry::Overlong) => {
                warn!("Ignoring overlong DTMF command");
                self.leave_cbc();
                self.announce(Announcement::UnknownCommand(String::new()));
            }
            None => {}
        }
    }

    fn command(&mut self, cmd: DtmfCommand) {
        match cmd {
            DtmfCommand::DisconnectLast => {
                let last = self
                    .qsos
                    .iter()
                    .rev()
                    .find(|q| {
                        matches!(
                            q.state(),
                            QsoState::Connecting | QsoState::Idle | QsoState::Talking
                        )
                    })
                    .map(Qso::handle);
                match last {
                    Some(handle) => {
                        if let Err(e) = self.disconnect_qso(handle) {
                            warn!("Disconnecting last session failed: {}", e);
                        }
                    }
                    None => self.deactivate(),
                }
            }
            DtmfCommand::Help => self.announce(Announcement::Help),
            DtmfCommand::ListConnected => {
                let calls = self.connected_callsigns();
                self.announce(Announcement::ConnectedStations(calls));
            }
            DtmfCommand::OwnNode => {
                let call = self.config.callsign.clone();
                self.announce(Announcement::OwnNode(call));
            }
            DtmfCommand::ConnectByCallMode => self.enter_cbc(),
            DtmfCommand::ConnectByCall(keys) => self.connect_by_callsign(&keys),
            DtmfCommand::ConnectById(id) => {
                if let Err(e) = self.connect_to_id(id) {
                    self.report_outgoing_error(e);
                }
            }
            DtmfCommand::Unknown(cmd) => {
                warn!("Unknown DTMF command \"{}\"", cmd);
                self.announce(Announcement::UnknownCommand(cmd));
            }
        }
    }

    // -------------------------------------------------------------------------
    // Connect by callsign
    // -------------------------------------------------------------------------

    fn enter_cbc(&mut self) {
        self.cbc_candidates.clear();
        self.arm_cbc();
        self.announce(Announcement::EnterCallsign);
    }

    fn arm_cbc(&mut self) {
        self.set_state(ControllerState::ConnectByCallPending);
        self.cbc_deadline = Some(Instant::now() + self.config.cbc_timeout());
    }

    fn leave_cbc(&mut self) {
        self.cbc_deadline = None;
        self.cbc_candidates.clear();
        self.set_state(ControllerState::Normal);
    }

    fn cbc_command(&mut self, cmd: CbcCommand) {
        match cmd {
            CbcCommand::Cancel => {
                info!("Connect by callsign cancelled");
                self.leave_cbc();
                self.announce(Announcement::CbcCancelled);
            }
            CbcCommand::Select(n) => {
                let picked = n
                    .checked_sub(1)
                    .and_then(|idx| self.cbc_candidates.get(idx))
                    .cloned();
                self.leave_cbc();
                match picked {
                    Some(station) => {
                        if let Err(e) = self.connect_to_station(station) {
                            self.report_outgoing_error(e);
                        }
                    }
                    None => {
                        warn!("No connect-by-callsign candidate {}", n);
                        self.announce(Announcement::UnknownCommand(format!("*{}", n)));
                    }
                }
            }
            CbcCommand::Prefix(prefix) => self.connect_by_callsign(&prefix),
        }
    }

    /// Resolve `prefix` against the directory and act on the result
    fn connect_by_callsign(&mut self, prefix: &str) {
        let matches = self.directory.match_prefix(prefix);
        match matches.len() {
            0 => {
                info!("No station matches \"{}\"", prefix);
                self.leave_cbc();
                self.announce(Announcement::NoMatch);
            }
            1 => {
                self.leave_cbc();
                let station = matches.into_iter().next();
                if let Some(station) = station {
                    if let Err(e) = self.connect_to_station(station) {
                        self.report_outgoing_error(e);
                    }
                }
            }
            n => {
                info!("{} stations match \"{}\"", n, prefix);
                let calls = matches.iter().map(|s| s.callsign.clone()).collect();
                self.cbc_candidates = matches;
                self.arm_cbc();
                self.announce(Announcement::Ambiguous(calls));
            }
        }
    }

    fn cbc_timeout(&mut self) {
        if self.state != ControllerState::ConnectByCallPending {
            debug!("Ignoring stale connect-by-callsign timeout");
            return;
        }
        info!("Connect by callsign timed out");
        self.leave_cbc();
        self.announce(Announcement::CbcCancelled);
    }

    // -------------------------------------------------------------------------
    // Outgoing connections
    // -------------------------------------------------------------------------

    /// Connect to a node id. Returns `Ok(None)` if the id has to wait for
    /// the next directory refresh.
    pub fn connect_to_id(&mut self, id: u32) -> Result<Option<QsoHandle>, ModuleError> {
        if let Some(station) = self.directory.find_by_id(id).cloned() {
            return self.connect_to_station(station).map(Some);
        }
        if !self.active {
            return Err(ModuleError::NotActive);
        }
        if self.directory.is_empty() || self.directory.refresh_pending() {
            info!("Node {} not cached yet, waiting for directory refresh", id);
            self.pending_connect_id = Some(id);
            self.request_refresh();
            return Ok(None);
        }
        Err(ModuleError::StationNotFound(id.to_string()))
    }

    /// Start an outgoing connection to `station`
    pub fn connect_to_station(&mut self, station: StationData) -> Result<QsoHandle, ModuleError> {
        self.check_outgoing(&station)?;

        let handle = self.alloc_handle();
        info!("Connecting to {} as session {}", station, handle);
        self.qsos
            .push(Qso::outgoing(handle, PeerInfo::from(&station), station.id));
        self.emit(ModuleEvent::QsoAdded {
            handle,
            callsign: station.callsign.clone(),
            direction: Direction::Outgoing,
        });

        if let Err(e) = self.transport.connect(handle, &station) {
            warn!("Could not connect to {}: {}", station, e);
            if let Some(idx) = self.index_of(handle) {
                let notes = self.qsos[idx].destroy();
                self.apply_notes(handle, notes);
            }
            return Err(e.into());
        }

        self.outgoing_pending = Some(handle);
        self.announce(Announcement::Connecting(station.callsign));
        Ok(handle)
    }

    fn check_outgoing(&self, station: &StationData) -> Result<(), ModuleError> {
        if !self.active {
            return Err(ModuleError::NotActive);
        }
        if station.callsign.eq_ignore_ascii_case(&self.config.callsign) {
            return Err(ModuleError::InvalidCommand(format!(
                "cannot connect to own callsign {}",
                station.callsign
            )));
        }
        if self.outgoing_pending.is_some() {
            return Err(ModuleError::OutgoingPending);
        }
        if self.qsos().count() >= self.config.max_connections {
            return Err(ModuleError::TooManyConnections(self.config.max_connections));
        }
        if self.num_connected() >= self.config.max_qsos {
            return Err(ModuleError::TooManyQsos(self.config.max_qsos));
        }
        if self.has_session_with(&station.callsign) {
            return Err(ModuleError::AlreadyConnected(station.callsign.clone()));
        }
        Ok(())
    }

    fn report_outgoing_error(&mut self, e: ModuleError) {
        warn!("Outgoing connection rejected: {}", e);
        self.emit(ModuleEvent::OutgoingRejected {
            reason: e.to_string(),
        });
        let announcement = match e {
            ModuleError::OutgoingPending
            | ModuleError::TooManyConnections(_)
            | ModuleError::TooManyQsos(_) => Announcement::Busy,
            ModuleError::StationNotFound(id) => Announcement::NotFound(id),
            ModuleError::AlreadyConnected(call) => Announcement::ConnectFailed(call),
            ModuleError::InvalidCommand(cmd) => Announcement::UnknownCommand(cmd),
            // Already announced when the session was torn down
            ModuleError::Transport(_) => return,
            ModuleError::NotActive
            | ModuleError::QsoNotFound(_)
            | ModuleError::AccessDenied(_) => return,
        };
        self.announce(announcement);
    }

    // -------------------------------------------------------------------------
    // Incoming connections
    // -------------------------------------------------------------------------

    fn incoming_connection(&mut self, peer: PeerInfo) {
        info!(
            "Incoming connection from {} ({}) at {}",
            peer.callsign, peer.name, peer.ip
        );

        if let Err(e) = self.admit(&peer) {
            warn!("Rejecting {}: {}", peer.callsign, e);
            let reason = e.to_string();
            self.transport.reject(&peer, &reason);
            self.emit(ModuleEvent::IncomingRejected {
                callsign: peer.callsign,
                reason,
            });
            return;
        }

        if !self.active {
            self.activate(true);
        }

        let handle = self.alloc_handle();
        self.qsos.push(Qso::incoming(handle, peer.clone()));
        self.emit(ModuleEvent::QsoAdded {
            handle,
            callsign: peer.callsign.clone(),
            direction: Direction::Incoming,
        });

        if let Err(e) = self.transport.accept(handle, &peer) {
            warn!("Accepting {} failed: {}", peer.callsign, e);
            self.emit(ModuleEvent::Error {
                source: "accept".into(),
                message: e.to_string(),
            });
            if let Some(idx) = self.index_of(handle) {
                let notes = self.qsos[idx].destroy();
                self.apply_notes(handle, notes);
            }
            return;
        }

        if self.config.auto_accept {
            if let Some(idx) = self.index_of(handle) {
                let notes = self.qsos[idx].mark_connected();
                self.apply_notes(handle, notes);
            }
        }
    }

    fn admit(&self, peer: &PeerInfo) -> Result<(), ModuleError> {
        if !self.allow_list.permits(peer.ip) {
            return Err(ModuleError::AccessDenied(peer.ip));
        }
        if !self.active && !self.config.remote_activation {
            return Err(ModuleError::NotActive);
        }
        if self.qsos().count() >= self.config.max_connections {
            return Err(ModuleError::TooManyConnections(self.config.max_connections));
        }
        if self.num_connected() >= self.config.max_qsos {
            return Err(ModuleError::TooManyQsos(self.config.max_qsos));
        }
        if self.has_session_with(&peer.callsign) {
            return Err(ModuleError::AlreadyConnected(peer.callsign.clone()));
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Session notifications
    // -------------------------------------------------------------------------

    fn link_state_changed(&mut self, handle: QsoHandle, state: LinkState) {
        let Some(idx) = self.index_of(handle) else {
            warn!("Link state {:?} for unknown session {}", state, handle);
            return;
        };
        let notes = self.qsos[idx].link_state_changed(state);
        self.apply_notes(handle, notes);
    }

    fn is_receiving(&mut self, handle: QsoHandle, receiving: bool) {
        let Some(idx) = self.index_of(handle) else {
            warn!("Receive state for unknown session {}", handle);
            return;
        };
        let notes = self.qsos[idx].set_receiving(receiving, Instant::now());
        self.apply_notes(handle, notes);
    }

    fn chat_received(&mut self, handle: QsoHandle, msg: String) {
        let Some(callsign) = self.qso(handle).map(|q| q.callsign().to_string()) else {
            warn!("Chat message from unknown session {}", handle);
            return;
        };
        info!("Chat message from {}: {}", callsign, msg);

        for qso in self
            .qsos
            .iter()
            .filter(|q| q.handle() != handle && q.is_connected())
        {
            if let Err(e) = qso.send_chat(&mut self.transport, &msg) {
                warn!("Relaying chat to {} failed: {}", qso.callsign(), e);
            }
        }

        self.last_message = Some(msg.clone());
        self.emit(ModuleEvent::ChatReceived {
            handle,
            callsign,
            msg,
        });
    }

    fn audio_from_remote(&mut self, handle: QsoHandle, samples: &[f32]) {
        let Some(idx) = self.index_of(handle) else {
            trace!("Audio from unknown session {}", handle);
            return;
        };
        self.qsos[idx].touch(Instant::now());

        if self.talker.current() != Some(handle) || self.squelch_open {
            trace!("Dropping {} samples from {}", samples.len(), handle);
            return;
        }

        match self.player.sink_mut().write_samples(samples) {
            Ok(written) if written < samples.len() => {
                trace!("Transmitter took {} of {} samples", written, samples.len());
            }
            Ok(_) => {}
            Err(e) => warn!("Writing talker audio failed: {}", e),
        }

        for qso in self
            .qsos
            .iter()
            .filter(|q| q.handle() != handle && q.is_connected())
        {
            if let Err(e) = qso.send_audio(&mut self.transport, samples) {
                warn!("Relaying audio to {} failed: {}", qso.callsign(), e);
            }
        }
    }

    fn apply_notes(&mut self, handle: QsoHandle, notes: Vec<QsoNotification>) {
        for note in notes {
            match note {
                QsoNotification::StateChanged { from, to } => {
                    self.qso_state_changed(handle, from, to)
                }
                QsoNotification::IsReceiving(receiving) => {
                    let change = self.talker.receiving_changed(&self.qsos, handle, receiving);
                    if let Some(change) = change {
                        self.talker_changed(change);
                    }
                }
                QsoNotification::DestroyMe => self.destroy_me(handle),
            }
        }
    }

    fn qso_state_changed(&mut self, handle: QsoHandle, from: QsoState, to: QsoState) {
        let Some(idx) = self.index_of(handle) else {
            return;
        };
        let callsign = self.qsos[idx].callsign().to_string();
        let direction = self.qsos[idx].direction();
        info!(
            "Session {} ({}) {} -> {}",
            handle,
            callsign,
            from.name(),
            to.name()
        );
        self.emit(ModuleEvent::QsoStateChanged { handle, from, to });

        match (from, to) {
            (QsoState::Connecting, QsoState::Idle) => {
                if self.outgoing_pending == Some(handle) {
                    self.outgoing_pending = None;
                }
                if self.num_connected() > self.config.max_qsos {
                    warn!("{} connected but all QSO slots are taken", callsign);
                    if let Err(e) = self.qsos[idx].send_info(&mut self.transport, BUSY_INFO) {
                        warn!("Sending busy message to {} failed: {}", callsign, e);
                    }
                    if let Err(e) = self.disconnect_qso(handle) {
                        warn!("Disconnecting {} failed: {}", callsign, e);
                    }
                    return;
                }
                let info = self.talker_info();
                if let Err(e) = self.qsos[idx].send_info(&mut self.transport, &info) {
                    warn!("Sending info to {} failed: {}", callsign, e);
                }
                self.announce(Announcement::Connected(callsign));
            }
            (QsoState::Connecting, QsoState::Destroyed) => {
                if direction == Direction::Outgoing {
                    self.announce(Announcement::ConnectFailed(callsign));
                }
            }
            (QsoState::Idle | QsoState::Talking | QsoState::Disconnecting, QsoState::Destroyed) => {
                self.announce(Announcement::Disconnected(callsign));
            }
            _ => {}
        }
    }

    fn destroy_me(&mut self, handle: QsoHandle) {
        if let Some(change) = self.talker.session_removed(&self.qsos, handle) {
            self.talker_changed(change);
        }
        if self.outgoing_pending == Some(handle) {
            self.outgoing_pending = None;
        }
        if !self.reap_list.contains(&handle) {
            debug!("Session {} scheduled for removal", handle);
            self.reap_list.push(handle);
        }
    }

    fn talker_changed(&mut self, change: TalkerChange) {
        self.emit(ModuleEvent::TalkerChanged {
            from: change.from,
            to: change.to,
        });

        if change.to.is_some() && !self.talker_suppress {
            self.talker_suppress = true;
            self.player.begin();
        } else if change.to.is_none() && self.talker_suppress {
            self.talker_suppress = false;
            self.player.end();
        }

        let info = self.talker_info();
        for qso in self.qsos.iter().filter(|q| q.is_connected()) {
            if let Err(e) = qso.send_info(&mut self.transport, &info) {
                warn!("Sending talker info to {} failed: {}", qso.callsign(), e);
            }
        }
    }

    fn talker_info(&self) -> String {
        let talker = self
            .talker
            .current()
            .and_then(|h| self.qso(h))
            .map(|q| q.callsign().to_string());
        let mut info = format!("{}\n", self.config.callsign);
        match talker {
            Some(call) => info.push_str(&format!("Talker: {}\n", call)),
            None => info.push_str("No talker\n"),
        }
        let calls = self.connected_callsigns();
        if !calls.is_empty() {
            info.push_str(&format!("Connected: {}\n", calls.join(", ")));
        }
        info
    }

    // -------------------------------------------------------------------------
    // Disconnecting
    // -------------------------------------------------------------------------

    /// Ask a session to disconnect
    pub fn disconnect_qso(&mut self, handle: QsoHandle) -> Result<(), ModuleError> {
        let idx = self
            .index_of(handle)
            .ok_or(ModuleError::QsoNotFound(handle))?;
        if !self.qsos[idx].is_alive() {
            return Err(ModuleError::QsoNotFound(handle));
        }
        info!("Disconnecting {}", self.qsos[idx].callsign());
        let notes = self.qsos[idx].disconnect();
        self.transport.disconnect(handle);
        self.apply_notes(handle, notes);
        Ok(())
    }

    fn disconnect_all(&mut self) {
        let handles: Vec<QsoHandle> = self
            .qsos
            .iter()
            .filter(|q| {
                matches!(
                    q.state(),
                    QsoState::Connecting | QsoState::Idle | QsoState::Talking
                )
            })
            .map(Qso::handle)
            .collect();
        for handle in handles {
            if let Err(e) = self.disconnect_qso(handle) {
                warn!("Disconnecting {} failed: {}", handle, e);
            }
        }
    }

    fn idle_check(&mut self, now: Instant) {
        if self.cbc_deadline.is_some_and(|deadline| now >= deadline) {
            self.cbc_timeout();
        }

        let Some(timeout) = self.config.link_idle_timeout() else {
            return;
        };
        let idle: Vec<QsoHandle> = self
            .qsos
            .iter()
            .filter(|q| {
                q.is_connected() && now.saturating_duration_since(q.last_activity()) >= timeout
            })
            .map(Qso::handle)
            .collect();
        for handle in idle {
            info!("Session {} idle for {:?}, disconnecting", handle, timeout);
            if let Err(e) = self.disconnect_qso(handle) {
                warn!("Disconnecting idle session {} failed: {}", handle, e);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Directory
    // -------------------------------------------------------------------------

    fn request_refresh(&mut self) {
        if self.directory.begin_refresh() {
            debug!("Requesting station list");
            self.directory_service.refresh();
        }
    }

    fn station_list_updated(&mut self, stations: Vec<StationData>) {
        self.directory.replace(stations, Instant::now());
        self.emit(ModuleEvent::DirectoryRefreshed {
            stations: self.directory.len(),
        });

        if let Some(id) = self.pending_connect_id.take() {
            match self.directory.find_by_id(id).cloned() {
                Some(station) => {
                    if let Err(e) = self.connect_to_station(station) {
                        self.report_outgoing_error(e);
                    }
                }
                None => {
                    warn!("Node {} not in the directory", id);
                    self.report_outgoing_error(ModuleError::StationNotFound(id.to_string()));
                }
            }
        }
    }

    fn directory_error(&mut self, message: String) {
        self.directory.refresh_failed(&message);
        if let Some(id) = self.pending_connect_id.take() {
            self.report_outgoing_error(ModuleError::StationNotFound(id.to_string()));
        }
        self.emit(ModuleEvent::DirectoryError { message });
    }

    /// Publish Busy/Online with the connected callsigns when they change
    fn publish_status(&mut self) {
        if !self.online {
            return;
        }
        let calls = self.connected_callsigns();
        let status = if calls.len() >= self.config.max_qsos {
            StationStatus::Busy
        } else {
            StationStatus::Online
        };
        if self
            .published
            .as_ref()
            .is_some_and(|(s, c)| *s == status && *c == calls)
        {
            return;
        }

        let mut description = self.config.description.clone();
        if !calls.is_empty() {
            if !description.is_empty() {
                description.push(' ');
            }
            description.push_str(&format!("[In QSO with {}]", calls.join(", ")));
        }
        debug!("Publishing status {}: {}", status.name(), description);
        self.directory_service.publish_status(status, &description);
        self.published = Some((status, calls));
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    fn announce(&mut self, announcement: Announcement) {
        if !self.active {
            debug!("Not announcing {:?} while inactive", announcement);
            return;
        }
        debug!("Announcing {:?}", announcement);
        announcement.render(&mut self.player, &self.config.sound_dir);
        self.emit(ModuleEvent::Announcement(announcement));
    }

    fn set_state(&mut self, state: ControllerState) {
        if self.state != state {
            info!("Command state: {}", state.name());
            self.state = state;
            self.emit(ModuleEvent::StateChanged(state));
        }
    }

    fn alloc_handle(&mut self) -> QsoHandle {
        let handle = QsoHandle(self.next_handle);
        self.next_handle += 1;
        handle
    }

    fn index_of(&self, handle: QsoHandle) -> Option<usize> {
        self.qsos.iter().position(|q| q.handle() == handle)
    }

    fn has_session_with(&self, callsign: &str) -> bool {
        self.qsos()
            .any(|q| q.callsign().eq_ignore_ascii_case(callsign))
    }

    fn connected_callsigns(&self) -> Vec<String> {
        self.qsos
            .iter()
            .filter(|q| q.is_connected())
            .map(|q| q.callsign().to_string())
            .collect()
    }
}
