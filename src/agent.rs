use crate::connection::{
    ChannelEvent, ChannelId, ConnectionManager, ConnectionState, ConnectionStats, Connector, Endpoint, TaggedEvent,
};
use crate::host::{Host, ACTIVE_PILOT_HREF};
use crate::protocol::{
    decode_capabilities, decode_update, encode_mode, encode_servo, encode_state, encode_tack, encode_target,
    encode_watch, ProtocolError, TackDirection, UpdateRecord, WireMessage, UPDATE_EVENT, VALUES_EVENT,
    WATCHED_KEYS,
};
use crate::scheduler::{DodgeHandle, DodgeScheduler, DodgeStats, SERVO_NEUTRAL};
use crate::state::{AutopilotSnapshot, AutopilotState, StateStore};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const STATUS_CONNECTED: &str = "Started: Connected to PyPilot.";
const STATUS_CONNECT_ERROR: &str = "Unable to connect to PyPilot!";
const STATUS_DISCONNECTED: &str = "Disconnected from PyPilot.";
const STATUS_STOPPED: &str = "Stopped.";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AgentState {
    pub events_received: u32,
    pub updates_published: u32,
    pub commands_sent: u32,
    pub malformed_payloads: u32,
    pub last_error: Option<String>,
}

/// Host request routed to the agent. One variant per provider operation.
#[derive(Debug, Clone, PartialEq)]
pub enum AutopilotRequest {
    GetData,
    Engage,
    Disengage,
    SetState(String),
    SetMode(String),
    SetTarget(f64),
    AdjustTarget(f64),
    Tack(TackDirection),
    Gybe(TackDirection),
    Dodge(Option<f64>),
    CancelDodge,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AutopilotReply {
    Data(AutopilotSnapshot),
    /// The command was handed to the channel. The daemon has not confirmed it.
    Dispatched,
    DodgeStarted(Option<DodgeHandle>),
    DodgeCancelled(bool),
}

impl AutopilotReply {
    pub fn into_data(self) -> Result<AutopilotSnapshot, AutopilotError> {
        match self {
            AutopilotReply::Data(snapshot) => Ok(snapshot),
            other => Err(other.unexpected()),
        }
    }

    pub fn into_dodge_started(self) -> Result<Option<DodgeHandle>, AutopilotError> {
        match self {
            AutopilotReply::DodgeStarted(handle) => Ok(handle),
            other => Err(other.unexpected()),
        }
    }

    pub fn into_dodge_cancelled(self) -> Result<bool, AutopilotError> {
        match self {
            AutopilotReply::DodgeCancelled(cancelled) => Ok(cancelled),
            other => Err(other.unexpected()),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            AutopilotReply::Data(_) => "data",
            AutopilotReply::Dispatched => "dispatched",
            AutopilotReply::DodgeStarted(_) => "dodge started",
            AutopilotReply::DodgeCancelled(_) => "dodge cancelled",
        }
    }

    fn unexpected(&self) -> AutopilotError {
        AutopilotError::UnexpectedReply(self.kind())
    }
}

/// Autopilot provider for a single pypilot daemon.
///
/// Owns the snapshot, the connection and the dodge schedule. Inbound channel
/// events go through [`AutopilotAgent::handle_tagged_event`] (or
/// [`AutopilotAgent::handle_event`] for the current channel), host commands through
/// the facade methods (or [`AutopilotAgent::execute`]), and timed work through
/// [`AutopilotAgent::poll_timers`].
///
/// `state`, `mode` and `target` only change when the daemon confirms them;
/// commands never write the snapshot.
pub struct AutopilotAgent<H: Host> {
    host: H,
    store: StateStore,
    connection: ConnectionManager,
    scheduler: DodgeScheduler,
    state: AgentState,
    start_time: Instant,
}

impl<H: Host> AutopilotAgent<H> {
    pub fn new(host: H) -> Self {
        Self {
            host,
            store: StateStore::new(),
            connection: ConnectionManager::new(),
            scheduler: DodgeScheduler::new(),
            state: AgentState::default(),
            start_time: Instant::now(),
        }
    }

    /// Open the daemon channel. A channel that cannot be opened is reported to
    /// the host as an error and leaves the agent `Failed`.
    pub fn initialise(&mut self, connector: &mut dyn Connector, endpoint: Endpoint) {
        info!(endpoint = %endpoint, "Connecting to PyPilot");
        self.scheduler.cancel();

        if let Err(e) = self.connection.open(connector, &endpoint) {
            let err = AutopilotError::ChannelUnavailable(e.to_string());
            error!(endpoint = %endpoint, error = %err, "Unable to open channel");
            self.state.last_error = Some(err.to_string());
            self.host.set_error(&format!(
                "PyPilot NOT connected @ {endpoint}... ensure 'pypilot_web' is running."
            ));
        }
    }

    pub fn shutdown(&mut self) {
        info!("Shutting down PyPilot connection");
        self.scheduler.cancel();
        self.connection.close();
        self.host.set_active_pilot(None);
        self.host.set_status(STATUS_STOPPED);
    }

    /// Handle an event only if it came from the channel currently open.
    pub fn handle_tagged_event(&mut self, tagged: TaggedEvent) {
        if !self.connection.is_current(tagged.channel) {
            debug!(channel = tagged.channel, event = ?tagged.event, "Dropping event from a replaced channel");
            return;
        }
        self.handle_event(tagged.event);
    }

    pub fn handle_event(&mut self, event: ChannelEvent) {
        self.state.events_received = self.state.events_received.saturating_add(1);

        match event {
            ChannelEvent::Connected => self.on_connected(),
            ChannelEvent::ConnectError(reason) => self.on_connect_error(&reason),
            ChannelEvent::Closed => self.on_closed(),
            ChannelEvent::Message { event, payload } => self.on_message(&event, &payload),
        }
    }

    /// Run any deferred work that is due: watch registration and dodge ticks.
    pub fn poll_timers(&mut self) {
        let current_time = self.elapsed_ms();

        if self.connection.take_due_watch(current_time) {
            self.register_watches();
        }

        for command in self.scheduler.poll(current_time) {
            if let Err(e) = encode_servo(command).map_err(AutopilotError::from).and_then(|m| self.send(&m)) {
                warn!(command, error = %e, "Dodge tick not sent");
            }
        }
    }

    /// Earliest instant at which [`AutopilotAgent::poll_timers`] has work.
    pub fn next_deadline(&self) -> Option<Instant> {
        let due = match (self.connection.watch_due(), self.scheduler.next_due()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        due.map(|ms| self.start_time + Duration::from_millis(ms))
    }

    pub fn execute(&mut self, request: AutopilotRequest) -> Result<AutopilotReply, AutopilotError> {
        debug!(?request, "Executing request");

        let result = match request {
            AutopilotRequest::GetData => Ok(AutopilotReply::Data(self.get_data())),
            AutopilotRequest::Engage => self.engage().map(|()| AutopilotReply::Dispatched),
            AutopilotRequest::Disengage => self.disengage().map(|()| AutopilotReply::Dispatched),
            AutopilotRequest::SetState(name) => self.set_state(&name).map(|()| AutopilotReply::Dispatched),
            AutopilotRequest::SetMode(name) => self.set_mode(&name).map(|()| AutopilotReply::Dispatched),
            AutopilotRequest::SetTarget(radians) => self.set_target(radians).map(|()| AutopilotReply::Dispatched),
            AutopilotRequest::AdjustTarget(delta) => self.adjust_target(delta).map(|()| AutopilotReply::Dispatched),
            AutopilotRequest::Tack(direction) => self.tack(direction).map(|()| AutopilotReply::Dispatched),
            AutopilotRequest::Gybe(direction) => self.gybe(direction).map(|()| AutopilotReply::Dispatched),
            AutopilotRequest::Dodge(value) => self.dodge(value).map(AutopilotReply::DodgeStarted),
            AutopilotRequest::CancelDodge => Ok(AutopilotReply::DodgeCancelled(self.cancel_dodge())),
        };

        if let Err(e) = &result {
            self.state.last_error = Some(e.to_string());
        }
        result
    }

    // Provider operations

    pub fn get_data(&self) -> AutopilotSnapshot {
        self.store.snapshot()
    }

    pub fn get_state(&self) -> Option<AutopilotState> {
        self.store.state()
    }

    pub fn get_mode(&self) -> Option<&str> {
        self.store.mode()
    }

    pub fn get_target(&self) -> Option<f64> {
        self.store.target()
    }

    pub fn engage(&mut self) -> Result<(), AutopilotError> {
        self.set_state(AutopilotState::Enabled.as_str())
    }

    pub fn disengage(&mut self) -> Result<(), AutopilotError> {
        self.set_state(AutopilotState::Disabled.as_str())
    }

    pub fn set_state(&mut self, name: &str) -> Result<(), AutopilotError> {
        let choice = self
            .store
            .validate_state(name)
            .ok_or_else(|| AutopilotError::InvalidState(name.to_string()))?;

        info!(state = name, "Requesting autopilot state");
        let message = encode_state(choice.engaged)?;
        self.send(&message)
    }

    pub fn set_mode(&mut self, name: &str) -> Result<(), AutopilotError> {
        if !self.store.validate_mode(name) {
            return Err(AutopilotError::InvalidMode(name.to_string()));
        }

        info!(mode = name, "Requesting autopilot mode");
        let message = encode_mode(name)?;
        self.send(&message)
    }

    /// Send a new heading target. The daemon clamps and echoes it back; the
    /// snapshot is only updated from that echo.
    pub fn set_target(&mut self, radians: f64) -> Result<(), AutopilotError> {
        info!(radians, "Requesting autopilot target");
        let message = encode_target(radians)?;
        self.send(&message)
    }

    /// Nudge the target while engaged; otherwise the nudge becomes a dodge.
    pub fn adjust_target(&mut self, delta: f64) -> Result<(), AutopilotError> {
        if !delta.is_finite() {
            return Err(ProtocolError::InvalidValue {
                kind: "target".to_string(),
                reason: "expected a finite adjustment".to_string(),
            }
            .into());
        }

        if self.store.engaged() {
            let target = self.store.target().unwrap_or_else(|| {
                warn!("No confirmed target yet, adjusting from zero");
                0.0
            });
            self.set_target(target + delta)
        } else {
            self.dodge(Some(delta)).map(|_| ())
        }
    }

    pub fn tack(&mut self, direction: TackDirection) -> Result<(), AutopilotError> {
        info!(direction = direction.as_str(), "Requesting tack");
        let message = encode_tack(direction)?;
        self.send(&message)
    }

    pub fn gybe(&mut self, _direction: TackDirection) -> Result<(), AutopilotError> {
        Err(AutopilotError::NotImplemented("gybe"))
    }

    /// Start a decaying servo nudge. Replaces any dodge already running.
    pub fn dodge(&mut self, value: Option<f64>) -> Result<Option<DodgeHandle>, AutopilotError> {
        let magnitude = value.ok_or(AutopilotError::NotImplemented("dodge without a value"))?;

        if !magnitude.is_finite() {
            return Err(ProtocolError::InvalidValue {
                kind: "dodge".to_string(),
                reason: "expected a finite magnitude".to_string(),
            }
            .into());
        }
        if !self.connection.has_channel() {
            return Err(AutopilotError::NotConnected);
        }

        let handle = self.scheduler.start(magnitude, self.elapsed_ms());
        if let Some(handle) = handle {
            info!(id = handle.id(), magnitude, "Dodge started");
        }
        Ok(handle)
    }

    /// Stop an in-flight dodge and return the servo to neutral.
    pub fn cancel_dodge(&mut self) -> bool {
        if !self.scheduler.cancel() {
            return false;
        }

        if let Err(e) = encode_servo(SERVO_NEUTRAL).map_err(AutopilotError::from).and_then(|m| self.send(&m)) {
            warn!(error = %e, "Neutral servo command not sent after cancel");
        }
        true
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn channel_id(&self) -> Option<ChannelId> {
        self.connection.channel_id()
    }

    pub fn get_state_counters(&self) -> &AgentState {
        &self.state
    }

    pub fn get_connection_stats(&self) -> &ConnectionStats {
        self.connection.get_stats()
    }

    pub fn get_dodge_stats(&self) -> &DodgeStats {
        self.scheduler.get_stats()
    }

    pub fn is_dodging(&self) -> bool {
        self.scheduler.is_active()
    }

    pub fn available_modes(&self) -> impl Iterator<Item = &str> {
        self.store.available_modes()
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    // Channel event handling

    fn on_connected(&mut self) {
        let current_time = self.elapsed_ms();
        if !self.connection.on_connected(current_time) {
            return;
        }

        info!("Connected to PyPilot");
        self.host.set_status(STATUS_CONNECTED);
        self.store.mark_online();
        self.publish_full();
        self.host.set_active_pilot(Some(ACTIVE_PILOT_HREF));
    }

    fn on_connect_error(&mut self, reason: &str) {
        if !self.connection.on_connect_error() {
            debug!(reason, "Ignoring connect error while disconnected");
            return;
        }

        warn!(reason, "Unable to connect to PyPilot");
        self.state.last_error = Some(reason.to_string());
        self.host.set_status(STATUS_CONNECT_ERROR);
        self.scheduler.cancel();

        let delta = self.store.mark_offline();
        self.host.publish(&delta);
        self.state.updates_published = self.state.updates_published.saturating_add(1);
    }

    fn on_closed(&mut self) {
        if !self.connection.on_closed() {
            return;
        }

        warn!("Connection to PyPilot lost");
        self.scheduler.cancel();
        self.host.set_status(STATUS_DISCONNECTED);
    }

    fn on_message(&mut self, event: &str, payload: &str) {
        if !self.connection.is_connected() {
            debug!(event, state = ?self.connection.state(), "Dropping message outside an active connection");
            return;
        }

        match event {
            UPDATE_EVENT => match decode_update(payload) {
                Ok(record) => self.apply_update(&record),
                Err(e) => self.record_malformed(event, &e),
            },
            VALUES_EVENT => match decode_capabilities(payload) {
                Ok(record) => self.store.apply_capabilities(&record),
                Err(e) => self.record_malformed(event, &e),
            },
            other => debug!(event = other, "Ignoring unknown event"),
        }
    }

    fn apply_update(&mut self, record: &UpdateRecord) {
        // A bare heading report is the daemon's heartbeat: always republish
        // state and engaged, changed or not.
        let delta = if record.is_heading_only() {
            self.store.liveness()
        } else {
            self.store.apply_update(record)
        };

        if !delta.is_empty() {
            debug!(?delta, "Publishing autopilot update");
            self.host.publish(&delta);
            self.state.updates_published = self.state.updates_published.saturating_add(1);
        }
    }

    fn publish_full(&mut self) {
        let delta = self.store.full_delta();
        self.host.publish(&delta);
        self.state.updates_published = self.state.updates_published.saturating_add(1);
    }

    fn register_watches(&mut self) {
        debug!("Registering watches");
        for key in WATCHED_KEYS {
            if let Err(e) = encode_watch(key).map_err(AutopilotError::from).and_then(|m| self.send(&m)) {
                warn!(key, error = %e, "Watch registration not sent");
            }
        }
    }

    fn record_malformed(&mut self, event: &str, err: &ProtocolError) {
        warn!(event, error = %err, "Dropping malformed payload");
        self.state.malformed_payloads = self.state.malformed_payloads.saturating_add(1);
    }

    fn send(&mut self, message: &WireMessage) -> Result<(), AutopilotError> {
        self.connection.send(message).map_err(|e| {
            debug!(error = %e, "Send failed");
            AutopilotError::NotConnected
        })?;
        self.state.commands_sent = self.state.commands_sent.saturating_add(1);
        Ok(())
    }

    fn elapsed_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }
}

impl<H: Host + core::fmt::Debug> core::fmt::Debug for AutopilotAgent<H> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AutopilotAgent")
            .field("host", &self.host)
            .field("store", &self.store)
            .field("connection", &self.connection)
            .field("scheduler", &self.scheduler)
            .field("state", &self.state)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AutopilotError {
    #[error(transparent)]
    InvalidValue(#[from] ProtocolError),
    #[error("invalid autopilot mode: {0}")]
    InvalidMode(String),
    #[error("invalid autopilot state: {0}")]
    InvalidState(String),
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
    #[error("channel unavailable: {0}")]
    ChannelUnavailable(String),
    #[error("not connected to the autopilot daemon")]
    NotConnected,
    #[error("unknown autopilot device: {0}")]
    UnknownDevice(String),
    #[error("autopilot agent has stopped")]
    AgentStopped,
    #[error("unexpected reply from autopilot agent: {0}")]
    UnexpectedReply(&'static str),
}
