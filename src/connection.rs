use crate::protocol::WireMessage;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Deferral between connecting and registering watches.
pub const WATCH_REGISTRATION_DELAY_MS: u64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl core::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Identifies one opened channel. Each `open` on a manager takes the next id.
pub type ChannelId = u32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Connected,
    ConnectError(String),
    /// An established connection dropped. The channel keeps retrying.
    Closed,
    Message { event: String, payload: String },
}

/// A [`ChannelEvent`] stamped with the channel that produced it, so events
/// still queued from a replaced channel can be told apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedEvent {
    pub channel: ChannelId,
    pub event: ChannelEvent,
}

impl TaggedEvent {
    pub fn new(channel: ChannelId, event: ChannelEvent) -> Self {
        Self { channel, event }
    }
}

pub trait Channel: Send {
    fn emit(&mut self, event: &str, payload: &str) -> Result<(), ChannelError>;
    fn close(&mut self);
}

pub trait Connector {
    /// Open a channel whose events are reported under `channel`.
    fn connect(&mut self, endpoint: &Endpoint, channel: ChannelId) -> Result<Box<dyn Channel>, ChannelError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConnectionStats {
    pub connects: u32,
    pub connect_errors: u32,
    pub disconnects: u32,
    pub messages_sent: u32,
    pub send_failures: u32,
}

pub struct ConnectionManager {
    state: ConnectionState,
    channel: Option<Box<dyn Channel>>,
    channel_id: Option<ChannelId>,
    next_channel_id: ChannelId,
    endpoint: Option<Endpoint>,
    watch_due: Option<u64>,
    stats: ConnectionStats,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            channel: None,
            channel_id: None,
            next_channel_id: 1,
            endpoint: None,
            watch_due: None,
            stats: ConnectionStats::default(),
        }
    }

    /// Open a channel to `endpoint`, replacing any existing one.
    ///
    /// On failure the manager is left `Failed` with no channel and stays
    /// there until the next call.
    pub fn open(&mut self, connector: &mut dyn Connector, endpoint: &Endpoint) -> Result<(), ChannelError> {
        if let Some(mut previous) = self.channel.take() {
            debug!(state = ?self.state, "Closing previous channel before reconnecting");
            previous.close();
        }
        self.watch_due = None;
        self.channel_id = None;
        self.endpoint = Some(endpoint.clone());

        let id = self.next_channel_id;
        self.next_channel_id = self.next_channel_id.wrapping_add(1);

        match connector.connect(endpoint, id) {
            Ok(channel) => {
                info!(endpoint = %endpoint, channel = id, "Channel opened");
                self.channel = Some(channel);
                self.channel_id = Some(id);
                self.state = ConnectionState::Connecting;
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Failed;
                Err(e)
            }
        }
    }

    /// Returns `true` when the event moved the manager to `Connected`.
    pub fn on_connected(&mut self, current_time: u64) -> bool {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Failed => {
                self.state = ConnectionState::Connected;
                self.watch_due = Some(current_time + WATCH_REGISTRATION_DELAY_MS);
                self.stats.connects += 1;
                true
            }
            ConnectionState::Connected => {
                debug!("Ignoring duplicate connect event");
                false
            }
            ConnectionState::Disconnected => false,
        }
    }

    /// Returns `true` when the event moved the manager to `Failed`.
    pub fn on_connect_error(&mut self) -> bool {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Failed => {
                self.state = ConnectionState::Failed;
                self.watch_due = None;
                self.stats.connect_errors += 1;
                true
            }
            ConnectionState::Disconnected => false,
        }
    }

    /// Returns `true` when an established connection was lost.
    pub fn on_closed(&mut self) -> bool {
        match self.state {
            ConnectionState::Connected => {
                self.state = ConnectionState::Connecting;
                self.watch_due = None;
                self.stats.disconnects += 1;
                true
            }
            ConnectionState::Connecting | ConnectionState::Failed | ConnectionState::Disconnected => false,
        }
    }

    pub fn close(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        self.channel_id = None;
        self.state = ConnectionState::Disconnected;
        self.watch_due = None;
    }

    pub fn send(&mut self, message: &WireMessage) -> Result<(), ChannelError> {
        let channel = self.channel.as_mut().ok_or(ChannelError::Closed)?;

        match channel.emit(message.event, message.as_str()) {
            Ok(()) => {
                debug!(event = message.event, payload = message.as_str(), "Sent");
                self.stats.messages_sent += 1;
                Ok(())
            }
            Err(e) => {
                self.stats.send_failures += 1;
                Err(e)
            }
        }
    }

    /// Consume the pending watch registration if it is due.
    pub fn take_due_watch(&mut self, current_time: u64) -> bool {
        match self.watch_due {
            Some(due) if due <= current_time => {
                self.watch_due = None;
                true
            }
            _ => false,
        }
    }

    pub fn watch_due(&self) -> Option<u64> {
        self.watch_due
    }

    /// Whether `channel` names the channel currently open.
    pub fn is_current(&self, channel: ChannelId) -> bool {
        self.channel_id == Some(channel)
    }

    pub fn channel_id(&self) -> Option<ChannelId> {
        self.channel_id
    }

    pub fn has_channel(&self) -> bool {
        self.channel.is_some()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    pub fn get_stats(&self) -> &ConnectionStats {
        &self.stats
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state)
            .field("endpoint", &self.endpoint)
            .field("channel_id", &self.channel_id)
            .field("watch_due", &self.watch_due)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("channel unavailable: {0}")]
    Unavailable(String),
    #[error("channel closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode_state;

    struct NullChannel;

    impl Channel for NullChannel {
        fn emit(&mut self, _event: &str, _payload: &str) -> Result<(), ChannelError> {
            Ok(())
        }

        fn close(&mut self) {}
    }

    struct TestConnector {
        fail: bool,
    }

    impl Connector for TestConnector {
        fn connect(&mut self, _endpoint: &Endpoint, _channel: ChannelId) -> Result<Box<dyn Channel>, ChannelError> {
            if self.fail {
                Err(ChannelError::Unavailable("refused".to_string()))
            } else {
                Ok(Box::new(NullChannel))
            }
        }
    }

    fn opened() -> ConnectionManager {
        let mut manager = ConnectionManager::new();
        manager
            .open(&mut TestConnector { fail: false }, &Endpoint::new("localhost", 8000))
            .unwrap();
        manager
    }

    #[test]
    fn test_endpoint_display() {
        assert_eq!(Endpoint::new("pypilot.local", 8000).to_string(), "pypilot.local:8000");
    }

    #[test]
    fn test_open_failure_leaves_failed() {
        let mut manager = ConnectionManager::new();
        let result = manager.open(&mut TestConnector { fail: true }, &Endpoint::new("localhost", 8000));

        assert!(result.is_err());
        assert_eq!(manager.state(), ConnectionState::Failed);
        assert!(!manager.has_channel());
        assert_eq!(manager.send(&encode_state(true).unwrap()), Err(ChannelError::Closed));
    }

    #[test]
    fn test_connect_schedules_watch() {
        let mut manager = opened();
        assert_eq!(manager.state(), ConnectionState::Connecting);

        assert!(manager.on_connected(500));
        assert!(manager.is_connected());
        assert_eq!(manager.watch_due(), Some(500 + WATCH_REGISTRATION_DELAY_MS));
        assert!(!manager.on_connected(600));

        assert!(!manager.take_due_watch(1499));
        assert!(manager.take_due_watch(1500));
        assert!(!manager.take_due_watch(1500));
    }

    #[test]
    fn test_connect_error_and_close_transitions() {
        let mut manager = opened();
        assert!(!manager.on_closed());

        assert!(manager.on_connect_error());
        assert_eq!(manager.state(), ConnectionState::Failed);

        assert!(manager.on_connected(0));
        assert!(manager.on_closed());
        assert_eq!(manager.state(), ConnectionState::Connecting);
        assert_eq!(manager.watch_due(), None);

        let stats = manager.get_stats();
        assert_eq!((stats.connects, stats.connect_errors, stats.disconnects), (1, 1, 1));
    }

    #[test]
    fn test_each_open_gets_a_new_channel_id() {
        let mut manager = opened();
        assert_eq!(manager.channel_id(), Some(1));

        manager
            .open(&mut TestConnector { fail: false }, &Endpoint::new("localhost", 8000))
            .unwrap();
        assert!(!manager.is_current(1));
        assert!(manager.is_current(2));

        let _ = manager.open(&mut TestConnector { fail: true }, &Endpoint::new("localhost", 8000));
        assert_eq!(manager.channel_id(), None);
        assert!(!manager.is_current(2));
    }

    #[test]
    fn test_events_ignored_after_close() {
        let mut manager = opened();
        manager.close();

        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!manager.on_connected(0));
        assert!(!manager.on_connect_error());
        assert!(!manager.on_closed());
        assert!(manager.endpoint().is_some());
        assert_eq!(manager.channel_id(), None);
    }
}
