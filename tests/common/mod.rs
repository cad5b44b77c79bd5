#![allow(dead_code)]

use pypilot_bridge::connection::{Channel, ChannelError, ChannelId, Connector, Endpoint};
use pypilot_bridge::protocol::parse_assignment;
use pypilot_bridge::{AutopilotAgent, AutopilotDelta, ChannelEvent, TaggedEvent};
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// Host double that records every callback.
#[derive(Debug, Default)]
pub struct RecordingHost {
    pub published: Vec<AutopilotDelta>,
    pub statuses: Vec<String>,
    pub errors: Vec<String>,
    pub active_pilot: Vec<Option<String>>,
}

impl pypilot_bridge::Host for RecordingHost {
    fn publish(&mut self, delta: &AutopilotDelta) {
        self.published.push(delta.clone());
    }

    fn set_status(&mut self, message: &str) {
        self.statuses.push(message.to_string());
    }

    fn set_error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }

    fn set_active_pilot(&mut self, href: Option<&str>) {
        self.active_pilot.push(href.map(str::to_string));
    }
}

/// Everything a [`RecordingChannel`] was asked to do, shared with the test.
#[derive(Debug, Default)]
pub struct ChannelLog {
    pub sent: Vec<(String, String)>,
    pub closed: bool,
}

pub type SharedLog = Arc<Mutex<ChannelLog>>;

pub struct RecordingChannel {
    log: SharedLog,
}

impl Channel for RecordingChannel {
    fn emit(&mut self, event: &str, payload: &str) -> Result<(), ChannelError> {
        let mut log = self.log.lock().unwrap();
        if log.closed {
            return Err(ChannelError::Closed);
        }
        log.sent.push((event.to_string(), payload.to_string()));
        Ok(())
    }

    fn close(&mut self) {
        self.log.lock().unwrap().closed = true;
    }
}

/// Connector double: hands out recording channels, or fails when told to.
#[derive(Default)]
pub struct ScriptedConnector {
    pub fail_with: Option<String>,
    pub logs: Vec<SharedLog>,
}

impl ScriptedConnector {
    pub fn failing(reason: &str) -> Self {
        Self {
            fail_with: Some(reason.to_string()),
            logs: Vec::new(),
        }
    }

    /// Log of the most recently opened channel.
    pub fn log(&self) -> SharedLog {
        Arc::clone(self.logs.last().expect("no channel opened"))
    }
}

impl Connector for ScriptedConnector {
    fn connect(&mut self, _endpoint: &Endpoint, _channel: ChannelId) -> Result<Box<dyn Channel>, ChannelError> {
        if let Some(reason) = &self.fail_with {
            return Err(ChannelError::Unavailable(reason.clone()));
        }
        let log = SharedLog::default();
        self.logs.push(Arc::clone(&log));
        Ok(Box::new(RecordingChannel { log }))
    }
}

pub fn endpoint() -> Endpoint {
    Endpoint::new("localhost", 8000)
}

/// Payloads sent on the channel, parsed back into `(key, value)`.
pub fn sent_assignments(log: &SharedLog) -> Vec<(String, Value)> {
    log.lock()
        .unwrap()
        .sent
        .iter()
        .map(|(_, payload)| {
            let (key, value) = parse_assignment(payload).unwrap();
            (key.to_string(), value)
        })
        .collect()
}

pub fn clear_sent(log: &SharedLog) {
    log.lock().unwrap().sent.clear();
}

pub fn message(event: &str, payload: &str) -> ChannelEvent {
    ChannelEvent::Message {
        event: event.to_string(),
        payload: payload.to_string(),
    }
}

/// `event` as reported by the first channel an agent opens.
pub fn on_first_channel(event: ChannelEvent) -> TaggedEvent {
    TaggedEvent::new(1, event)
}

/// An agent that has opened a channel and seen it connect, with mode
/// choices announced. Host records are cleared.
pub fn connected_agent() -> (AutopilotAgent<RecordingHost>, ScriptedConnector) {
    let mut connector = ScriptedConnector::default();
    let mut agent = AutopilotAgent::new(RecordingHost::default());
    agent.initialise(&mut connector, endpoint());
    agent.handle_event(ChannelEvent::Connected);
    agent.handle_event(message(
        "pypilot_values",
        r#"{"ap.mode": {"choices": ["compass", "gps", "wind", "true wind"]}}"#,
    ));

    *agent.host_mut() = RecordingHost::default();
    (agent, connector)
}
