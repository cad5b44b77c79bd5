use crate::units::{degrees_to_radians, radians_to_degrees};
use arrayvec::ArrayString;
use core::fmt::Write;
use core::str::FromStr;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

pub const MAX_WIRE_MESSAGE_SIZE: usize = 256;

// Named events on the daemon channel
pub const UPDATE_EVENT: &str = "pypilot";
pub const VALUES_EVENT: &str = "pypilot_values";

pub const KEY_HEADING: &str = "ap.heading";
pub const KEY_HEADING_COMMAND: &str = "ap.heading_command";
pub const KEY_MODE: &str = "ap.mode";
pub const KEY_ENABLED: &str = "ap.enabled";
pub const KEY_TACK_DIRECTION: &str = "ap.tack.direction";
pub const KEY_SERVO_COMMAND: &str = "servo.command";
const KEY_WATCH: &str = "watch";

/// Values the bridge subscribes to after connecting, in registration order.
pub const WATCHED_KEYS: [&str; 4] = [KEY_HEADING, KEY_HEADING_COMMAND, KEY_ENABLED, KEY_MODE];
const WATCH_PERIOD: u32 = 1;

// Range the daemon accepts for ap.heading_command
pub const MIN_TARGET_DEGREES: f64 = -179.0;
pub const MAX_TARGET_DEGREES: f64 = 359.0;

pub type WireBuffer = ArrayString<MAX_WIRE_MESSAGE_SIZE>;

/// An outbound `<key>=<json>` message addressed to a named channel event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    pub event: &'static str,
    pub payload: WireBuffer,
}

impl WireMessage {
    fn build(key: &str, value: &Value) -> Result<Self, ProtocolError> {
        let mut payload = WireBuffer::new();
        write!(payload, "{key}={value}").map_err(|_| ProtocolError::MessageTooLarge)?;

        Ok(Self {
            event: UPDATE_EVENT,
            payload,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.payload
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Mode,
    State,
    Target,
    Tack,
    Dodge,
}

impl CommandKind {
    pub fn key(self) -> &'static str {
        match self {
            CommandKind::Mode => KEY_MODE,
            CommandKind::State => KEY_ENABLED,
            CommandKind::Target => KEY_HEADING_COMMAND,
            CommandKind::Tack => KEY_TACK_DIRECTION,
            CommandKind::Dodge => KEY_SERVO_COMMAND,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::Mode => "mode",
            CommandKind::State => "state",
            CommandKind::Target => "target",
            CommandKind::Tack => "tack",
            CommandKind::Dodge => "dodge",
        }
    }
}

impl FromStr for CommandKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mode" => Ok(CommandKind::Mode),
            "state" => Ok(CommandKind::State),
            "target" => Ok(CommandKind::Target),
            "tack" => Ok(CommandKind::Tack),
            "dodge" => Ok(CommandKind::Dodge),
            other => Err(ProtocolError::invalid(other, "unrecognized command kind")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TackDirection {
    Port,
    Starboard,
}

impl TackDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            TackDirection::Port => "port",
            TackDirection::Starboard => "starboard",
        }
    }
}

impl FromStr for TackDirection {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "port" => Ok(TackDirection::Port),
            "starboard" => Ok(TackDirection::Starboard),
            _ => Err(ProtocolError::invalid("tack", "expected 'port' or 'starboard'")),
        }
    }
}

/// Encode a loosely typed command value, checking it against the kind.
///
/// Target values are radians and leave the codec as clamped degrees; dodge
/// values are raw servo commands in `-1..=1`.
pub fn encode_command(kind: CommandKind, value: &Value) -> Result<WireMessage, ProtocolError> {
    match kind {
        CommandKind::Mode => {
            let mode = value
                .as_str()
                .ok_or_else(|| ProtocolError::invalid("mode", "expected a string"))?;
            encode_mode(mode)
        }
        CommandKind::State => {
            let enabled = value
                .as_bool()
                .ok_or_else(|| ProtocolError::invalid("state", "expected a boolean"))?;
            encode_state(enabled)
        }
        CommandKind::Target => {
            let radians = value
                .as_f64()
                .ok_or_else(|| ProtocolError::invalid("target", "expected a number"))?;
            encode_target(radians)
        }
        CommandKind::Tack => {
            let direction = value
                .as_str()
                .ok_or_else(|| ProtocolError::invalid("tack", "expected a string"))?
                .parse::<TackDirection>()?;
            encode_tack(direction)
        }
        CommandKind::Dodge => {
            let command = value
                .as_i64()
                .filter(|c| (-1..=1).contains(c))
                .ok_or_else(|| ProtocolError::invalid("dodge", "expected a servo command in -1..=1"))?;
            encode_servo(command as i8)
        }
    }
}

pub fn encode_mode(mode: &str) -> Result<WireMessage, ProtocolError> {
    WireMessage::build(KEY_MODE, &Value::from(mode))
}

pub fn encode_state(enabled: bool) -> Result<WireMessage, ProtocolError> {
    WireMessage::build(KEY_ENABLED, &Value::from(enabled))
}

pub fn encode_target(radians: f64) -> Result<WireMessage, ProtocolError> {
    if !radians.is_finite() {
        return Err(ProtocolError::invalid("target", "expected a finite number"));
    }
    WireMessage::build(KEY_HEADING_COMMAND, &Value::from(target_degrees(radians)))
}

pub fn encode_tack(direction: TackDirection) -> Result<WireMessage, ProtocolError> {
    WireMessage::build(KEY_TACK_DIRECTION, &Value::from(direction.as_str()))
}

pub fn encode_servo(command: i8) -> Result<WireMessage, ProtocolError> {
    WireMessage::build(KEY_SERVO_COMMAND, &Value::from(command))
}

/// `watch={"<key>": 1}` subscribes to change notifications for one value.
pub fn encode_watch(key: &str) -> Result<WireMessage, ProtocolError> {
    let mut registration = Map::new();
    registration.insert(key.to_string(), Value::from(WATCH_PERIOD));
    WireMessage::build(KEY_WATCH, &Value::Object(registration))
}

/// Degrees sent for a radian target: clamped to the daemon's range and
/// rounded so a round trip through the codec is stable.
pub fn target_degrees(radians: f64) -> f64 {
    let degrees = radians_to_degrees(radians).clamp(MIN_TARGET_DEGREES, MAX_TARGET_DEGREES);
    (degrees * 1e4).round() / 1e4
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TargetUpdate {
    Radians(f64),
    /// The daemon reported `false`: no heading command is held.
    Cleared,
}

impl TargetUpdate {
    pub fn radians(self) -> Option<f64> {
        match self {
            TargetUpdate::Radians(r) => Some(r),
            TargetUpdate::Cleared => None,
        }
    }
}

/// Decoded `pypilot` event. Fields missing from the payload stay `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateRecord {
    pub heading: Option<f64>,
    pub heading_command: Option<TargetUpdate>,
    pub mode: Option<String>,
    pub enabled: Option<bool>,
}

impl UpdateRecord {
    pub fn is_heading_only(&self) -> bool {
        self.heading.is_some()
            && self.heading_command.is_none()
            && self.mode.is_none()
            && self.enabled.is_none()
    }

    pub fn is_empty(&self) -> bool {
        self.heading.is_none()
            && self.heading_command.is_none()
            && self.mode.is_none()
            && self.enabled.is_none()
    }
}

/// Decoded `pypilot_values` event. `modes` is `None` when the announcement
/// carries no mode choices at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityRecord {
    pub modes: Option<Vec<String>>,
}

pub fn decode_update(raw: &str) -> Result<UpdateRecord, ProtocolError> {
    let fields = parse_object(raw)?;
    let mut record = UpdateRecord::default();

    match fields.get(KEY_HEADING) {
        Some(Value::Number(n)) => record.heading = n.as_f64().map(degrees_to_radians),
        Some(other) => debug!(key = KEY_HEADING, value = %other, "Skipping non-numeric field"),
        None => {}
    }

    match fields.get(KEY_HEADING_COMMAND) {
        Some(Value::Number(n)) => {
            record.heading_command = n.as_f64().map(|d| TargetUpdate::Radians(degrees_to_radians(d)));
        }
        Some(Value::Bool(false)) => record.heading_command = Some(TargetUpdate::Cleared),
        Some(other) => debug!(key = KEY_HEADING_COMMAND, value = %other, "Skipping unexpected field"),
        None => {}
    }

    match fields.get(KEY_MODE) {
        Some(Value::String(mode)) => record.mode = Some(mode.clone()),
        Some(other) => debug!(key = KEY_MODE, value = %other, "Skipping non-string field"),
        None => {}
    }

    match fields.get(KEY_ENABLED) {
        Some(Value::Bool(enabled)) => record.enabled = Some(*enabled),
        Some(other) => debug!(key = KEY_ENABLED, value = %other, "Skipping non-boolean field"),
        None => {}
    }

    Ok(record)
}

pub fn decode_capabilities(raw: &str) -> Result<CapabilityRecord, ProtocolError> {
    let fields = parse_object(raw)?;

    let modes = fields
        .get(KEY_MODE)
        .and_then(|mode| mode.get("choices"))
        .map(|choices| match choices.as_array() {
            Some(list) => list
                .iter()
                .filter_map(|c| c.as_str().map(str::to_string))
                .collect(),
            None => Vec::new(),
        });

    Ok(CapabilityRecord { modes })
}

/// Split an outbound `<key>=<json>` payload, as the daemon reads it.
pub fn parse_assignment(payload: &str) -> Result<(&str, Value), ProtocolError> {
    let (key, raw_value) = payload
        .split_once('=')
        .ok_or_else(|| ProtocolError::InvalidJson("expected '<key>=<value>'".to_string()))?;
    let value = serde_json::from_str(raw_value).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
    Ok((key, value))
}

fn parse_object(raw: &str) -> Result<Map<String, Value>, ProtocolError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(_) => Err(ProtocolError::InvalidJson("expected a JSON object".to_string())),
        Err(e) => Err(ProtocolError::InvalidJson(e.to_string())),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("invalid value for {kind}: {reason}")]
    InvalidValue { kind: String, reason: String },
    #[error("invalid JSON payload: {0}")]
    InvalidJson(String),
    #[error("wire message exceeds buffer capacity")]
    MessageTooLarge,
}

impl ProtocolError {
    fn invalid(kind: &str, reason: &str) -> Self {
        ProtocolError::InvalidValue {
            kind: kind.to_string(),
            reason: reason.to_string(),
        }
    }
}
