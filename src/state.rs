use crate::protocol::{CapabilityRecord, UpdateRecord};
use arrayvec::ArrayString;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const MAX_MODES: usize = 16;
pub const MAX_MODE_NAME_LEN: usize = 32;

/// Root of the published autopilot paths.
pub const DELTA_PATH_ROOT: &str = "steering.autopilot";

pub type ModeName = ArrayString<MAX_MODE_NAME_LEN>;
type ModeList = Vec<ModeName, MAX_MODES>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutopilotState {
    Enabled,
    Disabled,
    #[serde(rename = "off-line")]
    OffLine,
}

impl AutopilotState {
    pub fn from_enabled(enabled: bool) -> Self {
        if enabled {
            AutopilotState::Enabled
        } else {
            AutopilotState::Disabled
        }
    }

    pub fn is_engaged(self) -> bool {
        matches!(self, AutopilotState::Enabled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AutopilotState::Enabled => "enabled",
            AutopilotState::Disabled => "disabled",
            AutopilotState::OffLine => "off-line",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateChoice {
    pub name: &'static str,
    pub engaged: bool,
}

/// States a host may request. Fixed: the daemon only knows enabled/disabled.
pub static AVAILABLE_STATES: [StateChoice; 2] = [
    StateChoice { name: "enabled", engaged: true },
    StateChoice { name: "disabled", engaged: false },
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutopilotOptions {
    pub states: alloc::vec::Vec<StateChoice>,
    pub modes: alloc::vec::Vec<String>,
}

/// Owned copy of the store, as returned to the host by `get_data`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AutopilotSnapshot {
    pub options: AutopilotOptions,
    pub state: Option<AutopilotState>,
    pub mode: Option<String>,
    pub target: Option<f64>,
    pub engaged: bool,
}

/// Partial snapshot carrying only the fields that changed.
///
/// `target` is doubly optional: `Some(None)` means the daemon cleared its
/// heading command and is published as an explicit null.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AutopilotDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<AutopilotState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<Option<f64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engaged: Option<bool>,
}

impl AutopilotDelta {
    pub fn is_empty(&self) -> bool {
        self.state.is_none() && self.mode.is_none() && self.target.is_none() && self.engaged.is_none()
    }

    /// Flatten into `steering.autopilot.<field>` path/value pairs.
    pub fn values(&self) -> alloc::vec::Vec<(String, serde_json::Value)> {
        let mut values = alloc::vec::Vec::new();
        let path = |field: &str| format!("{DELTA_PATH_ROOT}.{field}");

        if let Some(state) = self.state {
            values.push((path("state"), serde_json::Value::from(state.as_str())));
        }
        if let Some(mode) = &self.mode {
            values.push((path("mode"), serde_json::Value::from(mode.as_str())));
        }
        if let Some(target) = self.target {
            let value = target.map_or(serde_json::Value::Null, serde_json::Value::from);
            values.push((path("target"), value));
        }
        if let Some(engaged) = self.engaged {
            values.push((path("engaged"), serde_json::Value::from(engaged)));
        }

        values
    }
}

/// The single autopilot snapshot. [`StateStore::apply_update`] writes only
/// the fields that changed and reports exactly those back for publishing.
#[derive(Debug)]
pub struct StateStore {
    state: Option<AutopilotState>,
    mode: Option<String>,
    target: Option<f64>,
    engaged: bool,
    available_modes: ModeList,
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            state: None,
            mode: None,
            target: None,
            engaged: false,
            available_modes: Vec::new(),
        }
    }

    /// Merge a daemon update, returning only the fields that changed.
    pub fn apply_update(&mut self, record: &UpdateRecord) -> AutopilotDelta {
        let mut delta = AutopilotDelta::default();

        if let Some(update) = record.heading_command {
            let target = update.radians();
            if target != self.target {
                self.target = target;
                delta.target = Some(target);
            }
        }

        if let Some(mode) = &record.mode {
            if self.mode.as_deref() != Some(mode.as_str()) {
                self.mode = Some(mode.clone());
                delta.mode = Some(mode.clone());
            }
        }

        if let Some(enabled) = record.enabled {
            let state = AutopilotState::from_enabled(enabled);
            if self.state != Some(state) {
                self.set_state(state, &mut delta);
            }
        }

        delta
    }

    /// Replace the mode choices. The announcement always carries the full set.
    pub fn apply_capabilities(&mut self, record: &CapabilityRecord) {
        let Some(modes) = &record.modes else {
            debug!("Capability announcement without mode choices");
            return;
        };

        self.available_modes.clear();
        for mode in modes {
            match ModeName::from(mode) {
                Ok(name) => {
                    if self.available_modes.push(name).is_err() {
                        warn!(limit = MAX_MODES, "Too many autopilot modes announced, ignoring the rest");
                        break;
                    }
                }
                Err(_) => warn!(mode = %mode, "Mode name too long, skipping"),
            }
        }

        debug!(modes = ?self.available_modes, "Available modes updated");
    }

    /// Connection lost: always reports both `state` and `engaged`.
    pub fn mark_offline(&mut self) -> AutopilotDelta {
        self.state = Some(AutopilotState::OffLine);
        self.engaged = false;

        AutopilotDelta {
            state: Some(AutopilotState::OffLine),
            engaged: Some(false),
            ..AutopilotDelta::default()
        }
    }

    /// Connection (re)established: an unknown or off-line state reads as disabled.
    pub fn mark_online(&mut self) {
        if matches!(self.state, None | Some(AutopilotState::OffLine)) {
            self.state = Some(AutopilotState::Disabled);
            self.engaged = false;
        }
    }

    pub fn validate_mode(&self, name: &str) -> bool {
        self.available_modes.iter().any(|m| m.as_str() == name)
    }

    pub fn validate_state(&self, name: &str) -> Option<&'static StateChoice> {
        AVAILABLE_STATES.iter().find(|choice| choice.name == name)
    }

    pub fn snapshot(&self) -> AutopilotSnapshot {
        AutopilotSnapshot {
            options: AutopilotOptions {
                states: AVAILABLE_STATES.to_vec(),
                modes: self.available_modes.iter().map(|m| m.to_string()).collect(),
            },
            state: self.state,
            mode: self.mode.clone(),
            target: self.target,
            engaged: self.engaged,
        }
    }

    /// Every published field, used when a connection comes up.
    pub fn full_delta(&self) -> AutopilotDelta {
        AutopilotDelta {
            state: self.state,
            mode: self.mode.clone(),
            target: Some(self.target),
            engaged: Some(self.engaged),
        }
    }

    /// `{state, engaged}` as currently held.
    pub fn liveness(&self) -> AutopilotDelta {
        AutopilotDelta {
            state: self.state,
            engaged: Some(self.engaged),
            ..AutopilotDelta::default()
        }
    }

    pub fn state(&self) -> Option<AutopilotState> {
        self.state
    }

    pub fn mode(&self) -> Option<&str> {
        self.mode.as_deref()
    }

    pub fn target(&self) -> Option<f64> {
        self.target
    }

    pub fn engaged(&self) -> bool {
        self.engaged
    }

    pub fn available_modes(&self) -> impl Iterator<Item = &str> {
        self.available_modes.iter().map(|m| m.as_str())
    }

    fn set_state(&mut self, state: AutopilotState, delta: &mut AutopilotDelta) {
        self.state = Some(state);
        delta.state = Some(state);

        let engaged = state.is_engaged();
        if engaged != self.engaged {
            self.engaged = engaged;
            delta.engaged = Some(engaged);
        }
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}
