use crate::state::AutopilotDelta;
use serde::Serialize;

pub const PILOT_TYPE: &str = "PyPilot";
pub const DEVICE_ID: &str = "pypilot-id";

/// Published as the active pilot while the daemon is connected.
pub const ACTIVE_PILOT_HREF: &str = "./pypilot";

/// Callbacks into the host platform.
///
/// All calls are made from the task that owns the agent, one at a time.
pub trait Host {
    /// Publish the fields of the autopilot snapshot that changed.
    fn publish(&mut self, delta: &AutopilotDelta);
    fn set_status(&mut self, message: &str);
    fn set_error(&mut self, message: &str);
    /// Flag (or clear, with `None`) this provider as the vessel's active pilot.
    fn set_active_pilot(&mut self, href: Option<&str>);
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRegistration {
    pub pilot_type: &'static str,
    pub devices: &'static [&'static str],
}

impl ProviderRegistration {
    pub fn handles(&self, device: &str) -> bool {
        self.devices.contains(&device)
    }
}

pub const REGISTRATION: ProviderRegistration = ProviderRegistration {
    pilot_type: PILOT_TYPE,
    devices: &[DEVICE_ID],
};
