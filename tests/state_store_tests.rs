use pypilot_bridge::protocol::{decode_capabilities, decode_update, CapabilityRecord, TargetUpdate, UpdateRecord};
use pypilot_bridge::state::*;
use serde_json::json;

fn store_with_modes() -> StateStore {
    let mut store = StateStore::new();
    store.apply_capabilities(&decode_capabilities(r#"{"ap.mode": {"choices": ["compass", "gps", "wind"]}}"#).unwrap());
    store
}

#[test]
fn test_initial_snapshot() {
    let store = StateStore::new();
    let snapshot = store.snapshot();

    assert_eq!(snapshot.state, None);
    assert_eq!(snapshot.mode, None);
    assert_eq!(snapshot.target, None);
    assert!(!snapshot.engaged);
    assert!(snapshot.options.modes.is_empty());
    assert_eq!(
        snapshot.options.states.iter().map(|s| s.name).collect::<Vec<_>>(),
        vec!["enabled", "disabled"]
    );
}

#[test]
fn test_apply_update_reports_changed_fields_only() {
    let mut store = StateStore::new();
    let record = decode_update(r#"{"ap.enabled": true, "ap.mode": "compass", "ap.heading_command": 45}"#).unwrap();

    let delta = store.apply_update(&record);
    assert_eq!(delta.state, Some(AutopilotState::Enabled));
    assert_eq!(delta.engaged, Some(true));
    assert_eq!(delta.mode.as_deref(), Some("compass"));
    assert!(delta.target.unwrap().is_some());

    // Same values again: nothing to publish
    let delta = store.apply_update(&record);
    assert!(delta.is_empty());
}

#[test]
fn test_engaged_follows_state() {
    let mut store = StateStore::new();

    store.apply_update(&UpdateRecord {
        enabled: Some(true),
        ..UpdateRecord::default()
    });
    assert_eq!(store.state(), Some(AutopilotState::Enabled));
    assert!(store.engaged());

    let delta = store.apply_update(&UpdateRecord {
        enabled: Some(false),
        ..UpdateRecord::default()
    });
    assert_eq!(delta.state, Some(AutopilotState::Disabled));
    assert_eq!(delta.engaged, Some(false));
    assert!(!store.engaged());
}

#[test]
fn test_cleared_target_publishes_null() {
    let mut store = StateStore::new();
    store.apply_update(&UpdateRecord {
        heading_command: Some(TargetUpdate::Radians(1.0)),
        ..UpdateRecord::default()
    });

    let delta = store.apply_update(&UpdateRecord {
        heading_command: Some(TargetUpdate::Cleared),
        ..UpdateRecord::default()
    });
    assert_eq!(delta.target, Some(None));
    assert_eq!(store.target(), None);

    let values = delta.values();
    assert_eq!(values, vec![("steering.autopilot.target".to_string(), json!(null))]);

    // Cleared twice is not a change
    let delta = store.apply_update(&UpdateRecord {
        heading_command: Some(TargetUpdate::Cleared),
        ..UpdateRecord::default()
    });
    assert!(delta.is_empty());
}

#[test]
fn test_mark_offline_always_reports_both_fields() {
    let mut store = StateStore::new();

    for _ in 0..2 {
        let delta = store.mark_offline();
        assert_eq!(delta.state, Some(AutopilotState::OffLine));
        assert_eq!(delta.engaged, Some(false));
        assert_eq!(delta.mode, None);
        assert_eq!(delta.target, None);
    }
    assert_eq!(store.state(), Some(AutopilotState::OffLine));
}

#[test]
fn test_mark_online_only_replaces_unknown_or_offline() {
    let mut store = StateStore::new();
    store.mark_online();
    assert_eq!(store.state(), Some(AutopilotState::Disabled));

    store.mark_offline();
    store.mark_online();
    assert_eq!(store.state(), Some(AutopilotState::Disabled));

    store.apply_update(&UpdateRecord {
        enabled: Some(true),
        ..UpdateRecord::default()
    });
    store.mark_online();
    assert_eq!(store.state(), Some(AutopilotState::Enabled));
}

#[test]
fn test_capabilities_replace_mode_list() {
    let mut store = store_with_modes();
    assert!(store.validate_mode("wind"));
    assert!(!store.validate_mode("nav"));

    store.apply_capabilities(&CapabilityRecord {
        modes: Some(vec!["nav".to_string()]),
    });
    assert!(store.validate_mode("nav"));
    assert!(!store.validate_mode("wind"));

    // An announcement without mode choices keeps what we have
    store.apply_capabilities(&CapabilityRecord { modes: None });
    assert_eq!(store.available_modes().collect::<Vec<_>>(), vec!["nav"]);
}

#[test]
fn test_capabilities_bounded() {
    let mut store = StateStore::new();
    let modes = (0..MAX_MODES + 4).map(|i| format!("mode{i}")).collect();
    store.apply_capabilities(&CapabilityRecord { modes: Some(modes) });
    assert_eq!(store.available_modes().count(), MAX_MODES);

    store.apply_capabilities(&CapabilityRecord {
        modes: Some(vec!["m".repeat(MAX_MODE_NAME_LEN + 1), "gps".to_string()]),
    });
    assert_eq!(store.available_modes().collect::<Vec<_>>(), vec!["gps"]);
}

#[test]
fn test_validate_state() {
    let store = StateStore::new();
    assert_eq!(store.validate_state("enabled").map(|c| c.engaged), Some(true));
    assert_eq!(store.validate_state("disabled").map(|c| c.engaged), Some(false));
    assert!(store.validate_state("off-line").is_none());
    assert!(store.validate_state("standby").is_none());
}

#[test]
fn test_full_delta_and_liveness() {
    let mut store = store_with_modes();
    store.mark_online();

    let full = store.full_delta();
    assert_eq!(full.state, Some(AutopilotState::Disabled));
    assert_eq!(full.target, Some(None));
    assert_eq!(full.engaged, Some(false));

    let liveness = store.liveness();
    assert_eq!(liveness.state, Some(AutopilotState::Disabled));
    assert_eq!(liveness.engaged, Some(false));
    assert!(liveness.mode.is_none() && liveness.target.is_none());
}

#[test]
fn test_delta_serialization_skips_absent_fields() {
    let delta = AutopilotDelta {
        state: Some(AutopilotState::OffLine),
        engaged: Some(false),
        ..AutopilotDelta::default()
    };
    assert_eq!(
        serde_json::to_value(&delta).unwrap(),
        json!({"state": "off-line", "engaged": false})
    );
}
