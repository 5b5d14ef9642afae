//! Configuration Tests (ctlgate-router)
//!
//! Tests for the configure request including:
//! - Claiming output groups and inputs
//! - All-or-nothing validation
//! - Conflicts between connections
//! - Default policies and mode switching
//! - Controller unavailability

use ctlgate_core::{
    ControllerMode, GroupMode, InputMode, OutputMode, PinConfiguration, Reply, SensorType,
    SignalKind,
};
use ctlgate_router::{
    ControllerState, DiscardReplies, DriverCommand, Gateway, GatewayConfig, SimulatedConnector,
};
use serde_json::{json, Value};
use std::sync::Arc;

fn setup() -> (Gateway, SimulatedConnector) {
    let controller = SimulatedConnector::new();
    let gateway = Gateway::new(GatewayConfig::default(), Arc::new(controller.clone()));
    (gateway, controller)
}

fn configure(gateway: &Gateway, id: &str, mut body: Value) -> Reply {
    body["request"] = json!("configure");
    gateway.handle_json(id, body).expect("configure always replies")
}

fn details(reply: &Reply) -> Value {
    reply
        .as_error()
        .and_then(|e| e.details.clone())
        .unwrap_or(Value::Null)
}

// ============================================================================
// Claiming Pins
// ============================================================================

#[test]
fn test_configure_claims_pins() {
    let (gateway, controller) = setup();
    let id = gateway.connect(Some("a"), Arc::new(DiscardReplies));

    let reply = configure(&gateway, &id, json!({"M1/O1,O2": "motor", "I3": "distance"}));

    assert_eq!(
        serde_json::to_value(&reply).unwrap(),
        json!({
            "reply": "status",
            "controller": {"connected": true, "mode": "offline"},
            "configuration": {"I3": "distance", "M1": "active"}
        })
    );

    let mut inputs = [(SensorType::Switch, SignalKind::Digital); 8];
    inputs[2] = (SensorType::Ultrasonic, SignalKind::Analog);
    assert_eq!(
        controller.commands(),
        vec![
            DriverCommand::SetConfig {
                outputs: [
                    OutputMode::Motor,
                    OutputMode::Output,
                    OutputMode::Output,
                    OutputMode::Output
                ],
                inputs,
            },
            DriverCommand::UpdateConfig,
        ]
    );
}

#[test]
fn test_output_group_reports_both_pins() {
    let (gateway, _controller) = setup();
    let id = gateway.connect(None, Arc::new(DiscardReplies));

    let reply = configure(&gateway, &id, json!({"M2/O3,O4": "output"}));
    let configuration = reply.as_status().unwrap().configuration.clone().unwrap();

    assert_eq!(configuration.len(), 2);
    assert_eq!(configuration["O3"], "active");
    assert_eq!(configuration["O4"], "active");
}

#[test]
fn test_unknown_keys_ignored() {
    let (gateway, _controller) = setup();
    let id = gateway.connect(None, Arc::new(DiscardReplies));

    let reply = configure(&gateway, &id, json!({"X9": "motor", "colour": "blue"}));

    assert!(!reply.is_error());
    assert!(gateway.connection_configuration(&id).unwrap().is_empty());
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn test_invalid_value_leaves_state_untouched() {
    let (gateway, controller) = setup();
    let id = gateway.connect(Some("a"), Arc::new(DiscardReplies));
    configure(&gateway, &id, json!({"M1/O1,O2": "motor"}));

    let before = gateway.connection_configuration(&id).unwrap();
    let effective_before = gateway.effective_configuration();
    controller.clear_commands();

    let reply = configure(&gateway, &id, json!({"I3": "bogus"}));

    assert!(reply.is_error());
    assert_eq!(
        details(&reply),
        json!([{"key": "I3", "value": "bogus", "reason": "invalid value"}])
    );
    assert_eq!(gateway.connection_configuration(&id).unwrap(), before);
    assert_eq!(gateway.effective_configuration(), effective_before);
    assert!(controller.commands().is_empty(), "nothing pushed on failure");
}

#[test]
fn test_every_problem_reported() {
    let (gateway, _controller) = setup();
    let id = gateway.connect(None, Arc::new(DiscardReplies));

    let reply = configure(
        &gateway,
        &id,
        json!({"default": "maybe", "mode": "sideways", "I1": "nope", "M4/O7,O8": "digital"}),
    );

    let keys: Vec<String> = details(&reply)
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["key"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(keys, vec!["default", "mode", "M4/O7,O8", "I1"]);
}

#[test]
fn test_invalid_values_and_conflicts_reported_together() {
    let (gateway, _controller) = setup();
    let a = gateway.connect(Some("a"), Arc::new(DiscardReplies));
    let b = gateway.connect(Some("b"), Arc::new(DiscardReplies));
    assert!(!configure(&gateway, &a, json!({"M1/O1,O2": "motor"})).is_error());

    let reply = configure(&gateway, &b, json!({"M1/O1,O2": "output", "I3": "bogus"}));

    assert_eq!(reply.as_error().unwrap().error, "invalid configuration");
    assert_eq!(
        details(&reply),
        json!([
            {"key": "I3", "value": "bogus", "reason": "invalid value"},
            {"connection": "a", "keys": ["M1/O1,O2"]}
        ])
    );
    assert!(gateway.connection_configuration(&b).unwrap().is_empty());
    assert_eq!(gateway.effective_configuration().group(0), GroupMode::Motor);
    assert!(gateway.effective_configuration().input(2).is_unused());
}

#[test]
fn test_validation_happens_before_connecting() {
    let (gateway, controller) = setup();
    let id = gateway.connect(None, Arc::new(DiscardReplies));

    configure(&gateway, &id, json!({"I3": "bogus"}));

    assert_eq!(controller.connect_count(), 0);
    assert_eq!(gateway.controller_state(), ControllerState::Absent);
}

// ============================================================================
// Conflicts
// ============================================================================

#[test]
fn test_conflict_names_other_connection() {
    let (gateway, _controller) = setup();
    let a = gateway.connect(Some("a"), Arc::new(DiscardReplies));
    let b = gateway.connect(Some("b"), Arc::new(DiscardReplies));

    assert!(!configure(&gateway, &a, json!({"M1/O1,O2": "motor"})).is_error());
    let effective = gateway.effective_configuration();

    let reply = configure(&gateway, &b, json!({"M1/O1,O2": "output"}));

    assert_eq!(
        reply.as_error().unwrap().error,
        "configuration conflicts with other connections"
    );
    assert_eq!(
        details(&reply),
        json!([{"connection": "a", "keys": ["M1/O1,O2"]}])
    );
    assert!(gateway.connection_configuration(&b).unwrap().is_empty());
    assert_eq!(
        gateway.connection_configuration(&a).unwrap().group(0),
        GroupMode::Motor
    );
    assert_eq!(gateway.effective_configuration(), effective);
}

#[test]
fn test_conflicts_listed_per_connection_in_id_order() {
    let (gateway, _controller) = setup();
    let a = gateway.connect(Some("a"), Arc::new(DiscardReplies));
    let c = gateway.connect(Some("c"), Arc::new(DiscardReplies));
    let b = gateway.connect(Some("b"), Arc::new(DiscardReplies));

    configure(&gateway, &c, json!({"I2": "voltage"}));
    configure(&gateway, &a, json!({"I1": "digital"}));

    let reply = configure(&gateway, &b, json!({"I1": "distance", "I2": "digital"}));

    assert_eq!(
        details(&reply),
        json!([
            {"connection": "a", "keys": ["I1"]},
            {"connection": "c", "keys": ["I2"]}
        ])
    );
}

#[test]
fn test_same_claim_is_shared() {
    let (gateway, _controller) = setup();
    let a = gateway.connect(None, Arc::new(DiscardReplies));
    let b = gateway.connect(None, Arc::new(DiscardReplies));

    configure(&gateway, &a, json!({"M1/O1,O2": "motor", "I4": "voltage"}));
    let reply = configure(&gateway, &b, json!({"M1/O1,O2": "motor"}));

    assert!(!reply.is_error());
}

#[test]
fn test_unused_never_conflicts() {
    let (gateway, _controller) = setup();
    let a = gateway.connect(None, Arc::new(DiscardReplies));
    let b = gateway.connect(None, Arc::new(DiscardReplies));

    configure(&gateway, &a, json!({"M1/O1,O2": "motor"}));
    let reply = configure(&gateway, &b, json!({"M1/O1,O2": "unused", "M2/O3,O4": "output"}));

    assert!(!reply.is_error());
    assert_eq!(gateway.effective_configuration().group(0), GroupMode::Motor);
    assert_eq!(gateway.effective_configuration().group(1), GroupMode::Output);
}

// ============================================================================
// Default Policies
// ============================================================================

#[test]
fn test_default_unchanged_keeps_previous_claims() {
    let (gateway, _controller) = setup();
    let id = gateway.connect(None, Arc::new(DiscardReplies));

    configure(&gateway, &id, json!({"M1/O1,O2": "motor"}));
    configure(&gateway, &id, json!({"I1": "digital"}));

    let own = gateway.connection_configuration(&id).unwrap();
    assert_eq!(own.group(0), GroupMode::Motor);
    assert_eq!(own.input(0), InputMode::Digital);
}

#[test]
fn test_default_unused_releases_own_claims() {
    let (gateway, _controller) = setup();
    let id = gateway.connect(None, Arc::new(DiscardReplies));

    configure(&gateway, &id, json!({"M1/O1,O2": "motor"}));
    let reply = configure(&gateway, &id, json!({"default": "unused", "I1": "digital"}));

    assert_eq!(
        reply.as_status().unwrap().configuration.clone().unwrap().len(),
        1
    );
    let own = gateway.connection_configuration(&id).unwrap();
    assert_eq!(own, PinConfiguration::new().with_input(0, InputMode::Digital));

    // The effective configuration only ever grows
    assert_eq!(gateway.effective_configuration().group(0), GroupMode::Motor);
}

#[test]
fn test_released_pins_can_be_claimed_by_others() {
    let (gateway, _controller) = setup();
    let a = gateway.connect(None, Arc::new(DiscardReplies));
    let b = gateway.connect(None, Arc::new(DiscardReplies));

    configure(&gateway, &a, json!({"M1/O1,O2": "motor"}));
    configure(&gateway, &a, json!({"default": "unused"}));
    let reply = configure(&gateway, &b, json!({"M1/O1,O2": "output"}));

    assert!(!reply.is_error());
    assert_eq!(gateway.effective_configuration().group(0), GroupMode::Output);
}

// ============================================================================
// Mode Switching
// ============================================================================

#[test]
fn test_mode_switches_controller() {
    let (gateway, controller) = setup();
    let id = gateway.connect(None, Arc::new(DiscardReplies));

    let reply = configure(&gateway, &id, json!({"mode": "online"}));
    assert_eq!(
        reply.as_status().unwrap().controller.as_ref().unwrap().mode,
        Some(ControllerMode::Online)
    );
    assert!(controller.is_online());
    assert_eq!(
        gateway.controller_state(),
        ControllerState::Connected(ControllerMode::Online)
    );

    // Already online: no second start
    configure(&gateway, &id, json!({"mode": "online"}));
    let starts = controller
        .commands()
        .into_iter()
        .filter(|c| *c == DriverCommand::StartOnline)
        .count();
    assert_eq!(starts, 1);

    configure(&gateway, &id, json!({"mode": "offline"}));
    assert!(!controller.is_online());
}

#[test]
fn test_pin_changes_keep_mode() {
    let (gateway, controller) = setup();
    let id = gateway.connect(None, Arc::new(DiscardReplies));

    configure(&gateway, &id, json!({"mode": "online"}));
    configure(&gateway, &id, json!({"I2": "resistance"}));

    assert!(controller.is_online());
    assert_eq!(
        gateway.connection_configuration(&id).unwrap().input(1),
        InputMode::Resistance5k
    );
}

// ============================================================================
// Controller Availability
// ============================================================================

#[test]
fn test_driver_unavailable_is_reported_and_retried() {
    let (gateway, controller) = setup();
    let id = gateway.connect(None, Arc::new(DiscardReplies));
    controller.fail_next_connects(1);

    let reply = configure(&gateway, &id, json!({"M1/O1,O2": "motor"}));

    assert_eq!(reply.as_error().unwrap().error, "controller unavailable");
    assert!(details(&reply).as_str().unwrap().contains("refused"));
    assert!(gateway.connection_configuration(&id).unwrap().is_empty());
    assert!(gateway.effective_configuration().is_empty());
    assert_eq!(gateway.controller_state(), ControllerState::Absent);

    // The next request tries again
    let reply = configure(&gateway, &id, json!({"M1/O1,O2": "motor"}));
    assert!(!reply.is_error());
    assert_eq!(controller.connect_count(), 1);
}

#[test]
fn test_failed_mode_switch_restores_configuration() {
    let (gateway, controller) = setup();
    let a = gateway.connect(Some("a"), Arc::new(DiscardReplies));
    let b = gateway.connect(Some("b"), Arc::new(DiscardReplies));
    controller.fail_next_mode_switches(1);

    let reply = configure(&gateway, &a, json!({"M2/O3,O4": "motor", "mode": "online"}));

    assert!(reply.is_error());
    assert!(!controller.is_online());
    assert!(gateway.connection_configuration(&a).unwrap().is_empty());
    assert!(gateway.effective_configuration().is_empty());
    assert_eq!(
        gateway.controller_state(),
        ControllerState::Connected(ControllerMode::Offline)
    );

    // The controller is back to the configuration nobody has claimed
    let pushed: Vec<[OutputMode; 4]> = controller
        .commands()
        .into_iter()
        .filter_map(|c| match c {
            DriverCommand::SetConfig { outputs, .. } => Some(outputs),
            _ => None,
        })
        .collect();
    assert_eq!(pushed.len(), 2);
    assert_eq!(pushed[0][1], OutputMode::Motor);
    assert_eq!(pushed[1][1], OutputMode::Output);

    // So another connection may claim the group differently
    assert!(!configure(&gateway, &b, json!({"M2/O3,O4": "output"})).is_error());
    assert_eq!(gateway.effective_configuration().group(1), GroupMode::Output);
}
