//! Actuation Tests (ctlgate-router)
//!
//! Tests for the out and off requests including:
//! - Motor and output encoding
//! - Clamping
//! - Per-pin errors that do not abort the batch
//! - Distance stops and sync links
//! - Emergency stop

use ctlgate_core::Reply;
use ctlgate_router::{DriverCommand, Gateway, GatewayConfig, SimulatedConnector};
use ctlgate_test_utils::ReplyCollector;
use serde_json::{json, Value};
use std::sync::Arc;

struct Rig {
    gateway: Gateway,
    controller: SimulatedConnector,
    replies: ReplyCollector,
    id: String,
}

/// One connection owning M1 as a motor and O3/O4 as outputs, controller online
fn rig() -> Rig {
    rig_with(json!({"M1/O1,O2": "motor", "M2/O3,O4": "output", "mode": "online"}))
}

fn rig_with(mut claims: Value) -> Rig {
    let controller = SimulatedConnector::new();
    let gateway = Gateway::new(GatewayConfig::default(), Arc::new(controller.clone()));
    let replies = ReplyCollector::new();
    let id = gateway.connect(Some("owner"), replies.sink());

    claims["request"] = json!("configure");
    let reply = gateway.handle_json(&id, claims).unwrap();
    assert!(!reply.is_error(), "setup failed: {:?}", reply);
    controller.clear_commands();

    Rig {
        gateway,
        controller,
        replies,
        id,
    }
}

fn out(rig: &Rig, mut pins: Value) -> Option<Reply> {
    pins["request"] = json!("out");
    rig.gateway.handle_json(&rig.id, pins)
}

fn pwm(channel: usize, value: u16) -> DriverCommand {
    DriverCommand::SetPwm { channel, value }
}

// ============================================================================
// Motor Encoding
// ============================================================================

#[test]
fn test_negative_speed_drives_reverse_channel() {
    let rig = rig();

    assert_eq!(out(&rig, json!({"M1": -600})), None);

    assert_eq!(
        rig.controller.commands(),
        vec![
            DriverCommand::BeginBatch,
            pwm(0, 0),
            pwm(1, 512),
            DriverCommand::EndBatch,
        ]
    );
    assert_eq!(rig.controller.pwm(0), 0);
    assert_eq!(rig.controller.pwm(1), 512);
    assert_eq!(rig.replies.count(), 0);
}

#[test]
fn test_positive_speed_drives_forward_channel() {
    let rig = rig();

    out(&rig, json!({"M1": 300}));

    assert_eq!(rig.controller.pwm(0), 300);
    assert_eq!(rig.controller.pwm(1), 0);
}

#[test]
fn test_motor_object_form_with_steps() {
    let rig = rig();

    out(&rig, json!({"M1": {"speed": 100, "steps": 70000}}));

    assert_eq!(
        rig.controller.commands(),
        vec![
            DriverCommand::BeginBatch,
            pwm(0, 100),
            pwm(1, 0),
            DriverCommand::SetMotorDistance {
                motor: 0,
                steps: 65535
            },
            DriverCommand::IncrMotorCmdId { motor: 0 },
            DriverCommand::EndBatch,
        ]
    );
}

#[test]
fn test_sync_link_is_bidirectional() {
    let rig = rig_with(json!({"M1/O1,O2": "motor", "M3/O5,O6": "motor", "mode": "online"}));

    out(&rig, json!({"M3": {"speed": -50, "syncto": "M1"}}));

    assert_eq!(
        rig.controller.commands(),
        vec![
            DriverCommand::BeginBatch,
            pwm(4, 0),
            pwm(5, 50),
            DriverCommand::SetMotorSyncMaster {
                motor: 2,
                master: 1
            },
            DriverCommand::SetMotorSyncMaster {
                motor: 0,
                master: 3
            },
            DriverCommand::EndBatch,
        ]
    );
}

#[test]
fn test_sync_to_unclaimed_motor_rejected() {
    let rig = rig();

    assert_eq!(out(&rig, json!({"M1": {"speed": 100, "syncto": "M4"}})), None);

    let errors = rig.replies.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(
        errors[0].as_error().unwrap().details,
        Some(json!({"pin": "M4", "reason": "not configured"}))
    );
    assert_eq!(
        rig.controller.commands(),
        vec![DriverCommand::BeginBatch, DriverCommand::EndBatch]
    );
}

// ============================================================================
// Outputs
// ============================================================================

#[test]
fn test_output_sets_its_channel() {
    let rig = rig();

    out(&rig, json!({"O3": 200, "O4": 900}));

    assert_eq!(rig.controller.pwm(2), 200);
    assert_eq!(rig.controller.pwm(3), 512);
}

#[test]
fn test_unconfigured_output_gets_one_error_and_others_proceed() {
    let rig = rig();

    // O1 belongs to the group claimed as a motor
    assert_eq!(out(&rig, json!({"O1": 100, "O3": 250, "M1": 10})), None);

    let errors = rig.replies.errors();
    assert_eq!(errors.len(), 1);
    let error = errors[0].as_error().unwrap();
    assert_eq!(error.error, "O1: not configured");
    assert_eq!(
        error.details,
        Some(json!({"pin": "O1", "reason": "not configured"}))
    );

    assert_eq!(rig.controller.pwm(2), 250);
    assert_eq!(rig.controller.pwm(0), 10);
    assert!(!rig.controller.commands().contains(&pwm(0, 100)));
}

#[test]
fn test_bad_keys_and_values_reported_per_pin() {
    let rig = rig();

    out(&rig, json!({"X1": 5, "O3": "loud", "O4": 40}));

    let errors = rig.replies.errors();
    assert_eq!(errors.len(), 2);
    let pins: Vec<Value> = errors
        .iter()
        .map(|e| e.as_error().unwrap().details.clone().unwrap()["pin"].clone())
        .collect();
    assert!(pins.contains(&json!("X1")));
    assert!(pins.contains(&json!("O3")));
    assert_eq!(rig.controller.pwm(3), 40);
}

#[test]
fn test_other_connections_pins_are_off_limits() {
    let rig = rig();
    let other_replies = ReplyCollector::new();
    let other = rig.gateway.connect(Some("other"), other_replies.sink());

    let reply = rig
        .gateway
        .handle_json(&other, json!({"request": "out", "M1": 500}));

    assert_eq!(reply, None);
    assert_eq!(other_replies.errors().len(), 1);
    assert_eq!(rig.controller.pwm(0), 0);
    assert_eq!(rig.replies.count(), 0);
}

#[test]
fn test_out_requires_online_controller() {
    let rig = rig_with(json!({"M1/O1,O2": "motor"}));

    let reply = out(&rig, json!({"M1": 100})).unwrap();

    assert_eq!(reply.as_error().unwrap().error, "controller is not online");
    assert!(rig.controller.commands().is_empty());
}

// ============================================================================
// Emergency Stop
// ============================================================================

#[test]
fn test_off_zeroes_every_output() {
    let rig = rig();
    out(&rig, json!({"M1": 400, "O3": 100}));
    rig.controller.clear_commands();

    // A connection with no claims may still stop everything
    let bystander = rig.gateway.connect(None, Arc::new(ReplyCollector::new()));
    assert_eq!(rig.gateway.handle_json(&bystander, json!({"request": "off"})), None);

    let commands = rig.controller.commands();
    assert_eq!(commands.first(), Some(&DriverCommand::BeginBatch));
    assert_eq!(commands.last(), Some(&DriverCommand::EndBatch));
    for channel in 0..8 {
        assert!(commands.contains(&pwm(channel, 0)));
        assert_eq!(rig.controller.pwm(channel), 0);
    }
    for motor in 0..4 {
        assert!(commands.contains(&DriverCommand::SetMotorDistance { motor, steps: 0 }));
        assert!(commands.contains(&DriverCommand::SetMotorSyncMaster { motor, master: 0 }));
    }
}

#[test]
fn test_off_requires_online_controller() {
    let rig = rig_with(json!({"I1": "digital"}));

    let reply = rig
        .gateway
        .handle_json(&rig.id, json!({"request": "OFF"}))
        .unwrap();

    assert!(reply.is_error());
}
