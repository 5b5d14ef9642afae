//! Request handlers
//!
//! Every handler runs with the gateway state locked, so configuration
//! pushes and actuation batches never interleave at the driver.

use ctlgate_core::{
    Actuator, ConfigureRequest, ControllerDriver, DefaultPolicy, MotorCommand, OutRequest,
    PinCommand, PinConfiguration, Reply, Request, Section, StatusReply, StatusRequest,
};
use ctlgate_core::driver::{OUTPUT_GROUP_COUNT, PWM_CHANNEL_COUNT};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::controller::ControllerSession;
use crate::error::{GatewayError, Result};
use crate::session::{ClientConnection, ConnectionId};

/// Everything guarded by the gateway's one lock
pub(crate) struct GatewayState {
    pub(crate) connections: HashMap<ConnectionId, ClientConnection>,
    pub(crate) controller: ControllerSession,
}

impl GatewayState {
    fn connection(&self, id: &str) -> Result<&ClientConnection> {
        self.connections
            .get(id)
            .ok_or_else(|| GatewayError::ConnectionNotFound(id.to_string()))
    }
}

/// Dispatch a decoded request. `Ok(None)` means the request succeeded
/// without a direct reply.
pub(crate) fn handle_request(
    state: &mut GatewayState,
    id: &str,
    request: &Request,
) -> Result<Option<Reply>> {
    state.connection(id)?;
    match request {
        Request::Status(status) => handle_status(state, id, status).map(Some),
        Request::Configure(configure) => handle_configure(state, id, configure).map(Some),
        Request::Out(out) => handle_out(state, id, out).map(|_| None),
        Request::Off => handle_off(state).map(|_| None),
    }
}

fn handle_status(state: &mut GatewayState, id: &str, request: &StatusRequest) -> Result<Reply> {
    let own = *state.connection(id)?.configuration();

    if request.include.is_empty() {
        return Ok(StatusReply::generic(state.controller.generic_report()).into());
    }

    let mut reply = StatusReply::new();
    if request.includes(Section::Controller) {
        reply = reply.with_controller(state.controller.full_report()?);
    }
    if request.includes(Section::Configuration) {
        reply = reply.with_configuration(own.report());
    }
    Ok(reply.into())
}

fn handle_configure(
    state: &mut GatewayState,
    id: &str,
    request: &ConfigureRequest,
) -> Result<Reply> {
    let current = *state.connection(id)?.configuration();
    let mut problems = Vec::new();

    let policy = request.default_policy().unwrap_or_else(|_| {
        problems.push(invalid_value("default", request.default.as_ref()));
        DefaultPolicy::Unchanged
    });
    let mode = request.requested_mode().unwrap_or_else(|_| {
        problems.push(invalid_value("mode", request.mode.as_ref()));
        None
    });

    let baseline = match policy {
        DefaultPolicy::Unchanged => Some(&current),
        DefaultPolicy::Unused => None,
    };
    // Conflicts are checked on the valid keys even when others were
    // rejected, so one reply lists every problem
    let (candidate, invalid) = PinConfiguration::construct_lenient(&request.body, baseline);
    problems.extend(invalid.iter().map(|p| invalid_value(&p.key, Some(&p.value))));

    let conflicts = conflicts_with_others(state, id, &candidate);
    if !problems.is_empty() {
        debug!(
            "Rejecting configuration from {}: {} invalid values, {} conflicts",
            id,
            problems.len(),
            conflicts.len()
        );
        problems.extend(conflicts);
        return Err(GatewayError::Validation(problems));
    }
    if !conflicts.is_empty() {
        debug!("Configuration from {} conflicts with {} connections", id, conflicts.len());
        return Err(GatewayError::Conflict(conflicts));
    }

    state.controller.apply(&candidate, mode)?;
    if let Some(connection) = state.connections.get_mut(id) {
        connection.set_configuration(candidate);
    }
    debug!("Connection {} configured: {:?}", id, candidate.report());

    Ok(StatusReply::generic(state.controller.generic_report())
        .with_configuration(candidate.report())
        .into())
}

fn invalid_value(key: &str, value: Option<&Value>) -> Value {
    json!({
        "key": key,
        "value": value.cloned().unwrap_or(Value::Null),
        "reason": "invalid value",
    })
}

/// One entry per other connection that claims a key differently, ordered by
/// connection id
fn conflicts_with_others(state: &GatewayState, id: &str, candidate: &PinConfiguration) -> Vec<Value> {
    let mut others: Vec<&ClientConnection> = state
        .connections
        .values()
        .filter(|connection| connection.id != id)
        .collect();
    others.sort_by(|a, b| a.id.cmp(&b.id));

    others
        .into_iter()
        .filter_map(|other| {
            let keys = candidate.conflicts(other.configuration());
            if keys.is_empty() {
                return None;
            }
            let keys: Vec<&str> = keys.iter().map(|key| key.as_str()).collect();
            Some(json!({"connection": other.id, "keys": keys}))
        })
        .collect()
}

fn handle_out(state: &mut GatewayState, id: &str, request: &OutRequest) -> Result<()> {
    let GatewayState {
        connections,
        controller,
    } = state;
    let connection = connections
        .get(id)
        .ok_or_else(|| GatewayError::ConnectionNotFound(id.to_string()))?;
    let driver = controller.online_driver()?;

    driver.begin_batch()?;
    let result = actuate(driver, connection, request);
    let end = driver.end_batch();
    result?;
    end?;
    Ok(())
}

/// Encode every pin of an `out` request. Pins the caller may not drive get
/// their own error reply and are skipped.
fn actuate(
    driver: &mut dyn ControllerDriver,
    connection: &ClientConnection,
    request: &OutRequest,
) -> Result<()> {
    let own = connection.configuration();

    for (key, decoded) in request.commands() {
        let (actuator, command) = match decoded {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("Connection {}: bad pin value for {}: {}", connection.id, key, e);
                connection.reply(Reply::error_with_details(e.to_string(), json!({"pin": key})));
                continue;
            }
        };

        if !own.claims(actuator) {
            warn!("Connection {}: {} is not configured", connection.id, key);
            connection.reply(GatewayError::NotConfigured(key).to_reply());
            continue;
        }

        match command {
            PinCommand::Motor(motor) => {
                if let Some(master) = motor.sync_to.filter(|m| !own.claims(*m)) {
                    warn!("Connection {}: sync target {} is not configured", connection.id, master);
                    connection.reply(GatewayError::NotConfigured(master.to_string()).to_reply());
                    continue;
                }
                drive_motor(driver, actuator.index(), &motor)?;
            }
            PinCommand::Output(pwm) => {
                driver.set_pwm(actuator.index(), pwm_value(pwm))?;
            }
        }
    }
    Ok(())
}

fn drive_motor(driver: &mut dyn ControllerDriver, motor: usize, command: &MotorCommand) -> Result<()> {
    let forward = motor * 2;
    let reverse = forward + 1;
    let duty = pwm_value(command.speed);

    if command.speed < 0 {
        driver.set_pwm(forward, 0)?;
        driver.set_pwm(reverse, duty)?;
    } else {
        driver.set_pwm(forward, duty)?;
        driver.set_pwm(reverse, 0)?;
    }

    if let Some(steps) = command.steps {
        driver.set_motor_distance(motor, u16::try_from(steps).unwrap_or(u16::MAX))?;
        driver.incr_motor_cmd_id(motor)?;
    }

    if let Some(Actuator::Motor(master)) = command.sync_to {
        driver.set_motor_sync_master(motor, sync_number(master))?;
        driver.set_motor_sync_master(master, sync_number(motor))?;
    }
    Ok(())
}

/// Magnitude of a clamped speed or PWM value
fn pwm_value(value: i64) -> u16 {
    u16::try_from(value.unsigned_abs()).unwrap_or(u16::MAX)
}

/// Sync masters are numbered from 1
fn sync_number(motor: usize) -> u8 {
    u8::try_from(motor + 1).unwrap_or(0)
}

/// Emergency stop: zero every channel whoever claimed it
fn handle_off(state: &mut GatewayState) -> Result<()> {
    let driver = state.controller.online_driver()?;
    warn!("Emergency stop requested");

    driver.begin_batch()?;
    let result = zero_outputs(driver);
    let end = driver.end_batch();
    result?;
    end?;
    Ok(())
}

fn zero_outputs(driver: &mut dyn ControllerDriver) -> Result<()> {
    for channel in 0..PWM_CHANNEL_COUNT {
        driver.set_pwm(channel, 0)?;
    }
    for motor in 0..OUTPUT_GROUP_COUNT {
        driver.set_motor_distance(motor, 0)?;
        driver.set_motor_sync_master(motor, 0)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pwm_value() {
        assert_eq!(pwm_value(-512), 512);
        assert_eq!(pwm_value(0), 0);
        assert_eq!(pwm_value(300), 300);
    }

    #[test]
    fn test_sync_number_is_one_based() {
        assert_eq!(sync_number(0), 1);
        assert_eq!(sync_number(3), 4);
    }

    #[test]
    fn test_invalid_value_entry() {
        assert_eq!(
            invalid_value("I3", Some(&json!("bogus"))),
            json!({"key": "I3", "value": "bogus", "reason": "invalid value"})
        );
    }
}
