//! In-memory Controller Driver
//!
//! Records every driver call in order so the command stream can be checked
//! exactly, and can fail connection attempts or raise a fatal disconnect on
//! demand.

use ctlgate_core::driver::{INPUT_COUNT, OUTPUT_GROUP_COUNT, PWM_CHANNEL_COUNT};
use ctlgate_core::{
    ControllerDriver, DriverConnector, DriverError, DriverResult, FatalDisconnectHandler,
    OutputMode, RawStatus, SensorType, SignalKind,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// One recorded driver call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCommand {
    QueryStatus,
    SetConfig {
        outputs: [OutputMode; OUTPUT_GROUP_COUNT],
        inputs: [(SensorType, SignalKind); INPUT_COUNT],
    },
    UpdateConfig,
    StartOnline,
    StopOnline,
    BeginBatch,
    EndBatch,
    SetPwm { channel: usize, value: u16 },
    SetMotorDistance { motor: usize, steps: u16 },
    SetMotorSyncMaster { motor: usize, master: u8 },
    IncrMotorCmdId { motor: usize },
    StopAll,
    StopCameraOnline,
}

impl DriverCommand {
    /// Whether the call belongs to the shutdown sequence
    pub fn is_stop(&self) -> bool {
        matches!(
            self,
            DriverCommand::StopAll | DriverCommand::StopCameraOnline | DriverCommand::StopOnline
        )
    }
}

struct SimulatedState {
    identity: RawStatus,
    commands: Vec<DriverCommand>,
    failures_pending: usize,
    mode_failures_pending: usize,
    connect_count: usize,
    /// Number of the live link, 0 when none
    link: u64,
    online: bool,
    pwm: [u16; PWM_CHANNEL_COUNT],
    on_fatal: Option<FatalDisconnectHandler>,
}

impl Default for SimulatedState {
    fn default() -> Self {
        Self {
            identity: RawStatus {
                name: b"ctlgate-sim\0\0\0\0\0".to_vec(),
                version: 0x0104_0300,
            },
            commands: Vec::new(),
            failures_pending: 0,
            mode_failures_pending: 0,
            connect_count: 0,
            link: 0,
            online: false,
            pwm: [0; PWM_CHANNEL_COUNT],
            on_fatal: None,
        }
    }
}

/// Opens links to a simulated controller. Clones share the same controller.
#[derive(Clone, Default)]
pub struct SimulatedConnector {
    state: Arc<Mutex<SimulatedState>>,
}

impl SimulatedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the name and packed firmware version the controller reports
    pub fn with_identity(self, name: &str, version: u32) -> Self {
        {
            let mut state = self.state.lock();
            let mut raw = name.as_bytes().to_vec();
            raw.resize(raw.len().max(16), 0);
            state.identity = RawStatus { name: raw, version };
        }
        self
    }

    /// Refuse the next `count` connection attempts
    pub fn fail_next_connects(&self, count: usize) {
        self.state.lock().failures_pending = count;
    }

    /// Refuse the next `count` online/offline switches
    pub fn fail_next_mode_switches(&self, count: usize) {
        self.state.lock().mode_failures_pending = count;
    }

    /// Every call made so far, oldest first
    pub fn commands(&self) -> Vec<DriverCommand> {
        self.state.lock().commands.clone()
    }

    pub fn clear_commands(&self) {
        self.state.lock().commands.clear();
    }

    /// Successful connection attempts so far
    pub fn connect_count(&self) -> usize {
        self.state.lock().connect_count
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().link != 0
    }

    pub fn is_online(&self) -> bool {
        self.state.lock().online
    }

    /// Current value of a PWM channel
    pub fn pwm(&self, channel: usize) -> u16 {
        self.state.lock().pwm.get(channel).copied().unwrap_or(0)
    }

    /// Kill the live link and report it through its fatal disconnect handler.
    /// Returns false when no link is open.
    pub fn trigger_fatal(&self) -> bool {
        let handler = {
            let mut state = self.state.lock();
            if state.link == 0 {
                return false;
            }
            state.link = 0;
            state.online = false;
            state.on_fatal.take()
        };

        // Called without our lock held: the handler re-enters the gateway
        match handler {
            Some(handler) => {
                warn!("Simulated controller link lost");
                handler(DriverError::Disconnected("simulated link failure".to_string()));
                true
            }
            None => false,
        }
    }
}

impl DriverConnector for SimulatedConnector {
    fn connect(
        &self,
        address: &str,
        port: u16,
        on_fatal: FatalDisconnectHandler,
    ) -> DriverResult<Box<dyn ControllerDriver>> {
        let mut state = self.state.lock();
        if state.failures_pending > 0 {
            state.failures_pending -= 1;
            return Err(DriverError::ConnectionFailed(format!(
                "{}:{} refused the connection",
                address, port
            )));
        }

        state.connect_count += 1;
        let link = state.connect_count as u64;
        state.link = link;
        state.online = false;
        state.on_fatal = Some(on_fatal);
        debug!("Simulated controller link {} open", link);

        Ok(Box::new(SimulatedController {
            state: Arc::clone(&self.state),
            link,
        }))
    }
}

/// One link to the simulated controller. Every call fails once the link is
/// no longer the live one.
pub struct SimulatedController {
    state: Arc<Mutex<SimulatedState>>,
    link: u64,
}

impl SimulatedController {
    fn with_live<T>(
        &self,
        command: DriverCommand,
        apply: impl FnOnce(&mut SimulatedState) -> DriverResult<T>,
    ) -> DriverResult<T> {
        let mut state = self.state.lock();
        if state.link != self.link {
            return Err(DriverError::Disconnected(format!("link {} is closed", self.link)));
        }
        state.commands.push(command);
        apply(&mut state)
    }

    fn record(&self, command: DriverCommand) -> DriverResult<()> {
        self.with_live(command, |_| Ok(()))
    }
}

fn refuse_mode_switch(state: &mut SimulatedState) -> DriverResult<()> {
    if state.mode_failures_pending > 0 {
        state.mode_failures_pending -= 1;
        return Err(DriverError::Protocol("mode switch refused".to_string()));
    }
    Ok(())
}

impl ControllerDriver for SimulatedController {
    fn query_status(&mut self) -> DriverResult<RawStatus> {
        self.with_live(DriverCommand::QueryStatus, |state| Ok(state.identity.clone()))
    }

    fn is_online(&self) -> bool {
        let state = self.state.lock();
        state.link == self.link && state.online
    }

    fn set_config(
        &mut self,
        outputs: [OutputMode; OUTPUT_GROUP_COUNT],
        inputs: [(SensorType, SignalKind); INPUT_COUNT],
    ) -> DriverResult<()> {
        self.record(DriverCommand::SetConfig { outputs, inputs })
    }

    fn update_config(&mut self) -> DriverResult<()> {
        self.record(DriverCommand::UpdateConfig)
    }

    fn start_online(&mut self) -> DriverResult<()> {
        self.with_live(DriverCommand::StartOnline, |state| {
            refuse_mode_switch(state)?;
            state.online = true;
            Ok(())
        })
    }

    fn stop_online(&mut self) -> DriverResult<()> {
        self.with_live(DriverCommand::StopOnline, |state| {
            refuse_mode_switch(state)?;
            state.online = false;
            Ok(())
        })
    }

    fn begin_batch(&mut self) -> DriverResult<()> {
        self.record(DriverCommand::BeginBatch)
    }

    fn end_batch(&mut self) -> DriverResult<()> {
        self.record(DriverCommand::EndBatch)
    }

    fn set_pwm(&mut self, channel: usize, value: u16) -> DriverResult<()> {
        self.with_live(DriverCommand::SetPwm { channel, value }, |state| {
            let slot = state
                .pwm
                .get_mut(channel)
                .ok_or_else(|| DriverError::Protocol(format!("no PWM channel {}", channel)))?;
            *slot = value;
            Ok(())
        })
    }

    fn set_motor_distance(&mut self, motor: usize, steps: u16) -> DriverResult<()> {
        self.record(DriverCommand::SetMotorDistance { motor, steps })
    }

    fn set_motor_sync_master(&mut self, motor: usize, master: u8) -> DriverResult<()> {
        self.record(DriverCommand::SetMotorSyncMaster { motor, master })
    }

    fn incr_motor_cmd_id(&mut self, motor: usize) -> DriverResult<()> {
        self.record(DriverCommand::IncrMotorCmdId { motor })
    }

    fn stop_all(&mut self) -> DriverResult<()> {
        self.with_live(DriverCommand::StopAll, |state| {
            state.pwm = [0; PWM_CHANNEL_COUNT];
            Ok(())
        })
    }

    fn stop_camera_online(&mut self) -> DriverResult<()> {
        self.record(DriverCommand::StopCameraOnline)
    }
}

impl Drop for SimulatedController {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if state.link == self.link {
            state.link = 0;
            state.online = false;
            state.on_fatal = None;
        }
    }
}
