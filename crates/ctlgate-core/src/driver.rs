//! Controller Driver capability
//!
//! The driver is the one physical link to the hardware controller. Its binary
//! protocol lives outside this crate; the gateway only sees the call surface
//! below. Calls are synchronous and expected to be fast, local I/O.

use std::sync::Arc;

use crate::error::DriverError;

/// Result type for driver calls
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Number of output groups (one motor or two single outputs each)
pub const OUTPUT_GROUP_COUNT: usize = 4;

/// Number of universal inputs
pub const INPUT_COUNT: usize = 8;

/// Number of PWM channels (two per output group)
pub const PWM_CHANNEL_COUNT: usize = OUTPUT_GROUP_COUNT * 2;

/// Hardware mode of one output group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OutputMode {
    /// Two independent single outputs
    #[default]
    Output,
    /// One motor using both PWM channels
    Motor,
}

impl OutputMode {
    pub fn code(self) -> u8 {
        match self {
            OutputMode::Output => 0,
            OutputMode::Motor => 1,
        }
    }
}

/// Sensor type of a universal input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorType {
    Voltage,
    Switch,
    /// Resistance up to 5 kOhm
    Resistor,
    /// Resistance up to 15 kOhm
    Resistor15k,
    /// Ultrasonic distance sensor
    Ultrasonic,
}

impl SensorType {
    /// Code sent to the controller. `Switch` and `Resistor` share a code and
    /// differ only in their [`SignalKind`].
    pub fn code(self) -> u8 {
        match self {
            SensorType::Voltage => 0,
            SensorType::Switch | SensorType::Resistor => 1,
            SensorType::Resistor15k => 2,
            SensorType::Ultrasonic => 3,
        }
    }
}

/// Whether an input is sampled as an analog or a digital signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Analog,
    Digital,
}

impl SignalKind {
    pub fn code(self) -> u8 {
        match self {
            SignalKind::Analog => 0,
            SignalKind::Digital => 1,
        }
    }
}

/// Configuration in the shape the driver's `set_config` expects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverEncoding {
    pub outputs: [OutputMode; OUTPUT_GROUP_COUNT],
    pub inputs: [(SensorType, SignalKind); INPUT_COUNT],
}

/// Raw status block returned by the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawStatus {
    /// Device name, NUL padded
    pub name: Vec<u8>,
    /// Firmware version packed MSB first
    pub version: u32,
}

/// Decoded controller name and firmware version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerIdentity {
    pub name: String,
    pub version: String,
}

impl ControllerIdentity {
    pub fn from_raw(name: &[u8], version: u32) -> Self {
        let end = name
            .iter()
            .rposition(|b| *b != 0)
            .map_or(0, |last| last + 1);
        let [b3, b2, b1, b0] = version.to_be_bytes();

        Self {
            name: String::from_utf8_lossy(&name[..end]).into_owned(),
            version: format!("{}.{}.{}.{}", b3, b2, b1, b0),
        }
    }
}

impl From<&RawStatus> for ControllerIdentity {
    fn from(raw: &RawStatus) -> Self {
        Self::from_raw(&raw.name, raw.version)
    }
}

/// Callback a driver invokes when its link fails asynchronously.
///
/// Must not be called from inside one of the driver's own methods; the
/// gateway handles it under the same lock that guards driver calls.
pub type FatalDisconnectHandler = Arc<dyn Fn(DriverError) + Send + Sync>;

/// An open link to the hardware controller
pub trait ControllerDriver: Send {
    /// Read the name and packed firmware version
    fn query_status(&mut self) -> DriverResult<RawStatus>;

    /// Whether actuation commands are applied to the hardware
    fn is_online(&self) -> bool;

    /// Stage a new output and input configuration
    fn set_config(
        &mut self,
        outputs: [OutputMode; OUTPUT_GROUP_COUNT],
        inputs: [(SensorType, SignalKind); INPUT_COUNT],
    ) -> DriverResult<()>;

    /// Send the staged configuration to the hardware
    fn update_config(&mut self) -> DriverResult<()>;

    fn start_online(&mut self) -> DriverResult<()>;

    fn stop_online(&mut self) -> DriverResult<()>;

    /// Open an actuation batch; writes until `end_batch` apply together
    fn begin_batch(&mut self) -> DriverResult<()>;

    fn end_batch(&mut self) -> DriverResult<()>;

    /// Set a PWM channel (0..=512)
    fn set_pwm(&mut self, channel: usize, value: u16) -> DriverResult<()>;

    /// Arm a distance stop on the motor's fast counter
    fn set_motor_distance(&mut self, motor: usize, steps: u16) -> DriverResult<()>;

    /// Link a motor to a sync master (1-based, 0 clears)
    fn set_motor_sync_master(&mut self, motor: usize, master: u8) -> DriverResult<()>;

    /// Bump the motor's command id so the new distance takes effect
    fn incr_motor_cmd_id(&mut self, motor: usize) -> DriverResult<()>;

    fn stop_all(&mut self) -> DriverResult<()>;

    fn stop_camera_online(&mut self) -> DriverResult<()>;
}

/// Opens driver links
pub trait DriverConnector: Send + Sync {
    fn connect(
        &self,
        address: &str,
        port: u16,
        on_fatal: FatalDisconnectHandler,
    ) -> DriverResult<Box<dyn ControllerDriver>>;
}
