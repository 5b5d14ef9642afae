//! ctlgate Core
//!
//! Core types for a gateway that lets many clients share one hardware
//! controller.
//!
//! This crate provides:
//! - Pin configuration with merge and conflict detection ([`PinConfiguration`])
//! - Request decoding and the request registry ([`Request`], [`RequestRegistry`])
//! - Reply messages ([`Reply`], [`StatusReply`])
//! - The Controller Driver capability ([`ControllerDriver`], [`DriverConnector`])

pub mod driver;
pub mod error;
pub mod pins;
pub mod reply;
pub mod request;

pub use driver::{
    ControllerDriver, ControllerIdentity, DriverConnector, DriverEncoding, DriverResult,
    FatalDisconnectHandler, OutputMode, RawStatus, SensorType, SignalKind,
};
pub use error::{ConfigError, DriverError, Error, InvalidPin, Result};
pub use pins::{Actuator, GroupMode, InputMode, PinConfiguration, PinKey};
pub use reply::{ControllerMode, ControllerReport, ErrorReply, Reply, StatusReply};
pub use request::{
    ConfigureRequest, DefaultPolicy, MotorCommand, OutRequest, PinCommand, Request,
    RequestRegistry, Section, StatusRequest,
};

/// Default TCP port of the controller
pub const DEFAULT_CONTROLLER_PORT: u16 = 65000;

/// Default WebSocket port of the gateway
pub const DEFAULT_WS_PORT: u16 = 8000;

/// Path clients use for the control channel
pub const CONTROL_PATH: &str = "/control";
