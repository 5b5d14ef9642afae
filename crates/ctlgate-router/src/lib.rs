//! ctlgate Gateway
//!
//! Lets many clients share one hardware controller. Each client claims the
//! pins it needs; claims are checked against every other client before the
//! union is pushed to the controller, and actuation is only accepted on
//! pins the caller owns.
//!
//! The controller link is opened on the first request that needs it and
//! shut down when the last client leaves.

pub mod controller;
pub mod error;
pub mod gateway;
mod handlers;
pub mod server;
pub mod session;
pub mod simulated;

pub use controller::{ControllerSession, ControllerState};
pub use error::{GatewayError, Result};
pub use gateway::{Gateway, GatewayConfig};
pub use session::{ClientConnection, ConnectionId, DiscardReplies, ReplySink};
pub use simulated::{DriverCommand, SimulatedConnector, SimulatedController};
