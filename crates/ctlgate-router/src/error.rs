//! Gateway error types

use ctlgate_core::{DriverError, Reply};
use serde_json::{json, Value};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Error, Debug)]
pub enum GatewayError {
    /// Message could not be decoded into a request
    #[error("{0}")]
    Request(#[from] ctlgate_core::Error),

    /// Request values outside their allowed sets
    #[error("invalid configuration")]
    Validation(Vec<Value>),

    /// Pins already claimed differently by other connections
    #[error("configuration conflicts with other connections")]
    Conflict(Vec<Value>),

    /// Actuation of a pin the caller never claimed
    #[error("{0}: not configured")]
    NotConfigured(String),

    /// No link to the controller could be opened
    #[error("controller unavailable")]
    DriverUnavailable(DriverError),

    #[error("controller is not online")]
    NotOnline,

    /// The controller link failed while in use
    #[error("lost connection to the controller")]
    FatalDisconnect(DriverError),

    #[error("controller error: {0}")]
    Driver(#[from] DriverError),

    #[error("connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("transport error: {0}")]
    Transport(#[from] ctlgate_transport::TransportError),

    #[error("configuration error: {0}")]
    Config(String),
}

impl GatewayError {
    /// Error reply sent to the client
    pub fn to_reply(&self) -> Reply {
        match self {
            GatewayError::Validation(problems) | GatewayError::Conflict(problems) => {
                Reply::error_with_details(self.to_string(), Value::Array(problems.clone()))
            }
            GatewayError::NotConfigured(pin) => Reply::error_with_details(
                self.to_string(),
                json!({"pin": pin, "reason": "not configured"}),
            ),
            GatewayError::DriverUnavailable(e) | GatewayError::FatalDisconnect(e) => {
                Reply::error_with_details(self.to_string(), json!(e.to_string()))
            }
            _ => Reply::error(self.to_string()),
        }
    }
}

impl From<GatewayError> for Reply {
    fn from(e: GatewayError) -> Self {
        e.to_reply()
    }
}
