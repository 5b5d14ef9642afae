//! Error types for ctlgate

use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types
#[derive(Error, Debug)]
pub enum Error {
    /// Message is not shaped like a request
    #[error("not a valid request message: {0}")]
    InvalidMessage(String),

    /// Request name is not in the registry
    #[error("unknown request type: {0}")]
    UnknownRequest(String),

    /// A request field holds a value outside its allowed set
    #[error("invalid value for {field}: {value}")]
    InvalidField { field: String, value: Value },

    /// Key does not name a motor or output
    #[error("unknown pin: {0}")]
    UnknownPin(String),

    /// Pin configuration rejected
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    /// JSON decoding error
    #[error("decode error: {0}")]
    DecodeError(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::DecodeError(e.to_string())
    }
}

/// A single rejected `(key, value)` pair
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidPin {
    pub key: String,
    pub value: Value,
}

impl fmt::Display for InvalidPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Every invalid value found while building a pin configuration
#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid configuration: {}", join_pins(.invalid))]
pub struct ConfigError {
    pub invalid: Vec<InvalidPin>,
}

impl ConfigError {
    /// Keys that were rejected, in the order they were checked
    pub fn keys(&self) -> Vec<&str> {
        self.invalid.iter().map(|p| p.key.as_str()).collect()
    }
}

fn join_pins(pins: &[InvalidPin]) -> String {
    pins.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors reported by a Controller Driver
#[derive(Error, Debug, Clone)]
pub enum DriverError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("controller disconnected: {0}")]
    Disconnected(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("io error: {0}")]
    Io(String),
}
