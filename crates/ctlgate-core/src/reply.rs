//! Reply messages
//!
//! Replies serialize to `{"reply": "error", "error": .., "details": ..}` or
//! `{"reply": "status", "controller": {..}, "configuration": {..}}`; every
//! optional part is omitted when absent.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::driver::ControllerIdentity;
use crate::error::Result;

/// Whether actuation is applied to the hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerMode {
    Online,
    Offline,
}

impl ControllerMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "online" => Some(ControllerMode::Online),
            "offline" => Some(ControllerMode::Offline),
            _ => None,
        }
    }

    pub fn from_online(online: bool) -> Self {
        if online {
            ControllerMode::Online
        } else {
            ControllerMode::Offline
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ControllerMode::Online => "online",
            ControllerMode::Offline => "offline",
        }
    }
}

/// Controller section of a status reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerReport {
    pub connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ControllerMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ControllerReport {
    pub fn disconnected() -> Self {
        Self {
            connected: false,
            mode: None,
            name: None,
            version: None,
        }
    }

    pub fn connected(mode: ControllerMode) -> Self {
        Self {
            connected: true,
            mode: Some(mode),
            name: None,
            version: None,
        }
    }

    pub fn with_identity(mut self, identity: ControllerIdentity) -> Self {
        self.name = Some(identity.name);
        self.version = Some(identity.version);
        self
    }
}

/// Status reply, assembled from any subset of sections
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<ControllerReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<BTreeMap<String, String>>,
}

impl StatusReply {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status carrying only controller connectivity and mode
    pub fn generic(controller: ControllerReport) -> Self {
        Self::new().with_controller(controller)
    }

    pub fn with_controller(mut self, controller: ControllerReport) -> Self {
        self.controller = Some(controller);
        self
    }

    pub fn with_configuration(mut self, configuration: BTreeMap<String, String>) -> Self {
        self.configuration = Some(configuration);
        self
    }
}

/// Error reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// A reply to a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "lowercase")]
pub enum Reply {
    Error(ErrorReply),
    Status(StatusReply),
}

impl Reply {
    pub fn error(message: impl Into<String>) -> Self {
        Reply::Error(ErrorReply {
            error: message.into(),
            details: None,
        })
    }

    pub fn error_with_details(message: impl Into<String>, details: Value) -> Self {
        Reply::Error(ErrorReply {
            error: message.into(),
            details: Some(details),
        })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    pub fn as_error(&self) -> Option<&ErrorReply> {
        match self {
            Reply::Error(e) => Some(e),
            Reply::Status(_) => None,
        }
    }

    pub fn as_status(&self) -> Option<&StatusReply> {
        match self {
            Reply::Status(s) => Some(s),
            Reply::Error(_) => None,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

impl From<StatusReply> for Reply {
    fn from(status: StatusReply) -> Self {
        Reply::Status(status)
    }
}

impl From<ErrorReply> for Reply {
    fn from(error: ErrorReply) -> Self {
        Reply::Error(error)
    }
}
