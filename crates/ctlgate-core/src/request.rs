//! Request messages and the request registry
//!
//! A request on the wire is a JSON object tagged by its `request` field:
//!
//! ```json
//! {"request": "configure", "M1/O1,O2": "motor", "I3": "distance", "mode": "online"}
//! ```
//!
//! The name is looked up case-insensitively in a [`RequestRegistry`] that maps
//! each name to a parser. An object without a `request` field is a plain
//! status request.

use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::pins::Actuator;
use crate::reply::ControllerMode;

/// Fastest motor speed, either direction
pub const MAX_SPEED: i64 = 512;

/// Largest distance a motor can be told to travel
pub const MAX_STEPS: i64 = 65535;

/// Largest PWM value for a single output
pub const MAX_PWM: i64 = 512;

/// Field carrying the request name
pub const REQUEST_FIELD: &str = "request";

/// Optional report sections of a status reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Section {
    Controller,
    Configuration,
}

impl Section {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "controller" => Some(Section::Controller),
            "configuration" => Some(Section::Configuration),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Section::Controller => "controller",
            Section::Configuration => "configuration",
        }
    }
}

/// Ask for the controller status
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusRequest {
    /// Sections explicitly asked for
    pub include: Vec<Section>,
}

impl StatusRequest {
    pub fn including(sections: &[Section]) -> Self {
        let mut include = sections.to_vec();
        include.sort();
        include.dedup();
        Self { include }
    }

    pub fn includes(&self, section: Section) -> bool {
        self.include.contains(&section)
    }
}

/// What happens to keys a configure request leaves out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DefaultPolicy {
    /// Absent keys keep the caller's current value
    #[default]
    Unchanged,
    /// Absent keys are released
    Unused,
}

impl DefaultPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unchanged" => Some(DefaultPolicy::Unchanged),
            "unused" => Some(DefaultPolicy::Unused),
            _ => None,
        }
    }
}

/// Claim pins and switch the controller mode
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigureRequest {
    pub default: Option<Value>,
    pub mode: Option<Value>,
    /// Pin keys and anything else the message carried
    pub body: Map<String, Value>,
}

impl ConfigureRequest {
    /// The `default` policy, `unchanged` when absent
    pub fn default_policy(&self) -> Result<DefaultPolicy> {
        match &self.default {
            None => Ok(DefaultPolicy::Unchanged),
            Some(value) => value
                .as_str()
                .and_then(DefaultPolicy::parse)
                .ok_or_else(|| Error::InvalidField {
                    field: "default".to_string(),
                    value: value.clone(),
                }),
        }
    }

    /// The requested controller mode, if any
    pub fn requested_mode(&self) -> Result<Option<ControllerMode>> {
        match &self.mode {
            None => Ok(None),
            Some(value) => value
                .as_str()
                .and_then(ControllerMode::parse)
                .map(Some)
                .ok_or_else(|| Error::InvalidField {
                    field: "mode".to_string(),
                    value: value.clone(),
                }),
        }
    }
}

/// Motor actuation after clamping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorCommand {
    /// Signed speed in `-512..=512`; negative runs in reverse
    pub speed: i64,
    /// Distance stop in `0..=65535`
    pub steps: Option<i64>,
    /// Motor to run in sync with
    pub sync_to: Option<Actuator>,
}

/// Actuation of one pin in an `out` request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinCommand {
    Motor(MotorCommand),
    /// PWM value in `0..=512`
    Output(i64),
}

/// Drive motors and outputs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutRequest {
    pub pins: Map<String, Value>,
}

impl OutRequest {
    /// Decode every pin entry. Each entry fails on its own so one bad key
    /// never hides the others.
    pub fn commands(&self) -> Vec<(String, Result<(Actuator, PinCommand)>)> {
        self.pins
            .iter()
            .map(|(key, value)| (key.clone(), decode_pin(key, value)))
            .collect()
    }
}

fn decode_pin(key: &str, value: &Value) -> Result<(Actuator, PinCommand)> {
    let actuator = Actuator::parse(key).ok_or_else(|| Error::UnknownPin(key.to_string()))?;

    let invalid = || Error::InvalidField {
        field: key.to_string(),
        value: value.clone(),
    };

    let command = match actuator {
        Actuator::Motor(_) => PinCommand::Motor(decode_motor(value).ok_or_else(invalid)?),
        Actuator::Output(_) => {
            let pwm = number(value).ok_or_else(invalid)?;
            PinCommand::Output(pwm.clamp(0, MAX_PWM))
        }
    };
    Ok((actuator, command))
}

fn decode_motor(value: &Value) -> Option<MotorCommand> {
    if let Some(speed) = number(value) {
        return Some(MotorCommand {
            speed: speed.clamp(-MAX_SPEED, MAX_SPEED),
            steps: None,
            sync_to: None,
        });
    }

    let fields = value.as_object()?;
    let speed = match fields.get("speed") {
        Some(v) => number(v)?,
        None => 0,
    };
    let steps = match fields.get("steps") {
        Some(v) => Some(number(v)?.clamp(0, MAX_STEPS)),
        None => None,
    };
    let sync_to = match fields.get("syncto") {
        Some(v) => match v.as_str().and_then(Actuator::parse)? {
            motor @ Actuator::Motor(_) => Some(motor),
            Actuator::Output(_) => return None,
        },
        None => None,
    };

    Some(MotorCommand {
        speed: speed.clamp(-MAX_SPEED, MAX_SPEED),
        steps,
        sync_to,
    })
}

fn number(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f.round() as i64))
}

/// A decoded request
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Status(StatusRequest),
    Configure(ConfigureRequest),
    Out(OutRequest),
    /// Emergency stop of every output
    Off,
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::Status(_) => "status",
            Request::Configure(_) => "configure",
            Request::Out(_) => "out",
            Request::Off => "off",
        }
    }

    /// Decode a JSON value using the given registry
    pub fn from_json(registry: &RequestRegistry, value: Value) -> Result<Request> {
        registry.parse(value)
    }
}

/// Builds a request from the message fields (minus the `request` field)
pub type RequestParser = fn(Map<String, Value>) -> Result<Request>;

/// Maps request names to their parsers
#[derive(Debug, Clone, Default)]
pub struct RequestRegistry {
    parsers: HashMap<&'static str, RequestParser>,
}

impl RequestRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `status`, `configure`, `out` and `off`
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register("status", parse_status);
        registry.register("configure", parse_configure);
        registry.register("out", parse_out);
        registry.register("off", parse_off);
        registry
    }

    /// Add a request. Names are matched lowercase.
    pub fn register(&mut self, name: &'static str, parser: RequestParser) {
        self.parsers.insert(name, parser);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.parsers.contains_key(name.to_lowercase().as_str())
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.parsers.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Decode a request from a JSON value
    pub fn parse(&self, value: Value) -> Result<Request> {
        let Value::Object(mut fields) = value else {
            return Err(Error::InvalidMessage(value.to_string()));
        };

        let name = match fields.remove(REQUEST_FIELD) {
            None => return Ok(Request::Status(StatusRequest::default())),
            Some(Value::String(name)) => name,
            Some(other) => {
                return Err(Error::InvalidMessage(format!(
                    "request name must be a string, got {}",
                    other
                )))
            }
        };

        let parser = self
            .parsers
            .get(name.to_lowercase().as_str())
            .ok_or(Error::UnknownRequest(name))?;
        parser(fields)
    }

    /// Decode a request from JSON text
    pub fn parse_str(&self, text: &str) -> Result<Request> {
        let value: Value = serde_json::from_str(text)?;
        self.parse(value)
    }
}

fn parse_status(mut fields: Map<String, Value>) -> Result<Request> {
    let section = |value: &Value| {
        value
            .as_str()
            .and_then(Section::parse)
            .ok_or_else(|| Error::InvalidField {
                field: "include".to_string(),
                value: value.clone(),
            })
    };

    let sections = match fields.remove("include") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(names)) => names.iter().map(section).collect::<Result<Vec<_>>>()?,
        Some(other) => vec![section(&other)?],
    };

    Ok(Request::Status(StatusRequest::including(&sections)))
}

fn parse_configure(mut fields: Map<String, Value>) -> Result<Request> {
    Ok(Request::Configure(ConfigureRequest {
        default: fields.remove("default"),
        mode: fields.remove("mode"),
        body: fields,
    }))
}

fn parse_out(fields: Map<String, Value>) -> Result<Request> {
    Ok(Request::Out(OutRequest { pins: fields }))
}

fn parse_off(_fields: Map<String, Value>) -> Result<Request> {
    Ok(Request::Off)
}
