//! Pin configuration
//!
//! A configuration records which output groups and inputs are claimed and
//! how. Output groups are keyed `M1/O1,O2` .. `M4/O7,O8`: one group is either
//! a single motor or two single outputs, never both. Per-pin labels such as
//! `M1` or `O2` are derived from the group value and never stored.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::driver::{
    DriverEncoding, OutputMode, SensorType, SignalKind, INPUT_COUNT, OUTPUT_GROUP_COUNT,
};
use crate::error::{ConfigError, InvalidPin};

/// Output group keys in hardware order
pub const OUTPUT_GROUP_KEYS: [&str; OUTPUT_GROUP_COUNT] =
    ["M1/O1,O2", "M2/O3,O4", "M3/O5,O6", "M4/O7,O8"];

/// Input keys in hardware order
pub const INPUT_KEYS: [&str; INPUT_COUNT] = ["I1", "I2", "I3", "I4", "I5", "I6", "I7", "I8"];

/// Label reported for a claimed motor or output pin
pub const ACTIVE: &str = "active";

/// How an output group is used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupMode {
    #[default]
    Unused,
    Motor,
    Output,
}

impl GroupMode {
    pub const ALL: [GroupMode; 3] = [GroupMode::Unused, GroupMode::Motor, GroupMode::Output];

    pub fn as_str(self) -> &'static str {
        match self {
            GroupMode::Unused => "unused",
            GroupMode::Motor => "motor",
            GroupMode::Output => "output",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unused" => Some(GroupMode::Unused),
            "motor" => Some(GroupMode::Motor),
            "output" => Some(GroupMode::Output),
            _ => None,
        }
    }

    pub fn is_unused(self) -> bool {
        self == GroupMode::Unused
    }

    fn output_mode(self) -> OutputMode {
        match self {
            GroupMode::Motor => OutputMode::Motor,
            GroupMode::Unused | GroupMode::Output => OutputMode::Output,
        }
    }
}

/// How a universal input is used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputMode {
    #[default]
    Unused,
    Digital,
    #[serde(rename = "resistance-5k", alias = "resistance", alias = "resistance5k")]
    Resistance5k,
    #[serde(rename = "resistance-15k", alias = "resistance15k")]
    Resistance15k,
    Voltage,
    Distance,
}

impl InputMode {
    pub const ALL: [InputMode; 6] = [
        InputMode::Unused,
        InputMode::Digital,
        InputMode::Resistance5k,
        InputMode::Resistance15k,
        InputMode::Voltage,
        InputMode::Distance,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            InputMode::Unused => "unused",
            InputMode::Digital => "digital",
            InputMode::Resistance5k => "resistance-5k",
            InputMode::Resistance15k => "resistance-15k",
            InputMode::Voltage => "voltage",
            InputMode::Distance => "distance",
        }
    }

    /// Parse a wire value. `resistance` is accepted as the 5k range, and the
    /// unhyphenated spellings are accepted too.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unused" => Some(InputMode::Unused),
            "digital" => Some(InputMode::Digital),
            "resistance-5k" | "resistance" | "resistance5k" => Some(InputMode::Resistance5k),
            "resistance-15k" | "resistance15k" => Some(InputMode::Resistance15k),
            "voltage" => Some(InputMode::Voltage),
            "distance" => Some(InputMode::Distance),
            _ => None,
        }
    }

    pub fn is_unused(self) -> bool {
        self == InputMode::Unused
    }

    /// Sensor type and signal kind pushed to the driver. Unused inputs are
    /// sampled as digital.
    pub fn encoding(self) -> (SensorType, SignalKind) {
        match self {
            InputMode::Unused | InputMode::Digital => (SensorType::Switch, SignalKind::Digital),
            InputMode::Resistance5k => (SensorType::Resistor, SignalKind::Analog),
            InputMode::Resistance15k => (SensorType::Resistor15k, SignalKind::Analog),
            InputMode::Voltage => (SensorType::Voltage, SignalKind::Analog),
            InputMode::Distance => (SensorType::Ultrasonic, SignalKind::Analog),
        }
    }
}

/// A configuration key: one output group or one input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PinKey {
    Group(usize),
    Input(usize),
}

impl PinKey {
    pub fn parse(key: &str) -> Option<Self> {
        if let Some(idx) = OUTPUT_GROUP_KEYS.iter().position(|k| *k == key) {
            return Some(PinKey::Group(idx));
        }
        INPUT_KEYS
            .iter()
            .position(|k| *k == key)
            .map(PinKey::Input)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PinKey::Group(idx) => OUTPUT_GROUP_KEYS[idx],
            PinKey::Input(idx) => INPUT_KEYS[idx],
        }
    }

    /// All keys: output groups first, then inputs
    pub fn all() -> impl Iterator<Item = PinKey> {
        (0..OUTPUT_GROUP_COUNT)
            .map(PinKey::Group)
            .chain((0..INPUT_COUNT).map(PinKey::Input))
    }
}

impl fmt::Display for PinKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single actuated pin addressed by an `out` request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Actuator {
    /// Motor by zero-based index (`M1` is 0)
    Motor(usize),
    /// Single output by zero-based index (`O1` is 0)
    Output(usize),
}

impl Actuator {
    pub fn parse(key: &str) -> Option<Self> {
        if let Some(n) = key.strip_prefix('M').and_then(pin_number) {
            (1..=OUTPUT_GROUP_COUNT)
                .contains(&n)
                .then(|| Actuator::Motor(n - 1))
        } else if let Some(n) = key.strip_prefix('O').and_then(pin_number) {
            (1..=OUTPUT_GROUP_COUNT * 2)
                .contains(&n)
                .then(|| Actuator::Output(n - 1))
        } else {
            None
        }
    }

    /// Driver index of the motor or output
    pub fn index(self) -> usize {
        match self {
            Actuator::Motor(idx) | Actuator::Output(idx) => idx,
        }
    }

    /// Output group the pin belongs to
    pub fn group(self) -> usize {
        match self {
            Actuator::Motor(idx) => idx,
            Actuator::Output(idx) => idx / 2,
        }
    }

    fn required_mode(self) -> GroupMode {
        match self {
            Actuator::Motor(_) => GroupMode::Motor,
            Actuator::Output(_) => GroupMode::Output,
        }
    }
}

fn pin_number(digits: &str) -> Option<usize> {
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

impl fmt::Display for Actuator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actuator::Motor(idx) => write!(f, "M{}", idx + 1),
            Actuator::Output(idx) => write!(f, "O{}", idx + 1),
        }
    }
}

/// Claimed output groups and inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PinConfiguration {
    groups: [GroupMode; OUTPUT_GROUP_COUNT],
    inputs: [InputMode; INPUT_COUNT],
}

impl PinConfiguration {
    /// A configuration with every key unused
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration from a partial mapping.
    ///
    /// Keys present in `partial` take the supplied value. Absent keys come
    /// from `baseline` when given, else they are unused. Keys that are not
    /// configuration keys are ignored. Fails with every invalid
    /// `(key, value)` pair when any supplied value is not recognized for its
    /// key's kind.
    pub fn construct(
        partial: &Map<String, Value>,
        baseline: Option<&PinConfiguration>,
    ) -> Result<Self, ConfigError> {
        let (config, invalid) = Self::construct_lenient(partial, baseline);
        if invalid.is_empty() {
            Ok(config)
        } else {
            Err(ConfigError { invalid })
        }
    }

    /// Like [`construct`](Self::construct), but skips invalid values instead
    /// of failing: returns the configuration built from the valid keys along
    /// with every rejected pair.
    pub fn construct_lenient(
        partial: &Map<String, Value>,
        baseline: Option<&PinConfiguration>,
    ) -> (Self, Vec<InvalidPin>) {
        let mut config = baseline.copied().unwrap_or_default();
        let mut invalid = Vec::new();

        for key in PinKey::all() {
            let Some(value) = partial.get(key.as_str()) else {
                continue;
            };
            let text = value.as_str();
            match key {
                PinKey::Group(idx) => match text.and_then(GroupMode::parse) {
                    Some(mode) => config.groups[idx] = mode,
                    None => invalid.push(InvalidPin {
                        key: key.as_str().to_string(),
                        value: value.clone(),
                    }),
                },
                PinKey::Input(idx) => match text.and_then(InputMode::parse) {
                    Some(mode) => config.inputs[idx] = mode,
                    None => invalid.push(InvalidPin {
                        key: key.as_str().to_string(),
                        value: value.clone(),
                    }),
                },
            }
        }

        (config, invalid)
    }

    /// Return a copy with one output group set
    pub fn with_group(mut self, idx: usize, mode: GroupMode) -> Self {
        self.groups[idx] = mode;
        self
    }

    /// Return a copy with one input set
    pub fn with_input(mut self, idx: usize, mode: InputMode) -> Self {
        self.inputs[idx] = mode;
        self
    }

    pub fn group(&self, idx: usize) -> GroupMode {
        self.groups[idx]
    }

    pub fn input(&self, idx: usize) -> InputMode {
        self.inputs[idx]
    }

    /// Wire value of a key
    pub fn value_of(&self, key: PinKey) -> &'static str {
        match key {
            PinKey::Group(idx) => self.groups[idx].as_str(),
            PinKey::Input(idx) => self.inputs[idx].as_str(),
        }
    }

    fn is_unused(&self, key: PinKey) -> bool {
        match key {
            PinKey::Group(idx) => self.groups[idx].is_unused(),
            PinKey::Input(idx) => self.inputs[idx].is_unused(),
        }
    }

    /// Whether nothing is claimed
    pub fn is_empty(&self) -> bool {
        PinKey::all().all(|key| self.is_unused(key))
    }

    /// Adopt every claimed value of `other`; keys `other` leaves unused keep
    /// their current value.
    pub fn merge(&mut self, other: &PinConfiguration) {
        for (mine, theirs) in self.groups.iter_mut().zip(other.groups) {
            if !theirs.is_unused() {
                *mine = theirs;
            }
        }
        for (mine, theirs) in self.inputs.iter_mut().zip(other.inputs) {
            if !theirs.is_unused() {
                *mine = theirs;
            }
        }
    }

    /// Keys both sides claim with different values. An unused key never
    /// conflicts.
    pub fn conflicts(&self, other: &PinConfiguration) -> Vec<PinKey> {
        PinKey::all()
            .filter(|key| {
                !self.is_unused(*key)
                    && !other.is_unused(*key)
                    && self.value_of(*key) != other.value_of(*key)
            })
            .collect()
    }

    /// Whether the pin's group is claimed in the mode the pin needs
    pub fn claims(&self, actuator: Actuator) -> bool {
        self.groups[actuator.group()] == actuator.required_mode()
    }

    /// External status view: claimed inputs verbatim, claimed groups
    /// expanded to their pin labels marked active.
    pub fn report(&self) -> BTreeMap<String, String> {
        let mut report = BTreeMap::new();

        for (idx, mode) in self.inputs.iter().enumerate() {
            if !mode.is_unused() {
                report.insert(INPUT_KEYS[idx].to_string(), mode.as_str().to_string());
            }
        }

        for (idx, mode) in self.groups.iter().enumerate() {
            let labels = match mode {
                GroupMode::Unused => vec![],
                GroupMode::Motor => vec![Actuator::Motor(idx)],
                GroupMode::Output => vec![Actuator::Output(idx * 2), Actuator::Output(idx * 2 + 1)],
            };
            for label in labels {
                report.insert(label.to_string(), ACTIVE.to_string());
            }
        }

        report
    }

    /// Output modes and input encodings in driver order
    pub fn driver_encoding(&self) -> DriverEncoding {
        DriverEncoding {
            outputs: self.groups.map(GroupMode::output_mode),
            inputs: self.inputs.map(InputMode::encoding),
        }
    }
}
