//! Option descriptors, values and change flags

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Type of value an option holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Bool,
    Int,
    String,
    /// Groups only structure the option list and hold no value
    Group,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::String => "string",
            ValueType::Group => "group",
        };
        f.write_str(s)
    }
}

/// Physical unit of an option value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    #[default]
    None,
    Pixel,
    Bit,
    Mm,
    Dpi,
    Percent,
    Microsecond,
}

impl Unit {
    /// Short suffix used when printing values
    pub fn suffix(&self) -> &'static str {
        match self {
            Unit::None => "",
            Unit::Pixel => "px",
            Unit::Bit => "bit",
            Unit::Mm => "mm",
            Unit::Dpi => "dpi",
            Unit::Percent => "%",
            Unit::Microsecond => "us",
        }
    }
}

bitflags! {
    /// Capability bits of an option
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct Capabilities: u32 {
        /// Settable by software
        const SOFT_SELECT = 1 << 0;
        /// Selected by a hardware switch
        const HARD_SELECT = 1 << 1;
        /// Readable by software
        const SOFT_DETECT = 1 << 2;
        /// Emulated by the backend rather than the device
        const EMULATED = 1 << 3;
        /// Backend can pick a value itself (`SetAuto`)
        const AUTOMATIC = 1 << 4;
        /// Currently not active
        const INACTIVE = 1 << 5;
        /// Hidden by default in simple frontends
        const ADVANCED = 1 << 6;
    }
}

impl Capabilities {
    pub fn is_active(&self) -> bool {
        !self.contains(Capabilities::INACTIVE)
    }

    pub fn is_settable(&self) -> bool {
        self.contains(Capabilities::SOFT_SELECT)
    }
}

bitflags! {
    /// Side effects reported by a successful option change
    ///
    /// These are advisory for the caller; nothing enforces that they are acted on.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ChangeFlags: u32 {
        /// The stored value differs from the requested one
        const INEXACT = 1 << 0;
        /// Capabilities or visibility of other options changed
        const RELOAD_OPTIONS = 1 << 1;
        /// Scan parameters must be recomputed
        const RELOAD_PARAMS = 1 << 2;
    }
}

/// Constraint on the values an option accepts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Constraint {
    None,
    /// Inclusive range; `quant == 0` means no quantization
    Range { min: i32, max: i32, quant: i32 },
    /// Enumerated numeric values
    WordList(Vec<i32>),
    /// Enumerated string values
    StringList(Vec<String>),
}

/// Immutable metadata for one option
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionDescriptor {
    pub name: String,
    pub title: String,
    pub description: String,
    pub value_type: ValueType,
    pub unit: Unit,
    pub capabilities: Capabilities,
    pub constraint: Constraint,
    /// Declared storage size in bytes
    pub size: usize,
}

const WORD_SIZE: usize = 4;

impl OptionDescriptor {
    fn new(name: &str, title: &str, description: &str, value_type: ValueType) -> Self {
        let size = match value_type {
            ValueType::Bool | ValueType::Int => WORD_SIZE,
            ValueType::String | ValueType::Group => 0,
        };
        Self {
            name: name.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            value_type,
            unit: Unit::None,
            capabilities: Capabilities::SOFT_SELECT | Capabilities::SOFT_DETECT,
            constraint: Constraint::None,
            size,
        }
    }

    /// Option 0: the number of options, read-only
    pub fn option_count() -> Self {
        Self::new(
            "",
            "Number of options",
            "Read-only option that specifies how many options a specific device supports.",
            ValueType::Int,
        )
        .with_capabilities(Capabilities::SOFT_DETECT)
    }

    /// A group header
    pub fn group(title: &str) -> Self {
        Self::new("", title, "", ValueType::Group).with_capabilities(Capabilities::empty())
    }

    pub fn int(name: &str, title: &str, description: &str) -> Self {
        Self::new(name, title, description, ValueType::Int)
    }

    pub fn bool(name: &str, title: &str, description: &str) -> Self {
        Self::new(name, title, description, ValueType::Bool)
    }

    pub fn string(name: &str, title: &str, description: &str) -> Self {
        Self::new(name, title, description, ValueType::String)
    }

    pub fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = unit;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_range(mut self, min: i32, max: i32, quant: i32) -> Self {
        self.constraint = Constraint::Range { min, max, quant };
        self
    }

    pub fn with_word_list(mut self, words: &[i32]) -> Self {
        self.constraint = Constraint::WordList(words.to_vec());
        self
    }

    /// String list constraint; also sizes the option for the longest entry
    pub fn with_string_list(mut self, values: &[&str]) -> Self {
        self.size = values.iter().map(|v| v.len() + 1).max().unwrap_or(1);
        self.constraint = Constraint::StringList(values.iter().map(|v| v.to_string()).collect());
        self
    }

    pub fn is_group(&self) -> bool {
        self.value_type == ValueType::Group
    }
}

/// Current value of an option
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i32),
    String(String),
}

impl OptionValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            OptionValue::Bool(_) => ValueType::Bool,
            OptionValue::Int(_) => ValueType::Int,
            OptionValue::String(_) => ValueType::String,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            OptionValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OptionValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::String(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Bool(v) => write!(f, "{}", if *v { "yes" } else { "no" }),
            OptionValue::Int(v) => write!(f, "{}", v),
            OptionValue::String(v) => f.write_str(v),
        }
    }
}

impl From<i32> for OptionValue {
    fn from(v: i32) -> Self {
        OptionValue::Int(v)
    }
}

impl From<bool> for OptionValue {
    fn from(v: bool) -> Self {
        OptionValue::Bool(v)
    }
}

impl From<&str> for OptionValue {
    fn from(v: &str) -> Self {
        OptionValue::String(v.to_string())
    }
}

/// Strongly-typed index of an option within its registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OptionId(usize);

impl OptionId {
    /// The option-count option, always present
    pub const COUNT: OptionId = OptionId(0);

    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

impl From<usize> for OptionId {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

impl fmt::Display for OptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Action requested through `control_option`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionAction {
    Get,
    Set(OptionValue),
    /// Let the backend choose the value
    SetAuto,
}

/// Result of a `control_option` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlOutcome {
    /// Value after the action (the stored value for sets)
    pub value: Option<OptionValue>,
    pub flags: ChangeFlags,
}
