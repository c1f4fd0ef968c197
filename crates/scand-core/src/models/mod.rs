//! Data model shared by backends and frontends

mod device;
mod option;
mod params;

pub use device::{DeviceInfo, Version};
pub use option::{
    Capabilities, ChangeFlags, Constraint, ControlOutcome, OptionAction, OptionDescriptor,
    OptionId, OptionValue, Unit, ValueType,
};
pub use params::{FrameFormat, ScanParameters};
