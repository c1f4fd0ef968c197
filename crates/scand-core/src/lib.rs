//! scand-core - Core traits and types for scanner backends
//!
//! This crate holds everything a frontend and a backend agree on: the status
//! taxonomy, the option model with its constraint rules, scan parameters and
//! the [`ScanBackend`]/[`ScanDevice`] session traits.

pub mod backend;
pub mod cancel;
pub mod error;
pub mod models;
pub mod options;

pub use backend::{ScanBackend, ScanDevice};
pub use cancel::{CancelFlag, CancelHandle};
pub use error::{ScanError, ScanResult, ScanStatus};
pub use models::*;
pub use options::{
    constrain_value, CapabilityDelta, Constrained, DependencyRule, OptionRegistry,
    OptionRegistryBuilder, RuleEffects,
};
