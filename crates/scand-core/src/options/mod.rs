//! Option registry and value constraining

mod constrain;
mod registry;

pub use constrain::{constrain_value, constraint_fits, Constrained};
pub use registry::{
    CapabilityDelta, DependencyRule, OptionRegistry, OptionRegistryBuilder, RuleEffects,
};
