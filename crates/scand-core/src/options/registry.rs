//! Option arena with constraint checking and interdependency rules

use std::collections::HashMap;

use tracing::debug;

use super::constrain::{constrain_value, constraint_fits};
use crate::error::{ScanError, ScanResult};
use crate::models::{Capabilities, ChangeFlags, OptionDescriptor, OptionId, OptionValue};

/// Change to the capabilities of one option
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityDelta {
    pub insert: Capabilities,
    pub remove: Capabilities,
}

impl CapabilityDelta {
    pub fn activate() -> Self {
        Self {
            insert: Capabilities::empty(),
            remove: Capabilities::INACTIVE,
        }
    }

    pub fn deactivate() -> Self {
        Self {
            insert: Capabilities::INACTIVE,
            remove: Capabilities::empty(),
        }
    }
}

/// What a dependency rule wants changed after a value was set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleEffects {
    pub capabilities: Vec<(OptionId, CapabilityDelta)>,
    pub corrections: Vec<(OptionId, OptionValue)>,
    pub flags: ChangeFlags,
}

impl RuleEffects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flags(mut self, flags: ChangeFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn set_active(&mut self, id: OptionId, active: bool) {
        let delta = if active {
            CapabilityDelta::activate()
        } else {
            CapabilityDelta::deactivate()
        };
        self.capabilities.push((id, delta));
    }

    pub fn correct(&mut self, id: OptionId, value: impl Into<OptionValue>) {
        self.corrections.push((id, value.into()));
    }

    fn is_empty(&self) -> bool {
        self.capabilities.is_empty() && self.corrections.is_empty() && self.flags.is_empty()
    }
}

/// Owner-supplied interdependency logic
///
/// Called after every successful value change with a read-only view of the
/// registry. Must be a pure function of the current values.
pub trait DependencyRule: Send + Sync {
    fn apply(&self, registry: &OptionRegistry, changed: OptionId) -> RuleEffects;
}

struct OptionEntry {
    descriptor: OptionDescriptor,
    value: Option<OptionValue>,
    default: Option<OptionValue>,
}

/// Arena of option descriptors and their current values
pub struct OptionRegistry {
    entries: Vec<OptionEntry>,
    by_name: HashMap<String, OptionId>,
    rule: Option<Box<dyn DependencyRule>>,
}

impl std::fmt::Debug for OptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptionRegistry")
            .field("options", &self.entries.len())
            .field("has_rule", &self.rule.is_some())
            .finish()
    }
}

// Upper bound on rule passes per set; rules that keep correcting each other
// are cut off here.
const MAX_RULE_PASSES: usize = 8;

impl OptionRegistry {
    pub fn builder() -> OptionRegistryBuilder {
        OptionRegistryBuilder::new()
    }

    /// Number of options including option 0
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn describe(&self, id: OptionId) -> Option<&OptionDescriptor> {
        self.entries.get(id.index()).map(|e| &e.descriptor)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = (OptionId, &OptionDescriptor)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| (OptionId::new(i), &e.descriptor))
    }

    pub fn id_of(&self, name: &str) -> Option<OptionId> {
        self.by_name.get(name).copied()
    }

    /// Current value, ignoring the INACTIVE bit
    ///
    /// For the owner's own bookkeeping; frontends go through [`get`](Self::get).
    pub fn peek(&self, id: OptionId) -> Option<&OptionValue> {
        self.entries.get(id.index()).and_then(|e| e.value.as_ref())
    }

    pub fn peek_int(&self, id: OptionId) -> Option<i32> {
        self.peek(id).and_then(OptionValue::as_int)
    }

    pub fn peek_str(&self, id: OptionId) -> Option<&str> {
        self.peek(id).and_then(OptionValue::as_str)
    }

    pub fn get(&self, id: OptionId) -> ScanResult<OptionValue> {
        let entry = self.entry(id)?;
        if !entry.descriptor.capabilities.is_active() {
            return Err(ScanError::invalid(format!(
                "option '{}' is inactive",
                entry.descriptor.name
            )));
        }
        entry
            .value
            .clone()
            .ok_or_else(|| ScanError::invalid(format!("option {} has no value", id)))
    }

    pub fn set(&mut self, id: OptionId, value: OptionValue) -> ScanResult<ChangeFlags> {
        let entry = self.settable_entry(id)?;
        let constrained = constrain_value(&entry.descriptor, value)?;

        let mut flags = ChangeFlags::empty();
        if constrained.inexact {
            flags |= ChangeFlags::INEXACT;
        }
        Ok(flags | self.store(id, constrained.value))
    }

    /// Let the backend choose: restores the option's default
    pub fn set_auto(&mut self, id: OptionId) -> ScanResult<ChangeFlags> {
        let entry = self.settable_entry(id)?;
        if !entry.descriptor.capabilities.contains(Capabilities::AUTOMATIC) {
            return Err(ScanError::invalid(format!(
                "option '{}' cannot be set automatically",
                entry.descriptor.name
            )));
        }
        let default = entry
            .default
            .clone()
            .ok_or_else(|| ScanError::invalid(format!("option {} has no default", id)))?;
        Ok(self.store(id, default))
    }

    fn entry(&self, id: OptionId) -> ScanResult<&OptionEntry> {
        let entry = self
            .entries
            .get(id.index())
            .ok_or_else(|| ScanError::invalid(format!("option index {} out of range", id.index())))?;
        if entry.descriptor.is_group() {
            return Err(ScanError::invalid(format!(
                "option {} is a group and has no value",
                id
            )));
        }
        Ok(entry)
    }

    fn settable_entry(&self, id: OptionId) -> ScanResult<&OptionEntry> {
        let entry = self.entry(id)?;
        let caps = entry.descriptor.capabilities;
        if !caps.is_active() {
            return Err(ScanError::invalid(format!(
                "option '{}' is inactive",
                entry.descriptor.name
            )));
        }
        if !caps.is_settable() {
            return Err(ScanError::invalid(format!(
                "option '{}' is read-only",
                entry.descriptor.name
            )));
        }
        Ok(entry)
    }

    /// Store an already constrained value and run the dependency rule
    fn store(&mut self, id: OptionId, value: OptionValue) -> ChangeFlags {
        let entry = &mut self.entries[id.index()];
        if entry.value.as_ref() == Some(&value) {
            return ChangeFlags::empty();
        }
        debug!(option = %entry.descriptor.name, %value, "Option changed");
        entry.value = Some(value);
        self.run_rule(id)
    }

    fn run_rule(&mut self, changed: OptionId) -> ChangeFlags {
        let mut flags = ChangeFlags::empty();
        let mut pending = vec![changed];

        for _ in 0..MAX_RULE_PASSES {
            let Some(id) = pending.pop() else {
                break;
            };
            let effects = match &self.rule {
                Some(rule) => rule.apply(self, id),
                None => return flags,
            };
            if effects.is_empty() {
                continue;
            }
            flags |= effects.flags;

            for (target, delta) in effects.capabilities {
                let Some(entry) = self.entries.get_mut(target.index()) else {
                    continue;
                };
                let before = entry.descriptor.capabilities;
                let after = (before | delta.insert) - delta.remove;
                if before != after {
                    entry.descriptor.capabilities = after;
                    flags |= ChangeFlags::RELOAD_OPTIONS;
                }
            }

            for (target, value) in effects.corrections {
                let Some(entry) = self.entries.get_mut(target.index()) else {
                    continue;
                };
                let Ok(constrained) = constrain_value(&entry.descriptor, value) else {
                    continue;
                };
                if entry.value.as_ref() != Some(&constrained.value) {
                    debug!(
                        option = %entry.descriptor.name,
                        value = %constrained.value,
                        "Option corrected by dependency rule"
                    );
                    entry.value = Some(constrained.value);
                    flags |= ChangeFlags::RELOAD_OPTIONS;
                    pending.push(target);
                }
            }
        }
        flags
    }
}

/// Validating builder for [`OptionRegistry`]
pub struct OptionRegistryBuilder {
    entries: Vec<(OptionDescriptor, Option<OptionValue>)>,
    rule: Option<Box<dyn DependencyRule>>,
}

impl Default for OptionRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OptionRegistryBuilder {
    /// Starts with option 0, the option count
    pub fn new() -> Self {
        Self {
            entries: vec![(OptionDescriptor::option_count(), None)],
            rule: None,
        }
    }

    pub fn group(&mut self, title: &str) -> OptionId {
        self.entries.push((OptionDescriptor::group(title), None));
        OptionId::new(self.entries.len() - 1)
    }

    pub fn option(&mut self, descriptor: OptionDescriptor, default: impl Into<OptionValue>) -> OptionId {
        self.entries.push((descriptor, Some(default.into())));
        OptionId::new(self.entries.len() - 1)
    }

    pub fn rule(&mut self, rule: impl DependencyRule + 'static) -> &mut Self {
        self.rule = Some(Box::new(rule));
        self
    }

    pub fn build(self) -> ScanResult<OptionRegistry> {
        let count = i32::try_from(self.entries.len())
            .map_err(|_| ScanError::NoMem("too many options".into()))?;
        let mut entries = Vec::with_capacity(self.entries.len());
        let mut by_name = HashMap::new();

        for (index, (descriptor, default)) in self.entries.into_iter().enumerate() {
            let id = OptionId::new(index);
            if index == 0 {
                entries.push(OptionEntry {
                    descriptor,
                    value: Some(OptionValue::Int(count)),
                    default: None,
                });
                continue;
            }
            if descriptor.is_group() {
                entries.push(OptionEntry {
                    descriptor,
                    value: None,
                    default: None,
                });
                continue;
            }

            if descriptor.name.is_empty() {
                return Err(ScanError::invalid(format!("option {} has no name", id)));
            }
            if by_name.insert(descriptor.name.clone(), id).is_some() {
                return Err(ScanError::invalid(format!(
                    "duplicate option name '{}'",
                    descriptor.name
                )));
            }
            if !constraint_fits(descriptor.value_type, &descriptor.constraint) {
                return Err(ScanError::invalid(format!(
                    "constraint of '{}' does not fit a {} option",
                    descriptor.name, descriptor.value_type
                )));
            }
            let default = default.ok_or_else(|| {
                ScanError::invalid(format!("option '{}' has no default", descriptor.name))
            })?;
            let constrained = constrain_value(&descriptor, default.clone())?;
            if constrained.inexact || constrained.value != default {
                return Err(ScanError::invalid(format!(
                    "default of '{}' violates its constraint",
                    descriptor.name
                )));
            }

            entries.push(OptionEntry {
                descriptor,
                value: Some(default.clone()),
                default: Some(default),
            });
        }

        Ok(OptionRegistry {
            entries,
            by_name,
            rule: self.rule,
        })
    }
}
