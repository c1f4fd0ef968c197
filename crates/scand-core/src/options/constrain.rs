//! Value constraining
//!
//! Policy per constraint family:
//! - ranges clamp to the bounds and snap to the nearest quantization step
//! - numeric lists snap to the nearest listed value
//! - string lists accept exact, case-insensitive or unique-prefix matches and
//!   reject anything else
//!
//! Snapped values are reported as inexact; rejected values leave no trace.

use crate::error::{ScanError, ScanResult};
use crate::models::{Constraint, OptionDescriptor, OptionValue, ValueType};

/// A value after constraining
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constrained {
    pub value: OptionValue,
    /// The value had to be adjusted to satisfy the constraint
    pub inexact: bool,
}

/// Constrain `value` against the descriptor's type and constraint
pub fn constrain_value(desc: &OptionDescriptor, value: OptionValue) -> ScanResult<Constrained> {
    if desc.value_type != value.value_type() {
        return Err(ScanError::invalid(format!(
            "option '{}' expects {}, got {}",
            desc.name,
            desc.value_type,
            value.value_type()
        )));
    }

    match (value, &desc.constraint) {
        (OptionValue::Int(v), Constraint::Range { min, max, quant }) => {
            let snapped = snap_to_range(v, *min, *max, *quant);
            Ok(Constrained {
                value: OptionValue::Int(snapped),
                inexact: snapped != v,
            })
        }
        (OptionValue::Int(v), Constraint::WordList(words)) => {
            let nearest = snap_to_list(v, words).ok_or_else(|| {
                ScanError::invalid(format!("option '{}' has an empty value list", desc.name))
            })?;
            Ok(Constrained {
                value: OptionValue::Int(nearest),
                inexact: nearest != v,
            })
        }
        (OptionValue::String(s), Constraint::StringList(list)) => {
            let canonical = match_string(&s, list).ok_or_else(|| {
                ScanError::invalid(format!("'{}' is not a valid value for '{}'", s, desc.name))
            })?;
            Ok(Constrained {
                value: OptionValue::String(canonical.to_string()),
                inexact: false,
            })
        }
        (OptionValue::String(s), Constraint::None) => {
            if desc.size > 0 && s.len() + 1 > desc.size {
                return Err(ScanError::invalid(format!(
                    "value for '{}' longer than {} bytes",
                    desc.name,
                    desc.size - 1
                )));
            }
            Ok(Constrained {
                value: OptionValue::String(s),
                inexact: false,
            })
        }
        (v @ (OptionValue::Int(_) | OptionValue::Bool(_)), Constraint::None) => Ok(Constrained {
            value: v,
            inexact: false,
        }),
        (_, constraint) => Err(ScanError::invalid(format!(
            "constraint {:?} does not apply to {} option '{}'",
            constraint, desc.value_type, desc.name
        ))),
    }
}

/// Whether a constraint can be attached to an option of this type
pub fn constraint_fits(value_type: ValueType, constraint: &Constraint) -> bool {
    match constraint {
        Constraint::None => true,
        Constraint::Range { min, max, quant } => {
            value_type == ValueType::Int && min <= max && *quant >= 0
        }
        Constraint::WordList(words) => value_type == ValueType::Int && !words.is_empty(),
        Constraint::StringList(list) => value_type == ValueType::String && !list.is_empty(),
    }
}

fn snap_to_range(v: i32, min: i32, max: i32, quant: i32) -> i32 {
    let clamped = v.clamp(min, max) as i64;
    if quant <= 0 {
        return clamped as i32;
    }
    let (min, max, quant) = (min as i64, max as i64, quant as i64);
    let mut snapped = (clamped - min + quant / 2) / quant * quant + min;
    if snapped > max {
        snapped -= quant;
    }
    snapped.max(min) as i32
}

fn snap_to_list(v: i32, words: &[i32]) -> Option<i32> {
    let mut best: Option<i32> = None;
    for &w in words {
        let closer = match best {
            None => true,
            Some(b) => (w as i64 - v as i64).abs() < (b as i64 - v as i64).abs(),
        };
        if closer {
            best = Some(w);
        }
    }
    best
}

fn match_string<'a>(s: &str, list: &'a [String]) -> Option<&'a str> {
    if let Some(exact) = list.iter().find(|c| c.as_str() == s) {
        return Some(exact);
    }
    if let Some(folded) = list.iter().find(|c| c.eq_ignore_ascii_case(s)) {
        return Some(folded);
    }
    let lower = s.to_ascii_lowercase();
    let mut prefixed = list
        .iter()
        .filter(|c| c.to_ascii_lowercase().starts_with(&lower));
    match (prefixed.next(), prefixed.next()) {
        (Some(only), None) => Some(only),
        _ => None,
    }
}
