//! Options command - show the option list of a scanner

use anyhow::{Context, Result};
use scand_core::{
    Capabilities, Constraint, OptionDescriptor, OptionId, ScanBackend, ScanDevice,
};

use crate::output::{OptionRow, OutputContext};

/// Show every option of a device with its current value
pub async fn options(backend: &dyn ScanBackend, device: &str, ctx: &OutputContext) -> Result<()> {
    let mut session = backend
        .open(device)
        .await
        .with_context(|| format!("Failed to open device '{}'", device))?;

    let rows = collect_rows(session.as_mut()).await;
    let closed = session.close().await;

    ctx.print(&rows?);
    closed.context("Failed to close device")?;
    Ok(())
}

async fn collect_rows(session: &mut dyn ScanDevice) -> Result<Vec<OptionRow>> {
    let mut rows = Vec::new();
    let descriptors: Vec<(OptionId, OptionDescriptor)> = (1..)
        .map(OptionId::new)
        .map_while(|id| session.describe_option(id).map(|d| (id, d.clone())))
        .collect();

    for (id, desc) in descriptors {
        if desc.is_group() {
            continue;
        }
        let value = if desc.capabilities.contains(Capabilities::INACTIVE) {
            "-".to_string()
        } else {
            session
                .get_option(id)
                .await
                .with_context(|| format!("Failed to read option '{}'", desc.name))?
                .to_string()
        };
        rows.push(OptionRow {
            index: id.index(),
            name: desc.name.clone(),
            value_type: desc.value_type.to_string(),
            value: format!("{}{}", value, desc.unit.suffix()),
            constraint: describe_constraint(&desc.constraint),
            flags: describe_capabilities(desc.capabilities),
        });
    }
    Ok(rows)
}

pub fn describe_constraint(constraint: &Constraint) -> String {
    match constraint {
        Constraint::None => String::new(),
        Constraint::Range { min, max, quant } if *quant > 1 => {
            format!("{}..{} step {}", min, max, quant)
        }
        Constraint::Range { min, max, .. } => format!("{}..{}", min, max),
        Constraint::WordList(words) => words
            .iter()
            .map(|w| w.to_string())
            .collect::<Vec<_>>()
            .join("|"),
        Constraint::StringList(values) => values.join("|"),
    }
}

pub fn describe_capabilities(capabilities: Capabilities) -> String {
    capabilities
        .iter_names()
        .filter(|(_, flag)| !flag.intersects(Capabilities::SOFT_SELECT | Capabilities::SOFT_DETECT))
        .map(|(name, _)| name.to_lowercase())
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_describe_constraint() {
        assert_eq!(
            describe_constraint(&Constraint::Range {
                min: 0,
                max: 1208,
                quant: 4
            }),
            "0..1208 step 4"
        );
        assert_eq!(
            describe_constraint(&Constraint::Range {
                min: 0,
                max: 255,
                quant: 1
            }),
            "0..255"
        );
        assert_eq!(describe_constraint(&Constraint::WordList(vec![1, 2, 4])), "1|2|4");
    }

    #[test]
    fn test_describe_capabilities() {
        let caps = Capabilities::SOFT_SELECT
            | Capabilities::SOFT_DETECT
            | Capabilities::AUTOMATIC
            | Capabilities::INACTIVE;
        assert_eq!(describe_capabilities(caps), "automatic,inactive");
    }
}
