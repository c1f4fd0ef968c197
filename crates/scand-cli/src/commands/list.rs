//! List command - show attached scanners

use anyhow::{Context, Result};
use scand_core::ScanBackend;

use crate::output::{DeviceRow, OutputContext};

/// List all attached scanners
pub async fn list(backend: &dyn ScanBackend, ctx: &OutputContext) -> Result<()> {
    let devices = backend
        .list_devices()
        .await
        .context("Failed to list devices")?;

    let rows: Vec<DeviceRow> = devices
        .into_iter()
        .map(|d| DeviceRow {
            name: d.name,
            vendor: d.vendor,
            model: d.model,
            kind: d.kind,
        })
        .collect();

    ctx.print(&rows);
    Ok(())
}
