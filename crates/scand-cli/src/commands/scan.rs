//! Scan command - acquire one page into a PNM file

use anyhow::{anyhow, bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use scand_core::{
    ChangeFlags, FrameFormat, OptionValue, ScanBackend, ScanDevice, ScanError, ScanParameters,
    ValueType,
};
use std::path::Path;

use crate::output::OutputContext;

/// Bytes requested per read
const READ_CHUNK: usize = 32 * 1024;

/// Scan one page from a device into `file`
pub async fn scan(
    backend: &dyn ScanBackend,
    device: &str,
    settings: &[String],
    file: &Path,
    ctx: &OutputContext,
) -> Result<()> {
    let mut session = backend
        .open(device)
        .await
        .with_context(|| format!("Failed to open device '{}'", device))?;

    let result = run(session.as_mut(), settings, ctx).await;
    let closed = session.close().await;

    let (params, image) = result?;
    closed.context("Failed to close device")?;

    let header = pnm_header(&params, image.len())?;
    let mut contents = header.into_bytes();
    contents.extend_from_slice(&image);
    std::fs::write(file, &contents)
        .with_context(|| format!("Failed to write image file: {}", file.display()))?;

    if !ctx.quiet {
        ctx.print_kv(&[
            ("file", file.display().to_string()),
            ("format", format!("{:?}", params.format).to_lowercase()),
            ("depth", params.depth.to_string()),
            ("pixels_per_line", params.pixels_per_line.to_string()),
            ("lines", (image.len() / params.bytes_per_line.max(1)).to_string()),
            ("bytes", image.len().to_string()),
        ]);
    }
    Ok(())
}

async fn run(
    session: &mut dyn ScanDevice,
    settings: &[String],
    ctx: &OutputContext,
) -> Result<(ScanParameters, Vec<u8>)> {
    for setting in settings {
        apply_setting(session, setting, ctx).await?;
    }

    // Ctrl-C cancels the scan from the signal thread
    let cancel = session.cancel_handle();
    ctrlc::set_handler(move || cancel.cancel()).context("Failed to install Ctrl-C handler")?;

    session.start().await.context("Failed to start scan")?;
    let params = session.get_parameters()?;
    ctx.info(&format!(
        "Scanning {} pixels x {} lines, {:?} at {} bits",
        params.pixels_per_line,
        params.lines.map_or_else(|| "?".to_string(), |l| l.to_string()),
        params.format,
        params.depth
    ));

    let pb = match params.frame_bytes() {
        Some(total) => ProgressBar::new(total as u64),
        None => ProgressBar::new_spinner(),
    };
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
            .map_err(|e| anyhow!("Invalid progress template: {}", e))?
            .progress_chars("=>-"),
    );
    if ctx.quiet {
        pb.set_draw_target(indicatif::ProgressDrawTarget::hidden());
    }
    pb.set_message("Scanning...");

    let mut image = Vec::new();
    loop {
        match session.read(READ_CHUNK).await {
            Ok(chunk) => {
                image.extend_from_slice(&chunk);
                pb.set_position(image.len() as u64);
            }
            Err(ScanError::Eof) => break,
            Err(ScanError::Cancelled) => {
                pb.abandon_with_message("Cancelled");
                bail!("Scan cancelled");
            }
            Err(e) => {
                pb.abandon_with_message("Failed");
                return Err(e).context("Scan failed");
            }
        }
    }
    pb.finish_with_message("Done");
    Ok((params, image))
}

/// Apply one `name=value` assignment, typed by the option's descriptor
async fn apply_setting(session: &mut dyn ScanDevice, setting: &str, ctx: &OutputContext) -> Result<()> {
    let (name, raw) = setting
        .split_once('=')
        .ok_or_else(|| anyhow!("Expected NAME=VALUE, got '{}'", setting))?;
    let id = session
        .find_option(name)
        .ok_or_else(|| anyhow!("Unknown option '{}'", name))?;
    let value_type = session
        .describe_option(id)
        .map(|d| d.value_type)
        .ok_or_else(|| anyhow!("Unknown option '{}'", name))?;

    let value = parse_value(value_type, raw)
        .with_context(|| format!("Invalid value '{}' for option '{}'", raw, name))?;
    let outcome = session
        .set_option(id, value.clone())
        .await
        .with_context(|| format!("Failed to set option '{}'", name))?;

    if outcome.flags.contains(ChangeFlags::INEXACT) {
        if let Some(actual) = outcome.value {
            ctx.warn(&format!("{}: {} adjusted to {}", name, value, actual));
        }
    }
    Ok(())
}

fn parse_value(value_type: ValueType, raw: &str) -> Result<OptionValue> {
    match value_type {
        ValueType::Int => Ok(OptionValue::Int(raw.parse()?)),
        ValueType::Bool => match raw.to_ascii_lowercase().as_str() {
            "1" | "yes" | "true" | "on" => Ok(OptionValue::Bool(true)),
            "0" | "no" | "false" | "off" => Ok(OptionValue::Bool(false)),
            _ => bail!("expected yes or no"),
        },
        ValueType::String => Ok(OptionValue::String(raw.to_string())),
        ValueType::Group => bail!("groups hold no value"),
    }
}

/// Binary PNM header for a finished frame
///
/// Lineart maps to PBM, where a set bit is black like the scanner output.
fn pnm_header(params: &ScanParameters, image_len: usize) -> Result<String> {
    let lines = image_len / params.bytes_per_line.max(1);
    let magic = match (params.format, params.depth) {
        (FrameFormat::Gray, 1) => return Ok(format!("P4\n{} {}\n", params.pixels_per_line, lines)),
        (FrameFormat::Gray, 8) => "P5",
        (FrameFormat::Rgb, 8) => "P6",
        (format, depth) => bail!("No PNM type for {:?} at {} bits", format, depth),
    };
    Ok(format!("{}\n{} {}\n255\n", magic, params.pixels_per_line, lines))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn params(format: FrameFormat, depth: u8) -> ScanParameters {
        let pixels_per_line = 10;
        ScanParameters {
            format,
            last_frame: true,
            bytes_per_line: ScanParameters::line_bytes(format, depth, pixels_per_line),
            pixels_per_line,
            lines: None,
            depth,
        }
    }

    #[test]
    fn test_pnm_headers() {
        assert_eq!(pnm_header(&params(FrameFormat::Gray, 1), 6).unwrap(), "P4\n10 3\n");
        assert_eq!(pnm_header(&params(FrameFormat::Gray, 8), 40).unwrap(), "P5\n10 4\n255\n");
        assert_eq!(pnm_header(&params(FrameFormat::Rgb, 8), 60).unwrap(), "P6\n10 2\n255\n");
        assert!(pnm_header(&params(FrameFormat::Rgb, 1), 0).is_err());
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value(ValueType::Int, "42").unwrap(), OptionValue::Int(42));
        assert_eq!(parse_value(ValueType::Bool, "Yes").unwrap(), OptionValue::Bool(true));
        assert_eq!(
            parse_value(ValueType::String, "Color").unwrap(),
            OptionValue::String("Color".into())
        );
        assert!(parse_value(ValueType::Int, "many").is_err());
        assert!(parse_value(ValueType::Bool, "maybe").is_err());
    }
}
