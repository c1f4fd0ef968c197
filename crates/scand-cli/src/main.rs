//! scand - Command-line frontend for scanner backends
//!
//! Lists attached scanners, shows their options and runs a scan to a PNM file.

mod commands;
mod config;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scand_core::ScanBackend;
use scand_usb::UsbScanBackend;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::output::{OutputContext, OutputFormat};

#[derive(Parser)]
#[command(name = "scand")]
#[command(author, version, about = "Scanner backend CLI")]
#[command(propagate_version = true)]
struct Cli {
    /// Backend configuration file (TOML)
    ///
    /// Without one the simulated mock transport is used; set
    /// `[transport] type = "usb"` to reach real hardware.
    #[arg(short, long, env = "SCAND_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    output: OutputFormat,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Minimal output (for scripting)
    #[arg(short, long)]
    quiet: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List attached scanners
    List,

    /// Show the options of a scanner
    Options {
        /// Device name; the first device when omitted
        #[arg(short, long, default_value = "")]
        device: String,
    },

    /// Scan one page to a PNM file
    Scan {
        /// Output file
        file: PathBuf,

        /// Device name; the first device when omitted
        #[arg(short, long, default_value = "")]
        device: String,

        /// Option assignment, e.g. `--set mode=Color` (repeatable)
        #[arg(short, long = "set", value_name = "NAME=VALUE")]
        settings: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging; RUST_LOG wins over the default level
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    let backend_config = config::load(cli.config.as_deref())?;
    let backend = UsbScanBackend::init(backend_config).context("Failed to initialize backend")?;
    let ctx = OutputContext::new(cli.output, cli.no_color, cli.quiet);

    let result = match &cli.command {
        Commands::List => commands::list(&backend, &ctx).await,
        Commands::Options { device } => commands::options(&backend, device, &ctx).await,
        Commands::Scan {
            file,
            device,
            settings,
        } => commands::scan(&backend, device, settings, file, &ctx).await,
    };

    if let Err(e) = backend.teardown().await {
        tracing::warn!(error = %e, "Backend teardown failed");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_config_help_names_mock_default() {
        let command = Cli::command();
        let config = command
            .get_arguments()
            .find(|arg| arg.get_id() == "config")
            .unwrap();
        let help = config.get_long_help().unwrap().to_string();
        assert!(help.contains("mock transport"));
        assert!(help.contains("type = \"usb\""));
    }

    #[test]
    fn test_scan_arguments() {
        let cli = Cli::parse_from(["scand", "scan", "page.pgm", "-s", "mode=Color", "--set", "br-y=20"]);
        let Commands::Scan { file, device, settings } = cli.command else {
            panic!("expected scan command");
        };
        assert_eq!(file, PathBuf::from("page.pgm"));
        assert_eq!(device, "");
        assert_eq!(settings, vec!["mode=Color", "br-y=20"]);
    }
}
