//! USB backend configuration
//!
//! Two layers:
//! - [`BackendConfig`]: TOML settings for the backend itself (transport,
//!   timeouts, retry policies, acquisition mode)
//! - [`DeviceConfig`]: the line-oriented device list (`scand.conf`), re-read on
//!   every device listing

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::retry::RetryPolicy;
use crate::transport::UsbIds;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {message}")]
    Read { path: String, message: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid value: {0}")]
    Invalid(String),
}

/// Configuration for the USB backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Transport selection
    #[serde(default)]
    pub transport: TransportConfig,
    /// Per-phase transfer timeouts
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Lamp warm-up polling
    #[serde(default = "default_warm_up")]
    pub warm_up: RetryConfig,
    /// Idle waits while the device has no data ready
    #[serde(default = "default_idle")]
    pub idle: RetryConfig,
    /// Acquisition settings
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    /// Path of the line-oriented device config; built-in defaults when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_config: Option<PathBuf>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            timeouts: TimeoutConfig::default(),
            warm_up: default_warm_up(),
            idle: default_idle(),
            acquisition: AcquisitionConfig::default(),
            device_config: None,
        }
    }
}

impl BackendConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeouts.short_divisor == 0 {
            return Err(ConfigError::Invalid(
                "timeouts.short_divisor must be at least 1".to_string(),
            ));
        }
        if self.warm_up.max_attempts == 0 || self.idle.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry max_attempts must be at least 1".to_string(),
            ));
        }
        if self.acquisition.channel_depth == 0 {
            return Err(ConfigError::Invalid(
                "acquisition.channel_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Transport Configuration
// =============================================================================

/// Transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// libusb through rusb (requires the `usb` feature)
    Usb,
    /// Simulated CardScan devices for testing
    Mock(MockConfig),
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::Mock(MockConfig::default())
    }
}

/// Mock transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockConfig {
    /// Simulated latency per transfer in milliseconds
    #[serde(default)]
    pub latency_ms: u64,
    /// Simulated devices
    #[serde(default = "default_mock_devices")]
    pub devices: Vec<MockDeviceConfig>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            latency_ms: 0,
            devices: default_mock_devices(),
        }
    }
}

fn default_mock_devices() -> Vec<MockDeviceConfig> {
    vec![MockDeviceConfig::default()]
}

/// One simulated CardScan device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockDeviceConfig {
    #[serde(default = "default_mock_name")]
    pub name: String,
    #[serde(default = "default_mock_vendor")]
    pub vendor_id: u16,
    #[serde(default = "default_mock_product")]
    pub product_id: u16,
    /// Scanlines of paper fed per page
    #[serde(default = "default_page_lines")]
    pub page_lines: usize,
    /// Warm-up polls answered with a cold lamp before it reports hot
    #[serde(default)]
    pub cold_polls: u32,
    /// Paper sensor reports no document
    #[serde(default)]
    pub no_docs: bool,
    /// Block requests answered with no data before data flows
    #[serde(default)]
    pub not_ready_blocks: u32,
    /// Cap on image bytes per block reply; replies are then cut mid-line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_bytes: Option<usize>,
    /// Raw sensor level with the lamp off
    #[serde(default = "default_dark_level")]
    pub dark_level: u8,
    /// Raw sensor level on the white reference
    #[serde(default = "default_light_level")]
    pub light_level: u8,
    /// Answer the calibration command with a truncated reply
    #[serde(default)]
    pub truncate_calibration: bool,
}

impl Default for MockDeviceConfig {
    fn default() -> Self {
        Self {
            name: default_mock_name(),
            vendor_id: default_mock_vendor(),
            product_id: default_mock_product(),
            page_lines: default_page_lines(),
            cold_polls: 0,
            no_docs: false,
            not_ready_blocks: 0,
            chunk_bytes: None,
            dark_level: default_dark_level(),
            light_level: default_light_level(),
            truncate_calibration: false,
        }
    }
}

fn default_mock_name() -> String {
    "mock:001:002".to_string()
}

fn default_mock_vendor() -> u16 {
    0x08f0
}

fn default_mock_product() -> u16 {
    0x0005
}

fn default_page_lines() -> usize {
    64
}

fn default_dark_level() -> u8 {
    0x10
}

fn default_light_level() -> u8 {
    0xf0
}

// =============================================================================
// Timeouts and Retry
// =============================================================================

/// Per-phase transfer timeouts
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Command write timeout in milliseconds
    #[serde(default = "default_phase_timeout")]
    pub command_ms: u64,
    /// Payload write and reply read timeout in milliseconds
    #[serde(default = "default_phase_timeout")]
    pub data_ms: u64,
    /// Divisor applied to both in short-timeout (polling) mode
    #[serde(default = "default_short_divisor")]
    pub short_divisor: u32,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            command_ms: default_phase_timeout(),
            data_ms: default_phase_timeout(),
            short_divisor: default_short_divisor(),
        }
    }
}

fn default_phase_timeout() -> u64 {
    10_000
}

fn default_short_divisor() -> u32 {
    20
}

/// Bounded retry settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    /// Wait between attempts in milliseconds
    #[serde(default)]
    pub backoff_ms: u64,
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.backoff_ms))
    }
}

fn default_warm_up() -> RetryConfig {
    RetryConfig {
        max_attempts: 10,
        backoff_ms: 200,
    }
}

fn default_idle() -> RetryConfig {
    RetryConfig {
        max_attempts: 50,
        backoff_ms: 20,
    }
}

// =============================================================================
// Acquisition
// =============================================================================

/// Acquisition pipeline settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Run the pipeline on a background task feeding a bounded channel
    #[serde(default)]
    pub worker: bool,
    /// Chunks the worker may queue ahead of the reader
    #[serde(default = "default_channel_depth")]
    pub channel_depth: usize,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            worker: false,
            channel_depth: default_channel_depth(),
        }
    }
}

fn default_channel_depth() -> usize {
    4
}

// =============================================================================
// Device Config (scand.conf)
// =============================================================================

/// Default calibration-buffer setting for attached devices
pub const DEFAULT_HAS_CAL_BUFFER: bool = true;
/// Default scanlines per device block
pub const DEFAULT_LINES_PER_BLOCK: u8 = 16;
/// Accepted range for `lines_per_block`
pub const LINES_PER_BLOCK_RANGE: std::ops::RangeInclusive<u8> = 1..=32;

/// Settings captured for each `usb` line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSettings {
    pub has_cal_buffer: bool,
    pub lines_per_block: u8,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            has_cal_buffer: DEFAULT_HAS_CAL_BUFFER,
            lines_per_block: DEFAULT_LINES_PER_BLOCK,
        }
    }
}

/// A device matcher and the settings in force when it was declared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceEntry {
    pub ids: UsbIds,
    pub settings: DeviceSettings,
}

/// Parsed line-oriented device config
///
/// Settings lines apply to the `usb` lines that follow them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub entries: Vec<DeviceEntry>,
}

impl Default for DeviceConfig {
    /// The built-in matcher used when no config file exists
    fn default() -> Self {
        Self {
            entries: vec![DeviceEntry {
                ids: UsbIds::new(0x08f0, 0x0005),
                settings: DeviceSettings::default(),
            }],
        }
    }
}

impl DeviceConfig {
    /// Read the device config, falling back to the defaults when the file is
    /// absent or no path is configured
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            debug!("No device config configured, using defaults");
            return Ok(Self::default());
        };
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Self::parse(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No device config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(ConfigError::Read {
                path: path.display().to_string(),
                message: e.to_string(),
            }),
        }
    }

    /// Parse config text; malformed lines are logged and skipped
    pub fn parse(content: &str) -> Self {
        let mut settings = DeviceSettings::default();
        let mut entries = Vec::new();

        for (lineno, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut words = line.split_whitespace();
            let keyword = words.next().unwrap_or_default();
            let args: Vec<&str> = words.collect();

            match keyword {
                "usb" => match parse_usb_ids(&args) {
                    Some(ids) => {
                        debug!(%ids, ?settings, "Device matcher");
                        entries.push(DeviceEntry { ids, settings });
                    }
                    None => warn!(line = lineno + 1, "Malformed usb line '{}' ignored", line),
                },
                "has_cal_buffer" => match args.first().and_then(|v| parse_int(v)) {
                    Some(v) => {
                        settings.has_cal_buffer = v != 0;
                        debug!(has_cal_buffer = settings.has_cal_buffer, "Config setting");
                    }
                    None => warn!(line = lineno + 1, "Malformed has_cal_buffer line ignored"),
                },
                "lines_per_block" => match args.first().and_then(|v| parse_int(v)) {
                    Some(v) => match u8::try_from(v)
                        .ok()
                        .filter(|n| LINES_PER_BLOCK_RANGE.contains(n))
                    {
                        Some(n) => {
                            settings.lines_per_block = n;
                            debug!(lines_per_block = n, "Config setting");
                        }
                        None => warn!(
                            line = lineno + 1,
                            "lines_per_block {} out of range {:?}, ignored",
                            v,
                            LINES_PER_BLOCK_RANGE
                        ),
                    },
                    None => warn!(line = lineno + 1, "Malformed lines_per_block line ignored"),
                },
                _ => warn!(line = lineno + 1, "Config line '{}' ignored", line),
            }
        }

        Self { entries }
    }
}

fn parse_usb_ids(args: &[&str]) -> Option<UsbIds> {
    match args {
        [vendor, product] => {
            let vendor = u16::try_from(parse_int(vendor)?).ok()?;
            let product = u16::try_from(parse_int(product)?).ok()?;
            Some(UsbIds::new(vendor, product))
        }
        _ => None,
    }
}

/// Decimal or `0x`-prefixed hexadecimal
fn parse_int(s: &str) -> Option<i64> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}
