//! scand-usb - USB scanner backend for CardScan-family devices
//!
//! This crate implements the `scand_core` backend traits for sheet-fed card
//! scanners driven through bulk USB transfers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     UsbScanBackend                          │
//! │  Implements ScanBackend                                     │
//! │                                                             │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────┐  │
//! │  │ DeviceConfig │  │DeviceRegistry│  │ ScanSession      │  │
//! │  │ (scand.conf) │  │ (attach,     │  │ (ScanDevice,     │  │
//! │  │              │  │  claims)     │  │  state machine)  │  │
//! │  └──────────────┘  └──────────────┘  └────────┬─────────┘  │
//! │                                               │            │
//! │               ┌───────────────┬───────────────┤            │
//! │               │               │               │            │
//! │        ┌──────┴──────┐ ┌──────┴──────┐ ┌──────┴───────┐    │
//! │        │DeviceOptions│ │ Acquisition │ │DeviceProfile │    │
//! │        │ (registry,  │ │ Pipeline    │ │ (CardScan    │    │
//! │        │  window)    │ │ (+ worker)  │ │  protocol)   │    │
//! │        └─────────────┘ └──────┬──────┘ └──────┬───────┘    │
//! │                               │               │            │
//! │                        ┌──────┴───────────────┴──┐         │
//! │                        │   CommandTransaction    │         │
//! │                        └───────────┬─────────────┘         │
//! │                           ┌────────┴────────┐              │
//! │                           │   Transport     │              │
//! │                           │ (rusb / mock)   │              │
//! │                           └─────────────────┘              │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod backend;
pub mod calibration;
pub mod command;
pub mod config;
mod error;
pub mod options;
pub mod pipeline;
pub mod profile;
pub mod registry;
pub mod retry;
pub mod session;
pub mod transport;

pub use backend::UsbScanBackend;
pub use calibration::{CalibrationProfile, CalibrationSet, ChannelLayout};
pub use command::{CommandTransaction, DeviceHandle, Reply, ReplyStatus, Request, TimeoutMode};
pub use config::{BackendConfig, ConfigError, DeviceConfig, TransportConfig};
pub use options::{DeviceOptions, ScanWindow};
pub use profile::{CardScanProfile, DeviceProfile, ScanMode};
pub use retry::RetryPolicy;
pub use session::{ScanSession, SessionState};
pub use transport::{create_transport, DeviceConnection, Transport, TransportError, UsbIds};

// Re-export for convenience
pub use scand_core::{
    OptionAction, OptionId, OptionValue, ScanBackend, ScanDevice, ScanError, ScanParameters,
    ScanResult, ScanStatus,
};
