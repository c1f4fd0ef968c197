//! Transport trait and connection types

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::TransportError;

/// USB vendor/product pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UsbIds {
    pub vendor: u16,
    pub product: u16,
}

impl UsbIds {
    pub const fn new(vendor: u16, product: u16) -> Self {
        Self { vendor, product }
    }
}

impl fmt::Display for UsbIds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor, self.product)
    }
}

/// Device discovery and opening
///
/// Device names are transport specific and only need to be stable for the
/// lifetime of the process.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Names of attached devices with the given ids
    async fn enumerate(&self, ids: UsbIds) -> Result<Vec<String>, TransportError>;

    /// Open a device for exclusive use
    async fn open(&self, name: &str) -> Result<Box<dyn DeviceConnection>, TransportError>;
}

/// An open bulk-transfer connection to one device
#[async_trait]
pub trait DeviceConnection: Send {
    /// Write `data` to the bulk-out endpoint, returning the number of bytes
    /// the device accepted
    async fn write_bulk(&mut self, data: &[u8], timeout: Duration) -> Result<usize, TransportError>;

    /// Read up to `capacity` bytes from the bulk-in endpoint
    ///
    /// Fewer bytes than requested is not an error here; a closed endpoint is
    /// reported as [`TransportError::ConnectionClosed`].
    async fn read_bulk(&mut self, capacity: usize, timeout: Duration)
        -> Result<Vec<u8>, TransportError>;

    fn usb_ids(&self) -> UsbIds;

    async fn close(&mut self) -> Result<(), TransportError>;
}
