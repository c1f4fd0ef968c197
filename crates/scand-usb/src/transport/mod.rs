//! Transport layer for scanner communication
//!
//! This module provides the bulk-transfer connections the command layer
//! runs on:
//! - libusb adapter through rusb (requires the `usb` feature)
//! - Mock adapter simulating CardScan devices for testing
//!
//! # Example
//!
//! ```ignore
//! use scand_usb::transport::{create_transport, UsbIds};
//! use scand_usb::config::TransportConfig;
//!
//! let transport = create_transport(&TransportConfig::default())?;
//! let names = transport.enumerate(UsbIds::new(0x08f0, 0x0005)).await?;
//! let connection = transport.open(&names[0]).await?;
//! ```

mod adapter;
pub mod error;
pub mod mock;

#[cfg(feature = "usb")]
pub mod usb;

pub use adapter::{DeviceConnection, Transport, UsbIds};
pub use error::TransportError;

use std::sync::Arc;

use crate::config::TransportConfig;

/// Create a transport based on configuration
pub fn create_transport(config: &TransportConfig) -> Result<Arc<dyn Transport>, TransportError> {
    match config {
        #[cfg(feature = "usb")]
        TransportConfig::Usb => Ok(Arc::new(usb::UsbTransport::new())),
        #[cfg(not(feature = "usb"))]
        TransportConfig::Usb => Err(TransportError::Unsupported(
            "USB access requires the 'usb' feature".to_string(),
        )),
        TransportConfig::Mock(cfg) => Ok(Arc::new(mock::MockTransport::new(cfg))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_mock_transport() {
        let transport = create_transport(&TransportConfig::default()).unwrap();
        let names = transport.enumerate(UsbIds::new(0x08f0, 0x0005)).await.unwrap();
        assert_eq!(names, vec!["mock:001:002".to_string()]);
    }

    #[cfg(not(feature = "usb"))]
    #[test]
    fn test_usb_without_feature_is_unsupported() {
        assert!(matches!(
            create_transport(&TransportConfig::Usb),
            Err(TransportError::Unsupported(_))
        ));
    }
}
