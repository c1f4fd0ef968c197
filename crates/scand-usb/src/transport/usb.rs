//! libusb transport through rusb
//!
//! Transfers are blocking libusb calls, so each one runs on the blocking
//! thread pool. Device names are `libusb:<bus>:<address>`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rusb::{Direction, GlobalContext, TransferType, UsbContext};
use tracing::{debug, warn};

use super::{DeviceConnection, Transport, TransportError, UsbIds};

const INTERFACE: u8 = 0;

/// Transport over the system's USB devices
#[derive(Debug, Default)]
pub struct UsbTransport;

impl UsbTransport {
    pub fn new() -> Self {
        Self
    }
}

fn device_name(device: &rusb::Device<GlobalContext>) -> String {
    format!("libusb:{:03}:{:03}", device.bus_number(), device.address())
}

fn map_error(context: &str, err: rusb::Error) -> TransportError {
    match err {
        rusb::Error::Timeout => TransportError::Timeout(context.to_string()),
        rusb::Error::Busy => TransportError::Busy(context.to_string()),
        rusb::Error::Access => TransportError::AccessDenied(context.to_string()),
        rusb::Error::NoDevice => TransportError::ConnectionClosed,
        rusb::Error::NotFound => TransportError::NotFound(context.to_string()),
        rusb::Error::NotSupported => TransportError::Unsupported(context.to_string()),
        other => TransportError::ReceiveFailed(format!("{}: {}", context, other)),
    }
}

async fn blocking<T, F>(f: F) -> Result<T, TransportError>
where
    F: FnOnce() -> Result<T, TransportError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TransportError::ReceiveFailed(format!("USB worker failed: {}", e)))?
}

#[async_trait]
impl Transport for UsbTransport {
    async fn enumerate(&self, ids: UsbIds) -> Result<Vec<String>, TransportError> {
        blocking(move || {
            let devices = GlobalContext::default()
                .devices()
                .map_err(|e| map_error("device list", e))?;
            let mut names = Vec::new();
            for device in devices.iter() {
                let Ok(desc) = device.device_descriptor() else {
                    continue;
                };
                if desc.vendor_id() == ids.vendor && desc.product_id() == ids.product {
                    names.push(device_name(&device));
                }
            }
            debug!(%ids, found = names.len(), "USB enumeration");
            Ok(names)
        })
        .await
    }

    async fn open(&self, name: &str) -> Result<Box<dyn DeviceConnection>, TransportError> {
        let name = name.to_string();
        let connection = blocking(move || UsbConnection::open(&name)).await?;
        Ok(Box::new(connection))
    }
}

// =============================================================================
// Connection
// =============================================================================

struct UsbConnection {
    handle: Option<Arc<rusb::DeviceHandle<GlobalContext>>>,
    ids: UsbIds,
    ep_in: u8,
    ep_out: u8,
}

impl UsbConnection {
    fn open(name: &str) -> Result<Self, TransportError> {
        let devices = GlobalContext::default()
            .devices()
            .map_err(|e| map_error("device list", e))?;
        let device = devices
            .iter()
            .find(|d| device_name(d) == name)
            .ok_or_else(|| TransportError::NotFound(name.to_string()))?;
        let desc = device
            .device_descriptor()
            .map_err(|e| map_error("device descriptor", e))?;
        let ids = UsbIds::new(desc.vendor_id(), desc.product_id());

        let (ep_in, ep_out) = bulk_endpoints(&device)?;
        let mut handle = device.open().map_err(|e| map_error(name, e))?;
        if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
            debug!(device = name, error = %e, "Kernel driver auto-detach unavailable");
        }
        handle
            .claim_interface(INTERFACE)
            .map_err(|e| map_error(name, e))?;

        debug!(device = name, %ids, ep_in, ep_out, "USB device claimed");
        Ok(Self {
            handle: Some(Arc::new(handle)),
            ids,
            ep_in,
            ep_out,
        })
    }

    fn handle(&self) -> Result<Arc<rusb::DeviceHandle<GlobalContext>>, TransportError> {
        self.handle.clone().ok_or(TransportError::ConnectionClosed)
    }
}

fn bulk_endpoints(device: &rusb::Device<GlobalContext>) -> Result<(u8, u8), TransportError> {
    let config = device
        .active_config_descriptor()
        .map_err(|e| map_error("config descriptor", e))?;
    let mut ep_in = None;
    let mut ep_out = None;
    for interface in config.interfaces() {
        for alt in interface.descriptors() {
            for ep in alt.endpoint_descriptors() {
                if ep.transfer_type() != TransferType::Bulk {
                    continue;
                }
                match ep.direction() {
                    Direction::In => ep_in = ep_in.or(Some(ep.address())),
                    Direction::Out => ep_out = ep_out.or(Some(ep.address())),
                }
            }
        }
    }
    match (ep_in, ep_out) {
        (Some(i), Some(o)) => Ok((i, o)),
        _ => Err(TransportError::InvalidConfig(
            "device has no bulk endpoint pair".to_string(),
        )),
    }
}

#[async_trait]
impl DeviceConnection for UsbConnection {
    async fn write_bulk(&mut self, data: &[u8], timeout: Duration) -> Result<usize, TransportError> {
        let handle = self.handle()?;
        let ep = self.ep_out;
        let data = data.to_vec();
        blocking(move || {
            handle
                .write_bulk(ep, &data, timeout)
                .map_err(|e| match e {
                    rusb::Error::Timeout => TransportError::Timeout("bulk write".to_string()),
                    rusb::Error::NoDevice => TransportError::ConnectionClosed,
                    other => TransportError::SendFailed(other.to_string()),
                })
        })
        .await
    }

    async fn read_bulk(
        &mut self,
        capacity: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let handle = self.handle()?;
        let ep = self.ep_in;
        blocking(move || {
            let mut buf = vec![0u8; capacity];
            let n = handle
                .read_bulk(ep, &mut buf, timeout)
                .map_err(|e| map_error("bulk read", e))?;
            buf.truncate(n);
            Ok(buf)
        })
        .await
    }

    fn usb_ids(&self) -> UsbIds {
        self.ids
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        blocking(move || {
            if let Err(e) = handle.release_interface(INTERFACE) {
                warn!(error = %e, "Failed to release USB interface");
            }
            Ok(())
        })
        .await
    }
}
