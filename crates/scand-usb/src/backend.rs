//! USB scanner backend
//!
//! This module provides the UsbScanBackend that implements ScanBackend for
//! CardScan-family scanners reachable through a [`Transport`].

use std::sync::Arc;

use async_trait::async_trait;
use scand_core::{DeviceInfo, ScanBackend, ScanDevice, ScanError, ScanResult, Version};
use tracing::{debug, info, warn};

use crate::command::{CommandTransaction, DeviceHandle, TimeoutProfile};
use crate::config::{BackendConfig, DeviceConfig, DeviceEntry};
use crate::profile::select_profile;
use crate::registry::{AttachedDevice, DeviceRegistry};
use crate::session::{ScanSession, SessionSettings};
use crate::transport::{create_transport, Transport};

/// Version reported by this backend
pub const BACKEND_VERSION: Version = Version::new(1, 0, 3);

/// Device kind reported for every attached device
pub const DEVICE_KIND: &str = "scanner";

/// USB scanner backend
pub struct UsbScanBackend {
    /// Backend configuration
    config: BackendConfig,
    /// Transport used to find and open devices
    transport: Arc<dyn Transport>,
    /// Attached devices and session claims
    registry: DeviceRegistry,
    timeouts: TimeoutProfile,
}

impl std::fmt::Debug for UsbScanBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsbScanBackend")
            .field("transport", &self.config.transport)
            .field("registry", &self.registry)
            .finish()
    }
}

impl UsbScanBackend {
    /// Create a backend with the transport named in the configuration
    pub fn init(config: BackendConfig) -> ScanResult<Self> {
        config.validate()?;
        let transport = create_transport(&config.transport)?;
        Ok(Self::with_transport(config, transport))
    }

    /// Create a backend on an existing transport
    pub fn with_transport(config: BackendConfig, transport: Arc<dyn Transport>) -> Self {
        info!(version = %BACKEND_VERSION, "Scanner backend initialized");
        Self {
            timeouts: TimeoutProfile::from(&config.timeouts),
            config,
            transport,
            registry: DeviceRegistry::new(),
        }
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Open, identify and (if configured) calibrate one device
    async fn attach(&self, name: &str, entry: &DeviceEntry) -> ScanResult<AttachedDevice> {
        let handle = DeviceHandle::open(self.transport.as_ref(), name).await?;
        let ids = handle.usb_ids();
        let profile = select_profile(ids);
        let mut tx = CommandTransaction::new(handle, self.timeouts);

        let calibration = if entry.settings.has_cal_buffer {
            match profile.load_calibration(&mut tx).await {
                Ok(calibration) => Some(Arc::new(calibration)),
                Err(e) => {
                    if let Err(close_err) = tx.close().await {
                        debug!(device = name, error = %close_err, "Close after failed attach");
                    }
                    return Err(e);
                }
            }
        } else {
            None
        };
        tx.close().await?;

        let model = profile.model();
        info!(device = name, vendor = %model.vendor, model = %model.model, "Device attached");
        Ok(AttachedDevice {
            info: DeviceInfo {
                name: name.to_string(),
                vendor: model.vendor.clone(),
                model: model.model.clone(),
                kind: DEVICE_KIND.to_string(),
            },
            ids,
            settings: entry.settings,
            profile,
            calibration,
        })
    }
}

#[async_trait]
impl ScanBackend for UsbScanBackend {
    fn version(&self) -> Version {
        BACKEND_VERSION
    }

    async fn list_devices(&self) -> ScanResult<Vec<DeviceInfo>> {
        self.registry.ensure_live()?;
        let device_config = DeviceConfig::load(self.config.device_config.as_deref())?;
        let previous = self.registry.devices();
        let mut attached: Vec<AttachedDevice> = Vec::new();

        for entry in &device_config.entries {
            let names = match self.transport.enumerate(entry.ids).await {
                Ok(names) => names,
                Err(e) => {
                    warn!(ids = %entry.ids, error = %e, "Device enumeration failed");
                    continue;
                }
            };
            for name in names {
                if attached.iter().any(|d| d.info.name == name) {
                    continue;
                }
                // a device held by a session keeps its earlier attachment
                if self.registry.is_claimed(&name) {
                    if let Some(device) = previous.iter().find(|d| d.info.name == name) {
                        attached.push(device.clone());
                    }
                    continue;
                }
                match self.attach(&name, entry).await {
                    Ok(device) => attached.push(device),
                    Err(e) => warn!(device = %name, error = %e, "Device not attached"),
                }
            }
        }

        let infos = attached.iter().map(|d| d.info.clone()).collect();
        self.registry.replace(attached);
        Ok(infos)
    }

    async fn open(&self, name: &str) -> ScanResult<Box<dyn ScanDevice>> {
        self.registry.ensure_live()?;
        if self.registry.devices().is_empty() {
            self.list_devices().await?;
        }
        let device = self
            .registry
            .find(name)
            .ok_or_else(|| ScanError::invalid(format!("unknown device '{}'", name)))?;

        let claim = self.registry.claim(&device.info.name)?;
        let handle = DeviceHandle::open(self.transport.as_ref(), &device.info.name).await?;
        let tx = CommandTransaction::new(handle, self.timeouts);
        let session =
            ScanSession::open(&device, tx, SessionSettings::from(&self.config), claim).await?;
        Ok(Box::new(session))
    }

    async fn teardown(&self) -> ScanResult<()> {
        self.registry.ensure_live()?;
        self.registry.teardown();
        info!("Scanner backend shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MockConfig, MockDeviceConfig, TransportConfig};
    use pretty_assertions::assert_eq;
    use scand_core::ScanStatus;

    fn backend(devices: Vec<MockDeviceConfig>) -> UsbScanBackend {
        let config = BackendConfig {
            transport: TransportConfig::Mock(MockConfig {
                latency_ms: 0,
                devices,
            }),
            ..Default::default()
        };
        UsbScanBackend::init(config).unwrap()
    }

    #[tokio::test]
    async fn test_list_default_device() {
        let backend = backend(vec![MockDeviceConfig::default()]);
        assert_eq!(backend.version().to_string(), "1.0.3");
        let devices = backend.list_devices().await.unwrap();
        assert_eq!(
            devices,
            vec![DeviceInfo {
                name: "mock:001:002".into(),
                vendor: "CardScan".into(),
                model: "800c".into(),
                kind: "scanner".into(),
            }]
        );
        assert!(backend.registry().find("").unwrap().calibration.is_some());
    }

    #[tokio::test]
    async fn test_calibration_failure_skips_device() {
        let backend = backend(vec![MockDeviceConfig {
            truncate_calibration: true,
            ..Default::default()
        }]);
        assert!(backend.list_devices().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_unknown_device_is_invalid() {
        let backend = backend(vec![MockDeviceConfig::default()]);
        let err = backend.open("libusb:009:009").await.unwrap_err();
        assert_eq!(err.status(), ScanStatus::Invalid);
    }

    #[tokio::test]
    async fn test_empty_name_opens_first_device() {
        let backend = backend(vec![MockDeviceConfig::default()]);
        let mut device = backend.open("").await.unwrap();
        assert_eq!(device.name(), "mock:001:002");
        device.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_teardown_invalidates_backend() {
        let backend = backend(vec![MockDeviceConfig::default()]);
        let mut device = backend.open("").await.unwrap();
        backend.teardown().await.unwrap();

        assert_eq!(backend.list_devices().await.unwrap_err().status(), ScanStatus::Invalid);
        assert_eq!(backend.open("").await.unwrap_err().status(), ScanStatus::Invalid);
        assert_eq!(device.start().await.unwrap_err().status(), ScanStatus::Invalid);
        assert!(device.close().await.is_ok());
    }

    #[tokio::test]
    async fn test_usb_transport_needs_feature() {
        let config = BackendConfig {
            transport: TransportConfig::Usb,
            ..Default::default()
        };
        if cfg!(not(feature = "usb")) {
            let err = UsbScanBackend::init(config).unwrap_err();
            assert_eq!(err.status(), ScanStatus::Unsupported);
        }
    }
}
