//! Attached devices and exclusive session claims
//!
//! The registry is owned by one backend instance. Attachment results are
//! replaced wholesale on every listing; claims survive a re-listing so an
//! open session keeps its device.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use scand_core::{DeviceInfo, ScanError, ScanResult};
use tracing::{debug, info};

use crate::calibration::CalibrationSet;
use crate::config::DeviceSettings;
use crate::profile::DeviceProfile;
use crate::transport::UsbIds;

/// A device found and identified during listing
#[derive(Debug, Clone)]
pub struct AttachedDevice {
    pub info: DeviceInfo,
    pub ids: UsbIds,
    pub settings: DeviceSettings,
    pub profile: Arc<dyn DeviceProfile>,
    /// Captured at attach; `None` when the device has no calibration
    /// buffer and calibration is done per session
    pub calibration: Option<Arc<CalibrationSet>>,
}

type Claims = Arc<Mutex<HashMap<String, Arc<AtomicBool>>>>;

/// Exclusive hold on one device, released on drop
#[derive(Debug)]
pub struct DeviceClaim {
    name: String,
    revoked: Arc<AtomicBool>,
    claims: Claims,
}

impl DeviceClaim {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The backend was torn down while this claim was held
    pub fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::SeqCst)
    }
}

impl Drop for DeviceClaim {
    fn drop(&mut self) {
        let mut claims = self.claims.lock();
        if claims
            .get(&self.name)
            .is_some_and(|held| Arc::ptr_eq(held, &self.revoked))
        {
            claims.remove(&self.name);
            debug!(device = %self.name, "Device claim released");
        }
    }
}

/// Devices known to one backend instance
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: RwLock<Vec<AttachedDevice>>,
    claims: Claims,
    torn_down: AtomicBool,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Invalid` once the registry has been torn down
    pub fn ensure_live(&self) -> ScanResult<()> {
        if self.torn_down.load(Ordering::SeqCst) {
            return Err(ScanError::invalid("backend has been torn down"));
        }
        Ok(())
    }

    /// Replace the attached devices with a fresh listing
    pub fn replace(&self, devices: Vec<AttachedDevice>) {
        debug!(count = devices.len(), "Device list updated");
        *self.devices.write() = devices;
    }

    pub fn devices(&self) -> Vec<AttachedDevice> {
        self.devices.read().clone()
    }

    /// Look up a device; the empty name selects the first one
    pub fn find(&self, name: &str) -> Option<AttachedDevice> {
        let devices = self.devices.read();
        if name.is_empty() {
            devices.first().cloned()
        } else {
            devices.iter().find(|d| d.info.name == name).cloned()
        }
    }

    pub fn is_claimed(&self, name: &str) -> bool {
        self.claims.lock().contains_key(name)
    }

    /// Take the exclusive claim on a device
    pub fn claim(&self, name: &str) -> ScanResult<DeviceClaim> {
        self.ensure_live()?;
        let mut claims = self.claims.lock();
        if claims.contains_key(name) {
            return Err(ScanError::DeviceBusy(format!("device '{}' is already open", name)));
        }
        let revoked = Arc::new(AtomicBool::new(false));
        claims.insert(name.to_string(), revoked.clone());
        debug!(device = name, "Device claimed");
        Ok(DeviceClaim {
            name: name.to_string(),
            revoked,
            claims: self.claims.clone(),
        })
    }

    /// Revoke every claim and forget all devices
    pub fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut claims = self.claims.lock();
        for (name, revoked) in claims.drain() {
            debug!(device = %name, "Revoking claim");
            revoked.store(true, Ordering::SeqCst);
        }
        self.devices.write().clear();
        info!("Device registry torn down");
    }
}
