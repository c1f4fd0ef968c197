//! ScanBackend and ScanDevice traits - the frontend-facing session API

use async_trait::async_trait;
use bytes::Bytes;

use crate::cancel::CancelHandle;
use crate::error::{ScanError, ScanResult};
use crate::models::{
    ControlOutcome, DeviceInfo, OptionAction, OptionDescriptor, OptionId, OptionValue,
    ScanParameters, Version,
};

/// A scanner backend: discovers devices and opens sessions on them
///
/// Obtained from the backend's `init`; after [`teardown`](Self::teardown) every
/// call fails with `Invalid`.
#[async_trait]
pub trait ScanBackend: Send + Sync {
    /// Backend version code
    fn version(&self) -> Version;

    /// Devices currently attached and matching the configuration
    async fn list_devices(&self) -> ScanResult<Vec<DeviceInfo>>;

    /// Open a session on a device; an empty name selects the first device
    async fn open(&self, name: &str) -> ScanResult<Box<dyn ScanDevice>>;

    /// Close remaining sessions and release all backend state
    async fn teardown(&self) -> ScanResult<()>;
}

/// An open session on one device
///
/// # Lifecycle
///
/// ```text
/// open → (control_option)* → get_parameters → start → read* → Eof
///                                               ↑                │
///                                               └────────────────┘
/// cancel: Started/Reading → Opened
/// close: any state → Closed
/// ```
#[async_trait]
pub trait ScanDevice: Send {
    /// Name the session was opened with
    fn name(&self) -> &str;

    /// Descriptor of an option, `None` past the last index
    fn describe_option(&self, id: OptionId) -> Option<&OptionDescriptor>;

    /// Get, set or auto-set an option value
    async fn control_option(
        &mut self,
        id: OptionId,
        action: OptionAction,
    ) -> ScanResult<ControlOutcome>;

    /// Parameters of the next frame (estimate) or the current one (authoritative)
    fn get_parameters(&self) -> ScanResult<ScanParameters>;

    /// Begin acquiring a frame
    async fn start(&mut self) -> ScanResult<()>;

    /// Up to `max_len` bytes of image data
    ///
    /// `Err(Eof)` marks the end of the frame; reads after that without a new
    /// `start` return `Err(Cancelled)`.
    async fn read(&mut self, max_len: usize) -> ScanResult<Bytes>;

    /// Abort the current scan; a no-op when not scanning
    async fn cancel(&mut self);

    /// Handle that can request cancellation from another task
    fn cancel_handle(&self) -> CancelHandle;

    /// Select non-blocking reads
    async fn set_io_mode(&mut self, _non_blocking: bool) -> ScanResult<()> {
        Err(ScanError::Unsupported(
            "non-blocking I/O not supported".to_string(),
        ))
    }

    /// Pollable descriptor that signals readable image data
    fn get_select_fd(&self) -> ScanResult<i32> {
        Err(ScanError::Unsupported(
            "select file descriptor not supported".to_string(),
        ))
    }

    /// Release the device; repeated calls are no-ops
    async fn close(&mut self) -> ScanResult<()>;

    // =========================================================================
    // Convenience wrappers
    // =========================================================================

    /// Find an option index by name
    fn find_option(&self, name: &str) -> Option<OptionId> {
        (1..)
            .map(OptionId::new)
            .map_while(|id| self.describe_option(id).map(|desc| (id, desc)))
            .find(|(_, desc)| !desc.is_group() && desc.name == name)
            .map(|(id, _)| id)
    }

    async fn get_option(&mut self, id: OptionId) -> ScanResult<OptionValue> {
        let outcome = self.control_option(id, OptionAction::Get).await?;
        outcome
            .value
            .ok_or_else(|| ScanError::invalid(format!("option {} has no value", id)))
    }

    async fn set_option(&mut self, id: OptionId, value: OptionValue) -> ScanResult<ControlOutcome> {
        self.control_option(id, OptionAction::Set(value)).await
    }
}

impl std::fmt::Debug for dyn ScanDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanDevice").field("name", &self.name()).finish()
    }
}
