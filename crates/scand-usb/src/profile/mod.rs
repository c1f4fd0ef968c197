//! Device profiles: the model-specific half of the wire protocol
//!
//! A profile knows the command bytes and reply layouts of one scanner
//! family. Everything else (timeouts, retries, reassembly, calibration math)
//! is shared and lives outside the profile.

pub mod cardscan;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use scand_core::{FrameFormat, ScanResult};

use crate::calibration::{CalibrationSet, ChannelLayout};
use crate::command::CommandTransaction;
use crate::transport::UsbIds;

pub use cardscan::CardScanProfile;

/// User-visible scan mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanMode {
    /// 1-bit black and white from thresholded gray
    Lineart,
    Gray,
    Color,
}

impl ScanMode {
    pub const ALL: [ScanMode; 3] = [ScanMode::Lineart, ScanMode::Gray, ScanMode::Color];

    pub fn name(&self) -> &'static str {
        match self {
            ScanMode::Lineart => "Lineart",
            ScanMode::Gray => "Gray",
            ScanMode::Color => "Color",
        }
    }

    /// Exact match on the canonical name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.name() == name)
    }

    /// Mode the device is driven in
    pub fn raw_mode(&self) -> RawMode {
        match self {
            ScanMode::Lineart | ScanMode::Gray => RawMode::Gray,
            ScanMode::Color => RawMode::Color,
        }
    }

    pub fn format(&self) -> FrameFormat {
        match self {
            ScanMode::Lineart | ScanMode::Gray => FrameFormat::Gray,
            ScanMode::Color => FrameFormat::Rgb,
        }
    }

    /// Bits per output sample
    pub fn depth(&self) -> u8 {
        match self {
            ScanMode::Lineart => 1,
            ScanMode::Gray | ScanMode::Color => 8,
        }
    }
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Acquisition mode on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawMode {
    Gray,
    Color,
}

impl RawMode {
    pub fn channels(&self) -> usize {
        match self {
            RawMode::Gray => 1,
            RawMode::Color => 3,
        }
    }
}

/// Vendor and model strings of an attached device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceModel {
    pub vendor: String,
    pub model: String,
}

/// Outcome of one lamp warm-up poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmUpState {
    Ready,
    Cold,
    /// Paper sensor reports no document
    NoMedia,
}

/// What a block request delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    /// Device has no data yet; try again after an idle wait
    NotReady,
    Data { media_present: bool },
}

/// Reply to one block request, header stripped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBlock {
    pub status: BlockStatus,
    /// Raw sensor bytes, not necessarily whole lines
    pub payload: Bytes,
    /// Scanlines the block was requested for
    pub lines: usize,
}

impl RawBlock {
    pub fn not_ready(lines: usize) -> Self {
        Self {
            status: BlockStatus::NotReady,
            payload: Bytes::new(),
            lines,
        }
    }
}

/// Media state decoded from a reply header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaStatus {
    pub media_present: bool,
}

/// Model-specific protocol operations
#[async_trait]
pub trait DeviceProfile: Send + Sync + fmt::Debug {
    fn model(&self) -> &DeviceModel;

    /// Sensor width in pixels
    fn pixels_per_line(&self) -> usize;

    /// Longest page in scanlines
    fn max_lines(&self) -> usize;

    fn supported_modes(&self) -> &[ScanMode];

    /// Sample layout of raw lines in the given mode
    fn channel_layout(&self, mode: RawMode) -> ChannelLayout;

    /// Read the device's dark/light references
    async fn load_calibration(&self, tx: &mut CommandTransaction) -> ScanResult<CalibrationSet>;

    /// One lamp warm-up poll
    async fn warm_up(&self, tx: &mut CommandTransaction, mode: RawMode) -> ScanResult<WarmUpState>;

    /// Request `lines` scanlines of image data
    async fn request_block(
        &self,
        tx: &mut CommandTransaction,
        mode: RawMode,
        lines: usize,
    ) -> ScanResult<RawBlock>;

    /// Decode the status header that precedes every reply
    fn parse_status(&self, header: &[u8]) -> ScanResult<MediaStatus>;

    /// Paper-less scanlines after which the page has ended
    fn trailing_blank_limit(&self) -> usize;

    /// Put the device back to sleep after a page
    async fn power_down(&self, tx: &mut CommandTransaction) -> ScanResult<()>;

    /// Stop an in-flight acquisition; `Ok(false)` when the device has no
    /// such command
    async fn abort(&self, _tx: &mut CommandTransaction) -> ScanResult<bool> {
        Ok(false)
    }

    /// Raw bytes per scanline in the given mode
    fn raw_line_bytes(&self, mode: RawMode) -> usize {
        self.pixels_per_line() * mode.channels()
    }
}

/// Pick the profile for a device by its USB ids
///
/// Only the CardScan family is known; other ids get its protocol with
/// "Unknown" names.
pub fn select_profile(ids: UsbIds) -> Arc<dyn DeviceProfile> {
    Arc::new(CardScanProfile::new(ids))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_properties() {
        assert_eq!(ScanMode::Lineart.raw_mode(), RawMode::Gray);
        assert_eq!(ScanMode::Color.format(), FrameFormat::Rgb);
        assert_eq!(ScanMode::Lineart.depth(), 1);
        assert_eq!(ScanMode::from_name("Color"), Some(ScanMode::Color));
        assert_eq!(ScanMode::from_name("color"), None);
    }
}
