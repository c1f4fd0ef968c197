//! CardScan 800c/600c (and the Sanford 800c re-badge)
//!
//! Sheet-fed card scanner with a fixed 1208 pixel sensor. Every reply starts
//! with a 64 byte status header whose second byte is the paper sensor. Color
//! blocks carry one plane per channel in B, G, R order.

use async_trait::async_trait;
use scand_core::{ScanError, ScanResult};
use tracing::{debug, trace, warn};

use super::{
    BlockStatus, DeviceModel, DeviceProfile, MediaStatus, RawBlock, RawMode, ScanMode, WarmUpState,
};
use crate::calibration::{CalibrationProfile, CalibrationSet, ChannelLayout};
use crate::command::{CommandTransaction, Request};
use crate::transport::UsbIds;

/// Status header preceding every reply
pub const HEADER_SIZE: usize = 64;
/// Sensor width
pub const PIXELS_PER_LINE: usize = 1208;
/// Longest card the feeder takes, in scanlines
pub const MAX_LINES: usize = 4800;
/// Paper-less scanlines that end a page
pub const MAX_PAPERLESS_LINES: usize = 210;
/// Lamp readings below this mean the lamp is hot
pub const LAMP_HOT_BELOW: u8 = 0x20;
/// Power-down command repetitions
pub const POWER_DOWN_REPEATS: usize = 5;

pub const CMD_CALIBRATION: [u8; 3] = [0x45, 0x00, 0x00];
pub const CMD_WARM_UP_GRAY: [u8; 9] = [0x12, 0x06, 0x00, 0x00, 0x01, 0x60, 0x00, 0x61, 0x00];
pub const CMD_WARM_UP_COLOR: [u8; 10] =
    [0x18, 0x07, 0x00, 0x00, 0x01, 0x60, 0x00, 0x61, 0x00, 0x07];
pub const CMD_BLOCK_GRAY: [u8; 9] = [0x12, 0x06, 0x00, 0x01, 0x01, 0x60, 0x00, 0x18, 0x05];
pub const CMD_BLOCK_COLOR: [u8; 10] =
    [0x18, 0x07, 0x00, 0x01, 0x01, 0x60, 0x00, 0x18, 0x05, 0x07];
pub const CMD_POWER_DOWN: [u8; 5] = [0x21, 0x02, 0x00, 0x0a, 0x00];
/// Byte of the block commands holding the line count
pub const BLOCK_LINES_OFFSET: usize = 4;
/// Reply length of the power-down command
pub const POWER_DOWN_REPLY: usize = 6;

/// Calibration reply body: dark/light pairs for blue, green, red, then gray
pub const CALIBRATION_REPLY: usize = HEADER_SIZE + PIXELS_PER_LINE * 8;

const MODES: [ScanMode; 3] = [ScanMode::Lineart, ScanMode::Gray, ScanMode::Color];

/// Vendor and model names for known USB ids
pub fn identify(ids: UsbIds) -> DeviceModel {
    let (vendor, model) = match (ids.vendor, ids.product) {
        (0x08f0, 0x0005) => ("CardScan", "800c"),
        (0x08f0, 0x0002) => ("CardScan", "600c"),
        (0x08f0, _) => ("CardScan", "Unknown"),
        (0x0451, 0x6250) => ("Sanford", "800c"),
        (0x0451, _) => ("Sanford", "Unknown"),
        _ => ("Unknown", "Unknown"),
    };
    if model == "Unknown" {
        debug!(%ids, "Unknown product, using default settings");
    }
    DeviceModel {
        vendor: vendor.to_string(),
        model: model.to_string(),
    }
}

#[derive(Debug)]
pub struct CardScanProfile {
    model: DeviceModel,
}

impl CardScanProfile {
    pub fn new(ids: UsbIds) -> Self {
        Self {
            model: identify(ids),
        }
    }

    fn block_command(mode: RawMode, lines: usize) -> ScanResult<Vec<u8>> {
        let lines = u8::try_from(lines)
            .ok()
            .filter(|l| *l > 0)
            .ok_or_else(|| ScanError::invalid(format!("cannot request {} lines", lines)))?;
        let mut cmd = match mode {
            RawMode::Gray => CMD_BLOCK_GRAY.to_vec(),
            RawMode::Color => CMD_BLOCK_COLOR.to_vec(),
        };
        cmd[BLOCK_LINES_OFFSET] = lines;
        Ok(cmd)
    }
}

#[async_trait]
impl DeviceProfile for CardScanProfile {
    fn model(&self) -> &DeviceModel {
        &self.model
    }

    fn pixels_per_line(&self) -> usize {
        PIXELS_PER_LINE
    }

    fn max_lines(&self) -> usize {
        MAX_LINES
    }

    fn supported_modes(&self) -> &[ScanMode] {
        &MODES
    }

    fn channel_layout(&self, mode: RawMode) -> ChannelLayout {
        match mode {
            RawMode::Gray => ChannelLayout::gray(),
            RawMode::Color => ChannelLayout::Planar {
                plane_for_channel: vec![2, 1, 0],
            },
        }
    }

    async fn load_calibration(&self, tx: &mut CommandTransaction) -> ScanResult<CalibrationSet> {
        let reply = tx
            .execute(Request::new(&CMD_CALIBRATION).with_reply(CALIBRATION_REPLY))
            .await?;
        if !reply.is_complete() {
            return Err(ScanError::io(format!(
                "calibration reply truncated at {} of {} bytes",
                reply.data.len(),
                CALIBRATION_REPLY
            )));
        }

        let body = &reply.data[HEADER_SIZE..];
        let plane = |i: usize| &body[i * PIXELS_PER_LINE..(i + 1) * PIXELS_PER_LINE];

        // planes arrive as dark-b, light-b, dark-g, light-g, dark-r, light-r
        let mut dark = Vec::with_capacity(PIXELS_PER_LINE * 3);
        let mut light = Vec::with_capacity(PIXELS_PER_LINE * 3);
        for channel in 0..3 {
            dark.extend_from_slice(plane(channel * 2));
            light.extend_from_slice(plane(channel * 2 + 1));
        }
        let color = CalibrationProfile::capture(&dark, &light)?;
        let gray = CalibrationProfile::capture(plane(6), plane(7))?;

        trace!("cal color dark: {}", hex::encode(color.dark()));
        trace!("cal color light: {}", hex::encode(color.light()));
        trace!("cal gray dark: {}", hex::encode(gray.dark()));
        trace!("cal gray light: {}", hex::encode(gray.light()));
        Ok(CalibrationSet { gray, color })
    }

    async fn warm_up(&self, tx: &mut CommandTransaction, mode: RawMode) -> ScanResult<WarmUpState> {
        let (cmd, lamps): (&[u8], usize) = match mode {
            RawMode::Gray => (&CMD_WARM_UP_GRAY, 1),
            RawMode::Color => (&CMD_WARM_UP_COLOR, 3),
        };
        let reply = tx
            .execute(Request::new(cmd).with_reply(HEADER_SIZE + lamps).short())
            .await?;
        if !reply.is_complete() {
            return Err(ScanError::io(format!(
                "warm-up reply truncated at {} bytes",
                reply.data.len()
            )));
        }

        if !self.parse_status(&reply.data[..HEADER_SIZE])?.media_present {
            return Ok(WarmUpState::NoMedia);
        }
        let readings = &reply.data[HEADER_SIZE..];
        trace!(?readings, "Lamp readings");
        if readings.iter().all(|r| *r < LAMP_HOT_BELOW) {
            Ok(WarmUpState::Ready)
        } else {
            Ok(WarmUpState::Cold)
        }
    }

    async fn request_block(
        &self,
        tx: &mut CommandTransaction,
        mode: RawMode,
        lines: usize,
    ) -> ScanResult<RawBlock> {
        let cmd = Self::block_command(mode, lines)?;
        let capacity = HEADER_SIZE + lines * self.raw_line_bytes(mode);
        let reply = tx.execute(Request::new(&cmd).with_reply(capacity)).await?;

        let data = reply.data;
        if data.len() <= HEADER_SIZE {
            if !data.is_empty() && data.len() < HEADER_SIZE {
                return Err(ScanError::io(format!(
                    "block reply header truncated at {} bytes",
                    data.len()
                )));
            }
            return Ok(RawBlock::not_ready(lines));
        }

        let status = self.parse_status(&data[..HEADER_SIZE])?;
        Ok(RawBlock {
            status: BlockStatus::Data {
                media_present: status.media_present,
            },
            payload: data.slice(HEADER_SIZE..),
            lines,
        })
    }

    fn parse_status(&self, header: &[u8]) -> ScanResult<MediaStatus> {
        match header.get(1) {
            Some(sensor) => Ok(MediaStatus {
                media_present: *sensor != 0,
            }),
            None => Err(ScanError::io("status header too short")),
        }
    }

    fn trailing_blank_limit(&self) -> usize {
        MAX_PAPERLESS_LINES
    }

    async fn power_down(&self, tx: &mut CommandTransaction) -> ScanResult<()> {
        for attempt in 1..=POWER_DOWN_REPEATS {
            let reply = tx
                .execute(Request::new(&CMD_POWER_DOWN).with_reply(POWER_DOWN_REPLY))
                .await?;
            if !reply.is_complete() {
                warn!(attempt, got = reply.data.len(), "Short power-down reply");
                return Err(ScanError::Eof);
            }
        }
        Ok(())
    }
}
