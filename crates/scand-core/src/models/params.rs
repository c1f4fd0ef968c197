//! Scan parameters derived from the current option values

use serde::{Deserialize, Serialize};

/// Pixel layout of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameFormat {
    Gray,
    /// Single-pass, pixel-interleaved R,G,B
    Rgb,
}

impl FrameFormat {
    pub fn channels(&self) -> usize {
        match self {
            FrameFormat::Gray => 1,
            FrameFormat::Rgb => 3,
        }
    }
}

/// Parameters of the frame the next (or current) scan delivers
///
/// Before `start` these are a best-effort estimate; between `start` and the
/// end of the frame they describe the data actually delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanParameters {
    pub format: FrameFormat,
    pub last_frame: bool,
    pub bytes_per_line: usize,
    pub pixels_per_line: usize,
    /// Number of lines, `None` when the device decides at end of page
    pub lines: Option<usize>,
    /// Bits per sample
    pub depth: u8,
}

impl ScanParameters {
    /// Bytes needed for one line at the given geometry
    pub fn line_bytes(format: FrameFormat, depth: u8, pixels_per_line: usize) -> usize {
        let bits = pixels_per_line * format.channels() * depth as usize;
        bits.div_ceil(8)
    }

    /// Total frame size in bytes when the line count is known
    pub fn frame_bytes(&self) -> Option<usize> {
        self.lines.map(|lines| lines * self.bytes_per_line)
    }
}
