//! Raw scanline to output line: calibrate, crop, pack

use scand_core::ScanResult;

use crate::calibration::{CalibrationProfile, ChannelLayout};
use crate::options::ScanWindow;
use crate::profile::ScanMode;

/// Turns raw device lines into output lines for one scan window
#[derive(Debug)]
pub struct LineRenderer {
    calibration: CalibrationProfile,
    layout: ChannelLayout,
    mode: ScanMode,
    threshold: u8,
    left: usize,
    right: usize,
    normalized: Vec<u8>,
}

impl LineRenderer {
    pub fn new(calibration: CalibrationProfile, layout: ChannelLayout, window: &ScanWindow) -> Self {
        Self {
            calibration,
            layout,
            mode: window.mode,
            threshold: window.threshold,
            left: window.left,
            right: window.right,
            normalized: Vec::new(),
        }
    }

    /// Bytes of one rendered line
    pub fn output_bytes(&self) -> usize {
        let pixels = self.right - self.left;
        match self.mode {
            ScanMode::Lineart => pixels.div_ceil(8),
            ScanMode::Gray | ScanMode::Color => pixels * self.layout.channels(),
        }
    }

    /// Render one raw line into `out` (cleared first)
    pub fn render(&mut self, raw: &[u8], out: &mut Vec<u8>) -> ScanResult<()> {
        self.calibration
            .normalize_line(raw, &self.layout, &mut self.normalized)?;
        let channels = self.layout.channels();
        let cropped = &self.normalized[self.left * channels..self.right * channels];

        out.clear();
        match self.mode {
            ScanMode::Lineart => pack_lineart(cropped, self.threshold, out),
            ScanMode::Gray | ScanMode::Color => out.extend_from_slice(cropped),
        }
        Ok(())
    }
}

/// Pack gray samples to 1 bit, most significant bit first
///
/// A set bit is black: the sample is darker than `threshold`.
pub fn pack_lineart(gray: &[u8], threshold: u8, out: &mut Vec<u8>) {
    for chunk in gray.chunks(8) {
        let mut byte = 0u8;
        for (bit, sample) in chunk.iter().enumerate() {
            if *sample < threshold {
                byte |= 0x80 >> bit;
            }
        }
        out.push(byte);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn window(mode: ScanMode, left: usize, right: usize) -> ScanWindow {
        ScanWindow {
            mode,
            threshold: 128,
            left,
            right,
            top: 0,
            bottom: 10,
            block_lines: 1,
        }
    }

    #[test]
    fn test_pack_lineart_msb_first() {
        let mut out = Vec::new();
        pack_lineart(&[0, 255, 0, 255, 127, 128, 200, 10, 0, 255], 128, &mut out);
        assert_eq!(out, vec![0b1010_1001, 0b1000_0000]);
    }

    #[test]
    fn test_gray_crop() {
        let mut renderer = LineRenderer::new(
            CalibrationProfile::identity(8),
            ChannelLayout::gray(),
            &window(ScanMode::Gray, 2, 6),
        );
        let mut out = Vec::new();
        renderer.render(&[0, 1, 2, 3, 4, 5, 6, 7], &mut out).unwrap();
        assert_eq!(out, vec![2, 3, 4, 5]);
        assert_eq!(renderer.output_bytes(), 4);
    }

    #[test]
    fn test_color_crop_keeps_whole_pixels() {
        let layout = ChannelLayout::Planar {
            plane_for_channel: vec![2, 1, 0],
        };
        let mut renderer = LineRenderer::new(
            CalibrationProfile::identity(9),
            layout,
            &window(ScanMode::Color, 1, 3),
        );
        // planes B, G, R of three pixels
        let raw = [10, 11, 12, 20, 21, 22, 30, 31, 32];
        let mut out = Vec::new();
        renderer.render(&raw, &mut out).unwrap();
        assert_eq!(out, vec![31, 21, 11, 32, 22, 12]);
    }

    #[test]
    fn test_lineart_line_size() {
        let mut renderer = LineRenderer::new(
            CalibrationProfile::identity(12),
            ChannelLayout::gray(),
            &window(ScanMode::Lineart, 0, 12),
        );
        let mut out = Vec::new();
        renderer.render(&[0; 12], &mut out).unwrap();
        assert_eq!(renderer.output_bytes(), 2);
        assert_eq!(out, vec![0xff, 0xf0]);
    }
}
