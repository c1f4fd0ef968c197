//! Dark/light calibration and per-sample normalization

use scand_core::{ScanError, ScanResult};

/// How the samples of one raw scanline are arranged
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelLayout {
    /// `channels` samples per pixel, pixel after pixel
    Interleaved { channels: usize },
    /// One plane of `pixels` samples per channel; entry `k` names the plane
    /// holding output channel `k` (R, G, B order)
    Planar { plane_for_channel: Vec<usize> },
}

impl ChannelLayout {
    pub fn gray() -> Self {
        ChannelLayout::Interleaved { channels: 1 }
    }

    pub fn channels(&self) -> usize {
        match self {
            ChannelLayout::Interleaved { channels } => *channels,
            ChannelLayout::Planar { plane_for_channel } => plane_for_channel.len(),
        }
    }

    /// Raw sample index of channel `k` of pixel `j`
    pub fn raw_index(&self, pixels: usize, j: usize, k: usize) -> usize {
        match self {
            ChannelLayout::Interleaved { channels } => j * channels + k,
            ChannelLayout::Planar { plane_for_channel } => plane_for_channel[k] * pixels + j,
        }
    }
}

/// Dark and light reference for one raw acquisition mode
///
/// `light` holds the light reading minus the dark reading, so a sample maps
/// to `(raw - dark) * 255 / light` clamped to the byte range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationProfile {
    dark: Vec<u8>,
    light: Vec<u8>,
}

impl CalibrationProfile {
    /// Build a profile from one dark and one light reference line
    pub fn capture(dark_line: &[u8], light_line: &[u8]) -> ScanResult<Self> {
        if dark_line.len() != light_line.len() {
            return Err(ScanError::invalid(format!(
                "calibration lines differ in length: {} dark, {} light",
                dark_line.len(),
                light_line.len()
            )));
        }
        let light = light_line
            .iter()
            .zip(dark_line)
            .map(|(l, d)| l.saturating_sub(*d))
            .collect();
        Ok(Self {
            dark: dark_line.to_vec(),
            light,
        })
    }

    /// Pass-through profile
    pub fn identity(samples: usize) -> Self {
        Self {
            dark: vec![0; samples],
            light: vec![255; samples],
        }
    }

    /// Samples per raw line
    pub fn len(&self) -> usize {
        self.dark.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dark.is_empty()
    }

    pub fn dark(&self) -> &[u8] {
        &self.dark
    }

    pub fn light(&self) -> &[u8] {
        &self.light
    }

    /// Normalize one raw sample at raw position `index`
    #[inline]
    pub fn normalize(&self, raw: u8, index: usize) -> u8 {
        let dark = self.dark[index];
        let light = self.light[index];
        let v = if raw <= dark { 0 } else { raw - dark };
        if v >= light {
            255
        } else {
            (v as u16 * 255 / light as u16) as u8
        }
    }

    /// Normalize a raw line into pixel-interleaved output
    ///
    /// `out` is cleared and receives `pixels * channels` samples.
    pub fn normalize_line(
        &self,
        raw: &[u8],
        layout: &ChannelLayout,
        out: &mut Vec<u8>,
    ) -> ScanResult<()> {
        if raw.len() != self.len() {
            return Err(ScanError::io(format!(
                "raw line of {} samples against {} calibration samples",
                raw.len(),
                self.len()
            )));
        }
        let channels = layout.channels();
        if channels == 0 || raw.len() % channels != 0 {
            return Err(ScanError::invalid(format!(
                "{} samples do not split into {} channels",
                raw.len(),
                channels
            )));
        }
        let pixels = raw.len() / channels;

        out.clear();
        out.reserve(raw.len());
        for j in 0..pixels {
            for k in 0..channels {
                let index = layout.raw_index(pixels, j, k);
                out.push(self.normalize(raw[index], index));
            }
        }
        Ok(())
    }
}

/// Calibration for every raw mode of a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationSet {
    pub gray: CalibrationProfile,
    pub color: CalibrationProfile,
}

impl CalibrationSet {
    /// Pass-through calibration for a sensor of `pixels` pixels
    pub fn identity(pixels: usize) -> Self {
        Self {
            gray: CalibrationProfile::identity(pixels),
            color: CalibrationProfile::identity(pixels * 3),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn single(dark: u8, light: u8) -> CalibrationProfile {
        CalibrationProfile::capture(&[dark], &[light]).unwrap()
    }

    #[test]
    fn test_capture_stores_light_minus_dark() {
        let profile = CalibrationProfile::capture(&[10, 50, 200], &[250, 40, 210]).unwrap();
        assert_eq!(profile.dark(), &[10, 50, 200]);
        assert_eq!(profile.light(), &[240, 0, 10]);
    }

    #[test]
    fn test_capture_rejects_length_mismatch() {
        assert!(CalibrationProfile::capture(&[1, 2], &[3]).is_err());
    }

    #[rstest]
    #[case(16, 240)]
    #[case(0, 255)]
    #[case(100, 101)]
    fn test_saturation_and_monotonicity(#[case] dark: u8, #[case] light: u8) {
        let profile = single(dark, light);
        let mut previous = 0u8;
        for raw in 0..=255u8 {
            let v = profile.normalize(raw, 0);
            if raw <= dark {
                assert_eq!(v, 0, "raw {} at or below dark {}", raw, dark);
            }
            if raw as u16 >= dark as u16 + profile.light()[0] as u16 {
                assert_eq!(v, 255, "raw {} at or above light", raw);
            }
            assert!(v >= previous, "not monotonic at raw {}", raw);
            previous = v;
        }
    }

    #[test]
    fn test_zero_light_span_saturates() {
        let profile = single(30, 30);
        for raw in 0..=255u8 {
            assert_eq!(profile.normalize(raw, 0), 255);
        }
    }

    #[test]
    fn test_linear_between_references() {
        let profile = single(16, 240);
        for raw in 17..240u8 {
            let expected = ((raw - 16) as u32 * 255 / 224) as u8;
            assert_eq!(profile.normalize(raw, 0), expected);
        }
    }

    #[test]
    fn test_identity_passes_through() {
        let profile = CalibrationProfile::identity(1);
        for raw in 0..=255u8 {
            assert_eq!(profile.normalize(raw, 0), raw);
        }
    }

    #[test]
    fn test_planar_bgr_becomes_interleaved_rgb() {
        // two pixels, planes in B, G, R order
        let raw = [1, 2, 11, 12, 21, 22];
        let layout = ChannelLayout::Planar {
            plane_for_channel: vec![2, 1, 0],
        };
        let mut out = Vec::new();
        CalibrationProfile::identity(6)
            .normalize_line(&raw, &layout, &mut out)
            .unwrap();
        assert_eq!(out, vec![21, 11, 1, 22, 12, 2]);
    }

    #[test]
    fn test_calibration_follows_raw_position() {
        // red plane (raw positions 4, 5) has a dark offset of 20
        let dark = [0, 0, 0, 0, 20, 20];
        let light = [255, 255, 255, 255, 255, 255];
        let profile = CalibrationProfile::capture(&dark, &light).unwrap();
        let layout = ChannelLayout::Planar {
            plane_for_channel: vec![2, 1, 0],
        };
        let mut out = Vec::new();
        profile
            .normalize_line(&[5, 5, 5, 5, 25, 10], &layout, &mut out)
            .unwrap();
        assert_eq!(out[0], (5u32 * 255 / 235) as u8);
        assert_eq!(out[3], 0);
        assert_eq!(out[1], 5);
    }

    #[test]
    fn test_line_length_must_match() {
        let mut out = Vec::new();
        let err = CalibrationProfile::identity(4)
            .normalize_line(&[0; 3], &ChannelLayout::gray(), &mut out)
            .unwrap_err();
        assert_eq!(err.status(), scand_core::ScanStatus::IoError);
    }
}
