//! Device option set and the scan window derived from it
//!
//! Every session owns a [`DeviceOptions`]: the option registry for the
//! device's profile plus the rule tying the options together (threshold only
//! active in lineart, geometry corners kept apart).

use scand_core::{
    Capabilities, ChangeFlags, DependencyRule, OptionDescriptor, OptionId, OptionRegistry,
    OptionValue, RuleEffects, ScanError, ScanParameters, ScanResult, Unit,
};

use crate::config::DeviceSettings;
use crate::profile::{DeviceProfile, ScanMode};

/// Allowed values of `block-lines`
pub const BLOCK_LINES: [i32; 6] = [1, 2, 4, 8, 16, 32];
/// Narrowest window in pixels
pub const MIN_WIDTH: i32 = 8;
/// Shortest window in scanlines
pub const MIN_HEIGHT: i32 = 1;
/// Horizontal geometry quantization
pub const X_QUANT: i32 = 4;

const DEFAULT_MODE: ScanMode = ScanMode::Gray;
const DEFAULT_THRESHOLD: i32 = 128;

/// Indices of the device options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionIds {
    pub mode: OptionId,
    pub threshold: OptionId,
    pub tl_x: OptionId,
    pub tl_y: OptionId,
    pub br_x: OptionId,
    pub br_y: OptionId,
    pub block_lines: OptionId,
}

/// Window and rendering settings a scan runs with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanWindow {
    pub mode: ScanMode,
    /// Lineart cut-off on the calibrated value
    pub threshold: u8,
    /// First pixel column
    pub left: usize,
    /// One past the last pixel column
    pub right: usize,
    pub top: usize,
    /// One past the last scanline
    pub bottom: usize,
    pub block_lines: usize,
}

impl ScanWindow {
    pub fn width(&self) -> usize {
        self.right - self.left
    }

    pub fn height(&self) -> usize {
        self.bottom - self.top
    }

    /// Frame parameters this window produces
    pub fn parameters(&self) -> ScanParameters {
        let format = self.mode.format();
        let depth = self.mode.depth();
        ScanParameters {
            format,
            last_frame: true,
            bytes_per_line: ScanParameters::line_bytes(format, depth, self.width()),
            pixels_per_line: self.width(),
            lines: None,
            depth,
        }
    }
}

/// `block-lines` default for a configured `lines_per_block`
///
/// Snaps to the nearest allowed value, preferring the smaller on ties.
pub fn snap_block_lines(lines_per_block: u8) -> i32 {
    let wanted = i32::from(lines_per_block);
    BLOCK_LINES
        .iter()
        .copied()
        .min_by_key(|v| (v - wanted).abs())
        .unwrap_or(BLOCK_LINES[0])
}

/// Keeps the threshold and the geometry consistent
struct FrameRule {
    ids: OptionIds,
    max_x: i32,
    max_y: i32,
}

impl FrameRule {
    fn keep_apart(
        &self,
        registry: &OptionRegistry,
        effects: &mut RuleEffects,
        (low, high): (OptionId, OptionId),
        min_gap: i32,
        max: i32,
    ) {
        let (Some(lo), Some(hi)) = (registry.peek_int(low), registry.peek_int(high)) else {
            return;
        };
        if hi >= lo + min_gap {
            return;
        }
        let corrected_hi = (lo + min_gap).min(max);
        effects.correct(high, corrected_hi);
        if corrected_hi - lo < min_gap {
            effects.correct(low, (corrected_hi - min_gap).max(0));
        }
        effects.flags |= ChangeFlags::RELOAD_PARAMS | ChangeFlags::RELOAD_OPTIONS;
    }
}

impl DependencyRule for FrameRule {
    fn apply(&self, registry: &OptionRegistry, changed: OptionId) -> RuleEffects {
        let ids = &self.ids;
        let mut effects = RuleEffects::new();

        if changed == ids.mode {
            let lineart = registry.peek_str(ids.mode) == Some(ScanMode::Lineart.name());
            effects.set_active(ids.threshold, lineart);
            effects.flags |= ChangeFlags::RELOAD_PARAMS | ChangeFlags::RELOAD_OPTIONS;
        } else if changed == ids.tl_x || changed == ids.br_x {
            effects.flags |= ChangeFlags::RELOAD_PARAMS;
            self.keep_apart(registry, &mut effects, (ids.tl_x, ids.br_x), MIN_WIDTH, self.max_x);
        } else if changed == ids.tl_y || changed == ids.br_y {
            self.keep_apart(registry, &mut effects, (ids.tl_y, ids.br_y), MIN_HEIGHT, self.max_y);
        }
        effects
    }
}

/// Option registry of one session
#[derive(Debug)]
pub struct DeviceOptions {
    registry: OptionRegistry,
    ids: OptionIds,
}

impl DeviceOptions {
    pub fn new(profile: &dyn DeviceProfile, settings: &DeviceSettings) -> ScanResult<Self> {
        let max_x = i32::try_from(profile.pixels_per_line())
            .map_err(|_| ScanError::invalid("sensor width out of range"))?;
        let max_y = i32::try_from(profile.max_lines())
            .map_err(|_| ScanError::invalid("page length out of range"))?;
        let modes: Vec<&str> = profile.supported_modes().iter().map(|m| m.name()).collect();
        let select = Capabilities::SOFT_SELECT | Capabilities::SOFT_DETECT;

        let mut builder = OptionRegistry::builder();

        builder.group("Scan Mode");
        let mode = builder.option(
            OptionDescriptor::string("mode", "Scan mode", "Selects the scan mode (e.g., lineart, monochrome, or color).")
                .with_string_list(&modes),
            DEFAULT_MODE.name(),
        );
        let threshold = builder.option(
            OptionDescriptor::int(
                "threshold",
                "Threshold",
                "Calibrated gray level below which a lineart pixel is black",
            )
            .with_range(0, 255, 1)
            .with_capabilities(select | Capabilities::AUTOMATIC | Capabilities::INACTIVE),
            DEFAULT_THRESHOLD,
        );

        builder.group("Geometry");
        let tl_x = builder.option(
            OptionDescriptor::int("tl-x", "Top-left x", "Top-left x position of scan area.")
                .with_unit(Unit::Pixel)
                .with_range(0, max_x, X_QUANT),
            0,
        );
        let tl_y = builder.option(
            OptionDescriptor::int("tl-y", "Top-left y", "Top-left y position of scan area.")
                .with_unit(Unit::Pixel)
                .with_range(0, max_y, 1),
            0,
        );
        let br_x = builder.option(
            OptionDescriptor::int("br-x", "Bottom-right x", "Bottom-right x position of scan area.")
                .with_unit(Unit::Pixel)
                .with_range(0, max_x, X_QUANT),
            max_x,
        );
        let br_y = builder.option(
            OptionDescriptor::int("br-y", "Bottom-right y", "Bottom-right y position of scan area.")
                .with_unit(Unit::Pixel)
                .with_range(0, max_y, 1),
            max_y,
        );

        builder.group("Advanced");
        let block_lines = builder.option(
            OptionDescriptor::int(
                "block-lines",
                "Lines per block",
                "Scanlines requested from the device per transfer.",
            )
            .with_word_list(&BLOCK_LINES)
            .with_capabilities(select | Capabilities::ADVANCED),
            snap_block_lines(settings.lines_per_block),
        );

        let ids = OptionIds {
            mode,
            threshold,
            tl_x,
            tl_y,
            br_x,
            br_y,
            block_lines,
        };
        builder.rule(FrameRule { ids, max_x, max_y });

        Ok(Self {
            registry: builder.build()?,
            ids,
        })
    }

    pub fn ids(&self) -> &OptionIds {
        &self.ids
    }

    pub fn registry(&self) -> &OptionRegistry {
        &self.registry
    }

    pub fn describe(&self, id: OptionId) -> Option<&OptionDescriptor> {
        self.registry.describe(id)
    }

    pub fn get(&self, id: OptionId) -> ScanResult<OptionValue> {
        self.registry.get(id)
    }

    pub fn set(&mut self, id: OptionId, value: OptionValue) -> ScanResult<ChangeFlags> {
        self.registry.set(id, value)
    }

    pub fn set_auto(&mut self, id: OptionId) -> ScanResult<ChangeFlags> {
        self.registry.set_auto(id)
    }

    pub fn mode(&self) -> ScanResult<ScanMode> {
        let name = self
            .registry
            .peek_str(self.ids.mode)
            .ok_or_else(|| ScanError::invalid("mode option has no value"))?;
        ScanMode::from_name(name).ok_or_else(|| ScanError::invalid(format!("unknown mode '{}'", name)))
    }

    fn int(&self, id: OptionId) -> ScanResult<i32> {
        self.registry
            .peek_int(id)
            .ok_or_else(|| ScanError::invalid(format!("option {} has no integer value", id)))
    }

    fn coordinate(&self, id: OptionId) -> ScanResult<usize> {
        let v = self.int(id)?;
        usize::try_from(v).map_err(|_| ScanError::invalid(format!("option {} is negative", id)))
    }

    /// Window described by the current values
    pub fn window(&self) -> ScanResult<ScanWindow> {
        let window = ScanWindow {
            mode: self.mode()?,
            threshold: u8::try_from(self.int(self.ids.threshold)?)
                .map_err(|_| ScanError::invalid("threshold out of range"))?,
            left: self.coordinate(self.ids.tl_x)?,
            right: self.coordinate(self.ids.br_x)?,
            top: self.coordinate(self.ids.tl_y)?,
            bottom: self.coordinate(self.ids.br_y)?,
            block_lines: self.coordinate(self.ids.block_lines)?,
        };
        if window.right <= window.left || window.bottom <= window.top {
            return Err(ScanError::invalid("empty scan window"));
        }
        Ok(window)
    }

    /// Parameters estimated from the current values
    pub fn parameters(&self) -> ScanResult<ScanParameters> {
        Ok(self.window()?.parameters())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::cardscan::PIXELS_PER_LINE;
    use crate::profile::CardScanProfile;
    use crate::transport::UsbIds;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use scand_core::{FrameFormat, ScanStatus};

    fn options() -> DeviceOptions {
        let profile = CardScanProfile::new(UsbIds::new(0x08f0, 0x0005));
        DeviceOptions::new(&profile, &DeviceSettings::default()).unwrap()
    }

    #[test]
    fn test_option_layout() {
        let opts = options();
        let registry = opts.registry();
        assert_eq!(registry.len(), 11);
        assert_eq!(registry.get(OptionId::COUNT).unwrap(), OptionValue::Int(11));
        assert_eq!(registry.id_of("mode"), Some(OptionId::new(2)));
        assert_eq!(registry.id_of("block-lines"), Some(OptionId::new(10)));
        assert!(registry.describe(OptionId::new(1)).unwrap().is_group());
        assert_eq!(opts.describe(opts.ids().mode).unwrap().size, "Lineart".len() + 1);
    }

    #[test]
    fn test_threshold_descriptor() {
        let opts = options();
        let threshold = opts.describe(opts.ids().threshold).unwrap();
        assert_eq!(threshold.title, "Threshold");
        assert_eq!(
            threshold.description,
            "Calibrated gray level below which a lineart pixel is black"
        );
    }

    #[test]
    fn test_default_parameters() {
        let params = options().parameters().unwrap();
        assert_eq!(params.format, FrameFormat::Gray);
        assert_eq!(params.depth, 8);
        assert_eq!(params.pixels_per_line, PIXELS_PER_LINE);
        assert_eq!(params.bytes_per_line, PIXELS_PER_LINE);
        assert_eq!(params.lines, None);
        assert!(params.last_frame);
    }

    #[test]
    fn test_mode_switch_triples_line_bytes() {
        let mut opts = options();
        let gray = opts.parameters().unwrap().bytes_per_line;
        let flags = opts.set(opts.ids().mode, "Color".into()).unwrap();
        assert!(flags.contains(ChangeFlags::RELOAD_PARAMS));
        assert_eq!(opts.parameters().unwrap().bytes_per_line, gray * 3);
    }

    #[test]
    fn test_threshold_follows_lineart() {
        let mut opts = options();
        let threshold = opts.ids().threshold;
        assert_eq!(opts.get(threshold).unwrap_err().status(), ScanStatus::Invalid);

        let flags = opts.set(opts.ids().mode, "lineart".into()).unwrap();
        assert!(flags.contains(ChangeFlags::RELOAD_OPTIONS));
        assert_eq!(opts.get(opts.ids().mode).unwrap(), OptionValue::from("Lineart"));
        assert_eq!(opts.get(threshold).unwrap(), OptionValue::Int(128));

        let params = opts.parameters().unwrap();
        assert_eq!(params.depth, 1);
        assert_eq!(params.bytes_per_line, PIXELS_PER_LINE / 8);

        opts.set(threshold, 40.into()).unwrap();
        opts.set_auto(threshold).unwrap();
        assert_eq!(opts.get(threshold).unwrap(), OptionValue::Int(128));

        opts.set(opts.ids().mode, "Gray".into()).unwrap();
        assert!(opts.get(threshold).is_err());
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let mut opts = options();
        let err = opts.set(opts.ids().mode, "Halftone".into()).unwrap_err();
        assert_eq!(err.status(), ScanStatus::Invalid);
        assert_eq!(opts.mode().unwrap(), ScanMode::Gray);
    }

    #[test]
    fn test_narrow_window_is_corrected() {
        let mut opts = options();
        let ids = *opts.ids();
        opts.set(ids.br_x, 100.into()).unwrap();
        let flags = opts.set(ids.tl_x, 96.into()).unwrap();
        assert!(flags.contains(ChangeFlags::RELOAD_PARAMS));
        assert_eq!(opts.get(ids.br_x).unwrap(), OptionValue::Int(104));

        // pushed against the right edge, the left corner gives way
        opts.set(ids.tl_x, 1208.into()).unwrap();
        assert_eq!(opts.get(ids.br_x).unwrap(), OptionValue::Int(1208));
        assert_eq!(opts.get(ids.tl_x).unwrap(), OptionValue::Int(1200));
        assert_eq!(opts.window().unwrap().width(), 8);
    }

    #[test]
    fn test_short_window_is_corrected() {
        let mut opts = options();
        let ids = *opts.ids();
        opts.set(ids.br_y, 0.into()).unwrap();
        assert_eq!(opts.get(ids.br_y).unwrap(), OptionValue::Int(1));
        assert_eq!(opts.window().unwrap().height(), 1);
    }

    #[test]
    fn test_geometry_snaps_to_quant() {
        let mut opts = options();
        let flags = opts.set(opts.ids().tl_x, 10.into()).unwrap();
        assert!(flags.contains(ChangeFlags::INEXACT));
        assert_eq!(opts.get(opts.ids().tl_x).unwrap(), OptionValue::Int(12));
        assert_eq!(opts.window().unwrap().left, 12);
    }

    #[rstest]
    #[case(16, 16)]
    #[case(1, 1)]
    #[case(3, 2)]
    #[case(12, 8)]
    #[case(13, 16)]
    #[case(32, 32)]
    fn test_snap_block_lines(#[case] configured: u8, #[case] expected: i32) {
        assert_eq!(snap_block_lines(configured), expected);
    }

    #[test]
    fn test_block_lines_default_from_config() {
        let profile = CardScanProfile::new(UsbIds::new(0x08f0, 0x0005));
        let settings = DeviceSettings {
            has_cal_buffer: true,
            lines_per_block: 5,
        };
        let opts = DeviceOptions::new(&profile, &settings).unwrap();
        assert_eq!(opts.window().unwrap().block_lines, 4);
    }
}
