//! RGB preview built from three independently integrating stacks.

use tracing::{info, warn};

use crate::consts::{DEFAULT_SCNR_AMOUNT, DEFAULT_STRETCH_HIGH, DEFAULT_STRETCH_LOW};
use crate::error::{LiveStackError, Result};
use crate::filters::histogram::auto_stretch;
use crate::frame::{ColorFrame, FrameData, Image};
use crate::services::ImageServices;
use crate::stack::{Stack, StackId};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CompositeConfig {
    pub stretch_low: f32,
    pub stretch_high: f32,
    pub scnr: bool,
    pub scnr_amount: f32,
}

impl Default for CompositeConfig {
    fn default() -> Self {
        Self {
            stretch_low: DEFAULT_STRETCH_LOW,
            stretch_high: DEFAULT_STRETCH_HIGH,
            scnr: false,
            scnr_amount: DEFAULT_SCNR_AMOUNT,
        }
    }
}

/// Align green and blue onto red, stack them as one color frame, apply the
/// display stretch and optionally SCNR.
///
/// Color inputs contribute their luminance.
pub fn composite(
    services: &dyn ImageServices,
    red: &Image,
    green: &Image,
    blue: &Image,
    config: &CompositeConfig,
) -> Result<ColorFrame> {
    let reference = red.with_data(FrameData::Mono(red.data.luminance()));
    let green = green.with_data(FrameData::Mono(green.data.luminance()));
    let blue = blue.with_data(FrameData::Mono(blue.data.luminance()));

    let (aligned_green, aligned_blue) = rayon::join(
        || services.align(&reference, &green),
        || services.align(&reference, &blue),
    );
    let aligned_green =
        aligned_green.map_err(|e| LiveStackError::AlignmentFailed(format!("green channel: {e}")))?;
    let aligned_blue =
        aligned_blue.map_err(|e| LiveStackError::AlignmentFailed(format!("blue channel: {e}")))?;

    let stretch = |image: &Image| {
        auto_stretch(&image.data.luminance(), config.stretch_low, config.stretch_high)
    };
    let color = ColorFrame {
        red: stretch(&reference),
        green: stretch(&aligned_green),
        blue: stretch(&aligned_blue),
    };

    if !config.scnr {
        return Ok(color);
    }
    let image = services.scnr(&Image::new(FrameData::Color(color)), config.scnr_amount);
    match image.data {
        FrameData::Color(cf) => Ok(cf),
        FrameData::Mono(_) => Err(LiveStackError::ChannelMismatch {
            expected: 3,
            actual: 1,
        }),
    }
}

/// Keeps an RGB preview in sync with three stacks.
///
/// The preview is recomputed only when a channel's revision changed since
/// the last attempt. A failed composite disables the compositor until
/// [`RgbCompositor::start`] is called again; the stacks are unaffected.
pub struct RgbCompositor {
    channels: [StackId; 3],
    config: CompositeConfig,
    enabled: bool,
    last_revisions: Option<[u64; 3]>,
    last_error: Option<String>,
    preview: Option<ColorFrame>,
}

impl RgbCompositor {
    pub fn new(channels: [StackId; 3], config: CompositeConfig) -> Self {
        Self {
            channels,
            config,
            enabled: false,
            last_revisions: None,
            last_error: None,
            preview: None,
        }
    }

    pub fn channels(&self) -> [StackId; 3] {
        self.channels
    }

    /// Enable the compositor and force a recompute on the next refresh.
    pub fn start(&mut self) {
        self.enabled = true;
        self.last_revisions = None;
        self.last_error = None;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn preview(&self) -> Option<&ColorFrame> {
        self.preview.as_ref()
    }

    /// Recompute the preview if any channel changed. Returns whether a new
    /// preview was produced.
    ///
    /// `stacks` are the red, green and blue stacks in order.
    pub fn refresh(&mut self, services: &dyn ImageServices, stacks: [&Stack; 3]) -> Result<bool> {
        if !self.enabled {
            return Ok(false);
        }
        let revisions = stacks.map(|s| s.revision());
        if self.last_revisions == Some(revisions) {
            return Ok(false);
        }

        let mut images = Vec::with_capacity(3);
        for stack in stacks {
            match stack.running_image() {
                Some(image) => images.push(image),
                // Not every channel has a reference yet.
                None => return Ok(false),
            }
        }
        self.last_revisions = Some(revisions);

        match composite(services, images[0], images[1], images[2], &self.config) {
            Ok(color) => {
                info!(
                    red = %stacks[0].id(),
                    green = %stacks[1].id(),
                    blue = %stacks[2].id(),
                    "RGB preview updated"
                );
                self.preview = Some(color);
                Ok(true)
            }
            Err(e) => {
                warn!(error = %e, "RGB composite failed, compositor disabled");
                self.enabled = false;
                self.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::LocalServices;
    use ndarray::Array2;

    fn square(h: usize, w: usize, top: usize, left: usize, level: f32) -> Image {
        let data = Array2::from_shape_fn((h, w), |(y, x)| {
            let inside = (top..top + 12).contains(&y) && (left..left + 12).contains(&x);
            if inside {
                level
            } else {
                0.05
            }
        });
        Image::mono(data)
    }

    #[test]
    fn test_composite_produces_three_planes() {
        let red = square(64, 64, 26, 26, 0.8);
        let green = square(64, 64, 28, 25, 0.6);
        let blue = square(64, 64, 27, 29, 0.4);
        let color = composite(&LocalServices, &red, &green, &blue, &CompositeConfig::default()).unwrap();
        assert_eq!(color.red.data.dim(), (64, 64));
        assert_eq!(color.green.data.dim(), (64, 64));
        assert_eq!(color.blue.data.dim(), (64, 64));
        let max = color.red.data.iter().cloned().fold(f32::MIN, f32::max);
        assert!(max <= 1.0 && max > 0.9);
    }

    #[test]
    fn test_composite_size_mismatch_names_channel() {
        let red = square(64, 64, 26, 26, 0.8);
        let green = square(32, 32, 10, 10, 0.6);
        let blue = square(64, 64, 27, 29, 0.4);
        let err = composite(&LocalServices, &red, &green, &blue, &CompositeConfig::default()).unwrap_err();
        assert!(err.to_string().contains("green"), "{err}");
    }

    #[test]
    fn test_new_compositor_is_disabled() {
        let compositor = RgbCompositor::new([StackId(1), StackId(2), StackId(3)], CompositeConfig::default());
        assert!(!compositor.is_enabled());
        assert!(compositor.preview().is_none());
        assert!(compositor.last_error().is_none());
    }
}
