//! Image-processing collaborators consumed by the live-stacking core.
//!
//! The pipeline only talks to [`ImageServices`]. [`LocalServices`] is the
//! in-process implementation; [`TimeoutServices`] bounds every fallible
//! call of another implementation with a deadline.

use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::align::align_image;
use crate::calibration::{self, CalibrationMasters};
use crate::color::debayer::{debayer, CfaPattern};
use crate::color::process::scnr;
use crate::error::{LiveStackError, Result};
use crate::filters::background::extract_background;
use crate::filters::downsample::downsample;
use crate::frame::{FrameData, Image, Keywords};
use crate::io::{self, OutputEncoding};
use crate::noise::{self, NoiseEstimate};

pub trait ImageServices: Send + Sync {
    /// Decode an image. Failure is expected for partial or foreign files.
    fn read_image(&self, path: &Path) -> Result<Image>;

    /// Instrument keywords of a file without its pixels.
    fn read_keywords(&self, path: &Path) -> Result<Keywords> {
        Ok(self.read_image(path)?.keywords)
    }

    fn write_image(&self, image: &Image, path: &Path, encoding: OutputEncoding) -> Result<()>;

    fn calibrate(
        &self,
        light: &Image,
        masters: &CalibrationMasters,
        dark_scale: f32,
        pedestal: u16,
    ) -> Result<Image>;

    fn debayer(&self, raw: &Image, pattern: CfaPattern) -> Result<Image>;

    fn downsample(&self, image: &Image, factor: usize) -> Image;

    /// Register `target` onto `reference`. Failure is a normal outcome.
    fn align(&self, reference: &Image, target: &Image) -> Result<Image>;

    fn noise_estimate(&self, image: &Image) -> Result<NoiseEstimate>;

    fn extract_background(&self, image: &Image, degree: usize) -> Result<Image>;

    fn scnr(&self, image: &Image, amount: f32) -> Image;
}

/// In-process implementation of every service.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalServices;

impl ImageServices for LocalServices {
    fn read_image(&self, path: &Path) -> Result<Image> {
        io::read_image(path)
    }

    fn read_keywords(&self, path: &Path) -> Result<Keywords> {
        io::read_keywords(path)
    }

    fn write_image(&self, image: &Image, path: &Path, encoding: OutputEncoding) -> Result<()> {
        io::write_encoded(image, path, encoding)
    }

    fn calibrate(
        &self,
        light: &Image,
        masters: &CalibrationMasters,
        dark_scale: f32,
        pedestal: u16,
    ) -> Result<Image> {
        calibration::calibrate(light, masters, dark_scale, pedestal)
    }

    fn debayer(&self, raw: &Image, pattern: CfaPattern) -> Result<Image> {
        match &raw.data {
            FrameData::Mono(frame) => Ok(raw.with_data(FrameData::Color(debayer(frame, pattern)))),
            FrameData::Color(_) => Err(LiveStackError::ChannelMismatch {
                expected: 1,
                actual: raw.data.channel_count(),
            }),
        }
    }

    fn downsample(&self, image: &Image, factor: usize) -> Image {
        image.with_data(image.data.map_channels(|f| downsample(f, factor)))
    }

    fn align(&self, reference: &Image, target: &Image) -> Result<Image> {
        align_image(reference, target)
    }

    fn noise_estimate(&self, image: &Image) -> Result<NoiseEstimate> {
        noise::noise_estimate(image)
    }

    fn extract_background(&self, image: &Image, degree: usize) -> Result<Image> {
        let data = image
            .data
            .try_map_channels(|_, f| extract_background(f, degree))?;
        Ok(image.with_data(data))
    }

    fn scnr(&self, image: &Image, amount: f32) -> Image {
        match &image.data {
            FrameData::Color(cf) => image.with_data(FrameData::Color(scnr(cf, amount))),
            FrameData::Mono(_) => image.clone(),
        }
    }
}

/// Runs every fallible call of the wrapped services on a worker thread and
/// gives up after `timeout`. A call that times out keeps running in the
/// background; its result is discarded.
#[derive(Clone)]
pub struct TimeoutServices {
    inner: Arc<dyn ImageServices>,
    timeout: Duration,
}

impl TimeoutServices {
    pub fn new(inner: Arc<dyn ImageServices>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    fn run<T, F>(&self, operation: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn ImageServices) -> Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name(format!("livestack-{operation}"))
            .spawn(move || {
                let _ = tx.send(f(inner.as_ref()));
            })?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                warn!(operation, seconds = self.timeout.as_secs(), "Service call timed out");
                Err(LiveStackError::Timeout {
                    operation,
                    seconds: self.timeout.as_secs(),
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(LiveStackError::Io(std::io::Error::other(
                format!("{operation} worker terminated"),
            ))),
        }
    }
}

impl ImageServices for TimeoutServices {
    fn read_image(&self, path: &Path) -> Result<Image> {
        let path = path.to_path_buf();
        self.run("read_image", move |s| s.read_image(&path))
    }

    fn read_keywords(&self, path: &Path) -> Result<Keywords> {
        let path = path.to_path_buf();
        self.run("read_keywords", move |s| s.read_keywords(&path))
    }

    fn write_image(&self, image: &Image, path: &Path, encoding: OutputEncoding) -> Result<()> {
        let (image, path) = (image.clone(), path.to_path_buf());
        self.run("write_image", move |s| s.write_image(&image, &path, encoding))
    }

    fn calibrate(
        &self,
        light: &Image,
        masters: &CalibrationMasters,
        dark_scale: f32,
        pedestal: u16,
    ) -> Result<Image> {
        let (light, masters) = (light.clone(), masters.clone());
        self.run("calibrate", move |s| {
            s.calibrate(&light, &masters, dark_scale, pedestal)
        })
    }

    fn debayer(&self, raw: &Image, pattern: CfaPattern) -> Result<Image> {
        let raw = raw.clone();
        self.run("debayer", move |s| s.debayer(&raw, pattern))
    }

    fn downsample(&self, image: &Image, factor: usize) -> Image {
        self.inner.downsample(image, factor)
    }

    fn align(&self, reference: &Image, target: &Image) -> Result<Image> {
        let (reference, target) = (reference.clone(), target.clone());
        self.run("align", move |s| s.align(&reference, &target))
    }

    fn noise_estimate(&self, image: &Image) -> Result<NoiseEstimate> {
        let image = image.clone();
        self.run("noise_estimate", move |s| s.noise_estimate(&image))
    }

    fn extract_background(&self, image: &Image, degree: usize) -> Result<Image> {
        let image = image.clone();
        self.run("extract_background", move |s| {
            s.extract_background(&image, degree)
        })
    }

    fn scnr(&self, image: &Image, amount: f32) -> Image {
        self.inner.scnr(image, amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    /// Delegates to `LocalServices` except for a slow `align`.
    struct SlowAlign(Duration);

    impl ImageServices for SlowAlign {
        fn read_image(&self, path: &Path) -> Result<Image> {
            LocalServices.read_image(path)
        }
        fn write_image(&self, image: &Image, path: &Path, encoding: OutputEncoding) -> Result<()> {
            LocalServices.write_image(image, path, encoding)
        }
        fn calibrate(
            &self,
            light: &Image,
            masters: &CalibrationMasters,
            dark_scale: f32,
            pedestal: u16,
        ) -> Result<Image> {
            LocalServices.calibrate(light, masters, dark_scale, pedestal)
        }
        fn debayer(&self, raw: &Image, pattern: CfaPattern) -> Result<Image> {
            LocalServices.debayer(raw, pattern)
        }
        fn downsample(&self, image: &Image, factor: usize) -> Image {
            LocalServices.downsample(image, factor)
        }
        fn align(&self, _reference: &Image, target: &Image) -> Result<Image> {
            thread::sleep(self.0);
            Ok(target.clone())
        }
        fn noise_estimate(&self, image: &Image) -> Result<NoiseEstimate> {
            LocalServices.noise_estimate(image)
        }
        fn extract_background(&self, image: &Image, degree: usize) -> Result<Image> {
            LocalServices.extract_background(image, degree)
        }
        fn scnr(&self, image: &Image, amount: f32) -> Image {
            LocalServices.scnr(image, amount)
        }
    }

    fn gray(v: f32) -> Image {
        Image::mono(Array2::from_elem((8, 8), v))
    }

    #[test]
    fn test_timeout_elapses() {
        let services = TimeoutServices::new(
            Arc::new(SlowAlign(Duration::from_millis(500))),
            Duration::from_millis(20),
        );
        let err = services.align(&gray(0.5), &gray(0.5)).unwrap_err();
        assert!(matches!(
            err,
            LiveStackError::Timeout {
                operation: "align",
                ..
            }
        ));
    }

    #[test]
    fn test_fast_call_passes_through() {
        let services = TimeoutServices::new(
            Arc::new(SlowAlign(Duration::ZERO)),
            Duration::from_secs(5),
        );
        let out = services.align(&gray(0.5), &gray(0.25)).unwrap();
        assert_eq!(out.data.channels()[0].data[[0, 0]], 0.25);
    }

    #[test]
    fn test_debayer_rejects_color() {
        let color = LocalServices
            .debayer(&gray(0.5), CfaPattern::RGGB)
            .unwrap();
        assert!(color.is_color());
        assert!(LocalServices.debayer(&color, CfaPattern::RGGB).is_err());
    }

    #[test]
    fn test_scnr_mono_is_identity() {
        let img = gray(0.4);
        let out = LocalServices.scnr(&img, 1.0);
        assert_eq!(out.data.channels()[0].data, img.data.channels()[0].data);
    }
}
