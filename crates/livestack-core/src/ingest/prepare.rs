use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::calibration::{dark_scale, CalibrationMasters};
use crate::consts::{CALIBRATED_PREFIX, DEBAYERED_PREFIX};
use crate::error::Result;
use crate::frame::Image;
use crate::io::{is_fits, OutputEncoding};
use crate::services::ImageServices;
use crate::stack::config::CalibrationConfig;
use crate::stack::StackConfig;

/// Master frames loaded once per session, keyed by path. A master that
/// cannot be read is remembered as missing and its step skipped.
#[derive(Debug, Default)]
pub struct MasterCache {
    entries: HashMap<PathBuf, Option<Image>>,
}

impl MasterCache {
    fn load(&mut self, path: &Path, services: &dyn ImageServices, warnings: &mut Vec<String>) -> Option<Image> {
        if let Some(entry) = self.entries.get(path) {
            return entry.clone();
        }
        let entry = match services.read_image(path) {
            Ok(image) => {
                debug!(path = %path.display(), "Loaded calibration master");
                Some(image)
            }
            Err(e) => {
                warnings.push(format!(
                    "Calibration master {} unusable, step skipped: {e}",
                    path.display()
                ));
                None
            }
        };
        self.entries.insert(path.to_path_buf(), entry.clone());
        entry
    }

    /// Masters for a calibration config, plus a warning for every master
    /// that failed to load for the first time.
    pub fn masters(
        &mut self,
        config: &CalibrationConfig,
        services: &dyn ImageServices,
    ) -> (CalibrationMasters, Vec<String>) {
        let mut warnings = Vec::new();
        let mut load = |path: &Option<PathBuf>| {
            path.as_deref()
                .and_then(|p| self.load(p, services, &mut warnings))
        };
        let masters = CalibrationMasters {
            bias: load(&config.bias_path),
            dark: load(&config.dark_path),
            flat: load(&config.flat_path),
        };
        (masters, warnings)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Everything a frame needs to be prepared for alignment.
#[derive(Clone, Copy)]
pub struct Preparation<'a> {
    pub services: &'a dyn ImageServices,
    pub masters: &'a CalibrationMasters,
    pub config: &'a StackConfig,
}

/// Name of an intermediate product of `name`. Non-FITS sources get a FITS
/// intermediate so keywords survive.
pub fn intermediate_name(prefix: &str, name: &str) -> String {
    if is_fits(Path::new(name)) {
        format!("{prefix}{name}")
    } else {
        let stem = Path::new(name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.to_string());
        format!("{prefix}{stem}.fits")
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl Preparation<'_> {
    fn intermediate_encoding(&self) -> OutputEncoding {
        if self.config.output.save_as_16bit_int {
            OutputEncoding::Fits16
        } else {
            OutputEncoding::Fits32
        }
    }

    /// Step 1 alone: calibrate against the loaded masters.
    pub fn calibrate(&self, raw: &Image) -> Result<Image> {
        let cal = &self.config.calibration;
        let scale = dark_scale(cal.optimize_dark, cal.dark_exposure_time, raw.exposure());
        self.services.calibrate(raw, self.masters, scale, cal.pedestal)
    }

    pub fn calibration_enabled(&self) -> bool {
        !self.masters.is_empty()
    }

    /// Read and calibrate a whole batch, writing every calibrated frame as
    /// `ezc_<name>` next to its source.
    pub fn calibrate_batch(&self, paths: &[PathBuf]) -> Vec<Result<Image>> {
        paths
            .iter()
            .map(|path| {
                let raw = self.services.read_image(path)?;
                let calibrated = self.calibrate(&raw)?;
                let out = path.with_file_name(intermediate_name(CALIBRATED_PREFIX, &file_name(path)));
                if let Err(e) = self
                    .services
                    .write_image(&calibrated, &out, self.intermediate_encoding())
                {
                    warn!(path = %out.display(), error = %e, "Could not save calibrated frame");
                }
                Ok(calibrated)
            })
            .collect()
    }

    /// Full preparation of the file at `path`.
    pub fn prepare(&self, path: &Path) -> Result<Image> {
        let raw = self.services.read_image(path)?;
        if self.calibration_enabled() {
            let calibrated = self.calibrate(&raw)?;
            if self.config.output.save_calibrated_file {
                let out = path.with_file_name(intermediate_name(CALIBRATED_PREFIX, &file_name(path)));
                if let Err(e) =
                    self.services
                        .write_image(&calibrated, &out, self.intermediate_encoding())
                {
                    warn!(path = %out.display(), error = %e, "Could not save calibrated frame");
                }
            }
            self.finish(path, calibrated, true)
        } else {
            self.finish(path, raw, false)
        }
    }

    /// Steps after calibration: debayer, downscale, background extraction,
    /// SCNR. `calibrated` says whether step 1 ran, which decides the
    /// debayer cache name.
    pub fn finish(&self, path: &Path, image: Image, calibrated: bool) -> Result<Image> {
        let config = self.config;
        let mut image = image;

        if config.color.is_cfa {
            image = self.debayer_cached(path, image, calibrated)?;
        }

        if config.processing.downscale_images && config.processing.downscale_amount > 1 {
            image = self
                .services
                .downsample(&image, config.processing.downscale_amount);
        }

        if config.processing.run_abe {
            image = self
                .services
                .extract_background(&image, config.processing.abe_degree)?;
        }

        if config.processing.scnr && image.is_color() {
            image = self.services.scnr(&image, config.processing.scnr_amount);
        }

        Ok(image)
    }

    fn debayer_cached(&self, path: &Path, image: Image, calibrated: bool) -> Result<Image> {
        let name = file_name(path);
        let calibrated_name = if calibrated {
            intermediate_name(CALIBRATED_PREFIX, &name)
        } else {
            name
        };
        let cache = path.with_file_name(intermediate_name(DEBAYERED_PREFIX, &calibrated_name));

        if cache.exists() {
            match self.services.read_image(&cache) {
                Ok(cached) if cached.is_color() => {
                    debug!(path = %cache.display(), "Reusing debayered frame");
                    return Ok(image.with_data(cached.data));
                }
                Ok(_) => warn!(path = %cache.display(), "Cached debayered frame is not colour"),
                Err(e) => warn!(path = %cache.display(), error = %e, "Cached debayered frame unreadable"),
            }
        }

        let color = self
            .services
            .debayer(&image, self.config.color.cfa_pattern)?;
        if self.config.output.save_debayered {
            if let Err(e) = self
                .services
                .write_image(&color, &cache, self.intermediate_encoding())
            {
                warn!(path = %cache.display(), error = %e, "Could not save debayered frame");
            }
        }
        Ok(color)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intermediate_names() {
        assert_eq!(intermediate_name(CALIBRATED_PREFIX, "a.fits"), "ezc_a.fits");
        assert_eq!(intermediate_name(DEBAYERED_PREFIX, "ezc_a.fit"), "ezd_ezc_a.fit");
        assert_eq!(intermediate_name(CALIBRATED_PREFIX, "a.png"), "ezc_a.fits");
    }
}
