use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::color::debayer::CfaPattern;
use crate::consts::{DEFAULT_ABE_DEGREE, DEFAULT_DOWNSCALE_AMOUNT, DEFAULT_SCNR_AMOUNT, MAX_ABE_DEGREE};
use crate::error::{LiveStackError, Result};
use crate::io::OutputEncoding;

/// Per-stack settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StackConfig {
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub color: ColorConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Instrument filter a frame must carry to join this stack.
    pub filter: String,
    /// Accept frames regardless of their filter.
    pub ignore_filter: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub bias_path: Option<PathBuf>,
    pub dark_path: Option<PathBuf>,
    pub flat_path: Option<PathBuf>,
    /// Scale the dark by light exposure / `dark_exposure_time`.
    pub optimize_dark: bool,
    /// Exposure of the dark master, seconds.
    pub dark_exposure_time: f64,
    /// Offset added after calibration, in 16-bit DN.
    pub pedestal: u16,
}

impl CalibrationConfig {
    pub fn has_masters(&self) -> bool {
        self.bias_path.is_some() || self.dark_path.is_some() || self.flat_path.is_some()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorConfig {
    pub is_cfa: bool,
    pub cfa_pattern: CfaPattern,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    pub downscale_images: bool,
    pub downscale_amount: usize,
    pub run_abe: bool,
    pub abe_degree: usize,
    pub scnr: bool,
    pub scnr_amount: f32,
    pub run_noise_eval: bool,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            downscale_images: false,
            downscale_amount: DEFAULT_DOWNSCALE_AMOUNT,
            run_abe: false,
            abe_degree: DEFAULT_ABE_DEGREE,
            scnr: false,
            scnr_amount: DEFAULT_SCNR_AMOUNT,
            run_noise_eval: false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Write `ezc_` calibrated frames next to their source.
    pub save_calibrated_file: bool,
    /// Persist the running image as 16-bit PNG instead of FITS.
    pub save_compressed: bool,
    pub save_as_16bit_int: bool,
    /// Write `ezd_` debayered frames, reused as a cache.
    pub save_debayered: bool,
}

impl OutputConfig {
    pub fn encoding(&self) -> OutputEncoding {
        OutputEncoding::from_flags(self.save_compressed, self.save_as_16bit_int)
    }
}

impl StackConfig {
    pub fn validate(&self) -> Result<()> {
        let p = &self.processing;
        if p.downscale_images && p.downscale_amount < 1 {
            return Err(LiveStackError::InvalidConfig(
                "downscale_amount must be at least 1".into(),
            ));
        }
        if p.run_abe && p.abe_degree > MAX_ABE_DEGREE {
            return Err(LiveStackError::InvalidConfig(format!(
                "abe_degree {} exceeds maximum {MAX_ABE_DEGREE}",
                p.abe_degree
            )));
        }
        if !(0.0..=1.0).contains(&p.scnr_amount) {
            return Err(LiveStackError::InvalidConfig(format!(
                "scnr_amount {} outside [0, 1]",
                p.scnr_amount
            )));
        }
        let c = &self.calibration;
        if c.optimize_dark && c.dark_exposure_time <= 0.0 {
            return Err(LiveStackError::InvalidConfig(
                "optimize_dark requires a positive dark_exposure_time".into(),
            ));
        }
        Ok(())
    }
}
