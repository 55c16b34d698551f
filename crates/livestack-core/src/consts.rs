/// Filename prefix of calibrated frames written next to their source.
pub const CALIBRATED_PREFIX: &str = "ezc_";

/// Filename prefix of debayered frames; also the debayer cache key prefix.
pub const DEBAYERED_PREFIX: &str = "ezd_";

/// Fixed delay applied to every directory-change notification before the
/// directory is inspected.
pub const DEFAULT_FIXED_SETTLE_MS: u64 = 1_000;

/// Default user-configurable settle time between reserving the processing
/// lock and re-listing the directory.
pub const DEFAULT_SETTLE_TIME_SECS: u64 = 10;

/// Default CLI event-loop tick.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;

/// Default timeout wrapped around calls into the image services.
pub const DEFAULT_SERVICE_TIMEOUT_SECS: u64 = 300;

/// Incoming pixels brighter than `OUTLIER_RATIO` times the running value are
/// treated as hot-pixel spikes and keep the running value.
pub const OUTLIER_RATIO: f32 = 2.0;

/// Incoming pixels equal to this value are treated as dropped reads.
pub const BLANK_VALUE: f32 = 0.0;

/// Separator of filename lists in persisted properties.
pub const LIST_SEPARATOR: char = ',';

/// Separator of the persisted noise-evaluation history.
pub const NOISE_SEPARATOR: char = ';';

/// Suffix of the properties sidecar stored next to a running-average image.
pub const PROPERTIES_SUFFIX: &str = ".livestack.toml";

/// Maximum number of lines kept in a stack's console log.
pub const CONSOLE_LOG_CAPACITY: usize = 500;

/// Pedestal values are given in 16-bit DN.
pub const DN_SCALE: f32 = 65535.0;

/// Noise estimates are recorded in 16-bit DN.
pub const NOISE_SCALE: f64 = 65535.0;

/// Wavelet layers tried by the MRS noise estimator, largest first.
pub const MRS_MAX_LAYERS: usize = 4;
pub const MRS_MIN_LAYERS: usize = 2;

/// Minimum noise-pixel fraction the MRS estimate must retain.
pub const MRS_MIN_PIXEL_FRACTION: f64 = 0.01;

/// Absolute minimum number of pixels a noise estimate may be based on.
pub const MIN_NOISE_PIXELS: usize = 16;

/// Convergence tolerance for the iterative noise estimators.
pub const NOISE_CONVERGENCE: f64 = 1e-3;

/// Iteration cap for the iterative noise estimators.
pub const NOISE_MAX_ITERATIONS: usize = 10;

/// Clipping factor of the k-sigma estimator and the MRS significance test.
pub const NOISE_K: f64 = 3.0;

/// Standard deviation of unit Gaussian white noise in the first B3-spline
/// a trous wavelet layers.
pub const B3_NOISE_SIGMA: [f64; 6] = [0.889, 0.200, 0.086, 0.041, 0.020, 0.010];

/// B3 spline 1D kernel coefficients: [1, 4, 6, 4, 1] / 16.
pub const B3_KERNEL: [f32; 5] = [1.0 / 16.0, 4.0 / 16.0, 6.0 / 16.0, 4.0 / 16.0, 1.0 / 16.0];

/// Minimum peak-to-sidelobe ratio of the phase correlation surface for a
/// registration to be accepted.
pub const MIN_ALIGNMENT_PSR: f64 = 8.0;

/// Grid cells per axis sampled by background extraction.
pub const ABE_GRID_SIZE: usize = 16;

/// Highest supported background polynomial degree.
pub const MAX_ABE_DEGREE: usize = 6;

/// Default percentiles of the compositor display stretch.
pub const DEFAULT_STRETCH_LOW: f32 = 0.001;
pub const DEFAULT_STRETCH_HIGH: f32 = 0.999;

/// Small epsilon to avoid division by zero in floating-point comparisons.
pub const EPSILON: f32 = 1e-10;

/// ITU-R BT.601 luminance coefficient for the red channel.
pub const LUMINANCE_R: f32 = 0.299;

/// ITU-R BT.601 luminance coefficient for the green channel.
pub const LUMINANCE_G: f32 = 0.587;

/// ITU-R BT.601 luminance coefficient for the blue channel.
pub const LUMINANCE_B: f32 = 0.114;

/// Default integer downscale factor.
pub const DEFAULT_DOWNSCALE_AMOUNT: usize = 2;

/// Default background polynomial degree.
pub const DEFAULT_ABE_DEGREE: usize = 2;

/// Default SCNR strength.
pub const DEFAULT_SCNR_AMOUNT: f32 = 1.0;

/// Keys of the properties persisted alongside a running-average image.
pub mod property {
    pub const WATCH_PATH: &str = "WatchPath";
    pub const EXTENSION: &str = "Extension";
    pub const REFERENCE_PATH: &str = "ReferencePath";
    pub const FILTER: &str = "Filter";
    pub const IGNORE_FILTER: &str = "IgnoreFilter";
    pub const PROCESSED_FILES: &str = "ProcessedFiles";
    pub const IGNORED_FILES: &str = "IgnoredFiles";
    pub const CALIBRATED: &str = "Calibrated";
    pub const BIAS_PATH: &str = "BiasPath";
    pub const DARK_PATH: &str = "DarkPath";
    pub const FLAT_PATH: &str = "FlatPath";
    pub const OPTIMIZE_DARK: &str = "OptimizeDark";
    pub const DARK_EXPOSURE_TIME: &str = "DarkExposureTime";
    pub const PEDESTAL: &str = "Pedestal";
    pub const IS_CFA: &str = "IsCFA";
    pub const BAYER_PATTERN: &str = "BayerPat";
    pub const DOWNSCALE_IMAGES: &str = "DownscaleImages";
    pub const DOWNSCALE_AMOUNT: &str = "DownscaleImagesAmount";
    pub const RUN_ABE: &str = "RunABE";
    pub const ABE_DEGREE: &str = "ABEdegree";
    pub const SCNR: &str = "SCNR";
    pub const SCNR_AMOUNT: &str = "SCNRAmount";
    pub const RUN_NOISE_EVAL: &str = "RunNoiseEval";
    pub const SAVE_CALIBRATED: &str = "SaveCalibratedFile";
    pub const SAVE_COMPRESSED: &str = "SaveCompressed";
    pub const SAVE_AS_16BIT_INT: &str = "SaveAs16BitInt";
    pub const SAVE_DEBAYERED: &str = "SaveDebayered";
    pub const NOISE_VALUES: &str = "NoiseEvaluation:Values";
}
