pub mod fits;
pub mod image_io;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{LiveStackError, Result};
use crate::frame::{Image, Keywords};

pub use fits::FitsDepth;

/// On-disk encoding of a running image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputEncoding {
    /// FITS, BITPIX 16.
    Fits16,
    /// FITS, BITPIX -32.
    Fits32,
    /// Lossless 16-bit PNG; keywords are dropped.
    Png16,
}

impl OutputEncoding {
    /// Pick the encoding from the two output toggles.
    pub fn from_flags(save_compressed: bool, save_as_16bit_int: bool) -> Self {
        if save_compressed {
            Self::Png16
        } else if save_as_16bit_int {
            Self::Fits16
        } else {
            Self::Fits32
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Fits16 | Self::Fits32 => "fits",
            Self::Png16 => "png",
        }
    }
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

pub fn is_fits(path: &Path) -> bool {
    matches!(extension_of(path).as_str(), "fits" | "fit" | "fts")
}

/// Read an image, choosing the decoder from the file extension.
pub fn read_image(path: &Path) -> Result<Image> {
    match extension_of(path).as_str() {
        "fits" | "fit" | "fts" => fits::read_fits(path),
        "png" | "tif" | "tiff" | "jpg" | "jpeg" => image_io::load_raster(path),
        _ => Err(LiveStackError::UnsupportedFormat(path.to_path_buf())),
    }
}

/// Header keywords only. Formats without a header yield an empty set.
pub fn read_keywords(path: &Path) -> Result<Keywords> {
    if is_fits(path) {
        fits::read_fits_keywords(path)
    } else {
        Ok(Keywords::new())
    }
}

/// Write an image, choosing the format from the file extension.
/// FITS output uses BITPIX 16 when `int16` is set, -32 otherwise.
pub fn write_image(image: &Image, path: &Path, int16: bool) -> Result<()> {
    match extension_of(path).as_str() {
        "fits" | "fit" | "fts" => fits::write_fits(
            image,
            path,
            if int16 {
                FitsDepth::UInt16
            } else {
                FitsDepth::Float32
            },
        ),
        "png" => image_io::save_png16(&image.data, path),
        _ => Err(LiveStackError::UnsupportedFormat(path.to_path_buf())),
    }
}

/// Write with an explicit encoding, ignoring the path's extension.
pub fn write_encoded(image: &Image, path: &Path, encoding: OutputEncoding) -> Result<()> {
    match encoding {
        OutputEncoding::Fits16 => fits::write_fits(image, path, FitsDepth::UInt16),
        OutputEncoding::Fits32 => fits::write_fits(image, path, FitsDepth::Float32),
        OutputEncoding::Png16 => image_io::save_png16(&image.data, path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_from_flags() {
        assert_eq!(OutputEncoding::from_flags(true, true), OutputEncoding::Png16);
        assert_eq!(OutputEncoding::from_flags(false, true), OutputEncoding::Fits16);
        assert_eq!(OutputEncoding::from_flags(false, false), OutputEncoding::Fits32);
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let err = read_image(Path::new("frame.xyz")).unwrap_err();
        assert!(matches!(err, LiveStackError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_fits_extension_case_insensitive() {
        assert!(is_fits(Path::new("a.FIT")));
        assert!(is_fits(Path::new("a.fits")));
        assert!(!is_fits(Path::new("a.png")));
    }
}
