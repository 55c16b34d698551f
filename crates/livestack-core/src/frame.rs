use std::collections::BTreeMap;

use ndarray::Array2;

use crate::color::process::luminance;
use crate::error::{LiveStackError, Result};

/// A single image plane.
/// Pixel values are f32, nominally in [0.0, 1.0].
#[derive(Clone, Debug)]
pub struct Frame {
    /// Pixel data, row-major, shape = (height, width)
    pub data: Array2<f32>,
    /// Original bit depth before conversion (8, 16, 32 or -32 for float)
    pub original_bit_depth: i8,
}

impl Frame {
    pub fn new(data: Array2<f32>, bit_depth: i8) -> Self {
        Self {
            data,
            original_bit_depth: bit_depth,
        }
    }

    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    pub fn mean(&self) -> f32 {
        self.data.mean().unwrap_or(0.0)
    }
}

/// Color image composed of separate channel frames.
#[derive(Clone, Debug)]
pub struct ColorFrame {
    pub red: Frame,
    pub green: Frame,
    pub blue: Frame,
}

/// Pixel content of an image: one plane or three.
#[derive(Clone, Debug)]
#[allow(clippy::large_enum_variant)]
pub enum FrameData {
    Mono(Frame),
    Color(ColorFrame),
}

impl FrameData {
    /// (height, width) of every plane.
    pub fn dim(&self) -> (usize, usize) {
        match self {
            Self::Mono(f) => f.data.dim(),
            Self::Color(cf) => cf.red.data.dim(),
        }
    }

    pub fn is_color(&self) -> bool {
        matches!(self, Self::Color(_))
    }

    pub fn channel_count(&self) -> usize {
        match self {
            Self::Mono(_) => 1,
            Self::Color(_) => 3,
        }
    }

    pub fn channels(&self) -> Vec<&Frame> {
        match self {
            Self::Mono(f) => vec![f],
            Self::Color(cf) => vec![&cf.red, &cf.green, &cf.blue],
        }
    }

    /// Apply `f` to each plane independently.
    pub fn map_channels<F>(&self, mut f: F) -> FrameData
    where
        F: FnMut(&Frame) -> Frame,
    {
        match self {
            Self::Mono(frame) => Self::Mono(f(frame)),
            Self::Color(cf) => Self::Color(ColorFrame {
                red: f(&cf.red),
                green: f(&cf.green),
                blue: f(&cf.blue),
            }),
        }
    }

    /// Fallible variant of [`FrameData::map_channels`]; `f` also receives the
    /// channel index.
    pub fn try_map_channels<F>(&self, mut f: F) -> Result<FrameData>
    where
        F: FnMut(usize, &Frame) -> Result<Frame>,
    {
        Ok(match self {
            Self::Mono(frame) => Self::Mono(f(0, frame)?),
            Self::Color(cf) => Self::Color(ColorFrame {
                red: f(0, &cf.red)?,
                green: f(1, &cf.green)?,
                blue: f(2, &cf.blue)?,
            }),
        })
    }

    /// Luminance plane (the plane itself for mono data).
    pub fn luminance(&self) -> Frame {
        match self {
            Self::Mono(f) => f.clone(),
            Self::Color(cf) => luminance(cf),
        }
    }

    /// Error unless `other` has the same plane geometry.
    pub fn check_geometry(&self, other: &FrameData) -> Result<()> {
        let (h, w) = self.dim();
        let (oh, ow) = other.dim();
        if h != oh || w != ow {
            return Err(LiveStackError::GeometryMismatch {
                expected_width: w,
                expected_height: h,
                width: ow,
                height: oh,
            });
        }
        Ok(())
    }
}

/// Instrument keywords carried alongside pixel data (FITS header cards,
/// minus the structural ones). Values are stored unquoted.
pub type Keywords = BTreeMap<String, String>;

/// Pixel data plus the instrument keywords it was read with.
#[derive(Clone, Debug)]
pub struct Image {
    pub data: FrameData,
    pub keywords: Keywords,
}

impl Image {
    pub fn new(data: FrameData) -> Self {
        Self {
            data,
            keywords: Keywords::new(),
        }
    }

    pub fn mono(data: Array2<f32>) -> Self {
        Self::new(FrameData::Mono(Frame::new(data, -32)))
    }

    pub fn with_keywords(mut self, keywords: Keywords) -> Self {
        self.keywords = keywords;
        self
    }

    /// A new image with `data` and this image's keywords. Every
    /// transformation goes through here so metadata survives it.
    pub fn with_data(&self, data: FrameData) -> Image {
        Image {
            data,
            keywords: self.keywords.clone(),
        }
    }

    pub fn is_color(&self) -> bool {
        self.data.is_color()
    }

    pub fn dim(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn keyword(&self, key: &str) -> Option<&str> {
        self.keywords.get(key).map(String::as_str)
    }

    /// Instrument filter name; empty when the frame carries none.
    pub fn filter(&self) -> String {
        filter_of(&self.keywords)
    }

    /// Exposure time in seconds, from `EXPTIME` or `EXPOSURE`.
    pub fn exposure(&self) -> Option<f64> {
        ["EXPTIME", "EXPOSURE"]
            .iter()
            .find_map(|key| self.keyword(key))
            .and_then(|v| v.trim().parse::<f64>().ok())
    }
}

/// Instrument filter name from a keyword set; empty when absent.
pub fn filter_of(keywords: &Keywords) -> String {
    keywords
        .get("FILTER")
        .map(|v| v.trim().trim_matches('\'').trim().to_string())
        .unwrap_or_default()
}

/// Alignment offset for a frame relative to a reference.
#[derive(Clone, Debug, Default)]
pub struct AlignmentOffset {
    pub dx: f64,
    pub dy: f64,
}
