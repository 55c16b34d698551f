use std::fmt;
use std::str::FromStr;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::LiveStackError;
use crate::frame::{ColorFrame, Frame};

const RED: usize = 0;
const GREEN: usize = 1;
const BLUE: usize = 2;

/// Color-filter-array layout of a one-shot-color sensor, named by the
/// 2x2 cell read row by row from the top-left pixel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(clippy::upper_case_acronyms)]
pub enum CfaPattern {
    #[default]
    RGGB,
    BGGR,
    GBRG,
    GRBG,
    GRGB,
    GBGR,
    RGBG,
    BGRG,
}

impl CfaPattern {
    pub const ALL: [CfaPattern; 8] = [
        Self::RGGB,
        Self::BGGR,
        Self::GBRG,
        Self::GRBG,
        Self::GRGB,
        Self::GBGR,
        Self::RGBG,
        Self::BGRG,
    ];

    /// Channel at each position of the 2x2 cell: `[[top-left, top-right],
    /// [bottom-left, bottom-right]]`.
    fn cell(self) -> [[usize; 2]; 2] {
        match self {
            Self::RGGB => [[RED, GREEN], [GREEN, BLUE]],
            Self::BGGR => [[BLUE, GREEN], [GREEN, RED]],
            Self::GBRG => [[GREEN, BLUE], [RED, GREEN]],
            Self::GRBG => [[GREEN, RED], [BLUE, GREEN]],
            Self::GRGB => [[GREEN, RED], [GREEN, BLUE]],
            Self::GBGR => [[GREEN, BLUE], [GREEN, RED]],
            Self::RGBG => [[RED, GREEN], [BLUE, GREEN]],
            Self::BGRG => [[BLUE, GREEN], [RED, GREEN]],
        }
    }

    /// Channel index (0=R, 1=G, 2=B) sampled at `(row, col)`.
    pub fn channel_at(self, row: usize, col: usize) -> usize {
        self.cell()[row % 2][col % 2]
    }
}

impl fmt::Display for CfaPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RGGB => "RGGB",
            Self::BGGR => "BGGR",
            Self::GBRG => "GBRG",
            Self::GRBG => "GRBG",
            Self::GRGB => "GRGB",
            Self::GBGR => "GBGR",
            Self::RGBG => "RGBG",
            Self::BGRG => "BGRG",
        };
        write!(f, "{name}")
    }
}

impl FromStr for CfaPattern {
    type Err = LiveStackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|p| p.to_string() == wanted)
            .ok_or_else(|| LiveStackError::InvalidConfig(format!("unknown Bayer pattern {s:?}")))
    }
}

/// Bilinear demosaic of a raw CFA mosaic.
///
/// Each missing channel value is the mean of the same-colored samples in the
/// 3x3 neighbourhood, which reduces to the usual cross/diagonal/horizontal/
/// vertical averages for the four Bayer layouts.
pub fn debayer(raw: &Frame, pattern: CfaPattern) -> ColorFrame {
    let (h, w) = raw.data.dim();
    let mut planes = [
        Array2::<f32>::zeros((h, w)),
        Array2::<f32>::zeros((h, w)),
        Array2::<f32>::zeros((h, w)),
    ];

    for row in 0..h {
        for col in 0..w {
            let native = pattern.channel_at(row, col);
            for (channel, plane) in planes.iter_mut().enumerate() {
                plane[[row, col]] = if channel == native {
                    raw.data[[row, col]]
                } else {
                    neighbour_mean(&raw.data, pattern, row, col, channel)
                };
            }
        }
    }

    let [red, green, blue] = planes;
    let depth = raw.original_bit_depth;
    ColorFrame {
        red: Frame::new(red, depth),
        green: Frame::new(green, depth),
        blue: Frame::new(blue, depth),
    }
}

/// Mean of the in-bounds 3x3 neighbours of `(row, col)` that sample `channel`.
#[inline]
fn neighbour_mean(
    raw: &Array2<f32>,
    pattern: CfaPattern,
    row: usize,
    col: usize,
    channel: usize,
) -> f32 {
    let (h, w) = raw.dim();
    let mut sum = 0.0f32;
    let mut count = 0u32;
    for r in row.saturating_sub(1)..=(row + 1).min(h - 1) {
        for c in col.saturating_sub(1)..=(col + 1).min(w - 1) {
            if (r, c) != (row, col) && pattern.channel_at(r, c) == channel {
                sum += raw[[r, c]];
                count += 1;
            }
        }
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_pattern_round_trips_through_display() {
        for pattern in CfaPattern::ALL {
            let parsed: CfaPattern = pattern.to_string().parse().unwrap();
            assert_eq!(parsed, pattern);
        }
        assert_eq!("rggb".parse::<CfaPattern>().unwrap(), CfaPattern::RGGB);
        assert!("XYZW".parse::<CfaPattern>().is_err());
    }

    #[test]
    fn test_each_cell_has_all_three_colors() {
        for pattern in CfaPattern::ALL {
            let mut seen = [0; 3];
            for row in 0..2 {
                for col in 0..2 {
                    seen[pattern.channel_at(row, col)] += 1;
                }
            }
            assert_eq!(seen, [1, 2, 1], "{pattern}");
        }
    }
}
