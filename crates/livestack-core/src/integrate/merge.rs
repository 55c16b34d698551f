use ndarray::Zip;

use crate::consts::{BLANK_VALUE, OUTLIER_RATIO};
use crate::error::{LiveStackError, Result};
use crate::frame::{Frame, FrameData, Image};

/// Thresholds of the per-pixel merge rule.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MergeGuard {
    /// Incoming values above `outlier_ratio * current` are rejected.
    pub outlier_ratio: f32,
    /// Incoming values equal to this are rejected.
    pub blank_value: f32,
}

impl Default for MergeGuard {
    fn default() -> Self {
        Self {
            outlier_ratio: OUTLIER_RATIO,
            blank_value: BLANK_VALUE,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelOutcome {
    Merged,
    Outlier,
    Blank,
}

/// Per-pixel outcome counts of one merge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub merged: usize,
    pub outliers: usize,
    pub blanks: usize,
}

impl MergeStats {
    fn record(&mut self, outcome: PixelOutcome) {
        match outcome {
            PixelOutcome::Merged => self.merged += 1,
            PixelOutcome::Outlier => self.outliers += 1,
            PixelOutcome::Blank => self.blanks += 1,
        }
    }

    fn add(&mut self, other: MergeStats) {
        self.merged += other.merged;
        self.outliers += other.outliers;
        self.blanks += other.blanks;
    }
}

impl MergeGuard {
    /// Fold `incoming` into `current`, which averages `n` frames.
    #[inline]
    pub fn merge_pixel(&self, current: f32, incoming: f32, n: usize) -> (f32, PixelOutcome) {
        if incoming > self.outlier_ratio * current {
            (current, PixelOutcome::Outlier)
        } else if incoming == self.blank_value {
            (current, PixelOutcome::Blank)
        } else {
            let n = n as f32;
            ((current * n + incoming) / (n + 1.0), PixelOutcome::Merged)
        }
    }
}

/// Merge one plane.
pub fn merge_frame(current: &Frame, incoming: &Frame, n: usize, guard: &MergeGuard) -> (Frame, MergeStats) {
    let mut out = current.data.clone();
    let mut stats = MergeStats::default();
    Zip::from(&mut out).and(&incoming.data).for_each(|c, &v| {
        let (value, outcome) = guard.merge_pixel(*c, v, n);
        *c = value;
        stats.record(outcome);
    });
    (Frame::new(out, current.original_bit_depth), stats)
}

/// Merge an aligned frame into the running image, channel by channel. The
/// running image's keywords are kept.
pub fn merge_image(
    current: &Image,
    incoming: &Image,
    n: usize,
    guard: &MergeGuard,
) -> Result<(Image, MergeStats)> {
    current.data.check_geometry(&incoming.data)?;
    if current.data.channel_count() != incoming.data.channel_count() {
        return Err(LiveStackError::ChannelMismatch {
            expected: current.data.channel_count(),
            actual: incoming.data.channel_count(),
        });
    }

    let incoming_planes = incoming.data.channels();
    let mut total = MergeStats::default();
    let data: FrameData = current.data.try_map_channels(|ch, plane| {
        let (merged, stats) = merge_frame(plane, incoming_planes[ch], n, guard);
        total.add(stats);
        Ok(merged)
    })?;

    Ok((current.with_data(data), total))
}
