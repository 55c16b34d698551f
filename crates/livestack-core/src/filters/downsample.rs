use ndarray::Array2;

use crate::frame::Frame;

/// Integer-factor box-average downsample.
///
/// Each output pixel is the mean of a `factor` x `factor` block; trailing
/// rows and columns that do not fill a whole block are dropped. A factor of
/// 0 or 1 returns the frame unchanged.
pub fn downsample(frame: &Frame, factor: usize) -> Frame {
    if factor <= 1 {
        return frame.clone();
    }

    let (h, w) = frame.data.dim();
    let (oh, ow) = (h / factor, w / factor);
    let mut out = Array2::<f32>::zeros((oh, ow));
    let norm = 1.0 / (factor * factor) as f32;

    for ((row, col), value) in out.indexed_iter_mut() {
        let block = frame.data.slice(ndarray::s![
            row * factor..(row + 1) * factor,
            col * factor..(col + 1) * factor
        ]);
        *value = block.sum() * norm;
    }

    Frame::new(out, frame.original_bit_depth)
}
