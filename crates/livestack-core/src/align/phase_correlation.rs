use ndarray::Array2;
use num_complex::Complex;
use rustfft::FftPlanner;

use crate::error::{LiveStackError, Result};
use crate::frame::{AlignmentOffset, Frame};

use super::subpixel::refine_peak_paraboloid;

/// Half-size of the window around the correlation peak excluded from the
/// sidelobe statistics.
const PEAK_EXCLUSION_RADIUS: usize = 2;

/// Compute the translation offset between two raw arrays using FFT phase
/// correlation.
///
/// Returns the offset together with the peak-to-sidelobe ratio of the
/// correlation surface, a measure of how unambiguous the match is.
pub fn compute_offset_array(
    reference: &Array2<f32>,
    target: &Array2<f32>,
) -> Result<(AlignmentOffset, f64)> {
    let (h, w) = reference.dim();
    let (th, tw) = target.dim();
    if h != th || w != tw {
        return Err(LiveStackError::GeometryMismatch {
            expected_width: w,
            expected_height: h,
            width: tw,
            height: th,
        });
    }
    if h < 3 || w < 3 {
        return Err(LiveStackError::AlignmentFailed(format!(
            "frame too small to register ({w}x{h})"
        )));
    }

    // Apply Hann window to reduce spectral leakage
    let ref_fft = fft2d(&apply_hann(reference));
    let tgt_fft = fft2d(&apply_hann(target));

    let correlation = ifft2d(&normalized_cross_power(&ref_fft, &tgt_fft));

    let (peak_row, peak_col, peak_val) = find_peak(&correlation);
    let psr = peak_to_sidelobe(&correlation, peak_row, peak_col, peak_val);

    // Convert to signed offset (handle wrap-around)
    let dy = if peak_row > h / 2 {
        peak_row as f64 - h as f64
    } else {
        peak_row as f64
    };
    let dx = if peak_col > w / 2 {
        peak_col as f64 - w as f64
    } else {
        peak_col as f64
    };

    let (sub_dy, sub_dx) = refine_peak_paraboloid(&correlation, peak_row, peak_col);

    Ok((
        AlignmentOffset {
            dx: dx + sub_dx,
            dy: dy + sub_dy,
        },
        psr,
    ))
}

/// Compute the translation offset between a reference and target frame.
pub fn compute_offset(reference: &Frame, target: &Frame) -> Result<(AlignmentOffset, f64)> {
    compute_offset_array(&reference.data, &target.data)
}

/// Shift a frame by the given offset using bilinear interpolation.
pub fn shift_frame(frame: &Frame, offset: &AlignmentOffset) -> Frame {
    let (h, w) = frame.data.dim();
    let mut result = Array2::<f32>::zeros((h, w));

    for row in 0..h {
        for col in 0..w {
            let src_y = row as f64 - offset.dy;
            let src_x = col as f64 - offset.dx;

            result[[row, col]] = bilinear_sample(&frame.data, src_y, src_x);
        }
    }

    Frame::new(result, frame.original_bit_depth)
}

fn apply_hann(data: &Array2<f32>) -> Array2<f32> {
    let (h, w) = data.dim();
    let mut result = Array2::<f32>::zeros((h, w));

    for row in 0..h {
        let wy = 0.5 * (1.0 - (std::f64::consts::TAU * row as f64 / h as f64).cos());
        for col in 0..w {
            let wx = 0.5 * (1.0 - (std::f64::consts::TAU * col as f64 / w as f64).cos());
            result[[row, col]] = data[[row, col]] * (wy * wx) as f32;
        }
    }

    result
}

/// 2D FFT: row-wise FFT, then column-wise FFT.
fn fft2d(data: &Array2<f32>) -> Array2<Complex<f64>> {
    let (h, w) = data.dim();
    let mut planner = FftPlanner::new();
    let fft_row = planner.plan_fft_forward(w);
    let fft_col = planner.plan_fft_forward(h);

    let mut result = data.mapv(|v| Complex::new(v as f64, 0.0));

    for mut row in result.rows_mut() {
        let mut buf: Vec<Complex<f64>> = row.to_vec();
        fft_row.process(&mut buf);
        row.assign(&ndarray::ArrayView1::from(&buf));
    }

    for mut col in result.columns_mut() {
        let mut buf: Vec<Complex<f64>> = col.to_vec();
        fft_col.process(&mut buf);
        col.assign(&ndarray::ArrayView1::from(&buf));
    }

    result
}

/// Inverse 2D FFT, real part, normalised by the pixel count.
fn ifft2d(data: &Array2<Complex<f64>>) -> Array2<f64> {
    let (h, w) = data.dim();
    let mut planner = FftPlanner::new();
    let ifft_row = planner.plan_fft_inverse(w);
    let ifft_col = planner.plan_fft_inverse(h);

    let mut work = data.clone();

    for mut col in work.columns_mut() {
        let mut buf: Vec<Complex<f64>> = col.to_vec();
        ifft_col.process(&mut buf);
        col.assign(&ndarray::ArrayView1::from(&buf));
    }

    for mut row in work.rows_mut() {
        let mut buf: Vec<Complex<f64>> = row.to_vec();
        ifft_row.process(&mut buf);
        row.assign(&ndarray::ArrayView1::from(&buf));
    }

    let scale = 1.0 / (h * w) as f64;
    work.mapv(|c| c.re * scale)
}

fn normalized_cross_power(
    ref_fft: &Array2<Complex<f64>>,
    tgt_fft: &Array2<Complex<f64>>,
) -> Array2<Complex<f64>> {
    let mut result = Array2::<Complex<f64>>::zeros(ref_fft.dim());

    ndarray::Zip::from(&mut result)
        .and(ref_fft)
        .and(tgt_fft)
        .for_each(|out, &r, &t| {
            let cross = r * t.conj();
            let mag = cross.norm();
            if mag > 1e-12 {
                *out = cross / mag;
            }
        });

    result
}

fn find_peak(data: &Array2<f64>) -> (usize, usize, f64) {
    let mut best = (0, 0, f64::NEG_INFINITY);
    for ((row, col), &v) in data.indexed_iter() {
        if v > best.2 {
            best = (row, col, v);
        }
    }
    best
}

/// (peak - mean) / stddev of the surface outside a small window around the
/// peak, measured with wrap-around since the surface is periodic.
fn peak_to_sidelobe(data: &Array2<f64>, peak_row: usize, peak_col: usize, peak: f64) -> f64 {
    let (h, w) = data.dim();
    let near = |a: usize, b: usize, n: usize| {
        let d = a.abs_diff(b);
        d.min(n - d) <= PEAK_EXCLUSION_RADIUS
    };

    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let mut count = 0usize;
    for ((row, col), &v) in data.indexed_iter() {
        if near(row, peak_row, h) && near(col, peak_col, w) {
            continue;
        }
        sum += v;
        sum_sq += v * v;
        count += 1;
    }
    if count == 0 {
        return 0.0;
    }

    let mean = sum / count as f64;
    let std = (sum_sq / count as f64 - mean * mean).max(0.0).sqrt();
    if std > 1e-12 {
        (peak - mean) / std
    } else if peak - mean > 1e-6 {
        f64::INFINITY
    } else {
        0.0
    }
}

pub fn bilinear_sample(data: &Array2<f32>, y: f64, x: f64) -> f32 {
    let (h, w) = data.dim();

    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let x1 = x0 + 1;
    let y1 = y0 + 1;

    let fx = (x - x0 as f64) as f32;
    let fy = (y - y0 as f64) as f32;

    let sample = |r: i64, c: i64| -> f32 {
        if r >= 0 && r < h as i64 && c >= 0 && c < w as i64 {
            data[[r as usize, c as usize]]
        } else {
            0.0
        }
    };

    let v00 = sample(y0, x0);
    let v10 = sample(y0, x1);
    let v01 = sample(y1, x0);
    let v11 = sample(y1, x1);

    v00 * (1.0 - fx) * (1.0 - fy)
        + v10 * fx * (1.0 - fy)
        + v01 * (1.0 - fx) * fy
        + v11 * fx * fy
}
