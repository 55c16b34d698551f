use ndarray::Array2;

use crate::consts::{ABE_GRID_SIZE, MAX_ABE_DEGREE};
use crate::error::{LiveStackError, Result};
use crate::frame::Frame;

/// Subtract a smooth polynomial background gradient.
///
/// The frame is divided into a grid of cells; the median of each cell is a
/// background sample. A 2D polynomial of total degree `degree` is fitted to
/// the samples by least squares and subtracted, and the median sample level
/// is added back so the overall brightness is preserved.
pub fn extract_background(frame: &Frame, degree: usize) -> Result<Frame> {
    if degree > MAX_ABE_DEGREE {
        return Err(LiveStackError::InvalidConfig(format!(
            "background degree {degree} exceeds {MAX_ABE_DEGREE}"
        )));
    }

    let (h, w) = frame.data.dim();
    let grid = ABE_GRID_SIZE.min(h).min(w);
    let terms = term_exponents(degree);
    if grid * grid < terms.len() {
        return Err(LiveStackError::InvalidConfig(format!(
            "{w}x{h} frame is too small for a degree {degree} background"
        )));
    }

    let samples = grid_samples(&frame.data, grid);
    let coeffs = fit_polynomial(&samples, &terms).ok_or_else(|| {
        LiveStackError::InvalidConfig("background model is singular".into())
    })?;

    let mut levels: Vec<f32> = samples.iter().map(|s| s.value as f32).collect();
    let pedestal = median(&mut levels);

    let mut out = frame.data.clone();
    for ((row, col), value) in out.indexed_iter_mut() {
        let (u, v) = normalized(col as f64, row as f64, w, h);
        let model: f64 = terms
            .iter()
            .zip(&coeffs)
            .map(|(&(p, q), c)| c * u.powi(p as i32) * v.powi(q as i32))
            .sum();
        *value = *value - model as f32 + pedestal;
    }

    Ok(Frame::new(out, frame.original_bit_depth))
}

struct Sample {
    u: f64,
    v: f64,
    value: f64,
}

/// Exponent pairs (p, q) of every monomial u^p * v^q with p + q <= degree.
fn term_exponents(degree: usize) -> Vec<(usize, usize)> {
    (0..=degree)
        .flat_map(|total| (0..=total).map(move |q| (total - q, q)))
        .collect()
}

fn normalized(x: f64, y: f64, w: usize, h: usize) -> (f64, f64) {
    let u = if w > 1 { 2.0 * x / (w - 1) as f64 - 1.0 } else { 0.0 };
    let v = if h > 1 { 2.0 * y / (h - 1) as f64 - 1.0 } else { 0.0 };
    (u, v)
}

fn grid_samples(data: &Array2<f32>, grid: usize) -> Vec<Sample> {
    let (h, w) = data.dim();
    let mut samples = Vec::with_capacity(grid * grid);
    let mut cell = Vec::new();

    for gy in 0..grid {
        let (r0, r1) = (gy * h / grid, (gy + 1) * h / grid);
        for gx in 0..grid {
            let (c0, c1) = (gx * w / grid, (gx + 1) * w / grid);
            cell.clear();
            cell.extend(data.slice(ndarray::s![r0..r1, c0..c1]).iter().copied());
            let value = median(&mut cell) as f64;
            let (u, v) = normalized((c0 + c1 - 1) as f64 / 2.0, (r0 + r1 - 1) as f64 / 2.0, w, h);
            samples.push(Sample { u, v, value });
        }
    }

    samples
}

fn median(values: &mut [f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mid = values.len() / 2;
    let (_, m, _) = values.select_nth_unstable_by(mid, f32::total_cmp);
    *m
}

/// Least-squares fit through the normal equations A^T A x = A^T b.
fn fit_polynomial(samples: &[Sample], terms: &[(usize, usize)]) -> Option<Vec<f64>> {
    let n = terms.len();
    let mut ata = vec![0.0; n * n];
    let mut atb = vec![0.0; n];
    let mut basis = vec![0.0; n];

    for s in samples {
        for (j, &(p, q)) in terms.iter().enumerate() {
            basis[j] = s.u.powi(p as i32) * s.v.powi(q as i32);
        }
        for j in 0..n {
            for k in 0..n {
                ata[j * n + k] += basis[j] * basis[k];
            }
            atb[j] += basis[j] * s.value;
        }
    }

    solve_lu(&ata, &atb, n)
}

/// LU decomposition solver with partial pivoting.
#[allow(clippy::needless_range_loop)]
fn solve_lu(a: &[f64], b: &[f64], n: usize) -> Option<Vec<f64>> {
    let stride = n + 1;
    let mut aug = vec![0.0; n * stride];
    for i in 0..n {
        aug[i * stride..i * stride + n].copy_from_slice(&a[i * n..(i + 1) * n]);
        aug[i * stride + n] = b[i];
    }

    for col in 0..n {
        let max_row = (col..n)
            .max_by(|&x, &y| aug[x * stride + col].abs().total_cmp(&aug[y * stride + col].abs()))?;
        if aug[max_row * stride + col].abs() < 1e-12 {
            return None;
        }
        if max_row != col {
            for j in 0..stride {
                aug.swap(col * stride + j, max_row * stride + j);
            }
        }
        for row in (col + 1)..n {
            let factor = aug[row * stride + col] / aug[col * stride + col];
            for j in col..stride {
                aug[row * stride + j] -= factor * aug[col * stride + j];
            }
        }
    }

    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = aug[i * stride + n];
        for j in (i + 1)..n {
            sum -= aug[i * stride + j] * x[j];
        }
        x[i] = sum / aug[i * stride + i];
    }
    Some(x)
}
