//! Noise estimation for the per-frame noise trend.
//!
//! The primary estimator is the multiresolution support (MRS) method: the
//! frame is decomposed into B3-spline a trous wavelet layers, pixels with a
//! significant coefficient in any layer are excluded, and the noise is the
//! standard deviation of the remaining pixels, iterated to convergence.
//! When MRS fails at every layer count, iterated k-sigma clipping of the
//! first wavelet layer is used instead.

use ndarray::Array2;

use crate::consts::{
    B3_KERNEL, B3_NOISE_SIGMA, MIN_NOISE_PIXELS, MRS_MAX_LAYERS, MRS_MIN_LAYERS,
    MRS_MIN_PIXEL_FRACTION, NOISE_CONVERGENCE, NOISE_K, NOISE_MAX_ITERATIONS,
};
use crate::error::{LiveStackError, Result};
use crate::frame::{Frame, Image};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoiseMethod {
    Mrs,
    KSigma,
}

/// Result of a noise estimate, in normalised [0, 1] units.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NoiseEstimate {
    pub sigma: f64,
    pub pixel_count: usize,
    pub layers_used: usize,
    pub method: NoiseMethod,
}

/// Noise of an image. Colour images report the mean sigma of their
/// channels.
pub fn noise_estimate(image: &Image) -> Result<NoiseEstimate> {
    let channels = image.data.channels();
    let estimates = channels
        .iter()
        .map(|frame| estimate_frame_noise(frame))
        .collect::<Result<Vec<_>>>()?;

    let count = estimates.len() as f64;
    let sigma = estimates.iter().map(|e| e.sigma).sum::<f64>() / count;
    let pixel_count = estimates.iter().map(|e| e.pixel_count).sum();
    let layers_used = estimates.iter().map(|e| e.layers_used).min().unwrap_or(0);
    let method = if estimates.iter().all(|e| e.method == NoiseMethod::Mrs) {
        NoiseMethod::Mrs
    } else {
        NoiseMethod::KSigma
    };

    Ok(NoiseEstimate {
        sigma,
        pixel_count,
        layers_used,
        method,
    })
}

/// Noise of a single plane.
pub fn estimate_frame_noise(frame: &Frame) -> Result<NoiseEstimate> {
    let total = frame.data.len();
    if total < MIN_NOISE_PIXELS {
        return Err(LiveStackError::InsignificantData);
    }

    let (layers, residual) = decompose(&frame.data, MRS_MAX_LAYERS);
    let min_pixels = MIN_NOISE_PIXELS.max((total as f64 * MRS_MIN_PIXEL_FRACTION) as usize);

    let k_sigma = k_sigma_noise(&layers[0]);

    let initial = match k_sigma {
        Some((sigma, _)) => sigma,
        None => std_dev(layers[0].iter().copied()).0 / B3_NOISE_SIGMA[0],
    };
    if initial > 0.0 {
        for n in (MRS_MIN_LAYERS..=MRS_MAX_LAYERS).rev() {
            let smooth = if n == MRS_MAX_LAYERS {
                residual.clone()
            } else {
                layers[n..]
                    .iter()
                    .fold(residual.clone(), |acc, layer| acc + layer)
            };
            if let Some((sigma, count)) = mrs_noise(&frame.data, &smooth, &layers[..n], initial) {
                if count >= min_pixels && sigma > 0.0 {
                    return Ok(NoiseEstimate {
                        sigma,
                        pixel_count: count,
                        layers_used: n,
                        method: NoiseMethod::Mrs,
                    });
                }
            }
        }
    }

    match k_sigma {
        Some((sigma, count)) if sigma > 0.0 && count >= MIN_NOISE_PIXELS => Ok(NoiseEstimate {
            sigma,
            pixel_count: count,
            layers_used: 1,
            method: NoiseMethod::KSigma,
        }),
        _ => Err(LiveStackError::InsignificantData),
    }
}

/// Iterated MRS estimate. `smooth` is the large-scale component removed
/// from the data before measuring; `layers` are the detail layers used for
/// the significance test. Returns `None` when the iteration does not
/// converge.
fn mrs_noise(
    data: &Array2<f32>,
    smooth: &Array2<f32>,
    layers: &[Array2<f32>],
    initial: f64,
) -> Option<(f64, usize)> {
    let mut sigma = initial;

    for _ in 0..NOISE_MAX_ITERATIONS {
        let thresholds: Vec<f64> = (0..layers.len())
            .map(|j| NOISE_K * sigma * B3_NOISE_SIGMA[j])
            .collect();

        let samples = data.indexed_iter().filter_map(|((r, c), &v)| {
            let significant = layers
                .iter()
                .zip(&thresholds)
                .any(|(layer, &t)| (layer[[r, c]] as f64).abs() > t);
            (!significant).then(|| v - smooth[[r, c]])
        });
        let (next, count) = std_dev(samples);

        if count == 0 || next <= 0.0 {
            return None;
        }
        if ((next - sigma) / next).abs() < NOISE_CONVERGENCE {
            return Some((next, count));
        }
        sigma = next;
    }
    None
}

/// Iterated k-sigma clipping of the first wavelet layer, rescaled to image
/// noise.
fn k_sigma_noise(layer: &Array2<f32>) -> Option<(f64, usize)> {
    let (mut sigma, mut count) = std_dev(layer.iter().copied());
    if sigma <= 0.0 {
        return None;
    }

    for _ in 0..NOISE_MAX_ITERATIONS {
        let limit = NOISE_K * sigma;
        let (next, n) = std_dev(layer.iter().copied().filter(|&w| (w as f64).abs() < limit));
        if n == 0 || next <= 0.0 {
            return None;
        }
        let converged = ((next - sigma) / next).abs() < NOISE_CONVERGENCE;
        sigma = next;
        count = n;
        if converged {
            return Some((sigma / B3_NOISE_SIGMA[0], count));
        }
    }
    None
}

/// Population standard deviation and sample count.
fn std_dev(values: impl Iterator<Item = f32>) -> (f64, usize) {
    let (mut n, mut sum, mut sum_sq) = (0usize, 0.0f64, 0.0f64);
    for v in values {
        let v = v as f64;
        n += 1;
        sum += v;
        sum_sq += v * v;
    }
    if n == 0 {
        return (0.0, 0);
    }
    let mean = sum / n as f64;
    let var = (sum_sq / n as f64 - mean * mean).max(0.0);
    (var.sqrt(), n)
}

/// A trous decomposition into `num_layers` detail layers plus residual.
fn decompose(data: &Array2<f32>, num_layers: usize) -> (Vec<Array2<f32>>, Array2<f32>) {
    let mut layers = Vec::with_capacity(num_layers);
    let mut current = data.clone();

    for scale in 0..num_layers {
        let smoothed = atrous_convolve(&current, scale);
        layers.push(&current - &smoothed);
        current = smoothed;
    }

    (layers, current)
}

/// Separable B3 convolution with holes of 2^scale pixels.
fn atrous_convolve(data: &Array2<f32>, scale: usize) -> Array2<f32> {
    let step = 1isize << scale;
    let (h, w) = data.dim();

    let rows = Array2::from_shape_fn((h, w), |(r, c)| {
        B3_KERNEL
            .iter()
            .enumerate()
            .map(|(k, &kv)| data[[r, mirror_index(c as isize + (k as isize - 2) * step, w)]] * kv)
            .sum::<f32>()
    });
    Array2::from_shape_fn((h, w), |(r, c)| {
        B3_KERNEL
            .iter()
            .enumerate()
            .map(|(k, &kv)| rows[[mirror_index(r as isize + (k as isize - 2) * step, h), c]] * kv)
            .sum::<f32>()
    })
}

/// Reflect an index into [0, size).
fn mirror_index(idx: isize, size: usize) -> usize {
    if size <= 1 {
        return 0;
    }
    let period = 2 * size;
    let m = idx.unsigned_abs() % period;
    if m < size {
        m
    } else {
        period - 1 - m
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{ColorFrame, FrameData};

    /// Deterministic Gaussian noise around `level`.
    fn noisy_frame(size: usize, level: f32, sigma: f32, seed: u64) -> Frame {
        let mut state = seed;
        let mut uniform = move || {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            ((state >> 11) as f64 + 0.5) / (1u64 << 53) as f64
        };
        let data = Array2::from_shape_fn((size, size), |_| {
            let (u1, u2) = (uniform(), uniform());
            let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
            level + sigma * z as f32
        });
        Frame::new(data, -32)
    }

    #[test]
    fn test_mirror_index() {
        assert_eq!(mirror_index(-1, 5), 1);
        assert_eq!(mirror_index(5, 5), 4);
        assert_eq!(mirror_index(2, 5), 2);
    }

    #[test]
    fn test_decompose_reconstructs() {
        let frame = noisy_frame(32, 0.5, 0.05, 7);
        let (layers, residual) = decompose(&frame.data, 3);
        let sum = layers.iter().fold(residual, |acc, l| acc + l);
        for (a, b) in sum.iter().zip(frame.data.iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_mrs_recovers_gaussian_sigma() {
        let frame = noisy_frame(128, 0.3, 0.01, 42);
        let est = estimate_frame_noise(&frame).unwrap();
        assert_eq!(est.method, NoiseMethod::Mrs);
        assert!(
            (est.sigma - 0.01).abs() < 0.002,
            "sigma {} not within 20% of 0.01",
            est.sigma
        );
        assert!(est.pixel_count > 128 * 128 / 2);
    }

    #[test]
    fn test_constant_frame_is_insignificant() {
        let frame = Frame::new(Array2::from_elem((32, 32), 0.5), -32);
        let err = estimate_frame_noise(&frame).unwrap_err();
        assert!(matches!(err, LiveStackError::InsignificantData));
    }

    #[test]
    fn test_tiny_frame_is_insignificant() {
        let frame = Frame::new(Array2::from_elem((3, 3), 0.5), -32);
        assert!(estimate_frame_noise(&frame).is_err());
    }

    #[test]
    fn test_color_noise_is_channel_mean() {
        let color = ColorFrame {
            red: noisy_frame(96, 0.2, 0.01, 1),
            green: noisy_frame(96, 0.2, 0.02, 2),
            blue: noisy_frame(96, 0.2, 0.03, 3),
        };
        let est = noise_estimate(&Image::new(FrameData::Color(color))).unwrap();
        assert!((est.sigma - 0.02).abs() < 0.004, "sigma {}", est.sigma);
    }
}
