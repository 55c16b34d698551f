use ndarray::Array2;

use crate::consts::{LUMINANCE_B, LUMINANCE_G, LUMINANCE_R};
use crate::frame::{ColorFrame, Frame};

/// Compute luminance from a `ColorFrame` using ITU-R BT.601 weights.
pub fn luminance(color: &ColorFrame) -> Frame {
    let (h, w) = color.red.data.dim();
    let mut data = Array2::<f32>::zeros((h, w));

    for row in 0..h {
        for col in 0..w {
            data[[row, col]] = LUMINANCE_R * color.red.data[[row, col]]
                + LUMINANCE_G * color.green.data[[row, col]]
                + LUMINANCE_B * color.blue.data[[row, col]];
        }
    }

    Frame::new(data, color.red.original_bit_depth)
}

/// Create a ColorFrame from three separate mono frames.
pub fn from_channels(red: Frame, green: Frame, blue: Frame) -> ColorFrame {
    ColorFrame { red, green, blue }
}

/// Average-neutral SCNR: pull green toward `min(g, (r + b) / 2)`.
///
/// `amount` in [0, 1] blends between the original green (0) and the fully
/// neutralised green (1).
pub fn scnr(color: &ColorFrame, amount: f32) -> ColorFrame {
    let amount = amount.clamp(0.0, 1.0);
    let mut green = color.green.data.clone();

    ndarray::Zip::from(&mut green)
        .and(&color.red.data)
        .and(&color.blue.data)
        .for_each(|g, &r, &b| {
            let current = *g;
            let neutral = current.min((r + b) * 0.5);
            *g = (1.0 - amount) * current + amount * neutral;
        });

    ColorFrame {
        red: color.red.clone(),
        green: Frame::new(green, color.green.original_bit_depth),
        blue: color.blue.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(value: f32) -> Frame {
        Frame::new(Array2::from_elem((4, 4), value), 16)
    }

    #[test]
    fn test_scnr_full_strength_caps_green() {
        let color = from_channels(uniform(0.2), uniform(0.9), uniform(0.4));
        let out = scnr(&color, 1.0);
        assert!((out.green.data[[1, 1]] - 0.3).abs() < 1e-6);
        assert_eq!(out.red.data[[1, 1]], 0.2);
    }

    #[test]
    fn test_scnr_keeps_green_below_neutral() {
        let color = from_channels(uniform(0.5), uniform(0.1), uniform(0.5));
        let out = scnr(&color, 1.0);
        assert!((out.green.data[[0, 0]] - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_scnr_half_strength_blends() {
        let color = from_channels(uniform(0.0), uniform(1.0), uniform(0.0));
        let out = scnr(&color, 0.5);
        assert!((out.green.data[[2, 2]] - 0.5).abs() < 1e-6);
    }
}
