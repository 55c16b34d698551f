use std::path::Path;

use image::{ImageBuffer, ImageFormat, Luma, Rgb};
use ndarray::Array2;

use crate::error::{LiveStackError, Result};
use crate::frame::{ColorFrame, Frame, FrameData, Image};

/// Load a raster file (PNG, TIFF, JPEG) through the `image` crate.
/// Single-channel sources become mono images; anything else RGB.
pub fn load_raster(path: &Path) -> Result<Image> {
    let img = image::open(path)?;

    if img.color().channel_count() <= 2 {
        let gray = img.to_luma16();
        let (w, h) = gray.dimensions();
        let mut data = Array2::<f32>::zeros((h as usize, w as usize));
        for (col, row, pixel) in gray.enumerate_pixels() {
            data[[row as usize, col as usize]] = pixel.0[0] as f32 / 65535.0;
        }
        return Ok(Image::new(FrameData::Mono(Frame::new(data, 16))));
    }

    let rgb = img.to_rgb32f();
    let (w, h) = rgb.dimensions();
    let mut red = Array2::<f32>::zeros((h as usize, w as usize));
    let mut green = red.clone();
    let mut blue = red.clone();
    for (col, row, pixel) in rgb.enumerate_pixels() {
        let (r, c) = (row as usize, col as usize);
        red[[r, c]] = pixel.0[0];
        green[[r, c]] = pixel.0[1];
        blue[[r, c]] = pixel.0[2];
    }
    Ok(Image::new(FrameData::Color(ColorFrame {
        red: Frame::new(red, 16),
        green: Frame::new(green, 16),
        blue: Frame::new(blue, 16),
    })))
}

fn to_u16(v: f32) -> u16 {
    (v.clamp(0.0, 1.0) * 65535.0).round() as u16
}

fn to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Save pixel data as a 16-bit PNG. Keywords are not preserved.
pub fn save_png16(data: &FrameData, path: &Path) -> Result<()> {
    let (h, w) = data.dim();
    match data {
        FrameData::Mono(frame) => {
            let pixels: Vec<u16> = frame.data.iter().map(|&v| to_u16(v)).collect();
            let img = ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(w as u32, h as u32, pixels)
                .ok_or_else(|| buffer_error(path))?;
            img.save_with_format(path, ImageFormat::Png)?;
        }
        FrameData::Color(color) => {
            let mut pixels: Vec<u16> = Vec::with_capacity(h * w * 3);
            for ((r, g), b) in color
                .red
                .data
                .iter()
                .zip(color.green.data.iter())
                .zip(color.blue.data.iter())
            {
                pixels.extend_from_slice(&[to_u16(*r), to_u16(*g), to_u16(*b)]);
            }
            let img = ImageBuffer::<Rgb<u16>, Vec<u16>>::from_raw(w as u32, h as u32, pixels)
                .ok_or_else(|| buffer_error(path))?;
            img.save_with_format(path, ImageFormat::Png)?;
        }
    }
    Ok(())
}

/// Save a ColorFrame as an 8-bit RGB PNG, for display.
pub fn save_color_png(color: &ColorFrame, path: &Path) -> Result<()> {
    let h = color.red.height();
    let w = color.red.width();

    let mut img = image::RgbImage::new(w as u32, h as u32);
    for row in 0..h {
        for col in 0..w {
            let r = to_u8(color.red.data[[row, col]]);
            let g = to_u8(color.green.data[[row, col]]);
            let b = to_u8(color.blue.data[[row, col]]);
            img.put_pixel(col as u32, row as u32, Rgb([r, g, b]));
        }
    }

    img.save_with_format(path, ImageFormat::Png)?;
    Ok(())
}

fn buffer_error(path: &Path) -> LiveStackError {
    LiveStackError::UnsupportedFormat(path.to_path_buf())
}
