use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use approx::assert_abs_diff_eq;
use ndarray::Array2;

use livestack_core::calibration::CalibrationMasters;
use livestack_core::color::debayer::CfaPattern;
use livestack_core::error::LiveStackError;
use livestack_core::frame::{FrameData, Image, Keywords};
use livestack_core::ingest::Preparation;
use livestack_core::io::{self, OutputEncoding};
use livestack_core::services::{ImageServices, LocalServices, TimeoutServices};
use livestack_core::stack::StackConfig;

fn gradient(h: usize, w: usize) -> Array2<f32> {
    Array2::from_shape_fn((h, w), |(y, x)| 0.1 + 0.8 * ((y * w + x) as f32 / (h * w) as f32))
}

fn square(h: usize, w: usize, top: usize, left: usize) -> Array2<f32> {
    Array2::from_shape_fn((h, w), |(y, x)| {
        if (top..top + 10).contains(&y) && (left..left + 10).contains(&x) {
            0.9
        } else {
            0.05
        }
    })
}

#[test]
fn test_fits_round_trip_keeps_keywords() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("light.fits");
    let mut keywords = Keywords::new();
    keywords.insert("FILTER".into(), "OIII".into());
    keywords.insert("EXPTIME".into(), "120.5".into());
    keywords.insert("OBJECT".into(), "NGC 7000".into());
    let image = Image::mono(gradient(12, 9)).with_keywords(keywords);

    LocalServices
        .write_image(&image, &path, OutputEncoding::Fits32)
        .unwrap();
    let back = LocalServices.read_image(&path).unwrap();

    assert_eq!(back.dim(), (12, 9));
    assert_eq!(back.filter(), "OIII");
    assert_eq!(back.exposure(), Some(120.5));
    assert_eq!(back.keyword("OBJECT"), Some("NGC 7000"));
    let (a, b) = (&image.data.channels()[0].data, &back.data.channels()[0].data);
    for (x, y) in a.iter().zip(b.iter()) {
        assert_abs_diff_eq!(*x, *y, epsilon = 1e-7);
    }

    let keywords = LocalServices.read_keywords(&path).unwrap();
    assert_eq!(keywords.get("FILTER").map(String::as_str), Some("OIII"));
    assert!(!keywords.contains_key("NAXIS1"));
}

#[test]
fn test_fits16_round_trip_quantises() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stack.fits");
    let image = Image::mono(gradient(6, 6));
    io::write_image(&image, &path, true).unwrap();
    let back = io::read_image(&path).unwrap();
    let (a, b) = (&image.data.channels()[0].data, &back.data.channels()[0].data);
    for (x, y) in a.iter().zip(b.iter()) {
        assert_abs_diff_eq!(*x, *y, epsilon = 1.0 / 65535.0);
    }
}

#[test]
fn test_color_fits_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rgb.fits");
    let raw = Image::mono(gradient(8, 8));
    let color = LocalServices.debayer(&raw, CfaPattern::RGGB).unwrap();
    LocalServices
        .write_image(&color, &path, OutputEncoding::Fits32)
        .unwrap();
    let back = LocalServices.read_image(&path).unwrap();
    assert!(back.is_color());
    assert_eq!(back.dim(), (8, 8));
}

#[test]
fn test_debayer_recovers_uniform_channels() {
    // RGGB mosaic of a scene with R=0.8, G=0.5, B=0.2.
    let raw = Array2::from_shape_fn((6, 6), |(y, x)| match (y % 2, x % 2) {
        (0, 0) => 0.8,
        (1, 1) => 0.2,
        _ => 0.5,
    });
    let mut keywords = Keywords::new();
    keywords.insert("FILTER".into(), "L".into());
    let image = Image::mono(raw).with_keywords(keywords);

    let color = LocalServices.debayer(&image, CfaPattern::RGGB).unwrap();
    assert_eq!(color.filter(), "L");
    let FrameData::Color(cf) = &color.data else {
        panic!("expected color output");
    };
    assert!(cf.red.data.iter().all(|v| (v - 0.8).abs() < 1e-6));
    assert!(cf.green.data.iter().all(|v| (v - 0.5).abs() < 1e-6));
    assert!(cf.blue.data.iter().all(|v| (v - 0.2).abs() < 1e-6));

    // Read as BGGR the same mosaic swaps red and blue.
    let swapped = LocalServices.debayer(&image, CfaPattern::BGGR).unwrap();
    let FrameData::Color(sw) = &swapped.data else {
        panic!("expected color output");
    };
    assert!(sw.blue.data.iter().all(|v| (v - 0.8).abs() < 1e-6));
    assert!(sw.red.data.iter().all(|v| (v - 0.2).abs() < 1e-6));
}

#[test]
fn test_align_undoes_translation() {
    let reference = Image::mono(square(64, 64, 20, 20));
    let target = Image::mono(square(64, 64, 23, 25));

    let aligned = LocalServices.align(&reference, &target).unwrap();
    let a = &aligned.data.channels()[0].data;
    // Inside the square after registration.
    assert_abs_diff_eq!(a[[25, 25]], 0.9, epsilon = 0.05);
    assert_abs_diff_eq!(a[[21, 21]], 0.9, epsilon = 0.05);
    // Where the unshifted target had its square, away from the reference one.
    assert_abs_diff_eq!(a[[31, 33]], 0.05, epsilon = 0.05);
}

#[test]
fn test_align_rejects_mismatched_frames() {
    let reference = Image::mono(square(64, 64, 20, 20));
    let small = Image::mono(square(32, 32, 5, 5));
    assert!(matches!(
        LocalServices.align(&reference, &small),
        Err(LiveStackError::AlignmentFailed(_))
    ));
}

fn write(path: &Path, data: Array2<f32>) {
    io::write_image(&Image::mono(data), path, false).unwrap();
}

#[test]
fn test_batch_and_single_calibration_agree() {
    let dir = tempfile::tempdir().unwrap();
    let lights = ["l1.fits", "l2.fits", "l3.fits"];
    for (i, name) in lights.iter().enumerate() {
        let offset = 0.05 * i as f32;
        write(&dir.path().join(name), gradient(10, 10).mapv(|v| v + offset));
    }
    let bias = Image::mono(Array2::from_elem((10, 10), 0.02));
    let mut flat_data = Array2::from_elem((10, 10), 1.0f32);
    flat_data[[4, 4]] = 0.5;
    let flat = Image::mono(flat_data);
    let masters = CalibrationMasters {
        bias: Some(bias),
        dark: None,
        flat: Some(flat),
    };

    let mut config = StackConfig::default();
    config.calibration.pedestal = 100;
    config.output.save_calibrated_file = true;
    let prep = Preparation {
        services: &LocalServices,
        masters: &masters,
        config: &config,
    };
    assert!(prep.calibration_enabled());

    let paths: Vec<_> = lights.iter().map(|n| dir.path().join(n)).collect();
    let batch = prep.calibrate_batch(&paths);
    for (path, batched) in paths.iter().zip(batch) {
        let batched = prep.finish(path, batched.unwrap(), true).unwrap();
        let single = prep.prepare(path).unwrap();
        let (a, b) = (&batched.data.channels()[0].data, &single.data.channels()[0].data);
        for (x, y) in a.iter().zip(b.iter()) {
            assert_abs_diff_eq!(*x, *y, epsilon = 1e-7);
        }

        let name = path.file_name().unwrap().to_string_lossy();
        let written = dir.path().join(format!("ezc_{name}"));
        assert!(written.exists(), "{} missing", written.display());
    }
}

#[test]
fn test_preparation_chain_with_debayer_cache() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("osc.fits");
    write(&path, gradient(16, 16));

    let mut config = StackConfig::default();
    config.color.is_cfa = true;
    config.output.save_debayered = true;
    config.processing.downscale_images = true;
    config.processing.downscale_amount = 2;
    config.processing.scnr = true;
    let masters = CalibrationMasters::default();
    let prep = Preparation {
        services: &LocalServices,
        masters: &masters,
        config: &config,
    };

    let prepared = prep.prepare(&path).unwrap();
    assert!(prepared.is_color());
    assert_eq!(prepared.dim(), (8, 8));
    assert!(dir.path().join("ezd_osc.fits").exists());

    // Second preparation reuses the cached debayered frame.
    let again = prep.prepare(&path).unwrap();
    let (a, b) = (&prepared.data.channels()[1].data, &again.data.channels()[1].data);
    for (x, y) in a.iter().zip(b.iter()) {
        assert_abs_diff_eq!(*x, *y, epsilon = 1e-6);
    }
}

struct SlowReader;

impl ImageServices for SlowReader {
    fn read_image(&self, _path: &Path) -> livestack_core::error::Result<Image> {
        std::thread::sleep(Duration::from_millis(300));
        Ok(Image::mono(Array2::zeros((2, 2))))
    }

    fn write_image(
        &self,
        _image: &Image,
        _path: &Path,
        _encoding: OutputEncoding,
    ) -> livestack_core::error::Result<()> {
        Ok(())
    }

    fn calibrate(
        &self,
        light: &Image,
        _masters: &CalibrationMasters,
        _dark_scale: f32,
        _pedestal: u16,
    ) -> livestack_core::error::Result<Image> {
        Ok(light.clone())
    }

    fn debayer(&self, raw: &Image, _pattern: CfaPattern) -> livestack_core::error::Result<Image> {
        Ok(raw.clone())
    }

    fn downsample(&self, image: &Image, _factor: usize) -> Image {
        image.clone()
    }

    fn align(&self, _reference: &Image, target: &Image) -> livestack_core::error::Result<Image> {
        Ok(target.clone())
    }

    fn noise_estimate(
        &self,
        image: &Image,
    ) -> livestack_core::error::Result<livestack_core::noise::NoiseEstimate> {
        LocalServices.noise_estimate(image)
    }

    fn extract_background(&self, image: &Image, _degree: usize) -> livestack_core::error::Result<Image> {
        Ok(image.clone())
    }

    fn scnr(&self, image: &Image, _amount: f32) -> Image {
        image.clone()
    }
}

#[test]
fn test_stuck_read_times_out() {
    let services = TimeoutServices::new(Arc::new(SlowReader), Duration::from_millis(50));
    let err = services.read_image(Path::new("slow.fits")).unwrap_err();
    assert!(matches!(err, LiveStackError::Timeout { operation: "read_image", .. }), "{err}");
}
