#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use ndarray::Array2;

use livestack_core::calibration::CalibrationMasters;
use livestack_core::color::debayer::CfaPattern;
use livestack_core::error::{LiveStackError, Result};
use livestack_core::frame::{Image, Keywords};
use livestack_core::io::OutputEncoding;
use livestack_core::noise::NoiseEstimate;
use livestack_core::services::{ImageServices, LocalServices};
use livestack_core::session::{Coordinator, SessionConfig};
use livestack_core::watch::PathWatcher;

/// Keyword under which fake frames carry their file name.
pub const NAME_KEY: &str = "FAKENAME";

pub const FRAME_SIZE: (usize, usize) = (8, 8);

/// Uniform-valued frames looked up by file name. Anything else is read from
/// disk; every other service is the local one.
#[derive(Default)]
pub struct FakeServices {
    frames: HashMap<String, (f32, String)>,
    align_failures: HashSet<String>,
    aligned: Mutex<Vec<String>>,
}

impl FakeServices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame(self, name: &str, value: f32) -> Self {
        self.filtered_frame(name, value, "")
    }

    pub fn filtered_frame(mut self, name: &str, value: f32, filter: &str) -> Self {
        self.frames
            .insert(name.to_string(), (value, filter.to_string()));
        self
    }

    pub fn failing_align(mut self, name: &str) -> Self {
        self.align_failures.insert(name.to_string());
        self
    }

    /// Names passed to `align` as target, in call order.
    pub fn aligned(&self) -> Vec<String> {
        self.aligned.lock().unwrap().clone()
    }
}

fn name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub fn uniform(value: f32) -> Array2<f32> {
    Array2::from_elem(FRAME_SIZE, value)
}

impl ImageServices for FakeServices {
    fn read_image(&self, path: &Path) -> Result<Image> {
        let name = name_of(path);
        match self.frames.get(&name) {
            Some((value, filter)) => {
                let mut keywords = Keywords::new();
                keywords.insert(NAME_KEY.into(), name);
                if !filter.is_empty() {
                    keywords.insert("FILTER".into(), filter.clone());
                }
                Ok(Image::mono(uniform(*value)).with_keywords(keywords))
            }
            None => LocalServices.read_image(path),
        }
    }

    fn write_image(&self, image: &Image, path: &Path, encoding: OutputEncoding) -> Result<()> {
        LocalServices.write_image(image, path, encoding)
    }

    fn calibrate(
        &self,
        light: &Image,
        masters: &CalibrationMasters,
        dark_scale: f32,
        pedestal: u16,
    ) -> Result<Image> {
        LocalServices.calibrate(light, masters, dark_scale, pedestal)
    }

    fn debayer(&self, raw: &Image, pattern: CfaPattern) -> Result<Image> {
        LocalServices.debayer(raw, pattern)
    }

    fn downsample(&self, image: &Image, factor: usize) -> Image {
        LocalServices.downsample(image, factor)
    }

    fn align(&self, _reference: &Image, target: &Image) -> Result<Image> {
        let name = target.keyword(NAME_KEY).unwrap_or_default().to_string();
        self.aligned.lock().unwrap().push(name.clone());
        if self.align_failures.contains(&name) {
            return Err(LiveStackError::AlignmentFailed(format!("{name}: forced")));
        }
        Ok(target.clone())
    }

    fn noise_estimate(&self, image: &Image) -> Result<NoiseEstimate> {
        LocalServices.noise_estimate(image)
    }

    fn extract_background(&self, image: &Image, degree: usize) -> Result<Image> {
        LocalServices.extract_background(image, degree)
    }

    fn scnr(&self, image: &Image, amount: f32) -> Image {
        LocalServices.scnr(image, amount)
    }
}

/// Watcher that only records registrations.
#[derive(Clone, Default)]
pub struct RecordingWatcher {
    pub calls: Arc<Mutex<Vec<(&'static str, PathBuf)>>>,
}

impl PathWatcher for RecordingWatcher {
    fn add_path(&mut self, dir: &Path) -> Result<bool> {
        self.calls.lock().unwrap().push(("add", dir.to_path_buf()));
        Ok(true)
    }

    fn remove_path(&mut self, dir: &Path) -> Result<bool> {
        self.calls.lock().unwrap().push(("remove", dir.to_path_buf()));
        Ok(true)
    }
}

/// Session settings for tests: no service thread, short settle time.
pub fn test_config() -> SessionConfig {
    SessionConfig {
        settle_time_secs: 2,
        fixed_settle_ms: 1_000,
        service_timeout_secs: 0,
        ..Default::default()
    }
}

pub fn coordinator(services: Arc<FakeServices>) -> (Coordinator, RecordingWatcher) {
    coordinator_with(test_config(), services)
}

pub fn coordinator_with(
    config: SessionConfig,
    services: Arc<FakeServices>,
) -> (Coordinator, RecordingWatcher) {
    let watcher = RecordingWatcher::default();
    let coordinator = Coordinator::new(config, services, Box::new(watcher.clone()));
    (coordinator, watcher)
}

/// Create `names` as empty files in `dir`, oldest first. Listing order is
/// by modification time, so creation is spaced out.
pub fn touch(dir: &Path, names: &[&str]) {
    for name in names {
        fs::write(dir.join(name), b"").unwrap();
        thread::sleep(Duration::from_millis(15));
    }
}

/// Comparable absolute path of a scratch directory.
pub fn canonical(dir: &Path) -> PathBuf {
    dir.canonicalize().unwrap()
}

/// Value of the top-left pixel of a stack's running image.
pub fn running_value(coordinator: &Coordinator, id: livestack_core::stack::StackId) -> f32 {
    let image = coordinator.stack(id).unwrap().running_image().unwrap();
    image.data.channels()[0].data[[0, 0]]
}
