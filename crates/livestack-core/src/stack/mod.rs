pub mod config;
pub mod log;
pub mod properties;

use std::collections::VecDeque;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::color::debayer::CfaPattern;
use crate::consts::{property as key, NOISE_SEPARATOR};
use crate::error::{LiveStackError, Result};
use crate::frame::Image;
use crate::services::ImageServices;

pub use config::StackConfig;
pub use log::ConsoleLog;
pub use properties::{sidecar_path, StackProperties};

/// Process-unique stack handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StackId(pub u32);

impl fmt::Display for StackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StackState {
    /// Created; the reference frame has not been prepared yet.
    WaitingForReference,
    /// Reference prepared, folder not watched.
    Ready,
    Monitoring,
    Integrating,
    Stopped,
}

impl fmt::Display for StackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WaitingForReference => write!(f, "waiting for reference"),
            Self::Ready => write!(f, "ready"),
            Self::Monitoring => write!(f, "monitoring"),
            Self::Integrating => write!(f, "integrating"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// One live-stacking job: a reference frame, the directory it watches and
/// the bookkeeping of every file it has seen.
///
/// Every file accepted into the queue is recorded in `processed_files`
/// first, so `processed_files` always contains `new_files`.
#[derive(Debug)]
pub struct Stack {
    id: StackId,
    main_view_id: String,
    pub config: StackConfig,
    path_to_watch: PathBuf,
    reference_path: PathBuf,
    file_extension: String,
    processed_files: Vec<String>,
    ignored_files: Vec<String>,
    new_files: VecDeque<String>,
    calibrated: bool,
    noise_history: Vec<f64>,
    status: String,
    watching_folder: bool,
    is_processing_files: bool,
    state: StackState,
    running: Option<Image>,
    revision: u64,
    export: bool,
    log: ConsoleLog,
    image_path: Option<PathBuf>,
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl Stack {
    /// A new stack for `reference_path`, watching the reference's directory.
    pub fn new(id: StackId, reference_path: &Path, config: StackConfig) -> Result<Self> {
        config.validate()?;
        let reference_path = reference_path
            .canonicalize()
            .unwrap_or_else(|_| reference_path.to_path_buf());
        let path_to_watch = reference_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let file_extension = reference_path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        let stem = reference_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| id.0.to_string());

        Ok(Self {
            id,
            main_view_id: format!("live_{stem}"),
            config,
            path_to_watch,
            reference_path,
            file_extension,
            processed_files: Vec::new(),
            ignored_files: Vec::new(),
            new_files: VecDeque::new(),
            calibrated: false,
            noise_history: Vec::new(),
            status: String::new(),
            watching_folder: false,
            is_processing_files: false,
            state: StackState::WaitingForReference,
            running: None,
            revision: 0,
            export: false,
            log: ConsoleLog::default(),
            image_path: None,
        })
    }

    pub fn id(&self) -> StackId {
        self.id
    }

    pub fn main_view_id(&self) -> &str {
        &self.main_view_id
    }

    pub fn path_to_watch(&self) -> &Path {
        &self.path_to_watch
    }

    /// Watch a directory other than the reference's.
    ///
    /// The reference only counts as processed while it sits in the watched
    /// directory; elsewhere a same-named file is a new frame.
    pub fn set_path_to_watch(&mut self, dir: &Path) {
        self.path_to_watch = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
        let name = file_name_of(&self.reference_path);
        if self.reference_is_watched() {
            if self.calibrated && !name.is_empty() && !self.processed_files.contains(&name) {
                self.processed_files.push(name);
            }
        } else {
            self.processed_files.retain(|n| *n != name);
        }
    }

    fn reference_is_watched(&self) -> bool {
        self.reference_path.parent() == Some(self.path_to_watch.as_path())
    }

    pub fn reference_path(&self) -> &Path {
        &self.reference_path
    }

    pub fn file_extension(&self) -> &str {
        &self.file_extension
    }

    pub fn processed_files(&self) -> &[String] {
        &self.processed_files
    }

    pub fn ignored_files(&self) -> &[String] {
        &self.ignored_files
    }

    pub fn new_files(&self) -> &VecDeque<String> {
        &self.new_files
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    pub fn noise_history(&self) -> &[f64] {
        &self.noise_history
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status = status.into();
    }

    pub fn is_watching(&self) -> bool {
        self.watching_folder
    }

    pub fn is_processing_files(&self) -> bool {
        self.is_processing_files
    }

    pub fn state(&self) -> StackState {
        self.state
    }

    pub fn running_image(&self) -> Option<&Image> {
        self.running.as_ref()
    }

    /// Bumped whenever the running image changes.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn export(&self) -> bool {
        self.export
    }

    pub fn set_export(&mut self, export: bool) {
        self.export = export;
    }

    pub fn log(&self) -> &ConsoleLog {
        &self.log
    }

    pub fn image_path(&self) -> Option<&Path> {
        self.image_path.as_deref()
    }

    /// Where the running image and its sidecar are persisted.
    pub fn set_image_path(&mut self, path: impl Into<PathBuf>) {
        self.image_path = Some(path.into());
    }

    /// Record a user-visible warning.
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(stack = %self.id, "{message}");
        self.log.push(message);
    }

    /// Record a user-visible informational line.
    pub fn note(&mut self, message: impl Into<String>) {
        let message = message.into();
        info!(stack = %self.id, "{message}");
        self.log.push(message);
    }

    fn transition(&mut self, action: &'static str, from: &[StackState], to: StackState) -> Result<()> {
        if !from.contains(&self.state) {
            return Err(LiveStackError::InvalidTransition {
                id: self.id,
                action,
                state: self.state.to_string(),
            });
        }
        self.state = to;
        Ok(())
    }

    /// Install the prepared reference frame as the first running image.
    pub fn attach_reference(&mut self, prepared: Image) -> Result<()> {
        self.transition(
            "attach a reference",
            &[StackState::WaitingForReference],
            StackState::Ready,
        )?;
        let name = file_name_of(&self.reference_path);
        if self.reference_is_watched()
            && !name.is_empty()
            && !self.processed_files.contains(&name)
        {
            self.processed_files.push(name);
        }
        self.calibrated = true;
        self.set_running(prepared);
        self.set_status("Ready");
        Ok(())
    }

    pub fn start_watching(&mut self) -> Result<()> {
        self.transition(
            "start watching",
            &[StackState::Ready, StackState::Monitoring],
            StackState::Monitoring,
        )?;
        self.watching_folder = true;
        self.set_status("Monitoring");
        Ok(())
    }

    pub fn stop_watching(&mut self) -> Result<()> {
        self.transition(
            "stop watching",
            &[StackState::Ready, StackState::Monitoring],
            StackState::Ready,
        )?;
        self.watching_folder = false;
        self.set_status("Ready");
        Ok(())
    }

    pub fn begin_integration(&mut self) -> Result<()> {
        self.transition(
            "integrate",
            &[StackState::Monitoring],
            StackState::Integrating,
        )?;
        self.is_processing_files = true;
        Ok(())
    }

    pub fn end_integration(&mut self) -> Result<()> {
        self.transition(
            "finish integrating",
            &[StackState::Integrating],
            StackState::Monitoring,
        )?;
        self.is_processing_files = false;
        Ok(())
    }

    /// Stop for good. Exported stacks keep their persisted files, others
    /// have them removed.
    pub fn stop(&mut self, services: &dyn ImageServices) -> Result<()> {
        if self.state == StackState::Integrating {
            return Err(LiveStackError::InvalidTransition {
                id: self.id,
                action: "stop",
                state: self.state.to_string(),
            });
        }
        self.state = StackState::Stopped;
        self.watching_folder = false;
        self.set_status("Stopped");

        if self.export {
            self.persist(services)?;
            if let Some(path) = self.image_path.clone() {
                self.note(format!("Exported to {}", path.display()));
            }
        } else if let Some(path) = self.image_path.clone() {
            for p in [sidecar_path(&path), path] {
                if p.exists() {
                    fs::remove_file(&p)?;
                }
            }
            self.note("Discarded");
        }
        Ok(())
    }

    /// Record `name` as belonging to this stack and queue it. Names already
    /// seen are skipped; returns whether the name was queued.
    pub fn enqueue(&mut self, name: &str) -> bool {
        if self.processed_files.iter().any(|n| n == name)
            || self.ignored_files.iter().any(|n| n == name)
        {
            return false;
        }
        self.processed_files.push(name.to_string());
        self.new_files.push_back(name.to_string());
        true
    }

    /// Frames merged into the running image, the reference included.
    ///
    /// Discarded frames stay in both the processed and ignored lists and
    /// are not counted. A reference outside the watched directory is
    /// not listed but still counts.
    pub fn frames_folded(&self) -> usize {
        let discarded = self
            .processed_files
            .iter()
            .filter(|n| self.ignored_files.contains(n))
            .count();
        let unlisted_reference =
            usize::from(self.running.is_some() && !self.reference_is_watched());
        self.processed_files.len() - self.new_files.len() - discarded + unlisted_reference
    }

    pub fn next_pending(&self) -> Option<&str> {
        self.new_files.front().map(String::as_str)
    }

    /// The front of the queue was folded.
    pub fn complete_front(&mut self) -> Option<String> {
        self.new_files.pop_front()
    }

    /// The front of the queue could not be used: it leaves the stack and is
    /// never retried.
    pub fn reject_front(&mut self) -> Option<String> {
        let name = self.new_files.pop_front()?;
        if let Some(pos) = self.processed_files.iter().rposition(|n| *n == name) {
            self.processed_files.remove(pos);
        }
        self.ignored_files.push(name.clone());
        Some(name)
    }

    /// The front of the queue was consumed but contributed no pixel. It
    /// stays processed and is also listed as ignored.
    pub fn discard_front(&mut self) -> Option<String> {
        let name = self.new_files.pop_front()?;
        self.ignored_files.push(name.clone());
        Some(name)
    }

    pub fn set_running(&mut self, image: Image) {
        self.running = Some(image);
        self.revision += 1;
    }

    pub fn push_noise(&mut self, value: f64) {
        self.noise_history.push(value);
    }

    /// Write the running image and its sidecar, if an image path is set.
    pub fn persist(&self, services: &dyn ImageServices) -> Result<()> {
        let Some(path) = &self.image_path else {
            return Ok(());
        };
        let image = self.running.as_ref().ok_or(LiveStackError::NoRunningImage(self.id))?;
        services.write_image(image, path, self.config.output.encoding())?;
        self.to_properties().save(&sidecar_path(path))
    }

    /// Rewrite only the sidecar; the running image is unchanged.
    pub fn persist_properties(&self) -> Result<()> {
        match &self.image_path {
            Some(path) => self.to_properties().save(&sidecar_path(path)),
            None => Ok(()),
        }
    }

    pub fn to_properties(&self) -> StackProperties {
        let mut p = StackProperties::new();
        let c = &self.config;

        p.set(key::WATCH_PATH, self.path_to_watch.display());
        p.set(key::EXTENSION, &self.file_extension);
        p.set(key::REFERENCE_PATH, self.reference_path.display());
        p.set(key::FILTER, &c.watch.filter);
        p.set(key::IGNORE_FILTER, c.watch.ignore_filter);
        p.set_list(key::PROCESSED_FILES, &self.processed_files);
        p.set_list(key::IGNORED_FILES, &self.ignored_files);
        p.set(key::CALIBRATED, self.calibrated);

        p.set_path(key::BIAS_PATH, c.calibration.bias_path.as_deref());
        p.set_path(key::DARK_PATH, c.calibration.dark_path.as_deref());
        p.set_path(key::FLAT_PATH, c.calibration.flat_path.as_deref());
        p.set(key::OPTIMIZE_DARK, c.calibration.optimize_dark);
        p.set(key::DARK_EXPOSURE_TIME, c.calibration.dark_exposure_time);
        p.set(key::PEDESTAL, c.calibration.pedestal);

        p.set(key::IS_CFA, c.color.is_cfa);
        p.set(key::BAYER_PATTERN, c.color.cfa_pattern);

        p.set(key::DOWNSCALE_IMAGES, c.processing.downscale_images);
        p.set(key::DOWNSCALE_AMOUNT, c.processing.downscale_amount);
        p.set(key::RUN_ABE, c.processing.run_abe);
        p.set(key::ABE_DEGREE, c.processing.abe_degree);
        p.set(key::SCNR, c.processing.scnr);
        p.set(key::SCNR_AMOUNT, c.processing.scnr_amount);
        p.set(key::RUN_NOISE_EVAL, c.processing.run_noise_eval);

        p.set(key::SAVE_CALIBRATED, c.output.save_calibrated_file);
        p.set(key::SAVE_COMPRESSED, c.output.save_compressed);
        p.set(key::SAVE_AS_16BIT_INT, c.output.save_as_16bit_int);
        p.set(key::SAVE_DEBAYERED, c.output.save_debayered);

        let noise = self
            .noise_history
            .iter()
            .map(|v| format!("{v}"))
            .collect::<Vec<_>>()
            .join(&NOISE_SEPARATOR.to_string());
        p.set(key::NOISE_VALUES, noise);
        p
    }

    /// Rebuild a stack from persisted properties. The stack comes back
    /// `Ready` with `running` as its image and an empty queue.
    pub fn from_properties(
        id: StackId,
        props: &StackProperties,
        running: Image,
        image_path: &Path,
    ) -> Result<Self> {
        let mut config = StackConfig::default();
        config.watch.filter = props.get(key::FILTER).unwrap_or_default().to_string();
        config.watch.ignore_filter = props.parse_or(key::IGNORE_FILTER, false)?;

        let cal = &mut config.calibration;
        cal.bias_path = props.path(key::BIAS_PATH);
        cal.dark_path = props.path(key::DARK_PATH);
        cal.flat_path = props.path(key::FLAT_PATH);
        cal.optimize_dark = props.parse_or(key::OPTIMIZE_DARK, false)?;
        cal.dark_exposure_time = props.parse_or(key::DARK_EXPOSURE_TIME, 0.0)?;
        cal.pedestal = props.parse_or(key::PEDESTAL, 0)?;

        config.color.is_cfa = props.parse_or(key::IS_CFA, false)?;
        config.color.cfa_pattern = props.parse_or(key::BAYER_PATTERN, CfaPattern::default())?;

        let processing = &mut config.processing;
        processing.downscale_images = props.parse_or(key::DOWNSCALE_IMAGES, false)?;
        processing.downscale_amount = props.parse_or(key::DOWNSCALE_AMOUNT, processing.downscale_amount)?;
        processing.run_abe = props.parse_or(key::RUN_ABE, false)?;
        processing.abe_degree = props.parse_or(key::ABE_DEGREE, processing.abe_degree)?;
        processing.scnr = props.parse_or(key::SCNR, false)?;
        processing.scnr_amount = props.parse_or(key::SCNR_AMOUNT, processing.scnr_amount)?;
        processing.run_noise_eval = props.parse_or(key::RUN_NOISE_EVAL, false)?;

        let out = &mut config.output;
        out.save_calibrated_file = props.parse_or(key::SAVE_CALIBRATED, false)?;
        out.save_compressed = props.parse_or(key::SAVE_COMPRESSED, false)?;
        out.save_as_16bit_int = props.parse_or(key::SAVE_AS_16BIT_INT, false)?;
        out.save_debayered = props.parse_or(key::SAVE_DEBAYERED, false)?;

        let watch_path = PathBuf::from(props.require(key::WATCH_PATH)?);
        let extension = props.require(key::EXTENSION)?.to_ascii_lowercase();
        let processed_files = props.list(key::PROCESSED_FILES);
        if props.get(key::PROCESSED_FILES).is_none() {
            return Err(LiveStackError::MissingProperty(key::PROCESSED_FILES));
        }
        let reference_path = props
            .path(key::REFERENCE_PATH)
            .or_else(|| processed_files.first().map(|n| watch_path.join(n)))
            .unwrap_or_else(|| image_path.to_path_buf());

        let noise_history = props
            .get(key::NOISE_VALUES)
            .map(|v| properties::split_list(v, NOISE_SEPARATOR))
            .unwrap_or_default()
            .iter()
            .map(|v| {
                v.parse::<f64>().map_err(|_| LiveStackError::InvalidProperty {
                    key: key::NOISE_VALUES,
                    value: v.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut stack = Stack::new(id, &reference_path, config)?;
        stack.path_to_watch = watch_path;
        stack.file_extension = extension;
        stack.processed_files = processed_files;
        stack.ignored_files = props.list(key::IGNORED_FILES);
        stack.calibrated = props.parse_or(key::CALIBRATED, true)?;
        stack.noise_history = noise_history;
        stack.image_path = Some(image_path.to_path_buf());
        if let Some(stem) = image_path.file_stem() {
            stack.main_view_id = stem.to_string_lossy().into_owned();
        }
        stack.state = StackState::Ready;
        stack.export = true;
        stack.set_running(running);
        stack.set_status("Ready");
        Ok(stack)
    }
}
