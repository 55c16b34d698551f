use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::calibration::CalibrationMasters;
use crate::consts::NOISE_SCALE;
use crate::error::{LiveStackError, Result};
use crate::frame::Image;
use crate::ingest::prepare::Preparation;
use crate::services::ImageServices;
use crate::stack::Stack;

use super::merge::{merge_image, MergeGuard, MergeStats};
use super::ProgressReporter;

/// Step a queued frame is in, for the status line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntegrationPhase {
    Calibrating,
    Aligning,
    Integrating,
}

impl fmt::Display for IntegrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Calibrating => write!(f, "Calibrating"),
            Self::Aligning => write!(f, "Aligning"),
            Self::Integrating => write!(f, "Integrating"),
        }
    }
}

/// `"(i/total) Phase"`.
pub fn status_line(index: usize, total: usize, phase: IntegrationPhase) -> String {
    format!("({index}/{total}) {phase}")
}

/// What happened to one queued frame.
#[derive(Clone, Debug, PartialEq)]
pub enum FrameOutcome {
    /// Folded into the running image.
    Folded(MergeStats),
    /// Unreadable or unalignable; removed from the processed list.
    Rejected(String),
    /// Aligned, but the merge guard rejected every pixel.
    Discarded(MergeStats),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct IntegrationReport {
    pub outcomes: Vec<(String, FrameOutcome)>,
}

impl IntegrationReport {
    pub fn folded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, FrameOutcome::Folded(_)))
            .count()
    }

    pub fn rejected(&self) -> usize {
        self.outcomes.len() - self.folded()
    }
}

/// Collaborators of one integration run.
#[derive(Clone, Copy)]
pub struct IntegrationContext<'a> {
    pub services: &'a dyn ImageServices,
    pub masters: &'a CalibrationMasters,
    pub guard: MergeGuard,
    pub reporter: &'a dyn ProgressReporter,
}

/// Drain the stack's queue in FIFO order, folding every usable frame into
/// the running image. Per-frame failures are recorded on the stack and in
/// the report; only a broken stack is an error.
pub fn integrate_pending(stack: &mut Stack, ctx: &IntegrationContext<'_>) -> Result<IntegrationReport> {
    stack.begin_integration()?;
    let result = integrate_queue(stack, ctx);
    stack.end_integration()?;
    let report = result?;

    stack.set_status(format!("Monitoring, {} frames stacked", stack.frames_folded()));
    info!(
        stack = %stack.id(),
        folded = report.folded(),
        rejected = report.rejected(),
        "Integration pass complete"
    );
    Ok(report)
}

fn integrate_queue(stack: &mut Stack, ctx: &IntegrationContext<'_>) -> Result<IntegrationReport> {
    let mut report = IntegrationReport::default();
    let total = stack.new_files().len();
    if total == 0 {
        return Ok(report);
    }

    let id = stack.id();
    let dir = stack.path_to_watch().to_path_buf();
    let config = stack.config.clone();
    let prep = Preparation {
        services: ctx.services,
        masters: ctx.masters,
        config: &config,
    };

    // Calibrated-file output goes through the batch path.
    let mut batch: HashMap<String, Result<Image>> =
        if prep.calibration_enabled() && config.output.save_calibrated_file {
            stack.set_status(status_line(1, total, IntegrationPhase::Calibrating));
            ctx.reporter.phase(id, IntegrationPhase::Calibrating, 1, total);
            let names: Vec<String> = stack.new_files().iter().cloned().collect();
            let paths: Vec<PathBuf> = names.iter().map(|n| dir.join(n)).collect();
            names.into_iter().zip(prep.calibrate_batch(&paths)).collect()
        } else {
            HashMap::new()
        };

    let mut index = 0;
    while let Some(name) = stack.next_pending().map(String::from) {
        index += 1;
        let path = dir.join(&name);

        stack.set_status(status_line(index, total, IntegrationPhase::Calibrating));
        ctx.reporter.phase(id, IntegrationPhase::Calibrating, index, total);
        let prepared = match batch.remove(&name) {
            Some(calibrated) => calibrated.and_then(|image| prep.finish(&path, image, true)),
            None => prep.prepare(&path),
        };
        let prepared = match prepared {
            Ok(image) => image,
            Err(e) => {
                reject(stack, ctx, &mut report, &name, format!("could not be read: {e}"));
                continue;
            }
        };

        stack.set_status(status_line(index, total, IntegrationPhase::Aligning));
        ctx.reporter.phase(id, IntegrationPhase::Aligning, index, total);
        let aligned = {
            let reference = stack
                .running_image()
                .ok_or(LiveStackError::NoRunningImage(id))?;
            ctx.services.align(reference, &prepared)
        };
        let aligned = match aligned {
            Ok(image) => image,
            Err(e) => {
                reject(stack, ctx, &mut report, &name, format!("alignment failed: {e}"));
                continue;
            }
        };

        stack.set_status(status_line(index, total, IntegrationPhase::Integrating));
        ctx.reporter.phase(id, IntegrationPhase::Integrating, index, total);
        let n = stack.frames_folded();
        let merged = {
            let current = stack
                .running_image()
                .ok_or(LiveStackError::NoRunningImage(id))?;
            merge_image(current, &aligned, n, &ctx.guard)
        };

        let outcome = match merged {
            Err(e) => {
                reject(stack, ctx, &mut report, &name, format!("cannot be merged: {e}"));
                continue;
            }
            Ok((_, stats)) if stats.merged == 0 => {
                stack.discard_front();
                stack.warn(format!(
                    "{name}: every pixel rejected ({} outliers, {} blank), ignored",
                    stats.outliers, stats.blanks
                ));
                if let Err(e) = stack.persist_properties() {
                    stack.warn(format!("Could not save stack properties: {e}"));
                }
                FrameOutcome::Discarded(stats)
            }
            Ok((image, stats)) => {
                stack.set_running(image);
                stack.complete_front();
                info!(
                    stack = %id,
                    file = %name,
                    frames = n + 1,
                    outliers = stats.outliers,
                    blanks = stats.blanks,
                    "Frame integrated"
                );

                if config.processing.run_noise_eval {
                    evaluate_noise(stack, ctx.services);
                }
                if let Err(e) = stack.persist(ctx.services) {
                    stack.warn(format!("Could not save running image: {e}"));
                }
                FrameOutcome::Folded(stats)
            }
        };
        ctx.reporter.frame_done(id, &name, &outcome);
        report.outcomes.push((name, outcome));
    }

    Ok(report)
}

fn reject(
    stack: &mut Stack,
    ctx: &IntegrationContext<'_>,
    report: &mut IntegrationReport,
    name: &str,
    reason: String,
) {
    stack.reject_front();
    stack.warn(format!("{name}: {reason}, ignored"));
    if let Err(e) = stack.persist_properties() {
        stack.warn(format!("Could not save stack properties: {e}"));
    }
    let outcome = FrameOutcome::Rejected(reason);
    ctx.reporter.frame_done(stack.id(), name, &outcome);
    report.outcomes.push((name.to_string(), outcome));
}

fn evaluate_noise(stack: &mut Stack, services: &dyn ImageServices) {
    let estimate = match stack.running_image() {
        Some(image) => services.noise_estimate(image),
        None => return,
    };
    match estimate {
        Ok(est) => {
            let value = est.sigma * NOISE_SCALE;
            debug!(
                stack = %stack.id(),
                noise = value,
                pixels = est.pixel_count,
                layers = est.layers_used,
                "Noise evaluated"
            );
            stack.push_noise(value);
        }
        Err(e) => stack.warn(format!("Noise evaluation failed: {e}")),
    }
}
