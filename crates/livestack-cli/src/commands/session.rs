use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use console::Style;
use indicatif::{ProgressBar, ProgressStyle};
use livestack_core::composite::{CompositeConfig, RgbCompositor};
use livestack_core::integrate::engine::status_line;
use livestack_core::integrate::{FrameOutcome, IntegrationPhase, ProgressReporter};
use livestack_core::io::image_io::save_color_png;
use livestack_core::session::{Coordinator, CycleEvent, SkipReason};
use livestack_core::stack::StackId;
use livestack_core::watch::ChangeReceiver;
use tracing::{debug, warn};

/// File name of the RGB preview inside the output directory.
const PREVIEW_NAME: &str = "rgb_preview.png";

const SPINNER_TICK: Duration = Duration::from_millis(120);

pub struct SessionOptions {
    pub out_dir: PathBuf,
    /// Red, green and blue stacks to composite on every tick.
    pub rgb: Option<[StackId; 3]>,
    pub composite: CompositeConfig,
}

/// Mirrors integration progress on the spinner.
struct SpinnerReporter {
    bar: ProgressBar,
}

impl ProgressReporter for SpinnerReporter {
    fn phase(&self, stack: StackId, phase: IntegrationPhase, index: usize, total: usize) {
        self.bar
            .set_message(format!("{stack}: {}", status_line(index, total, phase)));
    }

    fn frame_done(&self, stack: StackId, name: &str, outcome: &FrameOutcome) {
        let dim = Style::new().dim();
        let warn = Style::new().yellow();
        match outcome {
            FrameOutcome::Folded(stats) => self.bar.println(format!(
                "  {} {name} {}",
                Style::new().green().apply_to("+"),
                dim.apply_to(format!("({stack}, {} outliers)", stats.outliers))
            )),
            FrameOutcome::Discarded(stats) => self.bar.println(format!(
                "  {} {name} {}",
                warn.apply_to("-"),
                dim.apply_to(format!("({stack}, all {} pixels outliers)", stats.outliers))
            )),
            FrameOutcome::Rejected(reason) => self.bar.println(format!(
                "  {} {name} {}",
                warn.apply_to("x"),
                dim.apply_to(format!("({stack}, {reason})"))
            )),
        }
    }
}

fn status_message(session: &Coordinator) -> String {
    session
        .stacks()
        .map(|s| format!("{}: {}", s.main_view_id(), s.status()))
        .collect::<Vec<_>>()
        .join("  |  ")
}

fn report_event(bar: &ProgressBar, event: &CycleEvent) {
    match event {
        CycleEvent::Contended { dir } => bar.println(format!(
            "  {}",
            Style::new()
                .yellow()
                .apply_to(format!("{} deferred, another directory is processing", dir.display()))
        )),
        CycleEvent::Skipped {
            dir,
            reason: SkipReason::ListingFailed,
        } => bar.println(format!(
            "  {}",
            Style::new()
                .red()
                .apply_to(format!("Could not list {}", dir.display()))
        )),
        other => debug!(?other, "Cycle event"),
    }
}

fn refresh_preview(
    session: &Coordinator,
    compositor: &mut RgbCompositor,
    path: &Path,
    bar: &ProgressBar,
) {
    let [Some(r), Some(g), Some(b)] = compositor.channels().map(|id| session.stack(id)) else {
        return;
    };
    match compositor.refresh(session.services(), [r, g, b]) {
        Ok(true) => {
            if let Some(preview) = compositor.preview() {
                if let Err(e) = save_color_png(preview, path) {
                    warn!(path = %path.display(), "Failed to write RGB preview: {e}");
                }
            }
        }
        Ok(false) => {}
        Err(e) => bar.println(format!(
            "  {}",
            Style::new()
                .red()
                .apply_to(format!("RGB preview stopped: {e}"))
        )),
    }
}

/// Watch every stack of `session` until Ctrl-C, then stop them all.
pub fn run(mut session: Coordinator, receiver: ChangeReceiver, options: SessionOptions) -> Result<()> {
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))
            .context("Failed to install Ctrl-C handler")?;
    }

    let bar = ProgressBar::new_spinner();
    bar.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    bar.enable_steady_tick(SPINNER_TICK);
    session.set_reporter(Arc::new(SpinnerReporter { bar: bar.clone() }));

    let ids: Vec<StackId> = session.stacks().map(|s| s.id()).collect();
    let started = Instant::now();
    for id in ids {
        session
            .start_watching(id, started)
            .with_context(|| format!("Failed to watch stack {id}"))?;
    }

    let mut compositor = options.rgb.map(|channels| {
        let mut c = RgbCompositor::new(channels, options.composite);
        c.start();
        c
    });
    let preview_path = options.out_dir.join(PREVIEW_NAME);
    let poll_interval = session.config().poll_interval();

    while !stop.load(Ordering::SeqCst) {
        let now = Instant::now();
        let timeout = session
            .next_deadline()
            .map(|d| d.saturating_duration_since(now).min(poll_interval))
            .unwrap_or(poll_interval);

        for dir in receiver.wait(timeout) {
            session.on_directory_changed(&dir, false, Instant::now());
        }
        for event in session.poll(Instant::now()) {
            report_event(&bar, &event);
        }
        if let Some(c) = compositor.as_mut() {
            refresh_preview(&session, c, &preview_path, &bar);
        }
        bar.set_message(status_message(&session));
    }

    bar.finish_and_clear();
    println!();
    println!("Stopping {} stack(s)", session.stacks().count());
    let mut failures = 0;
    for result in session.stop_all() {
        match result {
            Ok(stack) => crate::summary::print_stack_result(&stack),
            Err(e) => {
                failures += 1;
                warn!("Failed to stop stack: {e}");
            }
        }
    }
    if failures > 0 {
        anyhow::bail!("{failures} stack(s) failed to stop cleanly");
    }
    Ok(())
}
