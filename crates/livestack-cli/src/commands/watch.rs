use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use livestack_core::color::debayer::CfaPattern;
use livestack_core::composite::CompositeConfig;
use livestack_core::services::LocalServices;
use livestack_core::session::{Coordinator, SessionConfig};
use livestack_core::stack::StackId;
use livestack_core::watch::DirectoryWatcher;

use super::session::{self, SessionOptions};

#[derive(Args)]
pub struct WatchArgs {
    /// Reference frame of each stack; new frames are aligned onto it
    #[arg(required = true)]
    pub references: Vec<PathBuf>,

    /// Watch this directory instead of each reference's own
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Only stack frames with this FILTER keyword [default: the reference's]
    #[arg(long, conflicts_with = "ignore_filter")]
    pub filter: Option<String>,

    /// Stack frames regardless of their FILTER keyword
    #[arg(long)]
    pub ignore_filter: bool,

    /// Master bias frame
    #[arg(long)]
    pub bias: Option<PathBuf>,

    /// Master dark frame
    #[arg(long)]
    pub dark: Option<PathBuf>,

    /// Master flat frame
    #[arg(long)]
    pub flat: Option<PathBuf>,

    /// Exposure of the master dark in seconds
    #[arg(long)]
    pub dark_exposure: Option<f64>,

    /// Scale the dark by each frame's exposure
    #[arg(long, requires = "dark_exposure")]
    pub optimize_dark: bool,

    /// Pedestal added after calibration, in 16-bit DN
    #[arg(long)]
    pub pedestal: Option<u16>,

    /// Frames are raw color mosaics
    #[arg(long)]
    pub cfa: bool,

    /// Bayer pattern of the mosaic (implies --cfa)
    #[arg(long)]
    pub bayer: Option<CfaPattern>,

    /// Bin frames by this factor before stacking
    #[arg(long)]
    pub downscale: Option<usize>,

    /// Subtract a background polynomial of this degree
    #[arg(long)]
    pub abe: Option<usize>,

    /// Remove green cast with this strength (0-1)
    #[arg(long)]
    pub scnr: Option<f32>,

    /// Track the noise of the running image
    #[arg(long)]
    pub noise_eval: bool,

    /// Seconds to let a burst of writes settle before reading a directory
    #[arg(long)]
    pub settle: Option<u64>,

    /// Session config file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Write an RGB preview from exactly three stacks (red, green, blue)
    #[arg(long)]
    pub rgb: bool,

    /// Keep the stacked images when stopping
    #[arg(long)]
    pub export: bool,

    /// Write calibrated frames (ezc_) next to their source
    #[arg(long)]
    pub save_calibrated: bool,

    /// Write debayered frames (ezd_) and reuse them
    #[arg(long)]
    pub save_debayered: bool,

    /// Save stacked images as 16-bit FITS
    #[arg(long)]
    pub int16: bool,

    /// Save stacked images as 16-bit PNG
    #[arg(long)]
    pub compressed: bool,

    /// Output directory for stacked images
    #[arg(short, long, default_value = "livestack")]
    pub output: PathBuf,
}

fn load_config(path: Option<&Path>) -> Result<SessionConfig> {
    match path {
        Some(p) => SessionConfig::load(p)
            .with_context(|| format!("Invalid session config {}", p.display())),
        None => Ok(SessionConfig::default()),
    }
}

fn build_config_from_args(args: &WatchArgs) -> Result<SessionConfig> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(settle) = args.settle {
        config.settle_time_secs = settle;
    }

    let d = &mut config.defaults;
    if let Some(ref filter) = args.filter {
        d.watch.filter = filter.clone();
    }
    d.watch.ignore_filter |= args.ignore_filter;

    let c = &mut d.calibration;
    if args.bias.is_some() {
        c.bias_path = args.bias.clone();
    }
    if args.dark.is_some() {
        c.dark_path = args.dark.clone();
    }
    if args.flat.is_some() {
        c.flat_path = args.flat.clone();
    }
    if let Some(exposure) = args.dark_exposure {
        c.dark_exposure_time = exposure;
    }
    c.optimize_dark |= args.optimize_dark;
    if let Some(pedestal) = args.pedestal {
        c.pedestal = pedestal;
    }

    if let Some(pattern) = args.bayer {
        d.color.is_cfa = true;
        d.color.cfa_pattern = pattern;
    }
    d.color.is_cfa |= args.cfa;

    let p = &mut d.processing;
    if let Some(factor) = args.downscale {
        p.downscale_images = true;
        p.downscale_amount = factor;
    }
    if let Some(degree) = args.abe {
        p.run_abe = true;
        p.abe_degree = degree;
    }
    if let Some(amount) = args.scnr {
        p.scnr = true;
        p.scnr_amount = amount;
    }
    p.run_noise_eval |= args.noise_eval;

    let o = &mut d.output;
    o.save_calibrated_file |= args.save_calibrated;
    o.save_debayered |= args.save_debayered;
    o.save_as_16bit_int |= args.int16;
    o.save_compressed |= args.compressed;

    config.validate().context("Invalid stack settings")?;
    Ok(config)
}

/// Red, green and blue stacks for `--rgb`.
pub fn rgb_channels(rgb: bool, ids: &[StackId]) -> Result<Option<[StackId; 3]>> {
    if !rgb {
        return Ok(None);
    }
    match *ids {
        [r, g, b] => Ok(Some([r, g, b])),
        _ => bail!("--rgb needs exactly three stacks, got {}", ids.len()),
    }
}

/// Output directory, created if missing, as an absolute path.
pub fn prepare_out_dir(dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    dir.canonicalize()
        .with_context(|| format!("Failed to resolve {}", dir.display()))
}

pub fn run(args: &WatchArgs) -> Result<()> {
    let config = build_config_from_args(args)?;
    let out_dir = prepare_out_dir(&args.output)?;

    let (watcher, receiver) = DirectoryWatcher::new().context("Failed to start file watcher")?;
    let encoding = config.defaults.output.encoding();
    let defaults = config.defaults.clone();
    let mut coordinator = Coordinator::new(config, Arc::new(LocalServices), Box::new(watcher));

    let mut ids = Vec::with_capacity(args.references.len());
    for reference in &args.references {
        let id = coordinator
            .create_stack(reference, defaults.clone())
            .with_context(|| format!("Failed to start a stack on {}", reference.display()))?;
        let Some(stack) = coordinator.stack_mut(id) else {
            bail!("Stack {id} vanished");
        };
        if let Some(ref dir) = args.dir {
            stack.set_path_to_watch(dir);
        }
        if stack.path_to_watch() == out_dir.as_path() {
            bail!(
                "Output directory {} is also watched; pick another with -o",
                out_dir.display()
            );
        }
        let image = out_dir.join(format!("{}.{}", stack.main_view_id(), encoding.extension()));
        if coordinator.stacks().any(|s| s.image_path() == Some(image.as_path())) {
            bail!("Two references would both save to {}", image.display());
        }
        if let Some(stack) = coordinator.stack_mut(id) {
            stack.set_image_path(image);
        }
        coordinator.set_export(id, args.export)?;
        ids.push(id);
    }

    let rgb = rgb_channels(args.rgb, &ids)?;
    crate::summary::print_session_summary(coordinator.config(), coordinator.stacks(), &out_dir);

    let composite = CompositeConfig {
        scnr: args.scnr.is_some(),
        scnr_amount: args.scnr.unwrap_or(CompositeConfig::default().scnr_amount),
        ..CompositeConfig::default()
    };
    session::run(
        coordinator,
        receiver,
        SessionOptions {
            out_dir,
            rgb,
            composite,
        },
    )
}
