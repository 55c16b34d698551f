use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use livestack_core::composite::CompositeConfig;
use livestack_core::services::LocalServices;
use livestack_core::session::{Coordinator, SessionConfig};
use livestack_core::watch::DirectoryWatcher;

use super::session::{self, SessionOptions};
use super::watch::{prepare_out_dir, rgb_channels};

#[derive(Args)]
pub struct ResumeArgs {
    /// Exported stack images, each with its .livestack.toml sidecar
    #[arg(required = true)]
    pub images: Vec<PathBuf>,

    /// Session config file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Seconds to let a burst of writes settle before reading a directory
    #[arg(long)]
    pub settle: Option<u64>,

    /// Write an RGB preview from exactly three stacks (red, green, blue)
    #[arg(long)]
    pub rgb: bool,

    /// Delete the stacked images when stopping
    #[arg(long)]
    pub discard: bool,

    /// Directory for the RGB preview [default: next to the first image]
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub fn run(args: &ResumeArgs) -> Result<()> {
    let mut config = match args.config {
        Some(ref p) => SessionConfig::load(p)
            .with_context(|| format!("Invalid session config {}", p.display()))?,
        None => SessionConfig::default(),
    };
    if let Some(settle) = args.settle {
        config.settle_time_secs = settle;
    }

    let out_dir = match (&args.output, args.images.first()) {
        (Some(dir), _) => dir.clone(),
        (None, Some(image)) => image
            .parent()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(".")),
        (None, None) => PathBuf::from("."),
    };
    let out_dir = prepare_out_dir(&out_dir)?;

    let (watcher, receiver) = DirectoryWatcher::new().context("Failed to start file watcher")?;
    let mut coordinator = Coordinator::new(config, Arc::new(LocalServices), Box::new(watcher));

    let mut ids = Vec::with_capacity(args.images.len());
    for image in &args.images {
        let id = coordinator
            .resume_stack(image)
            .with_context(|| format!("Failed to resume {}", image.display()))?;
        coordinator.set_export(id, !args.discard)?;
        ids.push(id);
    }

    let rgb = rgb_channels(args.rgb, &ids)?;
    crate::summary::print_session_summary(coordinator.config(), coordinator.stacks(), &out_dir);

    session::run(
        coordinator,
        receiver,
        SessionOptions {
            out_dir,
            rgb,
            composite: CompositeConfig::default(),
        },
    )
}
