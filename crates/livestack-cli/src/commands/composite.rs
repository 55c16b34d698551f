use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use livestack_core::composite::{composite, CompositeConfig};
use livestack_core::consts::{DEFAULT_STRETCH_HIGH, DEFAULT_STRETCH_LOW};
use livestack_core::io::image_io::save_color_png;
use livestack_core::services::{ImageServices, LocalServices};

#[derive(Args)]
pub struct CompositeArgs {
    /// Red channel stack; green and blue are aligned onto it
    pub red: PathBuf,

    /// Green channel stack
    pub green: PathBuf,

    /// Blue channel stack
    pub blue: PathBuf,

    /// Lower stretch percentile (0-1)
    #[arg(long, default_value_t = DEFAULT_STRETCH_LOW)]
    pub low: f32,

    /// Upper stretch percentile (0-1)
    #[arg(long, default_value_t = DEFAULT_STRETCH_HIGH)]
    pub high: f32,

    /// Remove green cast with this strength (0-1)
    #[arg(long)]
    pub scnr: Option<f32>,

    /// Output PNG path
    #[arg(short, long, default_value = "rgb.png")]
    pub output: PathBuf,
}

pub fn run(args: &CompositeArgs) -> Result<()> {
    let services = LocalServices;
    let read = |path: &PathBuf| {
        services
            .read_image(path)
            .with_context(|| format!("Failed to read {}", path.display()))
    };
    let (red, green, blue) = (read(&args.red)?, read(&args.green)?, read(&args.blue)?);

    let config = CompositeConfig {
        stretch_low: args.low,
        stretch_high: args.high,
        scnr: args.scnr.is_some(),
        scnr_amount: args.scnr.unwrap_or(CompositeConfig::default().scnr_amount),
    };
    let color = composite(&services, &red, &green, &blue, &config)?;

    save_color_png(&color, &args.output)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    println!("Saved to {}", args.output.display());
    Ok(())
}
