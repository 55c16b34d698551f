use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use livestack_core::stack::{sidecar_path, StackProperties};

#[derive(Args)]
pub struct InfoArgs {
    /// Exported stack image
    pub file: PathBuf,
}

pub fn run(args: &InfoArgs) -> Result<()> {
    let sidecar = sidecar_path(&args.file);
    let props = StackProperties::load(&sidecar)
        .with_context(|| format!("Failed to read {}", sidecar.display()))?;
    crate::summary::print_properties(&args.file, &props);
    Ok(())
}
