use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use livestack_core::session::SessionConfig;

#[derive(Args)]
pub struct ConfigArgs {
    /// Write config to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Print or save a full default SessionConfig as TOML.
pub fn run(args: &ConfigArgs) -> Result<()> {
    let toml_str = SessionConfig::default().to_toml()?;

    if let Some(ref path) = args.output {
        std::fs::write(path, &toml_str)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        println!("Default config saved to {}", path.display());
    } else {
        print!("{}", toml_str);
    }

    Ok(())
}
