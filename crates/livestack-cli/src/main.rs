mod commands;
mod summary;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "livestack", about = "Live stacking of incoming telescope frames")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch directories and stack new frames as they arrive
    Watch(commands::watch::WatchArgs),
    /// Continue an exported stack from its image and sidecar
    Resume(commands::resume::ResumeArgs),
    /// Show the persisted properties of an exported stack
    Info(commands::info::InfoArgs),
    /// Combine three exported channel stacks into an RGB image
    Composite(commands::composite::CompositeArgs),
    /// Print or save the default session config
    Config(commands::config::ConfigArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match &cli.command {
        Commands::Watch(args) => commands::watch::run(args),
        Commands::Resume(args) => commands::resume::run(args),
        Commands::Info(args) => commands::info::run(args),
        Commands::Composite(args) => commands::composite::run(args),
        Commands::Config(args) => commands::config::run(args),
    }
}
