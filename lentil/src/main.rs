use lentil::run_fetch::*;
use lentil::run_hvg::*;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "lentil", version)]
#[command(about = "Highly variable genes from scVI-denoised expression")]
struct Cli {
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Select genes whose denoised standard deviation is above the median
    Hvg(HvgArgs),
    /// Download the pretrained model and show its layout
    Fetch(FetchArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    match &cli.commands {
        Commands::Hvg(args) => run_hvg(args)?,
        Commands::Fetch(args) => run_fetch(args)?,
    }

    Ok(())
}
