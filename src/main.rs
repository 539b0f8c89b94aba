//! Keel CLI — Bicep and manifest generation for an Azure Redis cache.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "keel",
    version,
    about = "Generate Bicep modules and a deployment manifest for an Azure Redis cache"
)]
struct Cli {
    #[command(subcommand)]
    command: keel::cli::Commands,
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = keel::logging::init() {
        eprintln!("warning: logging disabled: {}", e);
    }
    if let Err(e) = keel::cli::dispatch(cli.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
