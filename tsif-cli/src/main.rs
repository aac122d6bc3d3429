mod commands;
mod output;

use clap::Parser;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use tsif_core::Config;

#[derive(Parser, Debug)]
#[command(name = "tsif")]
#[command(about = "tsif - Bridged, NATed networks for Firecracker microVMs", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: commands::Command,

    #[arg(short, long, global = true, help = "Verbose output")]
    verbose: bool,

    #[arg(short, long, global = true, help = "Quiet output")]
    quiet: bool,

    #[arg(
        long,
        global = true,
        help = "Output format",
        value_enum,
        default_value = "table"
    )]
    format: output::OutputFormat,

    #[arg(
        long,
        global = true,
        env = "TSIF_CONFIG",
        help = "Path to the configuration file (default: ~/.tsif/config.yaml)"
    )]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .init();

    let config_path = match cli.config {
        Some(path) => path,
        None => Config::config_path()?,
    };
    debug!("Using configuration at {}", config_path.display());
    let config = Config::load_from(&config_path)?;

    match commands::execute(cli.command, config, config_path, cli.format).await {
        Ok(_) => Ok(()),
        Err(e) => {
            output::Reporter::new(cli.format).fail(e.to_string());
            std::process::exit(1);
        }
    }
}
