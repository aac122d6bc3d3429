mod boot_config;
mod check;
mod config;
mod up;

use clap::Subcommand;
use std::net::SocketAddr;
use std::path::PathBuf;
use tsif_core::{Config, NetworkRange, Result};

use crate::output::OutputFormat;

/// Guest kernel arguments placed before the network and boot-config ones.
pub const DEFAULT_KERNEL_ARGS: &str = "console=ttyS0 reboot=k panic=1 pci=off nomodules rw";

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Provision a VM network, allocate guest ports and serve boot config
    Up {
        /// Network range in CIDR form (e.g. 172.23.0.1/24)
        #[arg(long)]
        range: Option<NetworkRange>,

        /// Number of guest ports to allocate
        #[arg(long, default_value_t = 1)]
        vms: u32,

        /// Do not start the boot config server
        #[arg(long)]
        no_boot_config: bool,

        /// Leave the network in place on exit
        #[arg(long)]
        keep: bool,

        /// Base guest kernel command line
        #[arg(long, default_value = DEFAULT_KERNEL_ARGS)]
        kernel_args: String,
    },

    /// Serve only the boot config endpoint
    BootConfig {
        /// Address to listen on
        #[arg(long)]
        listen: Option<SocketAddr>,
    },

    /// Report IP forwarding state and the primary link
    Check,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,

    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

pub async fn execute(
    command: Command,
    config: Config,
    config_path: PathBuf,
    format: OutputFormat,
) -> Result<()> {
    match command {
        Command::Up {
            range,
            vms,
            no_boot_config,
            keep,
            kernel_args,
        } => {
            let options = up::UpOptions {
                range,
                vms,
                no_boot_config,
                keep,
                kernel_args,
            };
            up::execute(options, config, format).await
        }
        Command::BootConfig { listen } => boot_config::execute(listen, config, format).await,
        Command::Check => check::execute(config, format).await,
        Command::Config { action } => config::execute(action, config, config_path, format).await,
    }
}
