use crate::output::{OutputFormat, Reporter};
use serde::Serialize;
use tabled::Tabled;
use tsif_core::{Config, NetworkRange, NetworkSettings, Result, VMNetworkConfig};
use tsif_network::{NetworkProvisioner, ProvisionedNetwork};

pub struct UpOptions {
    pub range: Option<NetworkRange>,
    pub vms: u32,
    pub no_boot_config: bool,
    pub keep: bool,
    pub kernel_args: String,
}

#[derive(Debug, Serialize, Tabled)]
struct GuestNetwork {
    port: String,
    mac: String,
    address: String,
    gateway: String,
    netmask: String,
    #[tabled(skip)]
    boot_config_url: String,
    #[tabled(skip)]
    kernel_args: String,
}

impl GuestNetwork {
    fn new(config: &VMNetworkConfig, base_args: &str, network: &NetworkSettings) -> Self {
        Self {
            port: config.port_name.clone(),
            mac: config.port_mac.clone(),
            address: config.address.to_string(),
            gateway: config.gateway.to_string(),
            netmask: config.netmask().to_string(),
            boot_config_url: config.boot_config_url.clone(),
            kernel_args: config.kernel_args(
                base_args,
                &network.guest_interface,
                network.nameserver,
            ),
        }
    }
}

pub async fn execute(options: UpOptions, mut config: Config, format: OutputFormat) -> Result<()> {
    if let Some(range) = options.range {
        config.network.range = range;
    }
    if options.no_boot_config {
        config.boot_config.enabled = false;
    }

    let report = Reporter::new(format);
    let range = config.network.range;
    report.step(format!("Provisioning network {range}"));

    let provisioner = NetworkProvisioner::from_config(&config);
    let network = match provisioner.start(range).await {
        Ok(network) => network,
        Err(e) => {
            if e.is_host_mutation_failure() {
                report.warn("The host may be left partially configured");
            }
            return Err(e);
        }
    };

    report.done(format!(
        "Switch {} up with gateway {} ({} guest addresses)",
        network.switch().name,
        network.gateway(),
        network.remaining_addresses()
    ));

    let guests = match allocate_guests(&network, &options, &config.network) {
        Ok(guests) => guests,
        Err(e) => {
            report.fail(format!("Port allocation failed: {e}"));
            if !options.keep {
                network.teardown()?;
            }
            return Err(e);
        }
    };

    if format.is_table() {
        let kernel_args: Vec<(String, String)> = guests
            .iter()
            .map(|g| (g.port.clone(), g.kernel_args.clone()))
            .collect();
        println!("\n{}", format.rows(guests, "No guest ports allocated")?);
        for (port, args) in kernel_args {
            println!("\n{port} kernel args:\n  {args}");
        }
        println!();
    } else {
        println!("{}", format.rows(guests, "")?);
    }

    match network.boot_config_addr() {
        Some(addr) => report.info(format!(
            "Boot config served on {addr}, guests fetch {}",
            network.boot_config_url()
        )),
        None if options.keep => {
            report.info("Leaving network in place");
            return Ok(());
        }
        None => {}
    }

    report.info("Press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    if options.keep {
        report.info(format!("Leaving switch {} and its ports in place", network.switch().name));
        return Ok(());
    }

    report.step("Tearing down network");
    network.teardown()?;
    report.done("Network removed");
    Ok(())
}

fn allocate_guests(
    network: &ProvisionedNetwork,
    options: &UpOptions,
    settings: &NetworkSettings,
) -> Result<Vec<GuestNetwork>> {
    (0..options.vms)
        .map(|_| {
            network
                .allocate_port()
                .map(|config| GuestNetwork::new(&config, &options.kernel_args, settings))
        })
        .collect()
}
