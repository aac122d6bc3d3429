use crate::output::{OutputFormat, Reporter};
use colored::*;
use serde::Serialize;
use tabled::Tabled;
use tsif_core::{Config, Result};
use tsif_network::{IP_FORWARD_PARAM, NetworkProvisioner};

#[derive(Serialize, Tabled)]
struct HostCheck {
    check: String,
    status: String,
    detail: String,
}

impl HostCheck {
    fn new(check: &str, ok: bool, detail: String, format: OutputFormat) -> Self {
        let status = match (ok, format.is_table()) {
            (true, true) => "ok".green().to_string(),
            (false, true) => "missing".red().to_string(),
            (true, false) => "ok".to_string(),
            (false, false) => "missing".to_string(),
        };

        Self {
            check: check.to_string(),
            status,
            detail,
        }
    }
}

pub async fn execute(config: Config, format: OutputFormat) -> Result<()> {
    let provisioner = NetworkProvisioner::from_config(&config);
    let forwarding = provisioner.forwarding();

    let mut checks = Vec::new();

    let forwarding_check = match forwarding.forwarding_enabled() {
        Ok(true) => HostCheck::new(
            "ip forwarding",
            true,
            format!("{IP_FORWARD_PARAM} = 1"),
            format,
        ),
        Ok(false) => HostCheck::new(
            "ip forwarding",
            false,
            format!("{IP_FORWARD_PARAM} = 0, enabled on provisioning"),
            format,
        ),
        Err(e) => HostCheck::new("ip forwarding", false, e.to_string(), format),
    };
    checks.push(forwarding_check);

    let (primary_check, has_uplink) = match forwarding.primary_link() {
        Ok(link) => {
            let detail = format!(
                "{} ({}, {})",
                link.name,
                link.kind,
                if link.up { "up" } else { "down" }
            );
            (HostCheck::new("primary link", link.up, detail, format), true)
        }
        Err(e) => (
            HostCheck::new("primary link", false, e.to_string(), format),
            false,
        ),
    };
    checks.push(primary_check);

    checks.push(HostCheck::new(
        "network range",
        true,
        format!(
            "{} (gateway {}, {} guest addresses)",
            config.network.range,
            config.network.range.gateway(),
            config.network.range.guest_capacity()
        ),
        format,
    ));

    println!("{}", format.rows(checks, "No checks ran")?);

    if !has_uplink {
        Reporter::new(format)
            .warn("Guests will have no outbound access until the host has a default route");
    }

    Ok(())
}
