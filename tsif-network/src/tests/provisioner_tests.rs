use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::thread;

use tsif_core::{
    BootConfigSettings, Config, DEFAULT_BOOT_CONFIG_PAYLOAD, NetworkRange, ProvisionState, Result,
    TsifError,
};

use super::fake_host::{FakeHost, Failure, Op};
use crate::host::FilterRule;
use crate::naming::LinkNaming;
use crate::provisioner::NetworkProvisioner;

fn range(s: &str) -> NetworkRange {
    s.parse().unwrap()
}

fn boot_settings() -> BootConfigSettings {
    let mut settings = Config::default().boot_config;
    settings.listen_addr = SocketAddr::from(([127, 0, 0, 1], 0));
    settings
}

fn provisioner(host: &Arc<FakeHost>) -> NetworkProvisioner {
    NetworkProvisioner::new(host.facilities(), LinkNaming::default(), boot_settings())
}

#[test]
fn test_provision_and_allocate() -> Result<()> {
    let host = FakeHost::new();
    let network = provisioner(&host).provision(range("10.10.0.0/24"))?;

    assert_eq!(network.state(), ProvisionState::Ready);
    assert_eq!(network.gateway(), Ipv4Addr::new(10, 10, 0, 1));
    assert_eq!(network.remaining_addresses(), 253);

    let first = network.allocate_port()?;
    let second = network.allocate_port()?;

    assert_eq!(first.address, Ipv4Addr::new(10, 10, 0, 2));
    assert_eq!(second.address, Ipv4Addr::new(10, 10, 0, 3));
    assert_eq!(first.gateway, Ipv4Addr::new(10, 10, 0, 1));
    assert_eq!(second.gateway, first.gateway);
    assert_eq!(first.network, range("10.10.0.0/24"));
    assert_ne!(first.port_name, second.port_name);
    assert_ne!(first.port_mac, second.port_mac);
    assert_eq!(first.boot_config_url, "http://10.10.0.1:0/cloud-init");
    assert_eq!(network.ports().len(), 2);
    assert_eq!(network.remaining_addresses(), 251);

    for config in [&first, &second] {
        let link = host.link_state(&config.port_name).unwrap();
        assert_eq!(link.master.as_deref(), Some(network.switch().name.as_str()));
        assert_eq!(link.mac.as_deref(), Some(config.port_mac.as_str()));
    }

    Ok(())
}

#[test]
fn test_provision_with_host_bits_in_base() -> Result<()> {
    let host = FakeHost::new();
    let network = provisioner(&host).provision(range("172.23.0.1/24"))?;

    let config = network.allocate_port()?;
    assert_eq!(config.gateway, Ipv4Addr::new(172, 23, 0, 1));
    assert_eq!(config.address, Ipv4Addr::new(172, 23, 0, 2));
    assert_eq!(
        config.kernel_ip_arg("eth0"),
        "ip=172.23.0.2::172.23.0.1:255.255.255.0::eth0:off"
    );
    Ok(())
}

#[test]
fn test_allocate_port_leaves_switch_alone() -> Result<()> {
    let host = FakeHost::new();
    let network = provisioner(&host).provision(range("10.10.0.0/24"))?;
    let before = host.link_state(&network.switch().name).unwrap();

    for _ in 0..3 {
        network.allocate_port()?;
    }

    let after = host.link_state(&network.switch().name).unwrap();
    assert_eq!(before.addresses, after.addresses);
    assert_eq!(before.kind, after.kind);
    assert_eq!(*network.range(), range("10.10.0.0/24"));
    Ok(())
}

#[test]
fn test_allocations_exhaust_range() -> Result<()> {
    let host = FakeHost::new();
    let network = provisioner(&host).provision(range("10.10.0.0/29"))?;

    // .1 is the gateway, .7 the broadcast
    let addresses: Vec<Ipv4Addr> = (0..5)
        .map(|_| network.allocate_port().map(|c| c.address))
        .collect::<Result<_>>()?;
    assert_eq!(addresses.first(), Some(&Ipv4Addr::new(10, 10, 0, 2)));
    assert_eq!(addresses.last(), Some(&Ipv4Addr::new(10, 10, 0, 6)));

    let ports_before = host.link_names().len();
    let result = network.allocate_port();
    assert!(matches!(
        result,
        Err(TsifError::AddressSpaceExhausted { last, .. }) if last == Ipv4Addr::new(10, 10, 0, 6)
    ));
    assert_eq!(host.link_names().len(), ports_before);
    assert_eq!(network.remaining_addresses(), 0);
    Ok(())
}

#[test]
fn test_concurrent_allocations_are_distinct() -> Result<()> {
    let host = FakeHost::new();
    let network = Arc::new(provisioner(&host).provision(range("10.10.0.0/24"))?);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let network = Arc::clone(&network);
            thread::spawn(move || {
                (0..10)
                    .map(|_| network.allocate_port().unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let configs: Vec<_> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();

    let addresses: HashSet<_> = configs.iter().map(|c| c.address).collect();
    let ports: HashSet<_> = configs.iter().map(|c| c.port_name.clone()).collect();
    assert_eq!(addresses.len(), 80);
    assert_eq!(ports.len(), 80);
    assert!(addresses.iter().all(|a| network.range().contains(*a)));
    assert!(!addresses.contains(&network.gateway()));
    Ok(())
}

#[test]
fn test_provision_over_existing_switch() -> Result<()> {
    let host = FakeHost::new();
    let naming = LinkNaming::default().with_fixed_token("abc123");

    let first = NetworkProvisioner::new(host.facilities(), naming.clone(), boot_settings())
        .provision(range("10.10.0.0/24"))?;
    let second = NetworkProvisioner::new(host.facilities(), naming, boot_settings())
        .provision(range("10.10.0.0/24"))?;

    assert_eq!(first.switch().name, second.switch().name);
    assert_eq!(host.rule_count(&first.rules().masquerade), 1);
    assert_eq!(host.rule_count(&first.rules().forward), 1);
    Ok(())
}

#[test]
fn test_provision_without_default_route() {
    let host = FakeHost::new();
    host.remove_default_route();

    let result = provisioner(&host).provision(range("10.10.0.0/24"));
    assert!(matches!(result, Err(TsifError::NoDefaultRouteError { .. })));
    assert!(host.rules().is_empty());
}

#[test]
fn test_provision_stops_at_first_failure() {
    let host = FakeHost::new();
    host.fail(Op::AddBridge, Failure::Denied);

    let result = provisioner(&host).provision(range("10.10.0.0/24"));
    assert!(matches!(result, Err(TsifError::LinkCreationError { .. })));
    assert_eq!(host.param(crate::IP_FORWARD_PARAM).as_deref(), Some("0"));
    assert!(host.rules().is_empty());
}

#[test]
fn test_port_failure_retires_address() -> Result<()> {
    let host = FakeHost::new();
    let network = provisioner(&host).provision(range("10.10.0.0/24"))?;

    host.fail(Op::AddTap, Failure::Denied);
    assert!(matches!(
        network.allocate_port(),
        Err(TsifError::PortCreationError { .. })
    ));

    host.clear_failure(Op::AddTap);
    let config = network.allocate_port()?;
    assert_eq!(config.address, Ipv4Addr::new(10, 10, 0, 3));
    Ok(())
}

#[test]
fn test_release_port() -> Result<()> {
    let host = FakeHost::new();
    let network = provisioner(&host).provision(range("10.10.0.0/24"))?;
    let first = network.allocate_port()?;

    network.release_port(&first)?;
    assert!(host.link_state(&first.port_name).is_none());
    assert!(network.ports().is_empty());

    // Released addresses are not handed out again
    let second = network.allocate_port()?;
    assert_eq!(second.address, Ipv4Addr::new(10, 10, 0, 3));
    Ok(())
}

#[test]
fn test_teardown() -> Result<()> {
    let host = FakeHost::new();
    let network = provisioner(&host).provision(range("10.10.0.0/24"))?;
    let config = network.allocate_port()?;
    let switch_name = network.switch().name.clone();

    network.teardown()?;

    assert_eq!(network.state(), ProvisionState::TornDown);
    assert!(host.link_state(&switch_name).is_none());
    assert!(host.link_state(&config.port_name).is_none());
    assert!(host.rules().is_empty());
    assert_eq!(host.link_names(), vec!["eth0".to_string()]);

    // Second teardown is a no-op
    network.teardown()?;
    Ok(())
}

#[test]
fn test_teardown_keeps_foreign_rules() -> Result<()> {
    let host = FakeHost::new();
    let foreign = FilterRule::forward_accept("docker0");
    host.force_append(foreign.clone());

    let network = provisioner(&host).provision(range("10.10.0.0/24"))?;
    network.teardown()?;

    assert_eq!(host.rules(), vec![foreign]);
    Ok(())
}

#[test]
fn test_teardown_leaves_other_networks_routed() -> Result<()> {
    let host = FakeHost::new();
    let first = provisioner(&host).provision(range("10.10.0.0/24"))?;
    let second = provisioner(&host).provision(range("10.10.0.0/24"))?;
    assert_ne!(first.switch().name, second.switch().name);

    first.teardown()?;

    assert_eq!(host.rule_count(&second.rules().masquerade), 1);
    assert_eq!(host.rule_count(&second.rules().forward), 1);
    assert_eq!(host.rules().len(), 2);
    assert!(second.allocate_port().is_ok());
    Ok(())
}

#[test]
fn test_teardown_keeps_host_masquerade_rules() -> Result<()> {
    let host = FakeHost::new();
    let uplink_nat =
        FilterRule::new("nat", "POSTROUTING", &["-o", "eth0", "-j", "MASQUERADE"]);
    host.force_append(uplink_nat.clone());

    let network = provisioner(&host).provision(range("10.10.0.0/24"))?;
    assert_eq!(host.rules().len(), 3);
    network.teardown()?;

    assert_eq!(host.rules(), vec![uplink_nat]);
    Ok(())
}

#[test]
fn test_reprovision_does_not_own_existing_rules() -> Result<()> {
    let host = FakeHost::new();
    let naming = LinkNaming::default().with_fixed_token("abc123");

    let first = NetworkProvisioner::new(host.facilities(), naming.clone(), boot_settings())
        .provision(range("10.10.0.0/24"))?;
    let second = NetworkProvisioner::new(host.facilities(), naming, boot_settings())
        .provision(range("10.10.0.0/24"))?;

    assert_eq!(first.rules().installed.len(), 2);
    assert!(second.rules().installed.is_empty());
    Ok(())
}

#[test]
fn test_release_port_rejects_foreign_ports() -> Result<()> {
    let host = FakeHost::new();
    let first = provisioner(&host).provision(range("10.10.0.0/24"))?;
    let second = provisioner(&host).provision(range("10.20.0.0/24"))?;

    let theirs = second.allocate_port()?;
    assert!(matches!(
        first.release_port(&theirs),
        Err(TsifError::UnknownPort { ref port, .. }) if *port == theirs.port_name
    ));
    assert!(host.link_state(&theirs.port_name).is_some());
    assert_eq!(second.ports().len(), 1);

    let mut forged = first.allocate_port()?;
    forged.port_name = "eth0".to_string();
    assert!(matches!(
        first.release_port(&forged),
        Err(TsifError::UnknownPort { .. })
    ));
    assert!(host.link_state("eth0").is_some());
    assert_eq!(first.ports().len(), 1);
    Ok(())
}

#[test]
fn test_teardown_attempts_every_step() -> Result<()> {
    let host = FakeHost::new();
    let network = provisioner(&host).provision(range("10.10.0.0/24"))?;
    let switch_name = network.switch().name.clone();

    host.fail(Op::RuleDelete, Failure::Denied);
    let result = network.teardown();

    assert!(matches!(result, Err(TsifError::PacketFilterError { .. })));
    assert!(host.link_state(&switch_name).is_none());
    assert_eq!(network.state(), ProvisionState::TornDown);
    Ok(())
}

#[test]
fn test_operations_after_teardown() -> Result<()> {
    let host = FakeHost::new();
    let network = provisioner(&host).provision(range("10.10.0.0/24"))?;
    let config = network.allocate_port()?;
    network.teardown()?;

    assert!(matches!(
        network.allocate_port(),
        Err(TsifError::InvalidState {
            state: ProvisionState::TornDown,
            expected: ProvisionState::Ready,
            ..
        })
    ));
    assert!(matches!(
        network.release_port(&config),
        Err(TsifError::InvalidState { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_start_serves_boot_config() -> Result<()> {
    let host = FakeHost::new();
    let network = provisioner(&host).start(range("10.10.0.0/24")).await?;

    let addr = network.boot_config_addr().unwrap();
    let body = reqwest::get(format!("http://{addr}/cloud-init"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, DEFAULT_BOOT_CONFIG_PAYLOAD);

    network.teardown()?;
    assert!(network.boot_config_addr().is_none());
    Ok(())
}

#[tokio::test]
async fn test_start_without_boot_config() -> Result<()> {
    let host = FakeHost::new();
    let mut settings = boot_settings();
    settings.enabled = false;

    let network = NetworkProvisioner::new(host.facilities(), LinkNaming::default(), settings)
        .start(range("10.10.0.0/24"))
        .await?;

    assert!(network.boot_config_addr().is_none());
    assert_eq!(network.state(), ProvisionState::Ready);
    Ok(())
}

#[tokio::test]
async fn test_start_survives_boot_config_bind_failure() -> Result<()> {
    let blocker = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let mut settings = boot_settings();
    settings.listen_addr = blocker.local_addr()?;

    let host = FakeHost::new();
    let network = NetworkProvisioner::new(host.facilities(), LinkNaming::default(), settings)
        .start(range("10.10.0.0/24"))
        .await?;

    assert!(network.boot_config_addr().is_none());
    assert!(network.allocate_port().is_ok());
    Ok(())
}

#[test]
fn test_boot_config_url_override() -> Result<()> {
    let host = FakeHost::new();
    let mut settings = boot_settings();
    settings.url = Some("http://config.internal/seed".to_string());

    let network = NetworkProvisioner::new(host.facilities(), LinkNaming::default(), settings)
        .provision(range("10.10.0.0/24"))?;

    assert_eq!(network.boot_config_url(), "http://config.internal/seed");
    assert_eq!(
        network.allocate_port()?.boot_config_url,
        "http://config.internal/seed"
    );
    Ok(())
}
