use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use tsif_core::{
    BootConfigSettings, Config, NetworkRange, Port, ProvisionState, Result, Switch, TsifError,
    VMNetworkConfig,
};

use crate::allocator::AddressAllocator;
use crate::boot_config::{BootConfigHandle, BootConfigServer};
use crate::forwarding::{ForwardingRules, PacketForwardingConfigurator};
use crate::host::HostFacilities;
use crate::link::KernelLinkManager;
use crate::naming::LinkNaming;

/// Turns a network range into a ready-to-use VM network segment.
pub struct NetworkProvisioner {
    links: Arc<KernelLinkManager>,
    forwarding: Arc<PacketForwardingConfigurator>,
    boot_config: BootConfigSettings,
}

impl NetworkProvisioner {
    pub fn new(host: HostFacilities, naming: LinkNaming, boot_config: BootConfigSettings) -> Self {
        let links = Arc::new(KernelLinkManager::new(Arc::clone(&host.links), naming));
        let forwarding = Arc::new(PacketForwardingConfigurator::new(
            host.links,
            host.params,
            host.filter,
        ));

        Self {
            links,
            forwarding,
            boot_config,
        }
    }

    /// Provisioner acting on the live host with names and boot config taken
    /// from `config`.
    pub fn from_config(config: &Config) -> Self {
        let naming = LinkNaming::new(
            &config.network.switch_prefix,
            &config.network.port_prefix,
            config.network.name_token_length,
        );
        Self::new(HostFacilities::system(), naming, config.boot_config.clone())
    }

    pub fn forwarding(&self) -> &PacketForwardingConfigurator {
        &self.forwarding
    }

    /// Creates the switch, enables forwarding and NAT for it, and returns the
    /// network ready for port allocation.
    ///
    /// Any failure aborts provisioning. Host state created by earlier steps
    /// (a switch, forwarding rules) is not rolled back.
    pub fn provision(&self, range: NetworkRange) -> Result<ProvisionedNetwork> {
        let mut state = ProvisionState::Unprovisioned;
        info!("Provisioning network {}", range);

        let switch = self.links.create_switch(&range)?;
        advance(&mut state, ProvisionState::SwitchCreated, &switch);

        let rules = self.forwarding.enable(&switch)?;
        advance(&mut state, ProvisionState::ForwardingEnabled, &switch);

        let allocator = AddressAllocator::new(range);
        advance(&mut state, ProvisionState::Ready, &switch);

        info!(
            "Network {} ready on switch {} (gateway {}, {} guest addresses)",
            range,
            switch.name,
            range.gateway(),
            allocator.remaining()
        );

        Ok(ProvisionedNetwork {
            boot_config_url: self.boot_config.url_for(&range),
            switch,
            rules,
            allocator,
            links: Arc::clone(&self.links),
            forwarding: Arc::clone(&self.forwarding),
            state: Mutex::new(state),
            ports: Mutex::new(Vec::new()),
            boot_server: Mutex::new(None),
        })
    }

    /// Provisions `range` and, when enabled in the settings, starts serving
    /// boot config for its guests.
    ///
    /// A boot-config listener that fails to start is logged and skipped; the
    /// network itself is still returned.
    pub async fn start(&self, range: NetworkRange) -> Result<ProvisionedNetwork> {
        let network = self.provision(range)?;

        if self.boot_config.enabled {
            let server = BootConfigServer::new(&self.boot_config);
            match server.start(self.boot_config.listen_addr).await {
                Ok(handle) => *lock(&network.boot_server) = Some(handle),
                Err(e) => warn!("Boot config server not started: {}", e),
            }
        }

        Ok(network)
    }
}

fn advance(state: &mut ProvisionState, next: ProvisionState, switch: &Switch) {
    debug!("Network on {}: {} -> {}", switch.name, state, next);
    *state = next;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A provisioned switch with its forwarding rules and address cursor.
pub struct ProvisionedNetwork {
    switch: Switch,
    rules: ForwardingRules,
    allocator: AddressAllocator,
    boot_config_url: String,
    links: Arc<KernelLinkManager>,
    forwarding: Arc<PacketForwardingConfigurator>,
    state: Mutex<ProvisionState>,
    ports: Mutex<Vec<Port>>,
    boot_server: Mutex<Option<BootConfigHandle>>,
}

impl ProvisionedNetwork {
    pub fn switch(&self) -> &Switch {
        &self.switch
    }

    pub fn range(&self) -> &NetworkRange {
        &self.switch.range
    }

    pub fn gateway(&self) -> Ipv4Addr {
        self.switch.range.gateway()
    }

    pub fn rules(&self) -> &ForwardingRules {
        &self.rules
    }

    pub fn boot_config_url(&self) -> &str {
        &self.boot_config_url
    }

    pub fn boot_config_addr(&self) -> Option<SocketAddr> {
        lock(&self.boot_server)
            .as_ref()
            .map(BootConfigHandle::local_addr)
    }

    pub fn state(&self) -> ProvisionState {
        *lock(&self.state)
    }

    /// Ports created so far and not yet released.
    pub fn ports(&self) -> Vec<Port> {
        lock(&self.ports).clone()
    }

    pub fn remaining_addresses(&self) -> u32 {
        self.allocator.remaining()
    }

    /// Creates a port for one guest and hands it the next free address.
    ///
    /// The address is reserved before the port is created, so an exhausted
    /// range never leaves an orphaned port behind. An address whose port
    /// fails to come up is not handed out again.
    pub fn allocate_port(&self) -> Result<VMNetworkConfig> {
        self.ensure_ready()?;

        let address = self.allocator.next()?;
        let port = self.links.create_port(&self.switch)?;

        info!(
            "Allocated {} on port {} ({})",
            address, port.name, port.mac
        );

        let config = VMNetworkConfig {
            address,
            gateway: self.gateway(),
            network: self.switch.range,
            port_name: port.name.clone(),
            port_mac: port.mac.clone(),
            boot_config_url: self.boot_config_url.clone(),
        };

        lock(&self.ports).push(port);
        Ok(config)
    }

    /// Removes the port behind `config`. Its address stays retired.
    ///
    /// Only ports allocated from this network are accepted.
    pub fn release_port(&self, config: &VMNetworkConfig) -> Result<()> {
        self.ensure_ready()?;

        let mut ports = lock(&self.ports);
        let index = ports
            .iter()
            .position(|port| port.name == config.port_name)
            .ok_or_else(|| TsifError::UnknownPort {
                port: config.port_name.clone(),
                switch: self.switch.name.clone(),
            })?;

        self.links.delete_port(&config.port_name)?;
        ports.remove(index);
        Ok(())
    }

    /// Stops the boot-config listener and removes every port, both rules and
    /// the switch.
    ///
    /// Every step is attempted even if an earlier one fails; the first
    /// failure is returned. Calling it again after success is a no-op.
    pub fn teardown(&self) -> Result<()> {
        {
            let mut state = lock(&self.state);
            if *state == ProvisionState::TornDown {
                return Ok(());
            }
            *state = ProvisionState::TornDown;
        }

        info!("Tearing down network on switch {}", self.switch.name);

        if let Some(mut handle) = lock(&self.boot_server).take() {
            handle.shutdown();
        }

        let mut first_error: Option<TsifError> = None;
        let mut record = |result: Result<()>| {
            if let Err(e) = result {
                warn!("Teardown step failed: {}", e);
                first_error.get_or_insert(e);
            }
        };

        let ports = std::mem::take(&mut *lock(&self.ports));
        for port in &ports {
            record(self.links.delete_port(&port.name));
        }
        record(self.forwarding.disable(&self.rules));
        record(self.links.delete_switch(&self.switch));

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn ensure_ready(&self) -> Result<()> {
        let state = self.state();
        if state != ProvisionState::Ready {
            return Err(TsifError::InvalidState {
                switch: self.switch.name.clone(),
                state,
                expected: ProvisionState::Ready,
            });
        }
        Ok(())
    }
}
