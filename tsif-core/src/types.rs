use chrono::{DateTime, Utc};
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::{Result, TsifError};

/// Longest prefix that still leaves a gateway and one guest address.
pub const MAX_PREFIX_LEN: u8 = 30;

/// An IPv4 block from which the gateway and guest addresses are drawn.
///
/// The base address may carry host bits (`172.23.0.1/24`), in which case it
/// is used as the gateway. A base equal to the network address
/// (`10.10.0.0/24`) puts the gateway on the first host instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NetworkRange {
    inner: Ipv4Network,
}

impl NetworkRange {
    pub fn new(base: Ipv4Addr, prefix: u8) -> Result<Self> {
        let invalid = |reason: String| TsifError::InvalidNetworkRange {
            range: format!("{base}/{prefix}"),
            reason,
        };

        if prefix > MAX_PREFIX_LEN {
            return Err(invalid(format!(
                "prefix length must be at most {MAX_PREFIX_LEN}"
            )));
        }

        let inner = Ipv4Network::new(base, prefix).map_err(|e| invalid(e.to_string()))?;

        if base == inner.broadcast() {
            return Err(invalid("base address is the broadcast address".to_string()));
        }

        let range = Self { inner };
        if range.gateway() >= range.last_host() {
            return Err(invalid("no room for a guest address".to_string()));
        }

        Ok(range)
    }

    pub fn base(&self) -> Ipv4Addr {
        self.inner.ip()
    }

    pub fn prefix(&self) -> u8 {
        self.inner.prefix()
    }

    pub fn network_address(&self) -> Ipv4Addr {
        self.inner.network()
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        self.inner.broadcast()
    }

    pub fn netmask(&self) -> Ipv4Addr {
        self.inner.mask()
    }

    /// Address held by the switch and handed to guests as their gateway.
    pub fn gateway(&self) -> Ipv4Addr {
        let base = self.base();
        if base == self.network_address() {
            Ipv4Addr::from(u32::from(base) + 1)
        } else {
            base
        }
    }

    /// Highest address a guest may receive.
    pub fn last_host(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.broadcast()) - 1)
    }

    /// Number of guest addresses available after the gateway.
    pub fn guest_capacity(&self) -> u32 {
        u32::from(self.last_host()) - u32::from(self.gateway())
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        self.inner.contains(addr)
    }

    /// The range in canonical network form, e.g. `172.23.0.0/24`.
    pub fn network_cidr(&self) -> String {
        format!("{}/{}", self.network_address(), self.prefix())
    }

    /// Gateway address with the range prefix, as assigned to the switch.
    pub fn gateway_cidr(&self) -> String {
        format!("{}/{}", self.gateway(), self.prefix())
    }
}

impl std::fmt::Display for NetworkRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.base(), self.prefix())
    }
}

impl FromStr for NetworkRange {
    type Err = TsifError;

    fn from_str(s: &str) -> Result<Self> {
        let network: Ipv4Network = s.parse().map_err(|e: ipnetwork::IpNetworkError| {
            TsifError::InvalidNetworkRange {
                range: s.to_string(),
                reason: e.to_string(),
            }
        })?;
        Self::new(network.ip(), network.prefix())
    }
}

impl TryFrom<String> for NetworkRange {
    type Error = TsifError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<NetworkRange> for String {
    fn from(range: NetworkRange) -> Self {
        range.to_string()
    }
}

/// A bridge link shared by all ports of one network range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Switch {
    pub name: String,
    pub range: NetworkRange,
    pub created_at: DateTime<Utc>,
}

/// A tap link backing exactly one guest network interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub name: String,
    pub mac: String,
    pub switch: String,
    pub created_at: DateTime<Utc>,
}

/// Everything the VM configuration needs to wire one guest into the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VMNetworkConfig {
    pub address: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub network: NetworkRange,
    pub port_name: String,
    pub port_mac: String,
    pub boot_config_url: String,
}

impl VMNetworkConfig {
    pub fn netmask(&self) -> Ipv4Addr {
        self.network.netmask()
    }

    /// Kernel `ip=` argument for static guest configuration without iproute2
    /// in the guest: `ip=<client>::<gateway>:<netmask>::<iface>:off`.
    pub fn kernel_ip_arg(&self, guest_iface: &str) -> String {
        format!(
            "ip={}::{}:{}::{}:off",
            self.address,
            self.gateway,
            self.netmask(),
            guest_iface
        )
    }

    /// Full guest kernel command line built on top of `base_args`.
    pub fn kernel_args(&self, base_args: &str, guest_iface: &str, nameserver: Ipv4Addr) -> String {
        let mut args = String::new();
        if !base_args.trim().is_empty() {
            args.push_str(base_args.trim());
            args.push(' ');
        }
        args.push_str(&self.kernel_ip_arg(guest_iface));
        args.push_str(&format!(" nameserver={nameserver}"));
        args.push_str(&format!(" cloud-config-url={}", self.boot_config_url));
        args
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvisionState {
    Unprovisioned,
    SwitchCreated,
    ForwardingEnabled,
    Ready,
    TornDown,
}

impl std::fmt::Display for ProvisionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProvisionState::Unprovisioned => write!(f, "unprovisioned"),
            ProvisionState::SwitchCreated => write!(f, "switch-created"),
            ProvisionState::ForwardingEnabled => write!(f, "forwarding-enabled"),
            ProvisionState::Ready => write!(f, "ready"),
            ProvisionState::TornDown => write!(f, "torn-down"),
        }
    }
}
