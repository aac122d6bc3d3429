mod allocator;
mod boot_config;
mod forwarding;
mod host;
mod iproute;
mod iptables;
mod link;
mod naming;
mod provisioner;
mod sysctl;

#[cfg(test)]
mod tests;

pub use allocator::AddressAllocator;
pub use boot_config::{BootConfigHandle, BootConfigServer};
pub use forwarding::{ForwardingRules, IP_FORWARD_PARAM, PacketForwardingConfigurator};
pub use host::{
    FilterRule, HostError, HostFacilities, HostResult, KernelParams, LinkHost, LinkInfo, LinkKind,
    PacketFilter, RouteEntry,
};
pub use iproute::IpCommand;
pub use iptables::Iptables;
pub use link::KernelLinkManager;
pub use naming::{LinkNaming, random_token};
pub use provisioner::{NetworkProvisioner, ProvisionedNetwork};
pub use sysctl::ProcSysctl;
