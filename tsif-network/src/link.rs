use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

use tsif_core::{NetworkRange, Port, Result, Switch, TsifError};

use crate::host::{HostError, LinkHost, LinkInfo, LinkKind};
use crate::naming::LinkNaming;

/// Creates, inspects and removes the switch and port links on the host.
pub struct KernelLinkManager {
    host: Arc<dyn LinkHost>,
    naming: LinkNaming,
}

impl KernelLinkManager {
    pub fn new(host: Arc<dyn LinkHost>, naming: LinkNaming) -> Self {
        Self { host, naming }
    }

    /// Creates the bridge for `range`, assigns it the gateway address and
    /// brings it up.
    ///
    /// A bridge or address that already exists counts as success, so the
    /// call can be repeated against a host that already holds the switch.
    pub fn create_switch(&self, range: &NetworkRange) -> Result<Switch> {
        let name = self.naming.switch_name();

        match self.host.add_link(&name, &LinkKind::Bridge) {
            Ok(()) => info!("Created switch {}", name),
            Err(HostError::AlreadyExists(_)) => {
                debug!("Switch {} already exists", name);
                self.expect_kind(&name, LinkKind::Bridge)?;
            }
            Err(e) => {
                return Err(TsifError::LinkCreationError {
                    name,
                    cause: e.to_string(),
                });
            }
        }

        let cidr = range.gateway_cidr();
        match self.host.add_address(&name, &cidr) {
            Ok(()) => debug!("Assigned {} to switch {}", cidr, name),
            Err(HostError::AlreadyExists(_)) => {
                debug!("Switch {} already holds {}", name, cidr)
            }
            Err(e) => {
                return Err(TsifError::AddressAssignmentError {
                    name,
                    address: cidr,
                    cause: e.to_string(),
                });
            }
        }

        self.host
            .set_up(&name)
            .map_err(|e| TsifError::LinkActivationError {
                name: name.clone(),
                cause: e.to_string(),
            })?;

        Ok(Switch {
            name,
            range: *range,
            created_at: Utc::now(),
        })
    }

    /// Creates a tap link attached to `switch` and returns it as the host
    /// reports it after bring-up. The kernel assigns the hardware address at
    /// creation, so the link is read back rather than trusted from the
    /// request.
    pub fn create_port(&self, switch: &Switch) -> Result<Port> {
        let name = self.naming.port_name();
        info!("Creating port {} on switch {}", name, switch.name);

        self.host
            .add_link(&name, &LinkKind::Tap)
            .map_err(|e| TsifError::PortCreationError {
                name: name.clone(),
                cause: e.to_string(),
            })?;

        self.host
            .set_master(&name, &switch.name)
            .map_err(|e| TsifError::PortAttachError {
                port: name.clone(),
                switch: switch.name.clone(),
                cause: e.to_string(),
            })?;

        self.host
            .set_up(&name)
            .map_err(|e| TsifError::PortActivationError {
                name: name.clone(),
                cause: e.to_string(),
            })?;

        let link = self.expect_kind(&name, LinkKind::Tap)?;

        let mac = link.mac.ok_or_else(|| TsifError::PortCreationError {
            name: name.clone(),
            cause: "host reported no hardware address".to_string(),
        })?;

        debug!("Port {} has hardware address {}", name, mac);

        Ok(Port {
            name,
            mac,
            switch: switch.name.clone(),
            created_at: Utc::now(),
        })
    }

    pub fn delete_port(&self, name: &str) -> Result<()> {
        info!("Deleting port {}", name);
        self.delete_link(name)
    }

    pub fn delete_switch(&self, switch: &Switch) -> Result<()> {
        info!("Deleting switch {}", switch.name);
        self.delete_link(&switch.name)
    }

    fn delete_link(&self, name: &str) -> Result<()> {
        match self.host.delete_link(name) {
            Ok(()) => Ok(()),
            Err(HostError::NotFound(_)) => {
                debug!("Link {} already gone", name);
                Ok(())
            }
            Err(e) => Err(TsifError::LinkRemovalError {
                name: name.to_string(),
                cause: e.to_string(),
            }),
        }
    }

    fn expect_kind(&self, name: &str, expected: LinkKind) -> Result<LinkInfo> {
        let link = self.host.link(name).map_err(|e| match expected {
            LinkKind::Tap => TsifError::PortCreationError {
                name: name.to_string(),
                cause: format!("failed to re-read link: {e}"),
            },
            _ => TsifError::LinkCreationError {
                name: name.to_string(),
                cause: format!("failed to re-read link: {e}"),
            },
        })?;

        if link.kind != expected {
            return Err(TsifError::UnexpectedLinkType {
                name: name.to_string(),
                expected: expected.to_string(),
                found: link.kind.to_string(),
            });
        }

        Ok(link)
    }
}
