use std::sync::Arc;
use tracing::{debug, info, warn};

use tsif_core::{Result, Switch, TsifError};

use crate::host::{FilterRule, HostError, KernelParams, LinkHost, LinkInfo, PacketFilter};

pub const IP_FORWARD_PARAM: &str = "net.ipv4.ip_forward";

/// The rules a switch needs, and which of them this network appended.
///
/// Only `installed` rules are removed again; a rule that was already present
/// belongs to whoever put it there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardingRules {
    pub primary_link: String,
    pub masquerade: FilterRule,
    pub forward: FilterRule,
    pub installed: Vec<FilterRule>,
}

impl ForwardingRules {
    pub fn for_switch(switch: &Switch, primary_link: &str) -> Self {
        Self {
            primary_link: primary_link.to_string(),
            masquerade: FilterRule::masquerade(
                &switch.range.network_cidr(),
                primary_link,
                &switch.name,
            ),
            forward: FilterRule::forward_accept(&switch.name),
            installed: Vec::new(),
        }
    }

    fn required(&self) -> [FilterRule; 2] {
        [self.masquerade.clone(), self.forward.clone()]
    }
}

/// Routes traffic from a switch to the outside world: kernel IPv4
/// forwarding plus NAT and forward-accept rules.
pub struct PacketForwardingConfigurator {
    links: Arc<dyn LinkHost>,
    params: Arc<dyn KernelParams>,
    filter: Arc<dyn PacketFilter>,
}

impl PacketForwardingConfigurator {
    pub fn new(
        links: Arc<dyn LinkHost>,
        params: Arc<dyn KernelParams>,
        filter: Arc<dyn PacketFilter>,
    ) -> Self {
        Self {
            links,
            params,
            filter,
        }
    }

    /// Enables forwarding and makes sure the switch's NAT and forward rules
    /// are present. Rules already installed are left alone, so repeated
    /// calls never stack duplicates.
    pub fn enable(&self, switch: &Switch) -> Result<ForwardingRules> {
        self.enable_ip_forwarding()?;

        let primary = self.primary_link()?;
        info!("Primary link: {}", primary.name);

        let mut rules = ForwardingRules::for_switch(switch, &primary.name);
        for rule in rules.required() {
            if self.ensure_rule(&rule)? {
                rules.installed.push(rule);
            }
        }

        Ok(rules)
    }

    /// Removes the rules [`enable`](Self::enable) appended. Rules it found
    /// already present stay, and forwarding itself is host-wide and stays
    /// enabled.
    pub fn disable(&self, rules: &ForwardingRules) -> Result<()> {
        for rule in &rules.installed {
            match self.filter.delete(rule) {
                Ok(()) => info!("Removed rule {}", rule),
                Err(HostError::NotFound(_)) => debug!("Rule {} already absent", rule),
                Err(e) => return Err(packet_filter_error(rule, e)),
            }
        }
        Ok(())
    }

    /// Whether the kernel currently forwards IPv4 traffic.
    pub fn forwarding_enabled(&self) -> Result<bool> {
        let value = self
            .params
            .get(IP_FORWARD_PARAM)
            .map_err(|e| TsifError::ForwardingSetError {
                parameter: IP_FORWARD_PARAM.to_string(),
                cause: e.to_string(),
            })?;
        Ok(value == "1")
    }

    /// The link carrying the default IPv4 route, i.e. the one with internet
    /// access.
    pub fn primary_link(&self) -> Result<LinkInfo> {
        let routes = self
            .links
            .routes_v4()
            .map_err(|e| TsifError::NoDefaultRouteError {
                cause: format!("failed to list routes: {e}"),
            })?;

        let device = routes
            .into_iter()
            .filter(|route| route.is_default())
            .find_map(|route| route.device)
            .ok_or_else(|| TsifError::NoDefaultRouteError {
                cause: "route table has no default route".to_string(),
            })?;

        self.links
            .link(&device)
            .map_err(|e| TsifError::NoDefaultRouteError {
                cause: format!("default route device {device}: {e}"),
            })
    }

    fn enable_ip_forwarding(&self) -> Result<()> {
        self.params
            .set(IP_FORWARD_PARAM, "1")
            .map_err(|e| TsifError::ForwardingSetError {
                parameter: IP_FORWARD_PARAM.to_string(),
                cause: e.to_string(),
            })?;

        // Read back: some sandboxes accept the write and ignore it.
        let value = self
            .params
            .get(IP_FORWARD_PARAM)
            .map_err(|e| TsifError::ForwardingSetError {
                parameter: IP_FORWARD_PARAM.to_string(),
                cause: e.to_string(),
            })?;

        if value != "1" {
            warn!("{} reads back as {:?}", IP_FORWARD_PARAM, value);
            return Err(TsifError::ForwardingVerificationError {
                parameter: IP_FORWARD_PARAM.to_string(),
                value,
            });
        }

        debug!("{} = 1", IP_FORWARD_PARAM);
        Ok(())
    }

    /// Appends `rule` unless present. Returns whether it was appended.
    fn ensure_rule(&self, rule: &FilterRule) -> Result<bool> {
        if self
            .filter
            .exists(rule)
            .map_err(|e| packet_filter_error(rule, e))?
        {
            debug!("Rule {} already present", rule);
            return Ok(false);
        }

        self.filter
            .append(rule)
            .map_err(|e| packet_filter_error(rule, e))?;
        info!("Added rule {}", rule);
        Ok(true)
    }
}

fn packet_filter_error(rule: &FilterRule, e: HostError) -> TsifError {
    TsifError::PacketFilterError {
        table: rule.table.clone(),
        chain: rule.chain.clone(),
        cause: e.to_string(),
    }
}
