//! Host facilities the provisioner drives: link management, kernel
//! parameters and the packet filter.
//!
//! Each facility is a trait so the managers can run against the live host
//! (`ip`, `/proc/sys`, `iptables`) or against an in-memory host in tests.

use std::sync::Arc;

use thiserror::Error;

use crate::iproute::IpCommand;
use crate::iptables::Iptables;
use crate::sysctl::ProcSysctl;

#[derive(Error, Debug)]
pub enum HostError {
    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("`{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unexpected output from `{command}`: {cause}")]
    Parse { command: String, cause: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type HostResult<T> = std::result::Result<T, HostError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkKind {
    Bridge,
    Tap,
    Tun,
    Other(String),
}

impl std::fmt::Display for LinkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkKind::Bridge => write!(f, "bridge"),
            LinkKind::Tap => write!(f, "tap"),
            LinkKind::Tun => write!(f, "tun"),
            LinkKind::Other(kind) => write!(f, "{kind}"),
        }
    }
}

/// Link attributes as currently reported by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    pub name: String,
    pub kind: LinkKind,
    pub mac: Option<String>,
    pub master: Option<String>,
    pub up: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    /// `None` for the default route.
    pub destination: Option<String>,
    pub device: Option<String>,
    pub gateway: Option<String>,
}

impl RouteEntry {
    pub fn is_default(&self) -> bool {
        self.destination.is_none()
    }
}

pub trait LinkHost: Send + Sync {
    fn add_link(&self, name: &str, kind: &LinkKind) -> HostResult<()>;

    fn add_address(&self, name: &str, cidr: &str) -> HostResult<()>;

    fn set_master(&self, name: &str, master: &str) -> HostResult<()>;

    fn set_up(&self, name: &str) -> HostResult<()>;

    fn link(&self, name: &str) -> HostResult<LinkInfo>;

    fn delete_link(&self, name: &str) -> HostResult<()>;

    /// Main IPv4 routing table.
    fn routes_v4(&self) -> HostResult<Vec<RouteEntry>>;
}

/// sysctl-style kernel parameters addressed by dotted name.
pub trait KernelParams: Send + Sync {
    fn get(&self, key: &str) -> HostResult<String>;

    fn set(&self, key: &str, value: &str) -> HostResult<()>;
}

/// A single packet-filter rule: table, chain and match/target arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilterRule {
    pub table: String,
    pub chain: String,
    pub spec: Vec<String>,
}

impl FilterRule {
    pub fn new(table: &str, chain: &str, spec: &[&str]) -> Self {
        Self {
            table: table.to_string(),
            chain: chain.to_string(),
            spec: spec.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Source NAT for traffic from `source` leaving through `out_link`,
    /// tagged with the `owner` switch so each network's rule is distinct.
    pub fn masquerade(source: &str, out_link: &str, owner: &str) -> Self {
        Self::new(
            "nat",
            "POSTROUTING",
            &[
                "-s", source, "-o", out_link, "-m", "comment", "--comment", owner, "-j",
                "MASQUERADE",
            ],
        )
    }

    /// Accept forwarded traffic arriving from `in_link`.
    pub fn forward_accept(in_link: &str) -> Self {
        Self::new("filter", "FORWARD", &["-i", in_link, "-j", "ACCEPT"])
    }
}

impl std::fmt::Display for FilterRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "-t {} {} {}", self.table, self.chain, self.spec.join(" "))
    }
}

pub trait PacketFilter: Send + Sync {
    fn exists(&self, rule: &FilterRule) -> HostResult<bool>;

    fn append(&self, rule: &FilterRule) -> HostResult<()>;

    fn delete(&self, rule: &FilterRule) -> HostResult<()>;
}

/// The three host facilities bundled for the provisioner.
#[derive(Clone)]
pub struct HostFacilities {
    pub links: Arc<dyn LinkHost>,
    pub params: Arc<dyn KernelParams>,
    pub filter: Arc<dyn PacketFilter>,
}

impl HostFacilities {
    /// Facilities backed by iproute2, `/proc/sys` and iptables.
    pub fn system() -> Self {
        Self {
            links: Arc::new(IpCommand::new()),
            params: Arc::new(ProcSysctl::new()),
            filter: Arc::new(Iptables::new()),
        }
    }
}
