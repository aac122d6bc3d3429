use std::net::Ipv4Addr;

use thiserror::Error;

use crate::types::ProvisionState;

#[derive(Error, Debug)]
pub enum TsifError {
    #[error("Failed to create link {name}: {cause}")]
    LinkCreationError { name: String, cause: String },

    #[error("Failed to bring up link {name}: {cause}")]
    LinkActivationError { name: String, cause: String },

    #[error("Failed to assign {address} to link {name}: {cause}")]
    AddressAssignmentError {
        name: String,
        address: String,
        cause: String,
    },

    #[error("Failed to remove link {name}: {cause}")]
    LinkRemovalError { name: String, cause: String },

    #[error("Failed to create port {name}: {cause}")]
    PortCreationError { name: String, cause: String },

    #[error("Failed to attach port {port} to switch {switch}: {cause}")]
    PortAttachError {
        port: String,
        switch: String,
        cause: String,
    },

    #[error("Failed to bring up port {name}: {cause}")]
    PortActivationError { name: String, cause: String },

    #[error("Link {name} is a {found} link, expected {expected}")]
    UnexpectedLinkType {
        name: String,
        expected: String,
        found: String,
    },

    #[error("Failed to set kernel parameter {parameter}: {cause}")]
    ForwardingSetError { parameter: String, cause: String },

    #[error("Kernel parameter {parameter} reads back as {value:?}, expected \"1\"")]
    ForwardingVerificationError { parameter: String, value: String },

    #[error("No default IPv4 route found: {cause}")]
    NoDefaultRouteError { cause: String },

    #[error("Packet filter error on {table}/{chain}: {cause}")]
    PacketFilterError {
        table: String,
        chain: String,
        cause: String,
    },

    #[error("Address space of {network} exhausted (last usable host {last})")]
    AddressSpaceExhausted { network: String, last: Ipv4Addr },

    #[error("Invalid network range {range}: {reason}")]
    InvalidNetworkRange { range: String, reason: String },

    #[error("Port {port} does not belong to network {switch}")]
    UnknownPort { port: String, switch: String },

    #[error("Network {switch} is {state}, expected {expected}")]
    InvalidState {
        switch: String,
        state: ProvisionState,
        expected: ProvisionState,
    },

    #[error("Boot config server error: {0}")]
    BootConfigError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, TsifError>;

impl TsifError {
    /// Whether the error was raised after host state may already have been
    /// mutated by the enclosing operation.
    pub fn is_host_mutation_failure(&self) -> bool {
        matches!(
            self,
            TsifError::LinkActivationError { .. }
                | TsifError::AddressAssignmentError { .. }
                | TsifError::PortAttachError { .. }
                | TsifError::PortActivationError { .. }
                | TsifError::UnexpectedLinkType { .. }
                | TsifError::ForwardingSetError { .. }
                | TsifError::ForwardingVerificationError { .. }
                | TsifError::NoDefaultRouteError { .. }
                | TsifError::PacketFilterError { .. }
        )
    }
}
