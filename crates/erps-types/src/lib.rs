//! Common value types for the ERPS control plane.
//!
//! This crate provides type-safe representations of the network primitives
//! shared by the ring protection engine and its collaborators:
//!
//! - [`MacAddress`]: 48-bit Ethernet MAC addresses, also used as R-APS node IDs
//! - [`VlanId`]: IEEE 802.1Q VLAN identifiers
//! - [`VlanSet`]: a membership set over the full VLAN range
//! - [`RingPort`]: the two ring ports of an ERPS instance
//! - [`PortNo`]: switch port numbers

mod mac;
mod port;
mod vlan;

pub use mac::MacAddress;
pub use port::{PortNo, RingPort};
pub use vlan::{VlanId, VlanSet};

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid MAC address format: {0}")]
    InvalidMacAddress(String),

    #[error("invalid VLAN ID: {0} (must be 1-4094)")]
    InvalidVlanId(u16),

    #[error("invalid VLAN list: {0}")]
    InvalidVlanList(String),

    #[error("invalid ring port: {0}")]
    InvalidRingPort(String),
}
