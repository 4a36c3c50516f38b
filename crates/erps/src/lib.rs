//! ERPS - G.8032 Ethernet Ring Protection Switching
//!
//! Protocol engine for ring protection on an Ethernet switch: the ring
//! instances, their R-APS state machine, the PDU codec and the timers that
//! drive them. Hardware and the other protocol modules of the switch (VLAN,
//! CFM, port state) are reached through the [`platform::ErpsPlatform`]
//! trait.
//!
//! # Architecture
//!
//! ```text
//! [config / events] ──> [Registry] ──> [Base Engine] ──> [ErpsPlatform] ──> [switch]
//!                           │               │
//!                     [TimerEngine]    [R-APS codec]
//! ```
//!
//! # Key Components
//!
//! - [`manager::Registry`]: instance table, validation and event dispatch
//! - [`base`]: per-instance protocol state machine
//! - [`raps`]: R-APS PDU encoding, validation and transmission
//! - [`timer`]: virtual-time timer engine
//! - [`daemon`]: runtime wrapper used by `erpsd`

pub mod audit;
pub mod error;
pub mod platform;
pub mod types;

pub mod base;
pub mod daemon;
pub mod manager;
pub mod raps;
pub mod timer;

pub(crate) mod instance;

pub use error::{ErpsError, Result};
pub use manager::{Phase, Registry};
pub use platform::{ErpsPlatform, PortForwardState, PortInfo};
pub use types::{
    Capabilities, Command, ErpsConf, ErpsStatus, MepKey, NodeState, OperState, OperWarning, RingType, RplMode,
    SfTrigger, Version,
};

pub use erps_types::{MacAddress, PortNo, RingPort, VlanId, VlanSet};
