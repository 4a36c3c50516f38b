//! Runtime wrapper used by the `erpsd` binary.

mod config;
mod erpsd;
mod sim;

pub use config::{DaemonConfig, MepConfig, PortConfig};
pub use erpsd::{ErpsDaemon, ErpsDaemonConfig};
pub use sim::{SimCall, SimPlatform};
