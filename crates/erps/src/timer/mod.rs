//! Timer Engine.
//!
//! All protocol deadlines (guard, WTR, WTB, hold-off, Rx timeout, provisioning
//! mismatch, periodic Tx) live in one [`TimerEngine`] owned by the registry.
//! Expiry yields a [`TimerEvent`] that the registry routes back to the
//! instance that armed it.

mod engine;

pub use engine::{TimerEngine, TimerHandle, TimerStats};

use erps_types::RingPort;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Wtr,
    Wtb,
    Guard,
    /// Topology-change hold-back towards the connected ring
    Tc,
    /// dFOP-TO detection
    Rx,
    /// Periodic R-APS transmission
    Tx,
    HoldOff(RingPort),
    /// Provisioning-mismatch clear
    Pm(RingPort),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerEvent {
    pub inst: u32,
    pub kind: TimerKind,
}
