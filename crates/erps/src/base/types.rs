//! Requests, flush reasons and history entries of the Base Engine.

use crate::types::{NodeState, RapsInfo};
use erps_types::{MacAddress, RingPort};
use serde::Serialize;
use std::fmt;

/// Stimulus fed to the state machine. Later variants take priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Request {
    #[default]
    None,
    RemoteNr,
    RemoteNrRb,
    LocalWtbRunning,
    LocalWtbExpires,
    LocalWtrRunning,
    LocalWtrExpires,
    LocalMs,
    RemoteMs,
    RemoteSf,
    LocalSfClear,
    LocalSf,
    RemoteFs,
    LocalFs,
    LocalClear,
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Request::None => "None",
            Request::RemoteNr => "R-NR",
            Request::RemoteNrRb => "R-NR-RB",
            Request::LocalWtbRunning => "L-WTB-running",
            Request::LocalWtbExpires => "L-WTB-expires",
            Request::LocalWtrRunning => "L-WTR-running",
            Request::LocalWtrExpires => "L-WTR-expires",
            Request::LocalMs => "L-MS",
            Request::RemoteMs => "R-MS",
            Request::RemoteSf => "R-SF",
            Request::LocalSfClear => "L-SF-clear",
            Request::LocalSf => "L-SF",
            Request::RemoteFs => "R-FS",
            Request::LocalFs => "L-FS",
            Request::LocalClear => "L-Clear",
        };
        write!(f, "{}", s)
    }
}

/// Why an entry in the history caused or skipped a flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushReason {
    #[default]
    None,
    /// The state machine flushed
    Fsm,
    /// A new (node ID, BPR) pair was received
    NodeId,
    /// An R-APS EVENT was received
    Event,
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlushReason::None => "-",
            FlushReason::Fsm => "FSM",
            FlushReason::NodeId => "Node ID",
            FlushReason::Event => "Event",
        };
        write!(f, "{}", s)
    }
}

/// (Node ID, BPR) pair last received on a ring port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NodeIdBpr {
    pub node_id: MacAddress,
    pub bpr: RingPort,
}

/// One line of the per-instance event history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub time_ms: u64,
    pub local_request: Request,
    pub remote_request: Request,
    pub rx_ring_port: RingPort,
    pub rx_node_id_bpr: Option<NodeIdBpr>,
    pub node_state: NodeState,
    pub sf: [bool; 2],
    pub blocked: [bool; 2],
    pub flush_reason: FlushReason,
    pub tx_raps_active: bool,
    pub tx_raps_info: RapsInfo,
}

impl HistoryEntry {
    /// True if the state this entry captures differs from `other`.
    pub(crate) fn differs_from(&self, other: &HistoryEntry) -> bool {
        self.local_request != other.local_request
            || self.remote_request != other.remote_request
            || self.node_state != other.node_state
            || self.sf != other.sf
            || self.blocked != other.blocked
            || self.tx_raps_active != other.tx_raps_active
            || self.tx_raps_info != other.tx_raps_info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_priority_order() {
        assert!(Request::LocalClear > Request::LocalFs);
        assert!(Request::LocalFs > Request::RemoteFs);
        assert!(Request::RemoteFs > Request::LocalSf);
        assert!(Request::LocalSf > Request::LocalSfClear);
        assert!(Request::LocalSfClear > Request::RemoteSf);
        assert!(Request::RemoteSf > Request::RemoteMs);
        assert!(Request::RemoteMs > Request::LocalMs);
        assert!(Request::LocalMs > Request::LocalWtrExpires);
        assert!(Request::LocalWtrRunning > Request::LocalWtbExpires);
        assert!(Request::LocalWtbRunning > Request::RemoteNrRb);
        assert!(Request::RemoteNr > Request::None);
    }
}
