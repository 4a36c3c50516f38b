//! Error codes returned by the management API.

use erps_types::RingPort;

/// Errors returned by [`crate::Registry`] operations.
///
/// Configuration errors are returned before anything is stored, so a failed
/// `conf_set` leaves the registry untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ErpsError {
    #[error("invalid ERPS instance number: {0}")]
    InvalidInstance(u32),

    #[error("ERPS instance {0} does not exist")]
    NoSuchInstance(u32),

    #[error("the maximum number of ERPS instances is reached")]
    LimitReached,

    #[error("ERPS instance is not active")]
    NotActive,

    #[error("ERPS is not yet ready, try again in a few seconds")]
    NotReadyTryAgain,

    #[error("invalid ring ID: {0} (must be 1-239)")]
    InvalidRingId(u8),

    #[error("invalid MEG level: {0} (must be 0-7)")]
    InvalidLevel(u8),

    #[error("invalid control VLAN: {0}")]
    InvalidControlVlan(u16),

    #[error("invalid PCP: {0} (must be 0-7)")]
    InvalidPcp(u8),

    #[error("invalid WTR time: {0} seconds")]
    InvalidWtr(u32),

    #[error("invalid guard time: {0} ms (must be 10-2000 in steps of 10)")]
    InvalidGuardTime(u32),

    #[error("invalid hold-off time: {0} ms (must be 0-10000 in steps of 100)")]
    InvalidHoldOffTime(u32),

    #[error("invalid version")]
    InvalidVersion,

    #[error("invalid ring type")]
    InvalidRingType,

    #[error("invalid RPL mode")]
    InvalidRplMode,

    #[error("invalid RPL port")]
    InvalidRplPort,

    #[error("invalid connected ring instance: {0}")]
    InvalidConnectedRingInst(u32),

    #[error("invalid SF trigger for {0}")]
    InvalidSfTrigger(RingPort),

    #[error("invalid {0} ifindex: {1}")]
    InvalidIfindex(RingPort, u32),

    #[error("{0} MEP must be specified when SF trigger is MEP")]
    MepMustBeSpecified(RingPort),

    #[error("{0} SMAC is not a unicast MAC address")]
    InvalidSmac(RingPort),

    #[error("invalid {0} MEP key")]
    InvalidMep(RingPort),

    #[error("node ID is not a unicast MAC address")]
    InvalidNodeId,

    #[error("port0 and port1 interfaces cannot be the same")]
    Port0And1IfindexIdentical,

    #[error("port0 and port1 MEPs cannot be the same")]
    Port0And1MepIdentical,

    #[error("an interconnected sub-ring cannot use port1 as RPL port")]
    RplOnPort1OfInterconnectedSubRing,

    #[error("at least one VLAN must be protected")]
    NoProtectedVlans,

    #[error("the control VLAN cannot be one of the protected VLANs")]
    ControlVlanProtected,

    #[error("ring type must be major when using G.8032v1")]
    V1RequiresMajorRing,

    #[error("ring ID must be 1 when using G.8032v1")]
    V1RequiresRingId1,

    #[error("revertive switching is required when using G.8032v1")]
    V1RequiresRevertive,

    #[error("an interconnected sub-ring cannot reference itself as connected ring")]
    ConnectedRingIsSelf,

    #[error("instance {0} shares ring ports and has overlapping protected VLANs")]
    OverlappingVlansOnSharedPort(u32),

    #[error("instance {0} shares ring ports and uses the same control VLAN and ring ID")]
    SameControlVlanAndRingIdOnSharedPort(u32),

    #[error("invalid command")]
    InvalidCommand,

    #[error("forced and manual switch are not supported when using G.8032v1")]
    CommandNotSupportedWhenUsingV1,

    #[error("out of hardware resources: {0}")]
    HwResources(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ErpsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_errors_name_the_port() {
        let err = ErpsError::InvalidIfindex(RingPort::Port1, 77);
        assert_eq!(err.to_string(), "invalid port1 ifindex: 77");

        let err = ErpsError::MepMustBeSpecified(RingPort::Port0);
        assert!(err.to_string().starts_with("port0 MEP"));
    }

    #[test]
    fn test_cross_instance_errors_name_the_peer() {
        let err = ErpsError::OverlappingVlansOnSharedPort(4);
        assert!(err.to_string().contains("instance 4"));
    }
}
