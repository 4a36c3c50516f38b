//! Configuration, control and status types of the management API.

use crate::error::{ErpsError, Result};
use erps_types::{MacAddress, RingPort, VlanSet};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// G.8032 protocol version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Version {
    V1,
    #[default]
    V2,
}

impl Version {
    /// Value carried in the version field of the CFM header.
    pub const fn wire_value(&self) -> u8 {
        match self {
            Version::V1 => 0,
            Version::V2 => 1,
        }
    }
}

impl TryFrom<u8> for Version {
    type Error = ErpsError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Version::V1),
            1 => Ok(Version::V2),
            _ => Err(ErpsError::InvalidVersion),
        }
    }
}

impl FromStr for Version {
    type Err = ErpsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "v1" | "1" => Ok(Version::V1),
            "v2" | "2" => Ok(Version::V2),
            _ => Err(ErpsError::InvalidVersion),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RingType {
    #[default]
    Major,
    Sub,
    /// A sub-ring attached to a connected ring through a single node. Only
    /// port0 is a physical ring port.
    InterconnectedSub,
}

impl FromStr for RingType {
    type Err = ErpsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "major" => Ok(RingType::Major),
            "sub" => Ok(RingType::Sub),
            "interconnected_sub" => Ok(RingType::InterconnectedSub),
            _ => Err(ErpsError::InvalidRingType),
        }
    }
}

/// What raises signal fail on a ring port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SfTrigger {
    #[default]
    Link,
    Mep,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RplMode {
    #[default]
    None,
    Owner,
    Neighbor,
}

impl FromStr for RplMode {
    type Err = ErpsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "none" => Ok(RplMode::None),
            "owner" => Ok(RplMode::Owner),
            "neighbor" | "neighbour" => Ok(RplMode::Neighbor),
            _ => Err(ErpsError::InvalidRplMode),
        }
    }
}

/// Identifies a CFM MEP by domain, service and MEP ID.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(default)]
pub struct MepKey {
    pub md: String,
    pub ma: String,
    pub mepid: u16,
}

impl MepKey {
    pub const MEPID_MAX: u16 = 8191;

    pub fn new(md: impl Into<String>, ma: impl Into<String>, mepid: u16) -> Self {
        Self {
            md: md.into(),
            ma: ma.into(),
            mepid,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.md.is_empty() && self.ma.is_empty() && self.mepid == 0
    }

    /// Checks a non-empty key for the ring port it is configured on.
    pub fn check(&self, ring_port: RingPort) -> Result<()> {
        if self.md.is_empty() || self.ma.is_empty() || self.mepid == 0 || self.mepid > Self::MEPID_MAX {
            return Err(ErpsError::InvalidMep(ring_port));
        }
        Ok(())
    }
}

impl fmt::Display for MepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}::{}", self.md, self.ma, self.mepid)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingPortConf {
    pub sf_trigger: SfTrigger,
    pub ifindex: u32,
    pub mep: MepKey,
    /// Source MAC of transmitted R-APS PDUs. All-zeros selects the port MAC.
    pub smac: MacAddress,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterconnectConf {
    pub connected_ring_inst: u32,
    /// Send R-APS EVENT on the connected ring when this ring flushes.
    pub tc_propagate: bool,
}

/// Configuration of one ERPS instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErpsConf {
    pub version: Version,
    pub ring_type: RingType,
    pub virtual_channel: bool,
    pub interconnect: InterconnectConf,
    pub ring_id: u8,
    /// All-zeros selects the chassis MAC.
    pub node_id: MacAddress,
    pub level: u8,
    pub control_vlan: u16,
    pub pcp: u8,
    pub ring_port_conf: [RingPortConf; 2],
    pub revertive: bool,
    pub wtr_secs: u32,
    pub guard_time_msecs: u32,
    pub hold_off_msecs: u32,
    pub rpl_mode: RplMode,
    pub rpl_port: RingPort,
    pub protected_vlans: VlanSet,
    pub admin_active: bool,
}

impl Default for ErpsConf {
    fn default() -> Self {
        Self {
            version: Version::V2,
            ring_type: RingType::Major,
            virtual_channel: true,
            interconnect: InterconnectConf::default(),
            ring_id: 1,
            node_id: MacAddress::ZERO,
            level: 7,
            control_vlan: 1,
            pcp: 7,
            ring_port_conf: Default::default(),
            revertive: true,
            wtr_secs: 300,
            guard_time_msecs: 500,
            hold_off_msecs: 0,
            rpl_mode: RplMode::None,
            rpl_port: RingPort::Port0,
            protected_vlans: VlanSet::new(),
            admin_active: false,
        }
    }
}

impl ErpsConf {
    /// Port1 of an interconnected sub-ring has no physical ring port.
    pub fn using_ring_port_conf(&self, ring_port: RingPort) -> bool {
        ring_port == RingPort::Port0 || self.ring_type != RingType::InterconnectedSub
    }

    /// Both ring ports take part in blocking and forwarding decisions.
    pub(crate) fn uses_both_ring_ports(&self) -> bool {
        self.ring_type != RingType::InterconnectedSub || self.virtual_channel
    }

    /// Returns true if this and `other` have a physical ring port in common.
    pub fn ring_ports_in_common(&self, other: &ErpsConf) -> bool {
        let a0 = self.ring_port_conf[0].ifindex;
        let a1 = self.ring_port_conf[1].ifindex;
        let b0 = other.ring_port_conf[0].ifindex;
        let b1 = other.ring_port_conf[1].ifindex;
        let a_port1 = self.using_ring_port_conf(RingPort::Port1);
        let b_port1 = other.using_ring_port_conf(RingPort::Port1);

        a0 == b0 || (b_port1 && a0 == b1) || (a_port1 && a1 == b0) || (a_port1 && b_port1 && a1 == b1)
    }
}

/// Limits reported by `capabilities_get`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub inst_cnt_max: u32,
    pub wtr_secs_max: u32,
    pub guard_time_msecs_max: u32,
    pub hold_off_msecs_max: u32,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            inst_cnt_max: 64,
            wtr_secs_max: 720,
            guard_time_msecs_max: 2000,
            hold_off_msecs_max: 10000,
        }
    }
}

/// Operator command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// No command pending
    #[default]
    Nr,
    FsToPort0,
    FsToPort1,
    MsToPort0,
    MsToPort1,
    Clear,
}

impl Command {
    pub const fn is_forced_switch(&self) -> bool {
        matches!(self, Command::FsToPort0 | Command::FsToPort1)
    }

    pub const fn is_manual_switch(&self) -> bool {
        matches!(self, Command::MsToPort0 | Command::MsToPort1)
    }

    /// Ring port that gets blocked by a forced or manual switch.
    pub(crate) const fn blocked_port(&self) -> RingPort {
        match self {
            Command::FsToPort0 | Command::MsToPort0 => RingPort::Port1,
            _ => RingPort::Port0,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Command::Nr => "none",
            Command::FsToPort0 => "forced-switch-to-port0",
            Command::FsToPort1 => "forced-switch-to-port1",
            Command::MsToPort0 => "manual-switch-to-port0",
            Command::MsToPort1 => "manual-switch-to-port1",
            Command::Clear => "clear",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Command {
    type Err = ErpsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "none" | "nr" => Ok(Command::Nr),
            "forced-switch-to-port0" | "fs-to-port0" => Ok(Command::FsToPort0),
            "forced-switch-to-port1" | "fs-to-port1" => Ok(Command::FsToPort1),
            "manual-switch-to-port0" | "ms-to-port0" => Ok(Command::MsToPort0),
            "manual-switch-to-port1" | "ms-to-port1" => Ok(Command::MsToPort1),
            "clear" => Ok(Command::Clear),
            _ => Err(ErpsError::InvalidCommand),
        }
    }
}

/// Request/state field of an R-APS PDU, with its wire code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RapsRequest {
    #[default]
    Nr,
    Ms,
    Sf,
    Fs,
    Event,
}

impl RapsRequest {
    pub const fn code(&self) -> u8 {
        match self {
            RapsRequest::Nr => 0b0000,
            RapsRequest::Ms => 0b0111,
            RapsRequest::Sf => 0b1011,
            RapsRequest::Fs => 0b1101,
            RapsRequest::Event => 0b1110,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0b0000 => Some(RapsRequest::Nr),
            0b0111 => Some(RapsRequest::Ms),
            0b1011 => Some(RapsRequest::Sf),
            0b1101 => Some(RapsRequest::Fs),
            0b1110 => Some(RapsRequest::Event),
            _ => None,
        }
    }
}

impl fmt::Display for RapsRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RapsRequest::Nr => "NR",
            RapsRequest::Ms => "MS",
            RapsRequest::Sf => "SF",
            RapsRequest::Fs => "FS",
            RapsRequest::Event => "EVENT",
        };
        write!(f, "{}", s)
    }
}

/// Contents of a transmitted or received R-APS PDU.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RapsInfo {
    /// Seconds since start when this info last changed or was received.
    pub update_time_secs: u64,
    pub request: RapsRequest,
    pub version: u8,
    pub rb: bool,
    pub dnf: bool,
    pub bpr: RingPort,
    pub node_id: MacAddress,
    pub smac: MacAddress,
}

impl fmt::Display for RapsInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.request)?;
        if self.rb {
            write!(f, ",RB")?;
        }
        if self.dnf {
            write!(f, ",DNF")?;
        }
        write!(f, ",BPR={}", self.bpr.index())
    }
}

/// Per ring port R-APS and flush counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub rx_error: u64,
    pub rx_own: u64,
    pub rx_guard: u64,
    pub rx_fop_pm: u64,
    pub rx_nr: u64,
    pub rx_nr_rb: u64,
    pub rx_sf: u64,
    pub rx_fs: u64,
    pub rx_ms: u64,
    pub rx_event: u64,
    pub tx_nr: u64,
    pub tx_nr_rb: u64,
    pub tx_sf: u64,
    pub tx_fs: u64,
    pub tx_ms: u64,
    pub tx_event: u64,
    pub sf_cnt: u64,
    pub flush_cnt: u64,
}

impl Statistics {
    pub(crate) fn count_rx(&mut self, request: RapsRequest, rb: bool) {
        match request {
            RapsRequest::Nr if rb => self.rx_nr_rb += 1,
            RapsRequest::Nr => self.rx_nr += 1,
            RapsRequest::Ms => self.rx_ms += 1,
            RapsRequest::Sf => self.rx_sf += 1,
            RapsRequest::Fs => self.rx_fs += 1,
            RapsRequest::Event => self.rx_event += 1,
        }
    }

    pub(crate) fn count_tx(&mut self, request: RapsRequest, rb: bool, cnt: u64) {
        match request {
            RapsRequest::Nr if rb => self.tx_nr_rb += cnt,
            RapsRequest::Nr => self.tx_nr += cnt,
            RapsRequest::Ms => self.tx_ms += cnt,
            RapsRequest::Sf => self.tx_sf += cnt,
            RapsRequest::Fs => self.tx_fs += cnt,
            RapsRequest::Event => self.tx_event += cnt,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingPortStatus {
    pub blocked: bool,
    pub sf: bool,
    /// Provisioning mismatch: another node claims to be RPL owner.
    pub cfop_pm: bool,
    /// Last R-APS info accepted on this port.
    pub rx_raps_info: RapsInfo,
    pub statistics: Statistics,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperState {
    #[default]
    AdminDisabled,
    Active,
    InternalError,
}

impl fmt::Display for OperState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperState::AdminDisabled => "admin_disabled",
            OperState::Active => "active",
            OperState::InternalError => "internal_error",
        };
        write!(f, "{}", s)
    }
}

/// Non-fatal configuration problem. At most one is reported at a time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperWarning {
    #[default]
    None,
    NotMemberOfControlVlan(RingPort),
    UntagsControlVlan(RingPort),
    MepNotFound(RingPort),
    MepAdminDisabled(RingPort),
    MepNotDownMep(RingPort),
    MepIfindexDiffers(RingPort),
    /// A port MEP at this or a higher level terminates R-APS PDUs.
    PortMepShadowsMip(RingPort),
    /// A VLAN MEP on the control VLAN terminates R-APS PDUs.
    MepShadowsMip(RingPort),
    ConnectedRingDoesntExist,
    ConnectedRingIsAnInterconnectedSubRing,
    ConnectedRingIsNotOperative,
    ConnectedRingInterfaceConflict,
    ConnectedRingDoesntProtectControlVlan,
}

impl OperWarning {
    /// MEP warnings make SF fall back to link state on that port.
    pub fn is_mep_warning(&self) -> bool {
        matches!(
            self,
            OperWarning::MepNotFound(_)
                | OperWarning::MepAdminDisabled(_)
                | OperWarning::MepNotDownMep(_)
                | OperWarning::MepIfindexDiffers(_)
        )
    }
}

impl fmt::Display for OperWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperWarning::None => write!(f, "none"),
            OperWarning::NotMemberOfControlVlan(rp) => write!(f, "{} is not member of control VLAN", rp),
            OperWarning::UntagsControlVlan(rp) => write!(f, "{} untags control VLAN", rp),
            OperWarning::MepNotFound(rp) => write!(f, "{} MEP not found", rp),
            OperWarning::MepAdminDisabled(rp) => write!(f, "{} MEP is administratively disabled", rp),
            OperWarning::MepNotDownMep(rp) => write!(f, "{} MEP is not a down-MEP", rp),
            OperWarning::MepIfindexDiffers(rp) => write!(f, "{} and MEP interfaces differ", rp),
            OperWarning::PortMepShadowsMip(rp) => write!(f, "port MEP shadows {} MIP", rp),
            OperWarning::MepShadowsMip(rp) => write!(f, "MEP shadows {} MIP", rp),
            OperWarning::ConnectedRingDoesntExist => write!(f, "connected ring does not exist"),
            OperWarning::ConnectedRingIsAnInterconnectedSubRing => {
                write!(f, "connected ring is an interconnected sub-ring")
            }
            OperWarning::ConnectedRingIsNotOperative => write!(f, "connected ring is not operative"),
            OperWarning::ConnectedRingInterfaceConflict => write!(f, "connected ring interface conflict"),
            OperWarning::ConnectedRingDoesntProtectControlVlan => {
                write!(f, "connected ring does not protect control VLAN")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    #[default]
    Init,
    Idle,
    Protection,
    Ms,
    Fs,
    Pending,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeState::Init => "Init",
            NodeState::Idle => "Idle",
            NodeState::Protection => "Protection",
            NodeState::Ms => "MS",
            NodeState::Fs => "FS",
            NodeState::Pending => "Pending",
        };
        write!(f, "{}", s)
    }
}

/// Runtime status of one instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErpsStatus {
    pub oper_state: OperState,
    pub oper_warning: OperWarning,
    pub node_state: NodeState,
    /// R-APS PDUs are being sent periodically.
    pub tx_raps_active: bool,
    pub tx_raps_info: RapsInfo,
    /// Failure of protocol, timeout: expected R-APS PDUs are missing.
    pub cfop_to: bool,
    pub ring_port_status: [RingPortStatus; 2],
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_conf() {
        let conf = ErpsConf::default();
        assert_eq!(conf.version, Version::V2);
        assert_eq!(conf.ring_type, RingType::Major);
        assert_eq!(conf.wtr_secs, 300);
        assert_eq!(conf.guard_time_msecs, 500);
        assert!(conf.revertive);
        assert!(!conf.admin_active);
        assert!(conf.protected_vlans.is_empty());
    }

    #[test]
    fn test_conf_serde_fills_defaults() {
        let conf: ErpsConf = serde_json::from_str(
            r#"{"ring_id": 5, "rpl_mode": "owner", "protected_vlans": [10, 11]}"#,
        )
        .unwrap();
        assert_eq!(conf.ring_id, 5);
        assert_eq!(conf.rpl_mode, RplMode::Owner);
        assert_eq!(conf.level, 7);
        assert!(conf.protected_vlans.contains(11));
    }

    #[test]
    fn test_using_ring_port_conf() {
        let mut conf = ErpsConf::default();
        assert!(conf.using_ring_port_conf(RingPort::Port1));
        conf.ring_type = RingType::InterconnectedSub;
        assert!(conf.using_ring_port_conf(RingPort::Port0));
        assert!(!conf.using_ring_port_conf(RingPort::Port1));
    }

    #[test]
    fn test_ring_ports_in_common() {
        let mut a = ErpsConf::default();
        a.ring_port_conf[0].ifindex = 1;
        a.ring_port_conf[1].ifindex = 2;
        let mut b = a.clone();
        b.ring_port_conf[0].ifindex = 3;
        b.ring_port_conf[1].ifindex = 2;
        assert!(a.ring_ports_in_common(&b));

        // Port1 of an interconnected sub-ring is not a physical port.
        b.ring_type = RingType::InterconnectedSub;
        assert!(!a.ring_ports_in_common(&b));
    }

    #[test]
    fn test_mep_key_check() {
        assert!(MepKey::default().is_empty());
        assert!(MepKey::new("md", "ma", 1).check(RingPort::Port0).is_ok());
        assert!(matches!(
            MepKey::new("md", "", 1).check(RingPort::Port1),
            Err(ErpsError::InvalidMep(RingPort::Port1))
        ));
        assert!(MepKey::new("md", "ma", 8192).check(RingPort::Port0).is_err());
    }

    #[test]
    fn test_raps_request_codes() {
        for req in [RapsRequest::Nr, RapsRequest::Ms, RapsRequest::Sf, RapsRequest::Fs, RapsRequest::Event] {
            assert_eq!(RapsRequest::from_code(req.code()), Some(req));
        }
        assert_eq!(RapsRequest::from_code(0b0001), None);
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!("v1".parse::<Version>().unwrap(), Version::V1);
        assert!(matches!("v3".parse::<Version>(), Err(ErpsError::InvalidVersion)));
        assert_eq!(Version::try_from(1).unwrap(), Version::V2);
        assert_eq!("interconnected-sub".parse::<RingType>().unwrap(), RingType::InterconnectedSub);
        assert!(matches!("ring".parse::<RingType>(), Err(ErpsError::InvalidRingType)));
        assert!(matches!("master".parse::<RplMode>(), Err(ErpsError::InvalidRplMode)));
        assert_eq!("fs_to_port1".parse::<Command>().unwrap(), Command::FsToPort1);
        assert!(matches!("reboot".parse::<Command>(), Err(ErpsError::InvalidCommand)));
    }

    #[test]
    fn test_command_blocked_port() {
        assert_eq!(Command::FsToPort0.blocked_port(), RingPort::Port1);
        assert_eq!(Command::MsToPort1.blocked_port(), RingPort::Port0);
    }

    #[test]
    fn test_statistics_counting() {
        let mut s = Statistics::default();
        s.count_rx(RapsRequest::Nr, true);
        s.count_rx(RapsRequest::Nr, false);
        s.count_tx(RapsRequest::Sf, false, 3);
        assert_eq!(s.rx_nr_rb, 1);
        assert_eq!(s.rx_nr, 1);
        assert_eq!(s.tx_sf, 3);
    }
}
