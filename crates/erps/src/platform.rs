//! Services the ERPS engine needs from the switch.
//!
//! The engine never talks to hardware or to other protocol modules directly.
//! Everything goes through an [`ErpsPlatform`] implementation handed to
//! [`crate::Registry::new`]. Methods report failures as plain strings, which
//! the engine maps into [`crate::ErpsError`] variants.

use crate::types::MepKey;
use erps_types::{MacAddress, PortNo, VlanId};
use serde::{Deserialize, Serialize};

/// Handle of an installed R-APS redirection rule.
pub type AceId = u32;

/// Forwarding state of a ring port for the protected VLANs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortForwardState {
    Forwarding,
    Discarding,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MepDirection {
    #[default]
    Down,
    Up,
}

/// What the CFM module reports about a MEP.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MepConf {
    pub admin_active: bool,
    pub direction: MepDirection,
    pub ifindex: u32,
    /// Primary VLAN of the MEP. Zero means use the MA VLAN.
    pub vlan: u16,
    pub md_level: u8,
    /// VLAN of the service. Zero means a port MEP.
    pub ma_vlan: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VlanPortType {
    #[default]
    Unaware,
    C,
    S,
    SCustom,
}

/// Egress tagging of a port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxTagType {
    /// Untag `untagged_vid`, tag the rest
    #[default]
    UntagThis,
    /// Tag `untagged_vid`, untag the rest
    TagThis,
    TagAll,
    UntagAll,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VlanPortConf {
    pub port_type: VlanPortType,
    pub pvid: u16,
    pub untagged_vid: u16,
    pub tx_tag_type: TxTagType,
}

impl VlanPortConf {
    /// TPID used when tagging R-APS PDUs on this port.
    pub fn tpid(&self, custom_tpid: u16) -> u16 {
        match self.port_type {
            VlanPortType::Unaware | VlanPortType::C => 0x8100,
            VlanPortType::S => 0x88a8,
            VlanPortType::SCustom => custom_tpid,
        }
    }

    /// Returns true if frames on `vid` leave this port untagged.
    pub fn untags(&self, vid: u16) -> bool {
        match self.tx_tag_type {
            TxTagType::UntagThis => self.untagged_vid == vid,
            TxTagType::TagThis => self.untagged_vid != self.pvid && self.pvid == vid,
            TxTagType::TagAll => false,
            TxTagType::UntagAll => true,
        }
    }
}

/// A switch port as seen at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortInfo {
    pub ifindex: u32,
    pub mac: MacAddress,
    pub link: bool,
    pub vlan_conf: VlanPortConf,
}

/// R-APS redirection rule. Frames on `control_vlan` with the ring's
/// multicast DMAC and `level` arriving on `ingress` go to the CPU and are
/// hardware forwarded to `egress`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AceConf {
    pub ring_id: u8,
    pub level: u8,
    pub control_vlan: u16,
    pub ingress: Vec<PortNo>,
    pub egress: Vec<PortNo>,
}

/// Switch services used by the engine.
pub trait ErpsPlatform: Send + Sync {
    /// Ports that are members of `vid`.
    fn vlan_port_members(&self, vid: VlanId) -> Result<Vec<PortNo>, String>;

    fn mep_conf(&self, key: &MepKey) -> Result<MepConf, String>;
    fn mep_list(&self) -> Result<Vec<(MepKey, MepConf)>, String>;
    /// Returns false while the MEP reports a defect.
    fn mep_ok(&self, key: &MepKey) -> Result<bool, String>;
    /// Port MEPs and VLAN MEPs share MEG levels.
    fn has_shared_meg_level(&self) -> Result<bool, String>;

    fn ace_add(&self, conf: &AceConf) -> Result<AceId, String>;
    fn ace_update(&self, id: AceId, conf: &AceConf) -> Result<(), String>;
    fn ace_remove(&self, id: AceId) -> Result<(), String>;

    /// Adds or removes `vid` from the protection group of `inst`.
    fn protected_vlan_set(&self, inst: u32, vid: VlanId, member: bool) -> Result<(), String>;
    fn port_state_set(&self, inst: u32, port: PortNo, state: PortForwardState) -> Result<(), String>;
    fn mac_flush(&self, port: PortNo, vid: VlanId) -> Result<(), String>;
    fn vlan_ingress_filter_set(&self, port: PortNo, enable: bool) -> Result<(), String>;

    fn frame_tx(&self, port: PortNo, frame: &[u8]) -> Result<(), String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tpid_by_port_type() {
        let mut conf = VlanPortConf::default();
        assert_eq!(conf.tpid(0x9100), 0x8100);
        conf.port_type = VlanPortType::S;
        assert_eq!(conf.tpid(0x9100), 0x88a8);
        conf.port_type = VlanPortType::SCustom;
        assert_eq!(conf.tpid(0x9100), 0x9100);
    }

    #[test]
    fn test_untags() {
        let mut conf = VlanPortConf {
            port_type: VlanPortType::C,
            pvid: 1,
            untagged_vid: 1,
            tx_tag_type: TxTagType::UntagThis,
        };
        assert!(conf.untags(1));
        assert!(!conf.untags(10));

        conf.tx_tag_type = TxTagType::TagThis;
        conf.untagged_vid = 20;
        conf.pvid = 10;
        assert!(conf.untags(10));
        assert!(!conf.untags(20));

        conf.tx_tag_type = TxTagType::TagAll;
        assert!(!conf.untags(10));
        conf.tx_tag_type = TxTagType::UntagAll;
        assert!(conf.untags(10));
    }
}
