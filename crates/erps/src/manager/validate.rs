//! Checks run by `conf_set` before anything is stored.

use crate::error::{ErpsError, Result};
use crate::instance::{ErpsState, PortTable};
use crate::types::{Capabilities, ErpsConf, InterconnectConf, MepKey, RingType, RplMode, SfTrigger, Version};
use erps_types::{RingPort, VlanId};
use std::collections::BTreeMap;

/// Instance numbers run from 1 to the instance limit.
pub(super) fn inst_check(inst: u32, cap: &Capabilities) -> Result<()> {
    if inst < 1 || inst > cap.inst_cnt_max {
        return Err(ErpsError::InvalidInstance(inst));
    }
    Ok(())
}

fn ring_port_conf_check(conf: &ErpsConf, rp: RingPort, ports: &PortTable) -> Result<()> {
    let port_conf = &conf.ring_port_conf[rp.index()];

    if conf.using_ring_port_conf(rp) {
        if ports.by_ifindex(port_conf.ifindex).is_none() {
            return Err(ErpsError::InvalidIfindex(rp, port_conf.ifindex));
        }

        if port_conf.sf_trigger == SfTrigger::Mep {
            if !port_conf.mep.is_empty() {
                port_conf.mep.check(rp)?;
            } else if conf.admin_active {
                return Err(ErpsError::MepMustBeSpecified(rp));
            }
        }
    } else if !conf.virtual_channel {
        return Ok(());
    }

    // Port1 of an interconnected sub-ring with a virtual channel only has a
    // SMAC.
    if port_conf.smac.is_multicast() {
        return Err(ErpsError::InvalidSmac(rp));
    }
    Ok(())
}

/// Checks `conf` on its own, without looking at other instances.
pub(super) fn conf_check(inst: u32, conf: &ErpsConf, cap: &Capabilities, ports: &PortTable) -> Result<()> {
    if !(1..=239).contains(&conf.ring_id) {
        return Err(ErpsError::InvalidRingId(conf.ring_id));
    }
    if conf.level > 7 {
        return Err(ErpsError::InvalidLevel(conf.level));
    }
    if VlanId::new(conf.control_vlan).is_err() {
        return Err(ErpsError::InvalidControlVlan(conf.control_vlan));
    }
    if conf.pcp > 7 {
        return Err(ErpsError::InvalidPcp(conf.pcp));
    }

    let connected = conf.interconnect.connected_ring_inst;
    if conf.ring_type == RingType::InterconnectedSub && inst_check(connected, cap).is_err() {
        return Err(ErpsError::InvalidConnectedRingInst(connected));
    }

    for rp in RingPort::ALL {
        ring_port_conf_check(conf, rp, ports)?;
    }

    if conf.node_id.is_multicast() {
        return Err(ErpsError::InvalidNodeId);
    }
    if conf.wtr_secs < 1 || conf.wtr_secs > cap.wtr_secs_max {
        return Err(ErpsError::InvalidWtr(conf.wtr_secs));
    }
    let guard = conf.guard_time_msecs;
    if guard < 10 || guard > cap.guard_time_msecs_max || guard % 10 != 0 {
        return Err(ErpsError::InvalidGuardTime(guard));
    }
    let hold_off = conf.hold_off_msecs;
    if hold_off > cap.hold_off_msecs_max || hold_off % 100 != 0 {
        return Err(ErpsError::InvalidHoldOffTime(hold_off));
    }

    if conf.admin_active {
        admin_active_check(inst, conf)?;
    }
    Ok(())
}

/// Constraints that only matter once the instance is meant to run.
fn admin_active_check(inst: u32, conf: &ErpsConf) -> Result<()> {
    let [port0, port1] = &conf.ring_port_conf;

    if conf.using_ring_port_conf(RingPort::Port1) {
        if port0.ifindex == port1.ifindex {
            return Err(ErpsError::Port0And1IfindexIdentical);
        }
        if port0.sf_trigger == SfTrigger::Mep && port1.sf_trigger == SfTrigger::Mep && port0.mep == port1.mep {
            return Err(ErpsError::Port0And1MepIdentical);
        }
    } else if conf.rpl_mode != RplMode::None && conf.rpl_port == RingPort::Port1 {
        return Err(ErpsError::RplOnPort1OfInterconnectedSubRing);
    }

    if conf.protected_vlans.is_empty() {
        return Err(ErpsError::NoProtectedVlans);
    }
    if conf.protected_vlans.contains(conf.control_vlan) {
        return Err(ErpsError::ControlVlanProtected);
    }

    if conf.version == Version::V1 {
        if conf.ring_type != RingType::Major {
            return Err(ErpsError::V1RequiresMajorRing);
        }
        if conf.ring_id != 1 {
            return Err(ErpsError::V1RequiresRingId1);
        }
        if !conf.revertive {
            return Err(ErpsError::V1RequiresRevertive);
        }
    }

    if conf.ring_type == RingType::InterconnectedSub && conf.interconnect.connected_ring_inst == inst {
        return Err(ErpsError::ConnectedRingIsSelf);
    }
    Ok(())
}

/// Resets fields that have no meaning for an active configuration, so that
/// equal behavior gives equal configurations.
pub(super) fn normalize(conf: &mut ErpsConf) {
    if !conf.admin_active {
        return;
    }

    for port_conf in conf.ring_port_conf.iter_mut() {
        if port_conf.sf_trigger == SfTrigger::Link {
            port_conf.mep = MepKey::default();
        }
    }
    if conf.ring_type != RingType::InterconnectedSub {
        conf.interconnect = InterconnectConf::default();
    }
    if conf.ring_type == RingType::Major {
        conf.virtual_channel = false;
    }
}

/// Two active instances on a common ring port must protect disjoint VLANs
/// and must also differ in control VLAN or ring ID. Either condition alone is
/// not enough: a shared (control VLAN, ring ID) pair would make Rx dispatch
/// on that port ambiguous.
pub(super) fn cross_check(inst: u32, conf: &ErpsConf, instances: &BTreeMap<u32, ErpsState>) -> Result<()> {
    if !conf.admin_active {
        return Ok(());
    }

    for (other_inst, other) in instances {
        if *other_inst == inst || !other.conf.admin_active || !conf.ring_ports_in_common(&other.conf) {
            continue;
        }
        if conf.protected_vlans.intersects(&other.conf.protected_vlans) {
            return Err(ErpsError::OverlappingVlansOnSharedPort(*other_inst));
        }
        if conf.control_vlan == other.conf.control_vlan && conf.ring_id == other.conf.ring_id {
            return Err(ErpsError::SameControlVlanAndRingIdOnSharedPort(*other_inst));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::PortInfo;
    use crate::timer::TimerEngine;
    use erps_types::{MacAddress, PortNo, VlanSet};
    use pretty_assertions::assert_eq;

    fn ports() -> PortTable {
        let mut ports = PortTable::new(MacAddress::new([0, 1, 2, 3, 4, 5]));
        ports.load((0..4).map(|n| {
            (
                PortNo::new(n),
                PortInfo {
                    ifindex: 1000 + n,
                    link: true,
                    ..Default::default()
                },
            )
        }));
        ports
    }

    fn valid() -> ErpsConf {
        let mut conf = ErpsConf {
            control_vlan: 100,
            protected_vlans: VlanSet::try_from(vec![10, 20]).unwrap(),
            admin_active: true,
            ..Default::default()
        };
        conf.ring_port_conf[0].ifindex = 1000;
        conf.ring_port_conf[1].ifindex = 1001;
        conf
    }

    fn check(conf: &ErpsConf) -> Result<()> {
        conf_check(1, conf, &Capabilities::default(), &ports())
    }

    #[test]
    fn test_valid_conf_passes() {
        assert_eq!(check(&valid()), Ok(()));
    }

    #[test]
    fn test_inst_check() {
        let cap = Capabilities::default();
        assert!(inst_check(1, &cap).is_ok());
        assert!(inst_check(64, &cap).is_ok());
        assert!(matches!(inst_check(0, &cap), Err(ErpsError::InvalidInstance(0))));
        assert!(matches!(inst_check(65, &cap), Err(ErpsError::InvalidInstance(65))));
    }

    #[test]
    fn test_range_checks() {
        let mut conf = valid();
        conf.ring_id = 240;
        assert!(matches!(check(&conf), Err(ErpsError::InvalidRingId(240))));

        let mut conf = valid();
        conf.level = 8;
        assert!(matches!(check(&conf), Err(ErpsError::InvalidLevel(8))));

        let mut conf = valid();
        conf.control_vlan = 4095;
        assert!(matches!(check(&conf), Err(ErpsError::InvalidControlVlan(4095))));

        let mut conf = valid();
        conf.wtr_secs = 0;
        assert!(matches!(check(&conf), Err(ErpsError::InvalidWtr(0))));
        conf.wtr_secs = 721;
        assert!(matches!(check(&conf), Err(ErpsError::InvalidWtr(721))));
    }

    #[test]
    fn test_guard_and_hold_off_steps() {
        let mut conf = valid();
        for bad in [0, 5, 15, 2010] {
            conf.guard_time_msecs = bad;
            assert!(matches!(check(&conf), Err(ErpsError::InvalidGuardTime(_))), "guard {}", bad);
        }
        conf.guard_time_msecs = 2000;
        assert!(check(&conf).is_ok());

        conf.hold_off_msecs = 150;
        assert!(matches!(check(&conf), Err(ErpsError::InvalidHoldOffTime(150))));
        conf.hold_off_msecs = 10100;
        assert!(matches!(check(&conf), Err(ErpsError::InvalidHoldOffTime(10100))));
        conf.hold_off_msecs = 10000;
        assert!(check(&conf).is_ok());
    }

    #[test]
    fn test_ring_port_checks() {
        let mut conf = valid();
        conf.ring_port_conf[1].ifindex = 77;
        assert!(matches!(check(&conf), Err(ErpsError::InvalidIfindex(RingPort::Port1, 77))));

        let mut conf = valid();
        conf.ring_port_conf[0].smac = MacAddress::new([0x01, 0, 0, 0, 0, 1]);
        assert!(matches!(check(&conf), Err(ErpsError::InvalidSmac(RingPort::Port0))));

        let mut conf = valid();
        conf.ring_port_conf[0].sf_trigger = SfTrigger::Mep;
        assert!(matches!(check(&conf), Err(ErpsError::MepMustBeSpecified(RingPort::Port0))));

        // An empty MEP key is fine until the instance is enabled.
        conf.admin_active = false;
        assert!(check(&conf).is_ok());

        conf.ring_port_conf[0].mep = MepKey::new("md", "", 3);
        assert!(matches!(check(&conf), Err(ErpsError::InvalidMep(RingPort::Port0))));
    }

    #[test]
    fn test_unused_port1_of_interconnected_sub_ring() {
        let mut conf = valid();
        conf.ring_type = RingType::InterconnectedSub;
        conf.interconnect.connected_ring_inst = 2;
        conf.virtual_channel = false;
        conf.ring_port_conf[1].ifindex = 0;
        conf.ring_port_conf[1].smac = MacAddress::BROADCAST;
        assert!(check(&conf).is_ok());

        // With a virtual channel its SMAC is used.
        conf.virtual_channel = true;
        assert!(matches!(check(&conf), Err(ErpsError::InvalidSmac(RingPort::Port1))));
    }

    #[test]
    fn test_admin_active_checks() {
        let mut conf = valid();
        conf.ring_port_conf[1].ifindex = 1000;
        assert!(matches!(check(&conf), Err(ErpsError::Port0And1IfindexIdentical)));

        let mut conf = valid();
        for port_conf in conf.ring_port_conf.iter_mut() {
            port_conf.sf_trigger = SfTrigger::Mep;
            port_conf.mep = MepKey::new("md", "ma", 1);
        }
        assert!(matches!(check(&conf), Err(ErpsError::Port0And1MepIdentical)));

        let mut conf = valid();
        conf.protected_vlans = VlanSet::new();
        assert!(matches!(check(&conf), Err(ErpsError::NoProtectedVlans)));

        let mut conf = valid();
        conf.protected_vlans = VlanSet::try_from(vec![100]).unwrap();
        assert!(matches!(check(&conf), Err(ErpsError::ControlVlanProtected)));

        let mut conf = valid();
        conf.ring_type = RingType::InterconnectedSub;
        conf.interconnect.connected_ring_inst = 1;
        assert!(matches!(check(&conf), Err(ErpsError::ConnectedRingIsSelf)));

        conf.interconnect.connected_ring_inst = 2;
        conf.rpl_mode = RplMode::Owner;
        conf.rpl_port = RingPort::Port1;
        assert!(matches!(check(&conf), Err(ErpsError::RplOnPort1OfInterconnectedSubRing)));

        conf.interconnect.connected_ring_inst = 0;
        assert!(matches!(check(&conf), Err(ErpsError::InvalidConnectedRingInst(0))));
    }

    #[test]
    fn test_v1_restrictions() {
        let mut conf = valid();
        conf.version = Version::V1;
        assert!(check(&conf).is_ok());

        conf.ring_type = RingType::Sub;
        assert!(matches!(check(&conf), Err(ErpsError::V1RequiresMajorRing)));
        conf.ring_type = RingType::Major;
        conf.ring_id = 2;
        assert!(matches!(check(&conf), Err(ErpsError::V1RequiresRingId1)));
        conf.ring_id = 1;
        conf.revertive = false;
        assert!(matches!(check(&conf), Err(ErpsError::V1RequiresRevertive)));
    }

    #[test]
    fn test_normalize_active_conf() {
        let mut conf = valid();
        conf.ring_port_conf[0].mep = MepKey::new("md", "ma", 1);
        conf.interconnect.connected_ring_inst = 9;
        conf.virtual_channel = true;
        normalize(&mut conf);
        assert!(conf.ring_port_conf[0].mep.is_empty());
        assert_eq!(conf.interconnect, InterconnectConf::default());
        assert!(!conf.virtual_channel);

        // Inactive configurations are stored as given.
        let mut conf = valid();
        conf.admin_active = false;
        conf.interconnect.connected_ring_inst = 9;
        normalize(&mut conf);
        assert_eq!(conf.interconnect.connected_ring_inst, 9);
    }

    #[test]
    fn test_cross_check_on_shared_port() {
        let mut timers = TimerEngine::new();
        let mut instances = BTreeMap::new();
        instances.insert(1, ErpsState::new(1, valid(), &mut timers));

        let mut conf = valid();
        conf.ring_port_conf[1].ifindex = 1002;
        assert!(matches!(
            cross_check(2, &conf, &instances),
            Err(ErpsError::OverlappingVlansOnSharedPort(1))
        ));

        conf.protected_vlans = VlanSet::try_from(vec![30]).unwrap();
        assert!(matches!(
            cross_check(2, &conf, &instances),
            Err(ErpsError::SameControlVlanAndRingIdOnSharedPort(1))
        ));

        conf.ring_id = 2;
        assert!(cross_check(2, &conf, &instances).is_ok());

        // No common ring port, no constraint.
        let mut conf = valid();
        conf.ring_port_conf[0].ifindex = 1002;
        conf.ring_port_conf[1].ifindex = 1003;
        assert!(cross_check(2, &conf, &instances).is_ok());

        // The instance itself does not count.
        assert!(cross_check(1, &valid(), &instances).is_ok());
    }
}
