//! Operational state of an instance: port binding, warnings, SF derivation
//! and applying state changes to the Base Engine.

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::error::ErpsError;
use crate::instance::{EngineCtx, ErpsState, PortTable};
use crate::platform::{ErpsPlatform, MepDirection};
use crate::types::{OperState, OperWarning, RingType, SfTrigger};
use crate::{audit_log, debug_log, error_log, info_log, warn_log};
use erps_types::{MacAddress, PortNo, RingPort, VlanId};
use itertools::Itertools;

impl ErpsState {
    fn used_ring_ports(&self) -> impl Iterator<Item = RingPort> + '_ {
        RingPort::ALL.into_iter().filter(|rp| self.ring_port_conf_used(*rp))
    }

    /// SF trigger in effect. A MEP that cannot be used makes the ring port
    /// fall back to link state.
    pub(super) fn sf_trigger_get(&self, rp: RingPort) -> SfTrigger {
        match self.conf.ring_port_conf[rp.index()].sf_trigger {
            SfTrigger::Mep if self.status.oper_warning.is_mep_warning() => SfTrigger::Link,
            trigger => trigger,
        }
    }

    /// Current SF of a ring port.
    pub(super) fn sf_get(&self, ctx: &EngineCtx<'_>, rp: RingPort) -> bool {
        if rp == RingPort::Port1 && self.conf.ring_type == RingType::InterconnectedSub {
            // With a virtual channel R-APS are expected through it, so port1
            // is up. Without one nothing ever arrives there.
            return !self.conf.virtual_channel;
        }

        match self.sf_trigger_get(rp) {
            SfTrigger::Link => self.ring_port[rp.index()].binding.port_states[0]
                .map_or(true, |port_no| !ctx.ports.link(port_no)),
            SfTrigger::Mep => {
                let mep = &self.conf.ring_port_conf[rp.index()].mep;
                match ctx.platform.mep_ok(mep) {
                    Ok(ok) => !ok,
                    Err(e) => {
                        // A deleted MEP also shows up as a CFM configuration
                        // change, which re-derives the oper state.
                        debug_log!("ErpsManager", inst = self.inst, ring_port = %rp, mep = %mep, error = %e, "MEP status unavailable");
                        true
                    }
                }
            }
        }
    }

    pub(super) fn sf_update(&mut self, ctx: &mut EngineCtx<'_>, rp: RingPort) {
        let sf = self.sf_get(ctx, rp);
        self.sf_set(ctx, rp, sf);
    }

    /// Every used ring port must be a member of the control VLAN.
    pub(super) fn control_vlan_membership_check(&mut self, platform: &dyn ErpsPlatform) -> bool {
        if !matches!(
            self.status.oper_warning,
            OperWarning::None | OperWarning::NotMemberOfControlVlan(_)
        ) {
            return true;
        }

        let Ok(vid) = VlanId::new(self.conf.control_vlan) else {
            return true;
        };
        let members = match platform.vlan_port_members(vid) {
            Ok(members) => members,
            Err(e) => {
                debug_log!("ErpsManager", inst = self.inst, vid = %vid, error = %e, "VLAN membership unavailable");
                return true;
            }
        };

        let missing = self.used_ring_ports().find(|rp| {
            self.ring_port[rp.index()].binding.port_states[0].is_some_and(|port_no| !members.contains(&port_no))
        });

        match missing {
            Some(rp) => {
                debug_log!(
                    "ErpsManager",
                    inst = self.inst,
                    ring_port = %rp,
                    members = %members.iter().join(","),
                    "ring port is not a member of the control VLAN"
                );
                self.status.oper_warning = OperWarning::NotMemberOfControlVlan(rp);
                false
            }
            None => {
                self.status.oper_warning = OperWarning::None;
                true
            }
        }
    }

    /// R-APS forwarded by hardware between ring ports must keep their tag.
    pub(super) fn control_vlan_tagged_check(&mut self, ports: &PortTable) -> bool {
        if !matches!(
            self.status.oper_warning,
            OperWarning::None | OperWarning::UntagsControlVlan(_)
        ) {
            return true;
        }

        let control_vlan = self.conf.control_vlan;
        let untagging = self.used_ring_ports().find(|rp| {
            self.ring_port[rp.index()].binding.port_states[0]
                .and_then(|port_no| ports.get(port_no))
                .is_some_and(|entry| entry.vlan_conf.untags(control_vlan))
        });

        self.status.oper_warning = untagging.map_or(OperWarning::None, OperWarning::UntagsControlVlan);
        untagging.is_none()
    }

    /// The MEP used for SF must exist, be enabled, be a down-MEP and sit on
    /// the ring port.
    fn mep_check(&mut self, platform: &dyn ErpsPlatform, rp: RingPort) -> bool {
        let port_conf = &self.conf.ring_port_conf[rp.index()];
        let warning = match platform.mep_conf(&port_conf.mep) {
            Err(_) => Some(OperWarning::MepNotFound(rp)),
            Ok(mep) if !mep.admin_active => Some(OperWarning::MepAdminDisabled(rp)),
            Ok(mep) if mep.direction != MepDirection::Down => Some(OperWarning::MepNotDownMep(rp)),
            Ok(mep) if mep.ifindex != port_conf.ifindex => Some(OperWarning::MepIfindexDiffers(rp)),
            Ok(_) => None,
        };

        match warning {
            Some(warning) => {
                self.status.oper_warning = warning;
                false
            }
            None => true,
        }
    }

    /// A MEP at or above our level on the ring port terminates R-APS PDUs
    /// before the MIP sees them.
    fn mep_shadow_check(&mut self, platform: &dyn ErpsPlatform, rp: RingPort) -> bool {
        let ifindex = self.conf.ring_port_conf[rp.index()].ifindex;
        let meps = match platform.mep_list() {
            Ok(meps) => meps,
            Err(e) => {
                debug_log!("ErpsManager", inst = self.inst, error = %e, "MEP list unavailable");
                return true;
            }
        };
        let shared_level = platform.has_shared_meg_level().unwrap_or(false);

        for (key, mep) in meps {
            if mep.md_level < self.conf.level || !mep.admin_active || mep.ifindex != ifindex {
                continue;
            }

            if shared_level && mep.ma_vlan == 0 {
                debug_log!("ErpsManager", inst = self.inst, ring_port = %rp, mep = %key, "port MEP shadows MIP");
                self.status.oper_warning = OperWarning::PortMepShadowsMip(rp);
                return false;
            }

            let mep_vlan = if mep.vlan != 0 { mep.vlan } else { mep.ma_vlan };
            if mep_vlan == self.conf.control_vlan {
                debug_log!("ErpsManager", inst = self.inst, ring_port = %rp, mep = %key, "MEP shadows MIP");
                self.status.oper_warning = OperWarning::MepShadowsMip(rp);
                return false;
            }
        }
        true
    }

    /// Derives oper state and warning from this instance's own
    /// configuration and binds its ring ports to switch ports.
    pub(super) fn oper_state_update(&mut self, platform: &dyn ErpsPlatform, ports: &PortTable) {
        self.status.oper_state = OperState::Active;
        self.status.oper_warning = OperWarning::None;

        if !self.conf.admin_active {
            self.status.oper_state = OperState::AdminDisabled;
            return;
        }

        self.status.tx_raps_info.node_id = if self.conf.node_id.is_zero() {
            ports.chassis_mac
        } else {
            self.conf.node_id
        };
        self.status.tx_raps_info.version = self.conf.version.wire_value();

        for rp in RingPort::ALL {
            let state = &mut self.ring_port[rp.index()];
            state.binding.port_states = [None, None];
            state.binding.smac = MacAddress::ZERO;

            // Port1 of an interconnected sub-ring is bound to the connected
            // ring later.
            if !self.conf.using_ring_port_conf(rp) {
                continue;
            }

            let port_conf = &self.conf.ring_port_conf[rp.index()];
            let Some((port_no, entry)) = ports
                .by_ifindex(port_conf.ifindex)
                .and_then(|port_no| ports.get(port_no).map(|entry| (port_no, entry)))
            else {
                error_log!("ErpsManager", inst = self.inst, ring_port = %rp, ifindex = port_conf.ifindex, "ring port interface not found");
                self.status.oper_state = OperState::InternalError;
                return;
            };

            state.binding.port_states[0] = Some(port_no);
            state.binding.smac = if port_conf.smac.is_zero() {
                entry.mac
            } else {
                port_conf.smac
            };
        }

        if !self.control_vlan_membership_check(platform) || !self.control_vlan_tagged_check(ports) {
            return;
        }

        let used: Vec<RingPort> = self.used_ring_ports().collect();
        for rp in used {
            if self.conf.ring_port_conf[rp.index()].sf_trigger == SfTrigger::Mep && !self.mep_check(platform, rp) {
                return;
            }
            if !self.mep_shadow_check(platform, rp) {
                return;
            }
        }
    }

    /// Checks the connected ring of an active interconnected sub-ring and
    /// binds port1 to its ring ports when a virtual channel is used.
    pub(super) fn connected_ring_update(&mut self, peer: Option<&ErpsState>, chassis_mac: MacAddress) {
        let warning = match peer {
            None => Some(OperWarning::ConnectedRingDoesntExist),
            Some(peer) if peer.conf.ring_type == RingType::InterconnectedSub => {
                Some(OperWarning::ConnectedRingIsAnInterconnectedSubRing)
            }
            Some(peer) if !peer.is_active() => Some(OperWarning::ConnectedRingIsNotOperative),
            Some(peer) => {
                let ifindex = self.conf.ring_port_conf[0].ifindex;
                let peer_ports = &peer.conf.ring_port_conf;
                if ifindex == peer_ports[0].ifindex || ifindex == peer_ports[1].ifindex {
                    Some(OperWarning::ConnectedRingInterfaceConflict)
                } else if self.conf.virtual_channel && !peer.conf.protected_vlans.contains(self.conf.control_vlan) {
                    Some(OperWarning::ConnectedRingDoesntProtectControlVlan)
                } else {
                    None
                }
            }
        };

        if let Some(warning) = warning {
            self.status.oper_warning = warning;
            return;
        }

        let Some(peer) = peer else {
            return;
        };
        if !self.conf.virtual_channel {
            return;
        }

        let port_states: [Option<PortNo>; 2] =
            [peer.ring_port[0].binding.port_states[0], peer.ring_port[1].binding.port_states[0]];
        let smac = self.conf.ring_port_conf[1].smac;
        let binding = &mut self.ring_port[1].binding;
        binding.port_states = port_states;
        binding.smac = if smac.is_zero() { chassis_mac } else { smac };
    }

    /// Ring-wide parameters whose change takes a full deactivate/activate
    /// cycle.
    fn reactivation_needed(&self) -> bool {
        let (old, new) = (&self.old_conf, &self.conf);
        old.ring_port_conf[0].ifindex != new.ring_port_conf[0].ifindex
            || old.ring_port_conf[1].ifindex != new.ring_port_conf[1].ifindex
            || old.revertive != new.revertive
            || old.version != new.version
            || old.ring_type != new.ring_type
            || old.control_vlan != new.control_vlan
            || old.interconnect.connected_ring_inst != new.interconnect.connected_ring_inst
            || old.virtual_channel != new.virtual_channel
            || old.rpl_mode != new.rpl_mode
            || old.rpl_port != new.rpl_port
    }

    fn tx_content_changed(&self) -> bool {
        let (old, new) = (&self.old_conf, &self.conf);
        self.ring_port
            .iter()
            .any(|state| state.old_binding.smac != state.binding.smac)
            || old.level != new.level
            || old.ring_id != new.ring_id
            || old.node_id != new.node_id
            || old.pcp != new.pcp
    }

    /// Pushes narrow configuration changes into a running instance.
    fn incremental_update(&mut self, ctx: &mut EngineCtx<'_>) -> crate::Result<()> {
        // Covers MEG level and ring ID changes of the redirection rule.
        self.ace_update(ctx)?;

        if self.tx_content_changed() {
            self.raps_tx_frame_update(ctx, true);
        }

        if self.old_conf.protected_vlans != self.conf.protected_vlans {
            self.protected_vlans_update(ctx)?;
        }

        if self.conf.ring_type == RingType::InterconnectedSub && self.conf.virtual_channel {
            let port1 = &self.ring_port[RingPort::Port1.index()];
            if port1.old_binding.port_states != port1.binding.port_states {
                self.connected_ring_ports_update(ctx)?;
            }
        }

        let used: Vec<RingPort> = self.used_ring_ports().collect();
        for rp in used {
            self.sf_update(ctx, rp);
        }
        Ok(())
    }

    fn activate_with_current_sf(&mut self, ctx: &mut EngineCtx<'_>) {
        let sf = RingPort::ALL.map(|rp| self.sf_get(ctx, rp));
        match self.activate(ctx, sf) {
            Ok(()) => {
                audit_log!(AuditRecord::new(AuditCategory::ProtectionState, "ErpsManager", "activate")
                    .with_outcome(AuditOutcome::Success)
                    .with_object_id(self.inst.to_string())
                    .with_object_type("erps_instance")
                    .with_details(serde_json::json!({
                        "sf": sf,
                        "warning": self.status.oper_warning.to_string(),
                    })));
            }
            Err(e) => self.internal_error(e),
        }
    }

    fn internal_error(&mut self, e: ErpsError) {
        error_log!("ErpsManager", inst = self.inst, error = %e, "instance failed");
        self.status.oper_state = OperState::InternalError;
        audit_log!(AuditRecord::new(AuditCategory::ErrorCondition, "ErpsManager", "oper_state_apply")
            .with_object_id(self.inst.to_string())
            .with_object_type("erps_instance")
            .with_error(e.to_string()));
    }

    fn deactivate_logged(&mut self, ctx: &mut EngineCtx<'_>, use_old: bool) {
        let outcome = self.deactivate(ctx, use_old);
        let record = AuditRecord::new(AuditCategory::ProtectionState, "ErpsManager", "deactivate")
            .with_object_id(self.inst.to_string())
            .with_object_type("erps_instance");
        match outcome {
            Ok(()) => {
                audit_log!(record.with_outcome(AuditOutcome::Success));
            }
            Err(e) => {
                warn_log!("ErpsManager", inst = self.inst, error = %e, "deactivation incomplete");
                audit_log!(record.with_error(e.to_string()));
            }
        }
    }

    /// Applies the oper state derived by `oper_state_update` and
    /// `connected_ring_update` to the Base Engine.
    pub(super) fn oper_state_apply(&mut self, ctx: &mut EngineCtx<'_>) {
        let old = self.old_oper_state;
        let new = self.status.oper_state;

        if old != new || self.old_oper_warning != self.status.oper_warning {
            info_log!(
                "ErpsManager",
                inst = self.inst,
                from = %old,
                to = %new,
                warning = %self.status.oper_warning,
                "oper state"
            );
        }

        if old != new {
            if new == OperState::Active {
                self.activate_with_current_sf(ctx);
            } else if old == OperState::Active {
                self.deactivate_logged(ctx, true);
            }
        } else if new == OperState::Active {
            if self.reactivation_needed() {
                self.deactivate_logged(ctx, true);
                self.activate_with_current_sf(ctx);
            } else if let Err(e) = self.incremental_update(ctx) {
                self.internal_error(e);
                self.deactivate_logged(ctx, false);
            }
        }

        self.old_conf = self.conf.clone();
    }
}
