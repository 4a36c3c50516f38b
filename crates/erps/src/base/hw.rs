//! Hardware side of an instance: the R-APS redirection rule, ring port
//! blocking, protected VLANs, ingress filtering and (de)activation.

use super::types::Request;
use crate::error::{ErpsError, Result};
use crate::instance::{EngineCtx, ErpsState, PortBinding};
use crate::platform::{AceConf, PortForwardState};
use crate::types::{ErpsConf, RingType};
use crate::{debug_log, error_log, info_log};
use erps_types::{PortNo, RingPort};

/// Keeps the first error of a sequence of operations that all must run.
fn keep_first(first: &mut Result<()>, rc: Result<()>) {
    if first.is_ok() {
        *first = rc;
    }
}

impl ErpsState {
    fn ace_forwards_on(&self, rp: RingPort) -> bool {
        let blocked = self.status.ring_port_status[rp.index()].blocked;
        match self.conf.ring_type {
            RingType::Major => !blocked,
            RingType::Sub if self.conf.virtual_channel => !blocked,
            // Without a virtual channel R-APS must reach the other end of the
            // sub-ring unless this node detected the failure itself.
            RingType::Sub => {
                if matches!(self.top_request, Request::LocalSf | Request::LocalFs) {
                    !blocked
                } else {
                    true
                }
            }
            RingType::InterconnectedSub => self.conf.virtual_channel && !blocked,
        }
    }

    fn ace_conf_get(&self) -> AceConf {
        let mut ingress: Vec<PortNo> = self
            .ring_port
            .iter()
            .flat_map(|state| state.binding.port_states.iter().flatten().copied())
            .collect();
        ingress.sort();
        ingress.dedup();

        let forward = self.ace_forwards_on(RingPort::Port0) && self.ace_forwards_on(RingPort::Port1);
        let egress = if forward { ingress.clone() } else { Vec::new() };

        AceConf {
            ring_id: self.conf.ring_id,
            level: self.conf.level,
            control_vlan: self.conf.control_vlan,
            ingress,
            egress,
        }
    }

    /// Installs or updates the rule that hands R-APS PDUs to the CPU and
    /// hardware forwards them between unblocked ring ports.
    pub(crate) fn ace_update(&mut self, ctx: &mut EngineCtx<'_>) -> Result<()> {
        let conf = self.ace_conf_get();
        let id = match &self.ace {
            Some((_, installed)) if *installed == conf => return Ok(()),
            Some((id, _)) => {
                ctx.platform
                    .ace_update(*id, &conf)
                    .map_err(ErpsError::HwResources)?;
                *id
            }
            None => ctx.platform.ace_add(&conf).map_err(ErpsError::HwResources)?,
        };

        debug_log!(
            "ErpsBase",
            inst = self.inst,
            ace = id,
            ingress = ?conf.ingress,
            egress = ?conf.egress,
            "ACE updated"
        );
        self.ace = Some((id, conf));
        Ok(())
    }

    fn ace_add(&mut self, ctx: &mut EngineCtx<'_>) -> Result<()> {
        if let Some((id, _)) = self.ace {
            return Err(ErpsError::Internal(format!("ACE {} already installed", id)));
        }
        self.ace_update(ctx)
    }

    fn ace_remove(&mut self, ctx: &mut EngineCtx<'_>) -> Result<()> {
        let Some((id, _)) = self.ace.take() else {
            return Ok(());
        };
        ctx.platform.ace_remove(id).map_err(ErpsError::Internal)
    }

    fn port_state_set(&self, ctx: &EngineCtx<'_>, port_no: PortNo, state: PortForwardState) -> Result<()> {
        ctx.platform
            .port_state_set(self.inst, port_no, state)
            .map_err(ErpsError::Internal)
    }

    /// Blocks or unblocks a ring port. Without `enforce` the hardware is
    /// only touched when the blocked state changes.
    pub(crate) fn ring_port_block(&mut self, ctx: &mut EngineCtx<'_>, rp: RingPort, block: bool, enforce: bool) {
        let was_blocked = self.status.ring_port_status[rp.index()].blocked;
        self.status.ring_port_status[rp.index()].blocked = block;

        // The ACE egress list depends on the blocked state of both ports.
        if let Err(e) = self.ace_update(ctx) {
            error_log!("ErpsBase", inst = self.inst, error = %e, "ACE update failed");
        }

        if !enforce && was_blocked == block {
            return;
        }

        // Port1 of an interconnected sub-ring is a virtual port.
        if rp == RingPort::Port1 && self.conf.ring_type == RingType::InterconnectedSub {
            return;
        }

        let Some(port_no) = self.ring_port[rp.index()].binding.port_states[0] else {
            return;
        };

        let state = if block {
            PortForwardState::Discarding
        } else {
            PortForwardState::Forwarding
        };
        if let Err(e) = self.port_state_set(ctx, port_no, state) {
            error_log!("ErpsBase", inst = self.inst, port = %port_no, error = %e, "port state set failed");
        }

        if block {
            for state in self.ring_port.iter_mut() {
                state.rx_node_id_bpr = None;
            }
        }
    }

    fn conf_for(&self, use_old: bool) -> &ErpsConf {
        if use_old {
            &self.old_conf
        } else {
            &self.conf
        }
    }

    fn binding_for(&self, rp: RingPort, use_old: bool) -> &PortBinding {
        let state = &self.ring_port[rp.index()];
        if use_old {
            &state.old_binding
        } else {
            &state.binding
        }
    }

    /// Physical switch ports of the ring ports, under the old or the current
    /// configuration.
    fn ring_switch_ports(&self, use_old: bool) -> Vec<PortNo> {
        let conf = self.conf_for(use_old);
        RingPort::ALL
            .into_iter()
            .filter(|rp| conf.using_ring_port_conf(*rp))
            .filter_map(|rp| self.binding_for(rp, use_old).port_states[0])
            .collect()
    }

    /// Ring ports must not let protected VLAN frames in while blocked, so
    /// ingress filtering is enabled on them while the instance is active.
    /// Several instances may share a port, hence the reference count.
    fn vlan_ingress_filter_update(&mut self, ctx: &mut EngineCtx<'_>, enable: bool, use_old: bool) -> Result<()> {
        let mut first = Ok(());

        for port_no in self.ring_switch_ports(use_old) {
            let Some(entry) = ctx.ports.get_mut(port_no) else {
                keep_first(&mut first, Err(ErpsError::Internal(format!("port {} not found", port_no))));
                continue;
            };

            let call_platform = if enable {
                entry.ingress_refs += 1;
                entry.ingress_refs == 1
            } else {
                if entry.ingress_refs == 0 {
                    error_log!("ErpsBase", inst = self.inst, port = %port_no, "ingress filter ref count underflow");
                    keep_first(
                        &mut first,
                        Err(ErpsError::Internal(format!("ingress filter ref count underflow on port {}", port_no))),
                    );
                    continue;
                }
                entry.ingress_refs -= 1;
                entry.ingress_refs == 0
            };

            if !call_platform {
                continue;
            }

            let platform = ctx.platform;
            let rc = ctx
                .ports
                .events
                .configuring_vlan(|| platform.vlan_ingress_filter_set(port_no, enable))
                .map_err(ErpsError::Internal);
            keep_first(&mut first, rc);
        }

        first
    }

    fn protected_vlans_set(&self, ctx: &EngineCtx<'_>, conf: &ErpsConf, add: bool) -> Result<()> {
        let mut first = Ok(());
        for vid in conf.protected_vlans.iter() {
            let rc = ctx
                .platform
                .protected_vlan_set(self.inst, vid, add)
                .map_err(ErpsError::Internal);
            keep_first(&mut first, rc);
        }
        first
    }

    /// Applies the difference between the applied and the new protected
    /// VLANs.
    pub(crate) fn protected_vlans_update(&mut self, ctx: &mut EngineCtx<'_>) -> Result<()> {
        let mut first = Ok(());
        for vid in self.old_conf.protected_vlans.iter() {
            if !self.conf.protected_vlans.contains(vid.as_u16()) {
                let rc = ctx
                    .platform
                    .protected_vlan_set(self.inst, vid, false)
                    .map_err(ErpsError::Internal);
                keep_first(&mut first, rc);
            }
        }
        for vid in self.conf.protected_vlans.iter() {
            if !self.old_conf.protected_vlans.contains(vid.as_u16()) {
                let rc = ctx
                    .platform
                    .protected_vlan_set(self.inst, vid, true)
                    .map_err(ErpsError::Internal);
                keep_first(&mut first, rc);
            }
        }
        first
    }

    /// Ports that are not ring ports of this instance forward its protected
    /// VLANs. Ring ports start out discarding until the state machine decides.
    fn non_ring_ports_unblock(&self, ctx: &EngineCtx<'_>) -> Result<()> {
        let ring_ports = self.ring_switch_ports(false);
        for port_no in ctx.ports.entries.keys().copied() {
            let state = if ring_ports.contains(&port_no) {
                PortForwardState::Discarding
            } else {
                PortForwardState::Forwarding
            };
            self.port_state_set(ctx, port_no, state)?;
        }
        Ok(())
    }

    fn do_activate(&mut self, ctx: &mut EngineCtx<'_>, sf: [bool; 2]) -> Result<()> {
        self.state_clear(ctx);
        self.vlan_ingress_filter_update(ctx, true, false)?;
        self.non_ring_ports_unblock(ctx)?;
        let conf = self.conf.clone();
        self.protected_vlans_set(ctx, &conf, true)?;
        self.ace_add(ctx)?;
        self.raps_tx_frame_update(ctx, false);
        self.sf_set(ctx, RingPort::Port0, sf[0]);
        self.sf_set(ctx, RingPort::Port1, sf[1]);
        self.run_state_machine(ctx, None, false);
        Ok(())
    }

    /// Brings the instance into protocol operation with the given initial
    /// SF of the two ring ports. On failure everything is rolled back.
    pub(crate) fn activate(&mut self, ctx: &mut EngineCtx<'_>, sf: [bool; 2]) -> Result<()> {
        info_log!("ErpsBase", inst = self.inst, sf0 = sf[0], sf1 = sf[1], "activating");
        if let Err(e) = self.do_activate(ctx, sf) {
            error_log!("ErpsBase", inst = self.inst, error = %e, "activation failed");
            // The error of the rollback is less interesting than the cause.
            let _ = self.deactivate(ctx, false);
            return Err(e);
        }
        Ok(())
    }

    /// Takes the instance out of operation. With `use_old` the hardware is
    /// restored according to the previously applied configuration.
    pub(crate) fn deactivate(&mut self, ctx: &mut EngineCtx<'_>, use_old: bool) -> Result<()> {
        info_log!("ErpsBase", inst = self.inst, use_old, "deactivating");
        let mut first = Ok(());

        self.raps_deactivate(ctx);
        keep_first(&mut first, self.ace_remove(ctx));

        let conf = self.conf_for(use_old).clone();
        keep_first(&mut first, self.protected_vlans_set(ctx, &conf, false));

        for port_no in self.ring_switch_ports(use_old) {
            keep_first(&mut first, self.port_state_set(ctx, port_no, PortForwardState::Forwarding));
        }

        keep_first(&mut first, self.vlan_ingress_filter_update(ctx, false, use_old));
        self.state_clear(ctx);
        first
    }

    /// The switch ports of the connected ring changed under our virtual
    /// channel.
    pub(crate) fn connected_ring_ports_update(&mut self, ctx: &mut EngineCtx<'_>) -> Result<()> {
        self.ace_update(ctx)?;
        self.raps_tx_frame_update(ctx, true);
        Ok(())
    }
}
