//! Instance Manager.
//!
//! [`Registry`] owns every ERPS instance together with the port table and the
//! timer engine. It validates configuration, derives each instance's
//! operational state from the platform and hands protocol events to the Base
//! Engine. Nothing in here is thread safe on its own; the daemon serializes
//! access behind one lock.

mod event;
mod oper;
mod validate;

pub use event::{EventQueue, SwitchEvent};

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::base::HistoryEntry;
use crate::error::{ErpsError, Result};
use crate::instance::{EngineCtx, ErpsState, PortTable};
use crate::platform::{AceConf, AceId, ErpsPlatform, PortInfo, VlanPortConf, VlanPortType};
use crate::raps::RapsFrame;
use crate::timer::{TimerEngine, TimerEvent};
use crate::types::{Capabilities, Command, ErpsConf, ErpsStatus, MepKey, OperState, OperWarning, RingType, SfTrigger};
use crate::{audit_log, debug_log, info_log, warn_log};
use erps_types::{MacAddress, PortNo, RingPort};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;
use std::sync::Arc;

/// Startup phase of the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    /// No port table yet.
    #[default]
    Uninitialized,
    /// Ports are known and configuration is accepted, but nothing is
    /// activated.
    Loading,
    Running,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Uninitialized => "uninitialized",
            Phase::Loading => "loading",
            Phase::Running => "running",
        };
        write!(f, "{}", s)
    }
}

/// All ERPS instances of a switch.
pub struct Registry {
    platform: Arc<dyn ErpsPlatform>,
    capabilities: Capabilities,
    phase: Phase,
    timers: TimerEngine<TimerEvent>,
    ports: PortTable,
    instances: BTreeMap<u32, ErpsState>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("phase", &self.phase)
            .field("capabilities", &self.capabilities)
            .field("instances", &self.instances.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Registry {
    pub fn new(platform: Arc<dyn ErpsPlatform>, chassis_mac: MacAddress) -> Self {
        Self {
            platform,
            capabilities: Capabilities::default(),
            phase: Phase::Uninitialized,
            timers: TimerEngine::new(),
            ports: PortTable::new(chassis_mac),
            instances: BTreeMap::new(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Loads the switch ports. Configuration is accepted from here on.
    pub fn load(&mut self, ports: impl IntoIterator<Item = (PortNo, PortInfo)>) {
        self.ports.load(ports);
        self.phase = Phase::Loading;
        info_log!("ErpsManager", ports = self.ports.entries.len(), "port table loaded");
    }

    /// Starts protocol operation of every configured instance.
    pub fn start(&mut self, now_ms: u64) {
        self.timers.set_now(now_ms);
        self.phase = Phase::Running;
        info_log!("ErpsManager", instances = self.instances.len(), "starting");
        self.recompute_all();

        audit_log!(AuditRecord::new(AuditCategory::SystemLifecycle, "ErpsManager", "start")
            .with_outcome(AuditOutcome::Success)
            .with_details(serde_json::json!({
                "instances": self.instances.len(),
                "active": self.instances.values().filter(|state| state.is_active()).count(),
            })));
    }

    /// Takes every active instance out of operation and restores forwarding
    /// on its ring ports. `start` brings them back.
    pub fn shutdown(&mut self) {
        let active: Vec<u32> = self.active_instances(|_| true);
        for inst in active.iter().copied() {
            self.with_instance(inst, |state, ctx| {
                if let Err(e) = state.deactivate(ctx, false) {
                    warn_log!("ErpsManager", inst, error = %e, "deactivation incomplete");
                }
                state.status.oper_state = OperState::AdminDisabled;
            });
        }
        self.phase = Phase::Loading;

        audit_log!(AuditRecord::new(AuditCategory::SystemLifecycle, "ErpsManager", "shutdown")
            .with_outcome(AuditOutcome::Success)
            .with_details(serde_json::json!({ "deactivated": active })));
    }

    /// Fires every timer due at `now_ms`, in deadline order.
    pub fn run_timers(&mut self, now_ms: u64) {
        while let Some(event) = self.timers.next_expired(now_ms) {
            if self
                .with_instance(event.inst, |state, ctx| state.timeout(ctx, event.kind))
                .is_none()
            {
                debug_log!("ErpsManager", inst = event.inst, kind = ?event.kind, "timer of unknown instance");
            }
        }
        self.timers.set_now(now_ms);
    }

    /// Brings the clock to the time of an event. Timers due by then fire
    /// first, so the event arms its own timers from `now_ms`.
    fn advance_to(&mut self, now_ms: u64) {
        self.run_timers(now_ms);
    }

    /// The inbox the platform pushes switch events into.
    pub fn event_queue(&self) -> EventQueue {
        self.ports.events.clone()
    }

    /// Delivers every queued switch event at `now_ms`. Returns how many were
    /// handled.
    pub fn process_events(&mut self, now_ms: u64) -> usize {
        let mut handled = 0;
        while let Some(event) = self.ports.events.pop() {
            match event {
                SwitchEvent::Link { port, up } => self.port_link_change(port, up, now_ms),
                SwitchEvent::VlanPortConf { port, conf } => self.vlan_port_conf_change(port, conf, now_ms),
                SwitchEvent::VlanMembership { vid } => self.vlan_membership_change(vid, now_ms),
                SwitchEvent::CustomTpid { tpid } => self.custom_tpid_change(tpid, now_ms),
                SwitchEvent::Mep { key } => self.mep_change(&key, now_ms),
                SwitchEvent::CfmConf => self.cfm_conf_change(now_ms),
            }
            handled += 1;
        }
        handled
    }

    /// Earliest pending timer deadline.
    pub fn next_deadline(&self) -> Option<u64> {
        self.timers.next_deadline()
    }

    pub fn now_ms(&self) -> u64 {
        self.timers.now_ms()
    }

    /// Runs `f` on one instance with every other instance visible as a peer.
    fn with_instance<R>(
        &mut self,
        inst: u32,
        f: impl FnOnce(&mut ErpsState, &mut EngineCtx<'_>) -> R,
    ) -> Option<R> {
        let mut state = self.instances.remove(&inst)?;
        let mut ctx = EngineCtx {
            platform: &*self.platform,
            timers: &mut self.timers,
            ports: &mut self.ports,
            peers: &mut self.instances,
        };
        let result = f(&mut state, &mut ctx);
        self.instances.insert(inst, state);
        Some(result)
    }

    fn active_instances(&self, filter: impl Fn(&ErpsState) -> bool) -> Vec<u32> {
        self.instances
            .iter()
            .filter(|(_, state)| state.is_active() && filter(state))
            .map(|(inst, _)| *inst)
            .collect()
    }

    /// Re-derives the oper state of all instances and applies the changes.
    ///
    /// Connected-ring checks of interconnected sub-rings need the port
    /// bindings of every instance, so they run in a second pass.
    fn recompute_all(&mut self) {
        if self.phase != Phase::Running {
            return;
        }

        let platform = &*self.platform;
        for state in self.instances.values_mut() {
            state.old_oper_state = state.status.oper_state;
            state.old_oper_warning = state.status.oper_warning;
            for port in state.ring_port.iter_mut() {
                port.old_binding = port.binding;
            }
            state.oper_state_update(platform, &self.ports);
        }

        let chassis_mac = self.ports.chassis_mac;
        let sub_rings = self.active_instances(|state| {
            state.conf.ring_type == RingType::InterconnectedSub && state.status.oper_warning == OperWarning::None
        });
        for inst in sub_rings {
            let Some(mut state) = self.instances.remove(&inst) else {
                continue;
            };
            let peer = self.instances.get(&state.conf.interconnect.connected_ring_inst);
            state.connected_ring_update(peer, chassis_mac);
            self.instances.insert(inst, state);
        }

        let all: Vec<u32> = self.instances.keys().copied().collect();
        for inst in all {
            self.with_instance(inst, |state, ctx| state.oper_state_apply(ctx));
        }
    }

    fn conf_update(&mut self, inst: u32, conf: ErpsConf) {
        match self.instances.get_mut(&inst) {
            Some(state) => state.conf = conf,
            None => {
                let state = ErpsState::new(inst, conf, &mut self.timers);
                self.instances.insert(inst, state);
            }
        }
        self.recompute_all();
    }

    fn instance(&self, inst: u32) -> Result<&ErpsState> {
        validate::inst_check(inst, &self.capabilities)?;
        self.instances.get(&inst).ok_or(ErpsError::NoSuchInstance(inst))
    }

    fn instance_mut(&mut self, inst: u32) -> Result<&mut ErpsState> {
        validate::inst_check(inst, &self.capabilities)?;
        self.instances.get_mut(&inst).ok_or(ErpsError::NoSuchInstance(inst))
    }

    pub fn capabilities_get(&self) -> Capabilities {
        self.capabilities
    }

    /// Default configuration with both ring ports on the first switch port.
    pub fn conf_default_get(&self) -> ErpsConf {
        let mut conf = ErpsConf::default();
        let ifindex = self.ports.first_ifindex();
        for port_conf in conf.ring_port_conf.iter_mut() {
            port_conf.ifindex = ifindex;
        }
        conf
    }

    pub fn conf_get(&self, inst: u32) -> Result<ErpsConf> {
        self.instance(inst).map(|state| state.conf.clone())
    }

    fn do_conf_set(&mut self, inst: u32, conf: &ErpsConf) -> Result<Option<bool>> {
        validate::inst_check(inst, &self.capabilities)?;
        validate::conf_check(inst, conf, &self.capabilities, &self.ports)?;

        let mut conf = conf.clone();
        validate::normalize(&mut conf);

        let existing = self.instances.get(&inst);
        if existing.is_some_and(|state| state.conf == conf) {
            return Ok(None);
        }
        let created = existing.is_none();
        if created && self.instances.len() >= self.capabilities.inst_cnt_max as usize {
            return Err(ErpsError::LimitReached);
        }
        validate::cross_check(inst, &conf, &self.instances)?;

        self.conf_update(inst, conf);
        Ok(Some(created))
    }

    /// Creates or changes an instance. Nothing is stored unless every check
    /// passes.
    pub fn conf_set(&mut self, inst: u32, conf: &ErpsConf, now_ms: u64) -> Result<()> {
        self.advance_to(now_ms);
        let result = self.do_conf_set(inst, conf);

        let (category, action) = match result {
            Ok(Some(true)) => (AuditCategory::ResourceCreate, "conf_create"),
            _ => (AuditCategory::ConfigurationChange, "conf_set"),
        };
        let record = AuditRecord::new(category, "ErpsManager", action)
            .with_object_id(inst.to_string())
            .with_object_type("erps_instance");

        match &result {
            Ok(None) => debug_log!("ErpsManager", inst, "configuration unchanged"),
            Ok(Some(_)) => {
                let status = self.instances.get(&inst).map(|state| state.status.oper_state);
                audit_log!(record
                    .with_outcome(AuditOutcome::Success)
                    .with_details(serde_json::json!({
                        "admin_active": conf.admin_active,
                        "ring_type": conf.ring_type,
                        "control_vlan": conf.control_vlan,
                        "protected_vlans": conf.protected_vlans.to_string(),
                        "oper_state": status,
                    })));
            }
            Err(e) => {
                audit_log!(record.with_outcome(AuditOutcome::Denied).with_error(e.to_string()));
            }
        }

        result.map(|_| ())
    }

    /// Deletes an instance, deactivating it first.
    pub fn conf_del(&mut self, inst: u32, now_ms: u64) -> Result<()> {
        self.advance_to(now_ms);
        let conf = self.instance(inst)?.conf.clone();

        if conf.admin_active {
            self.conf_update(
                inst,
                ErpsConf {
                    admin_active: false,
                    ..conf
                },
            );
        }

        if let Some(state) = self.instances.remove(&inst) {
            state.timers.release(&mut self.timers);
        }
        // Sub-rings that used this instance as connected ring notice it's gone.
        self.recompute_all();

        audit_log!(AuditRecord::new(AuditCategory::ResourceDelete, "ErpsManager", "conf_del")
            .with_outcome(AuditOutcome::Success)
            .with_object_id(inst.to_string())
            .with_object_type("erps_instance"));
        Ok(())
    }

    /// Next configured instance after `prev`, or the first one.
    pub fn itr(&self, prev: Option<u32>) -> Option<u32> {
        let lower = prev.map_or(Bound::Unbounded, Bound::Excluded);
        self.instances
            .range((lower, Bound::Unbounded))
            .next()
            .map(|(inst, _)| *inst)
    }

    pub fn control_get(&self, inst: u32) -> Result<Command> {
        self.instance(inst).map(|state| state.command)
    }

    fn control_check(&self, inst: u32, command: Command) -> Result<bool> {
        validate::inst_check(inst, &self.capabilities)?;
        if command == Command::Nr {
            return Err(ErpsError::InvalidCommand);
        }
        let state = self.instances.get(&inst).ok_or(ErpsError::NoSuchInstance(inst))?;
        if !state.conf.admin_active {
            return Err(ErpsError::NotActive);
        }
        if state.command == command {
            return Ok(false);
        }
        if self.phase != Phase::Running {
            return Err(ErpsError::NotReadyTryAgain);
        }
        if state.conf.version == crate::types::Version::V1
            && (command.is_forced_switch() || command.is_manual_switch())
        {
            return Err(ErpsError::CommandNotSupportedWhenUsingV1);
        }
        if !state.is_active() {
            return Err(ErpsError::NotActive);
        }
        Ok(true)
    }

    /// Applies an operator command (forced/manual switch or clear).
    pub fn control_set(&mut self, inst: u32, command: Command, now_ms: u64) -> Result<()> {
        self.advance_to(now_ms);
        let record = AuditRecord::new(AuditCategory::AdminAction, "ErpsManager", "control_set")
            .with_object_id(inst.to_string())
            .with_object_type("erps_instance")
            .with_details(serde_json::json!({ "command": command.to_string() }));

        match self.control_check(inst, command) {
            Ok(false) => Ok(()),
            Ok(true) => {
                self.with_instance(inst, |state, ctx| state.command_set(ctx, command));
                audit_log!(record.with_outcome(AuditOutcome::Success));
                Ok(())
            }
            Err(e) => {
                audit_log!(record.with_outcome(AuditOutcome::Denied).with_error(e.to_string()));
                Err(e)
            }
        }
    }

    pub fn status_get(&self, inst: u32) -> Result<ErpsStatus> {
        self.instance(inst).map(|state| state.status.clone())
    }

    pub fn statistics_clear(&mut self, inst: u32) -> Result<()> {
        self.instance_mut(inst)?.statistics_clear();
        Ok(())
    }

    /// State machine history, oldest first.
    pub fn history_get(&self, inst: u32) -> Result<Vec<HistoryEntry>> {
        self.instance(inst).map(|state| state.history.iter().cloned().collect())
    }

    pub fn history_clear(&mut self, inst: u32) -> Result<()> {
        self.instance_mut(inst)?.history_clear();
        Ok(())
    }

    /// The R-APS redirection rule installed for an instance, if any.
    pub fn rule_get(&self, inst: u32) -> Result<Option<(AceId, AceConf)>> {
        self.instance(inst).map(|state| state.ace.clone())
    }

    /// Link state of a switch port changed.
    pub fn port_link_change(&mut self, port: PortNo, link: bool, now_ms: u64) {
        self.advance_to(now_ms);
        let Some(entry) = self.ports.get_mut(port) else {
            warn_log!("ErpsManager", port = %port, "link change on unknown port");
            return;
        };
        if entry.link == link {
            return;
        }
        entry.link = link;
        debug_log!("ErpsManager", port = %port, link, "link change");

        if self.phase != Phase::Running {
            return;
        }

        for inst in self.active_instances(|state| state.ring_port_for(port).is_some()) {
            self.with_instance(inst, |state, ctx| {
                for rp in RingPort::ALL {
                    if !state.ring_port_conf_used(rp) || state.ring_port[rp.index()].binding.port_states[0] != Some(port) {
                        continue;
                    }
                    // Link down always raises SF. Clearing it is up to the
                    // MEP when one is in use.
                    if !link || state.sf_trigger_get(rp) == SfTrigger::Link {
                        state.sf_set(ctx, rp, !link);
                    }
                }
            });
        }
    }

    /// VLAN configuration of a switch port changed.
    pub fn vlan_port_conf_change(&mut self, port: PortNo, conf: VlanPortConf, now_ms: u64) {
        self.advance_to(now_ms);
        let custom_tpid = self.ports.custom_tpid;
        let Some(entry) = self.ports.get_mut(port) else {
            warn_log!("ErpsManager", port = %port, "VLAN change on unknown port");
            return;
        };

        let old = entry.vlan_conf;
        let tagging_changed =
            old.pvid != conf.pvid || old.untagged_vid != conf.untagged_vid || old.tx_tag_type != conf.tx_tag_type;
        let tpid = conf.tpid(custom_tpid);
        let tpid_changed = entry.tpid != tpid;
        entry.vlan_conf = conf;
        entry.tpid = tpid;

        if self.phase != Phase::Running {
            return;
        }

        if tpid_changed {
            debug_log!("ErpsManager", port = %port, tpid = format!("{:#06x}", tpid), "TPID change");
            self.tx_frames_refresh(&[port]);
        }

        if tagging_changed {
            for inst in self.active_instances(|state| state.ring_port_for(port).is_some()) {
                if let Some(state) = self.instances.get_mut(&inst) {
                    let old_warning = state.status.oper_warning;
                    state.control_vlan_tagged_check(&self.ports);
                    warning_log(state, old_warning);
                }
            }
        }
    }

    /// TPID used on S-custom ports changed.
    pub fn custom_tpid_change(&mut self, tpid: u16, now_ms: u64) {
        self.advance_to(now_ms);
        if self.ports.custom_tpid == tpid {
            return;
        }
        self.ports.custom_tpid = tpid;

        let mut changed = Vec::new();
        for (port_no, entry) in self.ports.entries.iter_mut() {
            if entry.vlan_conf.port_type == VlanPortType::SCustom && entry.tpid != tpid {
                entry.tpid = tpid;
                changed.push(*port_no);
            }
        }

        if self.phase == Phase::Running && !changed.is_empty() {
            self.tx_frames_refresh(&changed);
        }
    }

    /// Regenerates and resends the Tx PDUs of active instances using any of
    /// `ports`.
    fn tx_frames_refresh(&mut self, ports: &[PortNo]) {
        let users = self.active_instances(|state| ports.iter().any(|port| state.ring_port_for(*port).is_some()));
        for inst in users {
            self.with_instance(inst, |state, ctx| state.raps_tx_frame_update(ctx, true));
        }
    }

    /// Port membership of `vid` changed.
    pub fn vlan_membership_change(&mut self, vid: u16, now_ms: u64) {
        self.advance_to(now_ms);
        if self.phase != Phase::Running {
            return;
        }

        let platform = &*self.platform;
        for state in self.instances.values_mut() {
            if !state.is_active() || state.conf.control_vlan != vid {
                continue;
            }
            let old_warning = state.status.oper_warning;
            state.control_vlan_membership_check(platform);
            warning_log(state, old_warning);
        }
    }

    /// Defect state of a MEP changed.
    pub fn mep_change(&mut self, key: &MepKey, now_ms: u64) {
        self.advance_to(now_ms);
        if self.phase != Phase::Running {
            return;
        }

        let users = self.active_instances(|state| {
            RingPort::ALL.into_iter().any(|rp| mep_used(state, rp, key))
        });
        for inst in users {
            self.with_instance(inst, |state, ctx| {
                for rp in RingPort::ALL {
                    if mep_used(state, rp, key) {
                        state.sf_update(ctx, rp);
                    }
                }
            });
        }
    }

    /// MEPs were added, removed or reconfigured.
    pub fn cfm_conf_change(&mut self, now_ms: u64) {
        self.advance_to(now_ms);
        self.recompute_all();
    }

    /// Hands a received R-APS PDU to the instance it belongs to. Returns
    /// false if the frame is not R-APS or no active instance claims it.
    pub fn rx_frame(&mut self, port: PortNo, vid: u16, frame: &[u8], now_ms: u64) -> bool {
        self.advance_to(now_ms);
        if self.phase != Phase::Running {
            return false;
        }

        // Other CFM PDUs belong to someone else.
        let Some(ring_id) = RapsFrame::classify(frame) else {
            return false;
        };

        let target = self.instances.iter().find_map(|(inst, state)| {
            if !state.is_active() || state.conf.control_vlan != vid || state.conf.ring_id != ring_id {
                return None;
            }
            state.ring_port_for(port).map(|rp| (*inst, rp))
        });

        match target {
            Some((inst, rp)) => {
                self.with_instance(inst, |state, ctx| state.rx_frame(ctx, rp, frame));
                true
            }
            None => {
                debug_log!("ErpsManager", port = %port, vid, ring_id, "R-APS PDU not claimed");
                false
            }
        }
    }
}

fn mep_used(state: &ErpsState, rp: RingPort, key: &MepKey) -> bool {
    let port_conf = &state.conf.ring_port_conf[rp.index()];
    state.ring_port_conf_used(rp) && port_conf.sf_trigger == SfTrigger::Mep && port_conf.mep == *key
}

fn warning_log(state: &ErpsState, old: OperWarning) {
    if state.status.oper_warning != old {
        info_log!(
            "ErpsManager",
            inst = state.inst,
            from = %old,
            to = %state.status.oper_warning,
            "oper warning"
        );
    }
}
