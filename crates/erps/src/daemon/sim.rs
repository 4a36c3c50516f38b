//! Simulated switch for `erpsd` and the tests.
//!
//! [`SimPlatform`] keeps the hardware state the engine programs (port states
//! per protection group, protected VLANs, R-APS rules) and records the most
//! recent hardware calls and transmitted frames, so a test can inspect them
//! or feed frames to another node. Failures can be injected per operation.

use super::config::DaemonConfig;
use crate::debug_log;
use crate::manager::{EventQueue, SwitchEvent};
use crate::platform::{AceConf, AceId, ErpsPlatform, MepConf, PortForwardState, VlanPortConf};
use crate::types::MepKey;
use erps_types::{PortNo, VlanId};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A hardware call made by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimCall {
    AceAdd(AceId, AceConf),
    AceUpdate(AceId, AceConf),
    AceRemove(AceId),
    ProtectedVlan { inst: u32, vid: u16, member: bool },
    PortState { inst: u32, port: PortNo, state: PortForwardState },
    MacFlush { port: PortNo, vid: u16 },
    IngressFilter { port: PortNo, enable: bool },
}

/// Recorded calls and frames kept before the oldest are dropped.
pub const RECORD_CAP: usize = 4096;

#[derive(Debug, Default)]
struct SimState {
    members: BTreeMap<u16, Vec<PortNo>>,
    meps: BTreeMap<MepKey, (MepConf, bool)>,
    shared_meg_level: bool,
    fail_ace_add: bool,
    next_ace: AceId,
    aces: BTreeMap<AceId, AceConf>,
    port_states: BTreeMap<(u32, PortNo), PortForwardState>,
    protected: BTreeMap<u32, BTreeSet<u16>>,
    ingress_filter: BTreeSet<PortNo>,
    vlan_port_conf: BTreeMap<PortNo, VlanPortConf>,
    events: Option<EventQueue>,
    calls: VecDeque<SimCall>,
    tx: VecDeque<(PortNo, Vec<u8>)>,
    dropped: u64,
}

impl SimState {
    fn keep<T>(records: &mut VecDeque<T>, dropped: &mut u64, item: T) {
        if records.len() == RECORD_CAP {
            records.pop_front();
            *dropped += 1;
        }
        records.push_back(item);
    }
}

#[derive(Debug, Default)]
pub struct SimPlatform {
    state: Mutex<SimState>,
}

impl SimPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Platform preloaded with the VLAN members and MEPs of `config`.
    pub fn from_config(config: &DaemonConfig) -> Self {
        let platform = Self::new();
        {
            let mut state = platform.lock();
            state.members = config.control_vlan_members.clone();
            for mep in &config.meps {
                state.meps.insert(mep.key.clone(), (mep.conf.clone(), mep.ok));
            }
        }
        platform
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // The state stays consistent even if a holder panicked.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: SimCall) {
        debug_log!("SimPlatform", call = ?call, "hardware call");
        let mut state = self.lock();
        let SimState { calls, dropped, .. } = &mut *state;
        SimState::keep(calls, dropped, call);
    }

    /// Delivers switch events to `queue`. Changing ingress filtering on a
    /// port reports the port's VLAN configuration back through it, the way
    /// the VLAN module does.
    pub fn attach_events(&self, queue: EventQueue) {
        self.lock().events = Some(queue);
    }

    pub fn set_vlan_port_conf(&self, port: PortNo, conf: VlanPortConf) {
        self.lock().vlan_port_conf.insert(port, conf);
    }

    pub fn set_members(&self, vid: u16, ports: &[PortNo]) {
        self.lock().members.insert(vid, ports.to_vec());
    }

    pub fn set_mep(&self, key: MepKey, conf: MepConf, ok: bool) {
        self.lock().meps.insert(key, (conf, ok));
    }

    pub fn set_shared_meg_level(&self, shared: bool) {
        self.lock().shared_meg_level = shared;
    }

    /// Makes R-APS rule installation fail, as when the ACL is full.
    pub fn set_fail_ace_add(&self, fail: bool) {
        self.lock().fail_ace_add = fail;
    }

    /// Hardware calls since the last take, oldest first.
    pub fn take_calls(&self) -> Vec<SimCall> {
        self.lock().calls.drain(..).collect()
    }

    /// Frames transmitted since the last take, in order.
    pub fn take_tx(&self) -> Vec<(PortNo, Vec<u8>)> {
        self.lock().tx.drain(..).collect()
    }

    /// Calls and frames dropped because nobody took them in time.
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    pub fn port_state(&self, inst: u32, port: PortNo) -> Option<PortForwardState> {
        self.lock().port_states.get(&(inst, port)).copied()
    }

    pub fn protected_vlans(&self, inst: u32) -> Vec<u16> {
        self.lock()
            .protected
            .get(&inst)
            .map(|vids| vids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn aces(&self) -> Vec<(AceId, AceConf)> {
        self.lock()
            .aces
            .iter()
            .map(|(id, conf)| (*id, conf.clone()))
            .collect()
    }

    pub fn ingress_filtered(&self, port: PortNo) -> bool {
        self.lock().ingress_filter.contains(&port)
    }
}

impl ErpsPlatform for SimPlatform {
    fn vlan_port_members(&self, vid: VlanId) -> Result<Vec<PortNo>, String> {
        Ok(self.lock().members.get(&vid.as_u16()).cloned().unwrap_or_default())
    }

    fn mep_conf(&self, key: &MepKey) -> Result<MepConf, String> {
        self.lock()
            .meps
            .get(key)
            .map(|(conf, _)| conf.clone())
            .ok_or_else(|| format!("MEP {} not found", key))
    }

    fn mep_list(&self) -> Result<Vec<(MepKey, MepConf)>, String> {
        Ok(self
            .lock()
            .meps
            .iter()
            .map(|(key, (conf, _))| (key.clone(), conf.clone()))
            .collect())
    }

    fn mep_ok(&self, key: &MepKey) -> Result<bool, String> {
        self.lock()
            .meps
            .get(key)
            .map(|(_, ok)| *ok)
            .ok_or_else(|| format!("MEP {} not found", key))
    }

    fn has_shared_meg_level(&self) -> Result<bool, String> {
        Ok(self.lock().shared_meg_level)
    }

    fn ace_add(&self, conf: &AceConf) -> Result<AceId, String> {
        let id = {
            let mut state = self.lock();
            if state.fail_ace_add {
                return Err("ACL table full".to_string());
            }
            state.next_ace += 1;
            let id = state.next_ace;
            state.aces.insert(id, conf.clone());
            id
        };
        self.record(SimCall::AceAdd(id, conf.clone()));
        Ok(id)
    }

    fn ace_update(&self, id: AceId, conf: &AceConf) -> Result<(), String> {
        {
            let mut state = self.lock();
            let Some(installed) = state.aces.get_mut(&id) else {
                return Err(format!("ACE {} not found", id));
            };
            *installed = conf.clone();
        }
        self.record(SimCall::AceUpdate(id, conf.clone()));
        Ok(())
    }

    fn ace_remove(&self, id: AceId) -> Result<(), String> {
        if self.lock().aces.remove(&id).is_none() {
            return Err(format!("ACE {} not found", id));
        }
        self.record(SimCall::AceRemove(id));
        Ok(())
    }

    fn protected_vlan_set(&self, inst: u32, vid: VlanId, member: bool) -> Result<(), String> {
        {
            let mut state = self.lock();
            let vids = state.protected.entry(inst).or_default();
            if member {
                vids.insert(vid.as_u16());
            } else {
                vids.remove(&vid.as_u16());
            }
        }
        self.record(SimCall::ProtectedVlan {
            inst,
            vid: vid.as_u16(),
            member,
        });
        Ok(())
    }

    fn port_state_set(&self, inst: u32, port: PortNo, state: PortForwardState) -> Result<(), String> {
        self.lock().port_states.insert((inst, port), state);
        self.record(SimCall::PortState { inst, port, state });
        Ok(())
    }

    fn mac_flush(&self, port: PortNo, vid: VlanId) -> Result<(), String> {
        self.record(SimCall::MacFlush {
            port,
            vid: vid.as_u16(),
        });
        Ok(())
    }

    fn vlan_ingress_filter_set(&self, port: PortNo, enable: bool) -> Result<(), String> {
        let echo = {
            let mut state = self.lock();
            if enable {
                state.ingress_filter.insert(port);
            } else {
                state.ingress_filter.remove(&port);
            }
            let conf = state.vlan_port_conf.get(&port).copied().unwrap_or_default();
            state.events.clone().map(|queue| (queue, conf))
        };
        self.record(SimCall::IngressFilter { port, enable });
        if let Some((queue, conf)) = echo {
            queue.push(SwitchEvent::VlanPortConf { port, conf });
        }
        Ok(())
    }

    fn frame_tx(&self, port: PortNo, frame: &[u8]) -> Result<(), String> {
        let mut state = self.lock();
        let SimState { tx, dropped, .. } = &mut *state;
        SimState::keep(tx, dropped, (port, frame.to_vec()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::MepConfig;

    fn ace(ring_id: u8) -> AceConf {
        AceConf {
            ring_id,
            level: 7,
            control_vlan: 100,
            ingress: vec![PortNo::new(0), PortNo::new(1)],
            egress: Vec::new(),
        }
    }

    #[test]
    fn test_ace_lifecycle() {
        let platform = SimPlatform::new();
        let id = platform.ace_add(&ace(1)).unwrap();
        platform.ace_update(id, &ace(2)).unwrap();
        assert_eq!(platform.aces(), vec![(id, ace(2))]);

        platform.ace_remove(id).unwrap();
        assert!(platform.aces().is_empty());
        assert!(platform.ace_remove(id).is_err());
        assert!(platform.ace_update(id, &ace(1)).is_err());

        platform.set_fail_ace_add(true);
        assert!(platform.ace_add(&ace(1)).is_err());
        assert_eq!(platform.take_calls().len(), 3);
    }

    #[test]
    fn test_hardware_state_tracking() {
        let platform = SimPlatform::new();
        let vid = VlanId::new(10).unwrap();
        platform.protected_vlan_set(1, vid, true).unwrap();
        platform
            .port_state_set(1, PortNo::new(2), PortForwardState::Discarding)
            .unwrap();
        platform.vlan_ingress_filter_set(PortNo::new(2), true).unwrap();

        assert_eq!(platform.protected_vlans(1), vec![10]);
        assert_eq!(platform.port_state(1, PortNo::new(2)), Some(PortForwardState::Discarding));
        assert_eq!(platform.port_state(2, PortNo::new(2)), None);
        assert!(platform.ingress_filtered(PortNo::new(2)));

        platform.protected_vlan_set(1, vid, false).unwrap();
        assert!(platform.protected_vlans(1).is_empty());
    }

    #[test]
    fn test_records_are_bounded() {
        let platform = SimPlatform::new();
        for n in 0..RECORD_CAP + 10 {
            platform.frame_tx(PortNo::new(0), &[n as u8]).unwrap();
        }

        let tx = platform.take_tx();
        assert_eq!(tx.len(), RECORD_CAP);
        assert_eq!(tx[0].1, vec![10u8]);
        assert_eq!(platform.dropped(), 10);
        assert!(platform.take_tx().is_empty());
    }

    #[test]
    fn test_ingress_filter_reports_port_conf() {
        let platform = SimPlatform::new();
        let queue = EventQueue::new();
        platform.attach_events(queue.clone());
        let conf = VlanPortConf {
            pvid: 5,
            ..Default::default()
        };
        platform.set_vlan_port_conf(PortNo::new(1), conf);

        platform.vlan_ingress_filter_set(PortNo::new(1), true).unwrap();
        assert_eq!(
            queue.pop(),
            Some(SwitchEvent::VlanPortConf {
                port: PortNo::new(1),
                conf
            })
        );
    }

    #[test]
    fn test_config_preload() {
        let mut config = DaemonConfig::default();
        config.control_vlan_members.insert(100, vec![PortNo::new(0)]);
        config.meps.push(MepConfig {
            key: MepKey::new("md", "ma", 3),
            conf: MepConf::default(),
            ok: false,
        });

        let platform = SimPlatform::from_config(&config);
        let members = platform.vlan_port_members(VlanId::new(100).unwrap()).unwrap();
        assert_eq!(members, vec![PortNo::new(0)]);
        assert_eq!(platform.mep_ok(&MepKey::new("md", "ma", 3)), Ok(false));
        assert!(platform.mep_conf(&MepKey::new("md", "ma", 4)).is_err());
    }
}
