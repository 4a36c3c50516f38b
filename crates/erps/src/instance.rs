//! Per-instance runtime state and the switch port table it binds to.

use crate::base::{HistoryEntry, NodeIdBpr, Request};
use crate::manager::EventQueue;
use crate::platform::{AceConf, AceId, ErpsPlatform, PortInfo, VlanPortConf};
use crate::timer::{TimerEngine, TimerEvent, TimerHandle, TimerKind};
use crate::types::{Command, ErpsConf, ErpsStatus, OperState, OperWarning};
use erps_types::{MacAddress, PortNo, RingPort};
use std::collections::{BTreeMap, VecDeque};

/// Default TPID of S-custom ports until told otherwise.
pub(crate) const DEFAULT_CUSTOM_TPID: u16 = 0x88a8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PortEntry {
    pub ifindex: u32,
    pub mac: MacAddress,
    pub link: bool,
    pub vlan_conf: VlanPortConf,
    /// TPID currently used for R-APS PDUs sent on this port.
    pub tpid: u16,
    /// Number of active instances that need ingress filtering on this port.
    pub ingress_refs: u32,
}

/// Switch-wide port table shared by all instances.
#[derive(Debug, Clone)]
pub(crate) struct PortTable {
    pub entries: BTreeMap<PortNo, PortEntry>,
    pub custom_tpid: u16,
    pub chassis_mac: MacAddress,
    /// Switch events raised by the platform.
    pub events: EventQueue,
}

impl PortTable {
    pub fn new(chassis_mac: MacAddress) -> Self {
        Self {
            entries: BTreeMap::new(),
            custom_tpid: DEFAULT_CUSTOM_TPID,
            chassis_mac,
            events: EventQueue::new(),
        }
    }

    pub fn load(&mut self, ports: impl IntoIterator<Item = (PortNo, PortInfo)>) {
        for (port_no, info) in ports {
            let tpid = info.vlan_conf.tpid(self.custom_tpid);
            self.entries.insert(
                port_no,
                PortEntry {
                    ifindex: info.ifindex,
                    mac: info.mac,
                    link: info.link,
                    vlan_conf: info.vlan_conf,
                    tpid,
                    ingress_refs: 0,
                },
            );
        }
    }

    pub fn get(&self, port_no: PortNo) -> Option<&PortEntry> {
        self.entries.get(&port_no)
    }

    pub fn get_mut(&mut self, port_no: PortNo) -> Option<&mut PortEntry> {
        self.entries.get_mut(&port_no)
    }

    pub fn by_ifindex(&self, ifindex: u32) -> Option<PortNo> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.ifindex == ifindex)
            .map(|(port_no, _)| *port_no)
    }

    pub fn first_ifindex(&self) -> u32 {
        self.entries.values().next().map_or(0, |entry| entry.ifindex)
    }

    pub fn link(&self, port_no: PortNo) -> bool {
        self.get(port_no).is_some_and(|entry| entry.link)
    }
}

/// The switch ports a ring port maps to. Index 1 is only used by port1 of an
/// interconnected sub-ring with a virtual channel, which maps to both ring
/// ports of the connected ring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct PortBinding {
    pub port_states: [Option<PortNo>; 2],
    pub smac: MacAddress,
}

impl PortBinding {
    pub fn contains(&self, port_no: PortNo) -> bool {
        self.port_states.contains(&Some(port_no))
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct RingPortState {
    pub binding: PortBinding,
    pub old_binding: PortBinding,
    /// Latest SF value, before hold-off filtering.
    pub sf: bool,
    pub sf_clearing: bool,
    pub rx_node_id_bpr: Option<NodeIdBpr>,
    /// Encoded R-APS PDU per switch port of the binding.
    pub tx_frames: [Option<Vec<u8>>; 2],
    pub raps_pdu_transmitted: bool,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct InstanceTimers {
    pub wtr: TimerHandle,
    pub wtb: TimerHandle,
    pub guard: TimerHandle,
    pub tc: TimerHandle,
    pub rx: TimerHandle,
    pub tx: TimerHandle,
    pub hoff: [TimerHandle; 2],
    pub pm: [TimerHandle; 2],
}

impl InstanceTimers {
    pub fn allocate(timers: &mut TimerEngine<TimerEvent>, inst: u32) -> Self {
        let mut alloc = |name, kind| timers.allocate(name, TimerEvent { inst, kind });
        Self {
            wtr: alloc("WTR timer", TimerKind::Wtr),
            wtb: alloc("WTB timer", TimerKind::Wtb),
            guard: alloc("Guard timer", TimerKind::Guard),
            tc: alloc("TC timer", TimerKind::Tc),
            rx: alloc("Rx timer", TimerKind::Rx),
            tx: alloc("Tx timer", TimerKind::Tx),
            hoff: [
                alloc("Hold-off timer port0", TimerKind::HoldOff(RingPort::Port0)),
                alloc("Hold-off timer port1", TimerKind::HoldOff(RingPort::Port1)),
            ],
            pm: [
                alloc("PM timer port0", TimerKind::Pm(RingPort::Port0)),
                alloc("PM timer port1", TimerKind::Pm(RingPort::Port1)),
            ],
        }
    }

    fn all(&self) -> [TimerHandle; 10] {
        [
            self.wtr, self.wtb, self.guard, self.tc, self.rx, self.tx, self.hoff[0], self.hoff[1], self.pm[0],
            self.pm[1],
        ]
    }

    pub fn stop_all(&self, timers: &mut TimerEngine<TimerEvent>) {
        for handle in self.all() {
            timers.stop(handle);
        }
    }

    pub fn release(&self, timers: &mut TimerEngine<TimerEvent>) {
        for handle in self.all() {
            timers.release(handle);
        }
    }
}

/// Everything the engine keeps about one instance.
#[derive(Debug)]
pub(crate) struct ErpsState {
    pub inst: u32,
    pub conf: ErpsConf,
    /// Configuration that is currently applied to hardware.
    pub old_conf: ErpsConf,
    pub status: ErpsStatus,
    pub old_oper_state: OperState,
    pub old_oper_warning: OperWarning,
    pub command: Command,
    pub top_request: Request,
    pub wtr_event: bool,
    pub wtb_event: bool,
    pub ring_port: [RingPortState; 2],
    pub timers: InstanceTimers,
    pub ace: Option<(AceId, AceConf)>,
    pub expect_raps_rx: bool,
    pub dfop_to: bool,
    /// Request/flags bytes currently encoded in the Tx PDUs.
    pub tx_info_bytes: [u8; 2],
    /// `status.tx_raps_info` holds a transmitted request.
    pub tx_info_stamped: bool,
    pub history: VecDeque<HistoryEntry>,
}

impl ErpsState {
    pub fn new(inst: u32, conf: ErpsConf, timers: &mut TimerEngine<TimerEvent>) -> Self {
        Self {
            inst,
            old_conf: conf.clone(),
            conf,
            status: ErpsStatus::default(),
            old_oper_state: OperState::AdminDisabled,
            old_oper_warning: OperWarning::None,
            command: Command::Nr,
            top_request: Request::None,
            wtr_event: false,
            wtb_event: false,
            ring_port: Default::default(),
            timers: InstanceTimers::allocate(timers, inst),
            ace: None,
            expect_raps_rx: false,
            dfop_to: false,
            tx_info_bytes: [0; 2],
            tx_info_stamped: false,
            history: VecDeque::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.oper_state == OperState::Active
    }

    pub fn ring_port_conf_used(&self, ring_port: RingPort) -> bool {
        self.conf.using_ring_port_conf(ring_port)
    }

    /// Returns the ring port bound to `port_no`, if any.
    pub fn ring_port_for(&self, port_no: PortNo) -> Option<RingPort> {
        RingPort::ALL
            .into_iter()
            .find(|rp| self.ring_port[rp.index()].binding.contains(port_no))
    }
}

/// Borrowed view of everything outside the instance itself.
///
/// The registry takes the instance out of its map while it runs, so `peers`
/// holds every other instance.
pub(crate) struct EngineCtx<'a> {
    pub platform: &'a dyn ErpsPlatform,
    pub timers: &'a mut TimerEngine<TimerEvent>,
    pub ports: &'a mut PortTable,
    pub peers: &'a mut BTreeMap<u32, ErpsState>,
}

impl EngineCtx<'_> {
    pub fn now_ms(&self) -> u64 {
        self.timers.now_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{VlanPortType, VlanPortConf};
    use pretty_assertions::assert_eq;

    fn port(ifindex: u32, port_type: VlanPortType) -> PortInfo {
        PortInfo {
            ifindex,
            mac: MacAddress::new([0, 1, 2, 3, 4, ifindex as u8]),
            link: true,
            vlan_conf: VlanPortConf {
                port_type,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_port_table_lookup() {
        let mut table = PortTable::new(MacAddress::new([0, 0, 0, 0, 0, 1]));
        table.load([
            (PortNo::new(0), port(1001, VlanPortType::C)),
            (PortNo::new(1), port(1002, VlanPortType::SCustom)),
        ]);

        assert_eq!(table.by_ifindex(1002), Some(PortNo::new(1)));
        assert_eq!(table.by_ifindex(7), None);
        assert_eq!(table.first_ifindex(), 1001);
        assert_eq!(table.get(PortNo::new(1)).unwrap().tpid, DEFAULT_CUSTOM_TPID);
        assert!(table.link(PortNo::new(0)));
        assert!(!table.link(PortNo::new(9)));
    }

    #[test]
    fn test_timers_released_with_instance() {
        let mut timers = TimerEngine::new();
        let state = ErpsState::new(3, ErpsConf::default(), &mut timers);
        timers.start(state.timers.wtr, 1000, false);
        timers.start(state.timers.pm[1], 500, false);
        assert_eq!(timers.next_deadline(), Some(500));

        state.timers.stop_all(&mut timers);
        assert_eq!(timers.next_deadline(), None);

        state.timers.release(&mut timers);
        timers.start(state.timers.wtr, 10, false);
        assert!(!timers.is_active(state.timers.wtr));
    }

    #[test]
    fn test_ring_port_for_binding() {
        let mut timers = TimerEngine::new();
        let mut state = ErpsState::new(1, ErpsConf::default(), &mut timers);
        state.ring_port[1].binding.port_states = [Some(PortNo::new(4)), Some(PortNo::new(6))];
        assert_eq!(state.ring_port_for(PortNo::new(6)), Some(RingPort::Port1));
        assert_eq!(state.ring_port_for(PortNo::new(5)), None);
    }
}
