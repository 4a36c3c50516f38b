//! End-to-end tests driving registries over the simulated switch.

use erps::daemon::{SimCall, SimPlatform};
use erps::platform::{VlanPortConf, VlanPortType};
use erps::types::RapsRequest;
use erps::{
    Command, ErpsConf, ErpsError, MacAddress, NodeState, PortForwardState, PortInfo, PortNo, Registry, RingPort,
    RplMode, VlanSet,
};
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;
use std::sync::Arc;

const CONTROL_VLAN: u16 = 100;

fn mac(last: u8) -> MacAddress {
    MacAddress::new([0x00, 0x01, 0xc1, 0x00, 0x00, last])
}

fn port(n: u32) -> PortNo {
    PortNo::new(n)
}

struct Node {
    registry: Registry,
    platform: Arc<SimPlatform>,
    down: BTreeSet<PortNo>,
}

impl Node {
    /// A switch with ring ports 0 and 1 plus one access port.
    fn new(node_id: u8) -> Self {
        let platform = Arc::new(SimPlatform::new());
        platform.set_members(CONTROL_VLAN, &[port(0), port(1), port(2)]);
        platform.set_members(200, &[port(0), port(1)]);

        let mut registry = Registry::new(platform.clone(), mac(node_id));
        registry.load((0..3).map(|n| {
            (
                port(n),
                PortInfo {
                    ifindex: 1000 + n,
                    mac: mac(node_id.wrapping_add(0x10 + n as u8)),
                    link: true,
                    vlan_conf: VlanPortConf {
                        port_type: VlanPortType::C,
                        ..Default::default()
                    },
                },
            )
        }));
        Self {
            registry,
            platform,
            down: BTreeSet::new(),
        }
    }

    fn blocked(&self, inst: u32) -> [bool; 2] {
        let status = self.registry.status_get(inst).unwrap();
        [status.ring_port_status[0].blocked, status.ring_port_status[1].blocked]
    }

    fn node_state(&self, inst: u32) -> NodeState {
        self.registry.status_get(inst).unwrap().node_state
    }

    fn tx_info(&self, inst: u32) -> (RapsRequest, bool) {
        let info = self.registry.status_get(inst).unwrap().tx_raps_info;
        (info.request, info.rb)
    }

    fn link(&mut self, n: u32, up: bool, now_ms: u64) {
        if up {
            self.down.remove(&port(n));
        } else {
            self.down.insert(port(n));
        }
        self.registry.port_link_change(port(n), up, now_ms);
    }

    /// Frames sent since the last call on ports whose cable is up.
    fn wire_tx(&self) -> Vec<(PortNo, Vec<u8>)> {
        self.platform
            .take_tx()
            .into_iter()
            .filter(|(p, _)| !self.down.contains(p))
            .collect()
    }
}

fn ring_conf(rpl_mode: RplMode) -> ErpsConf {
    let mut conf = ErpsConf {
        control_vlan: CONTROL_VLAN,
        wtr_secs: 1,
        rpl_mode,
        rpl_port: RingPort::Port0,
        protected_vlans: VlanSet::try_from(vec![10, 20]).unwrap(),
        admin_active: true,
        ..Default::default()
    };
    conf.ring_port_conf[0].ifindex = 1000;
    conf.ring_port_conf[1].ifindex = 1001;
    conf
}

#[test]
fn test_owner_protection_and_revertive_recovery() {
    let mut node = Node::new(0xaa);
    node.registry.conf_set(1, &ring_conf(RplMode::Owner), 0).unwrap();

    // A second ring over the same ports, protecting other VLANs.
    let mut second = ring_conf(RplMode::Owner);
    second.ring_id = 2;
    second.control_vlan = 200;
    second.protected_vlans = VlanSet::try_from(vec![30]).unwrap();
    node.registry.conf_set(2, &second, 0).unwrap();

    node.registry.start(0);
    assert_eq!(node.node_state(1), NodeState::Pending);
    assert_eq!(node.blocked(1), [true, false]);

    node.registry.run_timers(1000);
    for inst in [1, 2] {
        assert_eq!(node.node_state(inst), NodeState::Idle);
        assert_eq!(node.blocked(inst), [true, false]);
        assert_eq!(node.tx_info(inst), (RapsRequest::Nr, true));
        assert_eq!(node.platform.port_state(inst, port(0)), Some(PortForwardState::Discarding));
        assert_eq!(node.platform.port_state(inst, port(1)), Some(PortForwardState::Forwarding));
        assert_eq!(node.platform.port_state(inst, port(2)), Some(PortForwardState::Forwarding));
    }

    node.platform.take_calls();
    node.link(1, false, 1000);
    assert_eq!(node.node_state(1), NodeState::Protection);
    assert_eq!(node.blocked(1), [false, true]);
    assert_eq!(node.tx_info(1), (RapsRequest::Sf, false));
    assert_eq!(node.node_state(2), NodeState::Protection);
    let calls = node.platform.take_calls();
    assert!(calls.contains(&SimCall::PortState {
        inst: 1,
        port: port(0),
        state: PortForwardState::Forwarding,
    }));
    assert!(calls
        .iter()
        .any(|call| matches!(call, SimCall::MacFlush { vid: 10, .. })));

    node.link(1, true, 1000);
    assert_eq!(node.node_state(1), NodeState::Pending);
    assert_eq!(node.tx_info(1), (RapsRequest::Nr, false));
    // Guard time runs out first, then WTR.
    assert_eq!(node.registry.next_deadline(), Some(1500));

    node.registry.run_timers(1500);
    assert_eq!(node.node_state(1), NodeState::Pending);

    node.registry.run_timers(2000);
    for inst in [1, 2] {
        assert_eq!(node.node_state(inst), NodeState::Idle);
        assert_eq!(node.blocked(inst), [true, false]);
        assert_eq!(node.tx_info(inst), (RapsRequest::Nr, true));
    }
    assert_eq!(node.platform.port_state(1, port(0)), Some(PortForwardState::Discarding));
    assert_eq!(node.platform.port_state(1, port(1)), Some(PortForwardState::Forwarding));
    assert!(!node.registry.history_get(1).unwrap().is_empty());
}

/// Port n of one node is cabled to port 1 - n of the other.
fn peer_port(p: PortNo) -> PortNo {
    port(1 - p.as_u32())
}

/// Delivers transmitted frames between the two nodes until both are quiet.
fn exchange(a: &mut Node, b: &mut Node, now_ms: u64) {
    for _ in 0..8 {
        let from_a = a.wire_tx();
        let from_b = b.wire_tx();
        if from_a.is_empty() && from_b.is_empty() {
            return;
        }
        for (p, frame) in from_a {
            b.registry.rx_frame(peer_port(p), CONTROL_VLAN, &frame, now_ms);
        }
        for (p, frame) in from_b {
            a.registry.rx_frame(peer_port(p), CONTROL_VLAN, &frame, now_ms);
        }
    }
}

fn advance(a: &mut Node, b: &mut Node, now_ms: u64) {
    a.registry.run_timers(now_ms);
    b.registry.run_timers(now_ms);
    exchange(a, b, now_ms);
}

#[test]
fn test_two_node_ring_over_the_wire() {
    let mut owner = Node::new(0xaa);
    let mut other = Node::new(0xbb);
    owner.registry.conf_set(1, &ring_conf(RplMode::Owner), 0).unwrap();
    other.registry.conf_set(1, &ring_conf(RplMode::None), 0).unwrap();

    owner.registry.start(0);
    other.registry.start(0);
    exchange(&mut owner, &mut other, 0);
    advance(&mut owner, &mut other, 1000);

    assert_eq!(owner.node_state(1), NodeState::Idle);
    assert_eq!(owner.blocked(1), [true, false]);
    assert_eq!(other.node_state(1), NodeState::Idle);
    assert_eq!(other.blocked(1), [false, false]);
    let rx = other.registry.status_get(1).unwrap().ring_port_status[1].rx_raps_info;
    assert_eq!((rx.request, rx.rb, rx.node_id), (RapsRequest::Nr, true, mac(0xaa)));

    // Cut the cable between owner port1 and other port0.
    owner.link(1, false, 1000);
    other.link(0, false, 1000);
    exchange(&mut owner, &mut other, 1000);

    assert_eq!(owner.node_state(1), NodeState::Protection);
    assert_eq!(owner.blocked(1), [false, true]);
    assert_eq!(other.node_state(1), NodeState::Protection);
    assert_eq!(other.blocked(1), [true, false]);
    assert_eq!(owner.platform.port_state(1, port(0)), Some(PortForwardState::Forwarding));
    let sf_rx = owner.registry.status_get(1).unwrap().ring_port_status[0].statistics.rx_sf;
    assert!(sf_rx > 0);

    // Repair at t=2000; both nodes hold off R-APS for the guard time and the
    // owner reverts when WTR expires.
    advance(&mut owner, &mut other, 2000);
    owner.link(1, true, 2000);
    other.link(0, true, 2000);
    exchange(&mut owner, &mut other, 2000);
    assert_eq!(owner.node_state(1), NodeState::Pending);
    assert_eq!(other.node_state(1), NodeState::Pending);

    advance(&mut owner, &mut other, 2500);
    advance(&mut owner, &mut other, 3000);

    assert_eq!(owner.node_state(1), NodeState::Idle);
    assert_eq!(owner.blocked(1), [true, false]);
    assert_eq!(owner.tx_info(1), (RapsRequest::Nr, true));
    assert_eq!(other.node_state(1), NodeState::Idle);
    assert_eq!(other.blocked(1), [false, false]);
    assert_eq!(other.platform.port_state(1, port(0)), Some(PortForwardState::Forwarding));
    assert_eq!(other.platform.port_state(1, port(1)), Some(PortForwardState::Forwarding));
}

#[test]
fn test_configuration_lifecycle() {
    let mut node = Node::new(0xaa);
    node.registry.start(0);

    let caps = node.registry.capabilities_get();
    assert_eq!(caps.inst_cnt_max, 64);
    let default = node.registry.conf_default_get();
    assert_eq!(default.ring_port_conf[0].ifindex, 1000);

    node.registry.conf_set(1, &ring_conf(RplMode::Owner), 0).unwrap();
    let stored = node.registry.conf_get(1).unwrap();
    node.registry.conf_set(1, &stored, 0).unwrap();
    assert_eq!(node.registry.conf_get(1).unwrap(), stored);
    assert_eq!(node.platform.protected_vlans(1), vec![10, 20]);
    assert_eq!(node.platform.aces().len(), 1);

    // Shared ring ports need disjoint VLANs or another control VLAN/ring ID.
    let mut clash = ring_conf(RplMode::None);
    clash.protected_vlans = VlanSet::try_from(vec![30]).unwrap();
    assert_eq!(
        node.registry.conf_set(2, &clash, 0),
        Err(ErpsError::SameControlVlanAndRingIdOnSharedPort(1))
    );

    node.registry.control_set(1, Command::MsToPort1, 0).unwrap();
    assert_eq!(node.node_state(1), NodeState::Ms);
    node.registry.control_set(1, Command::Clear, 0).unwrap();

    node.registry.statistics_clear(1).unwrap();
    let stats = node.registry.status_get(1).unwrap().ring_port_status[0].statistics;
    assert_eq!(stats.tx_nr, 0);

    node.registry.conf_del(1, 0).unwrap();
    assert_eq!(node.registry.itr(None), None);
    assert!(node.platform.aces().is_empty());
    assert!(node.platform.protected_vlans(1).is_empty());
    assert!(!node.platform.ingress_filtered(port(0)));
    assert_eq!(node.registry.status_get(1).map(|s| s.oper_state), Err(ErpsError::NoSuchInstance(1)));
}
