//! Protocol engine of one instance: request resolution, the state machine
//! run, SF hold-off, R-APS reception, flushing and the protocol timers.

use super::fsm::{self, FsmInput, TimerAction, TxAction};
use super::types::{FlushReason, HistoryEntry, NodeIdBpr, Request};
use crate::instance::{EngineCtx, ErpsState};
use crate::raps::{RapsFrame, RX_TIMEOUT_MS};
use crate::timer::TimerKind;
use crate::types::{Command, ErpsStatus, NodeState, RapsInfo, RapsRequest, RingType, RplMode, Statistics};
use crate::{debug_log, info_log};
use erps_types::RingPort;
use std::collections::BTreeMap;

/// Number of history entries kept per instance.
pub const HISTORY_MAX: usize = 50;

/// WTB runs for this plus the guard time.
const WTB_BASE_MS: u64 = 5000;

/// Hold-back of repeated topology-change flushes towards the connected ring.
const TC_HOLD_MS: u64 = 10;

impl ErpsState {
    /// Highest ring port the state machine blocks and unblocks.
    fn fsm_ring_port_max(&self) -> RingPort {
        if self.conf.uses_both_ring_ports() {
            RingPort::Port1
        } else {
            RingPort::Port0
        }
    }

    /// Highest ring port that has a physical port of its own.
    fn physical_ring_port_max(&self) -> RingPort {
        if self.conf.ring_type == RingType::InterconnectedSub {
            RingPort::Port0
        } else {
            RingPort::Port1
        }
    }

    fn rx_timer_start(&mut self, ctx: &mut EngineCtx<'_>) {
        ctx.timers.start(self.timers.rx, RX_TIMEOUT_MS, false);
    }

    fn cfop_to_update(&mut self) {
        self.status.cfop_to = self.dfop_to && self.expect_raps_rx;
    }

    fn dfop_to_set(&mut self, dfop_to: bool) {
        if dfop_to != self.dfop_to {
            self.dfop_to = dfop_to;
            self.cfop_to_update();
        }
    }

    /// R-APS are expected unless both ring ports are down or we are an RPL
    /// owner sending NR,RB (to which nobody replies).
    fn expect_raps_rx_update(&mut self, ctx: &mut EngineCtx<'_>) {
        let sf = [self.ring_port[0].sf, self.ring_port[1].sf];
        let sf_contrib = match self.conf.ring_type {
            RingType::Major | RingType::Sub => !sf[0] || !sf[1],
            RingType::InterconnectedSub => self.conf.virtual_channel || !sf[0],
        };
        let tx = &self.status.tx_raps_info;
        let tx_contrib = !(self.conf.rpl_mode == RplMode::Owner && tx.request == RapsRequest::Nr && tx.rb);

        let expect = sf_contrib && tx_contrib;
        if expect == self.expect_raps_rx {
            return;
        }

        self.expect_raps_rx = expect;
        if expect {
            self.dfop_to = false;
            self.rx_timer_start(ctx);
        }
        self.cfop_to_update();
    }

    /// Records the unfiltered SF of a ring port.
    fn ring_port_sf_set(&mut self, ctx: &mut EngineCtx<'_>, rp: RingPort, sf: bool) {
        if self.ring_port[rp.index()].sf == sf {
            return;
        }
        self.ring_port[rp.index()].sf = sf;
        self.expect_raps_rx_update(ctx);
    }

    fn raps_tx_stop(&mut self) {
        self.status.tx_raps_active = false;
    }

    pub(crate) fn raps_tx_start(&mut self, ctx: &mut EngineCtx<'_>, request: RapsRequest, rb: bool, dnf: bool) {
        // EVENT PDUs carry no flags at all.
        let bpr = if request == RapsRequest::Event
            || self.conf.ring_type == RingType::InterconnectedSub
            || self.status.ring_port_status[0].blocked
        {
            RingPort::Port0
        } else {
            RingPort::Port1
        };

        let changed = if request == RapsRequest::Event {
            true
        } else {
            let cur = &self.status.tx_raps_info;
            let changed = !self.status.tx_raps_active
                || !self.tx_info_stamped
                || cur.request != request
                || cur.rb != rb
                || cur.dnf != dnf
                || cur.bpr != bpr;
            self.status.tx_raps_active = true;
            if changed {
                let now_secs = ctx.now_ms() / 1000;
                let cur = &mut self.status.tx_raps_info;
                cur.update_time_secs = now_secs;
                cur.request = request;
                cur.rb = rb;
                cur.dnf = dnf;
                cur.bpr = bpr;
                self.tx_info_stamped = true;
            }
            changed
        };

        if changed {
            for state in self.ring_port.iter_mut() {
                state.raps_pdu_transmitted = false;
            }
            let info = RapsInfo {
                request,
                rb,
                dnf,
                bpr,
                ..self.status.tx_raps_info
            };
            self.raps_tx_info_update(ctx, &info);
            self.expect_raps_rx_update(ctx);
        }
    }

    /// Flushes the MAC table of the protected VLANs on the ring ports.
    pub(crate) fn fdb_do_flush(&mut self, ctx: &mut EngineCtx<'_>) {
        let max = self.physical_ring_port_max();
        let ring_ports: Vec<RingPort> = RingPort::ALL.into_iter().filter(|rp| *rp <= max).collect();

        for rp in &ring_ports {
            self.status.ring_port_status[rp.index()].statistics.flush_cnt += 1;
        }

        for vid in self.conf.protected_vlans.iter() {
            for rp in &ring_ports {
                let Some(port_no) = self.ring_port[rp.index()].binding.port_states[0] else {
                    continue;
                };
                if let Err(e) = ctx.platform.mac_flush(port_no, vid) {
                    debug_log!("ErpsBase", inst = self.inst, port = %port_no, vid = %vid, error = %e, "mac_flush failed");
                }
            }
        }
    }

    fn fdb_connected_ring_flush(&mut self, ctx: &mut EngineCtx<'_>) {
        let connected = self.conf.interconnect.connected_ring_inst;
        let Some(peer) = ctx.peers.get_mut(&connected) else {
            return;
        };
        if peer.conf.ring_type == RingType::InterconnectedSub || !peer.is_active() {
            return;
        }

        // The connected ring is never an interconnected sub-ring, so it has
        // no use for the rest of the map.
        let mut no_peers = BTreeMap::new();
        let mut peer_ctx = EngineCtx {
            platform: ctx.platform,
            timers: &mut *ctx.timers,
            ports: &mut *ctx.ports,
            peers: &mut no_peers,
        };
        peer.fdb_do_flush(&mut peer_ctx);
        if self.conf.interconnect.tc_propagate {
            peer.raps_tx_start(&mut peer_ctx, RapsRequest::Event, false, false);
        }
    }

    fn fdb_flush(&mut self, ctx: &mut EngineCtx<'_>) {
        self.fdb_do_flush(ctx);
        if self.conf.ring_type == RingType::InterconnectedSub {
            if ctx.timers.is_active(self.timers.tc) {
                return;
            }
            self.fdb_connected_ring_flush(ctx);
            ctx.timers.start(self.timers.tc, TC_HOLD_MS, false);
        }
    }

    pub(crate) fn history_update(
        &mut self,
        ctx: &EngineCtx<'_>,
        local_request: Request,
        remote_request: Request,
        rx_node_id_bpr: Option<NodeIdBpr>,
        rx_ring_port: RingPort,
        flush_reason: FlushReason,
    ) {
        let rps = &self.status.ring_port_status;
        let entry = HistoryEntry {
            time_ms: ctx.now_ms(),
            local_request,
            remote_request,
            rx_ring_port,
            rx_node_id_bpr,
            node_state: self.status.node_state,
            sf: [rps[0].sf, rps[1].sf],
            blocked: [rps[0].blocked, rps[1].blocked],
            flush_reason,
            tx_raps_active: self.status.tx_raps_active,
            tx_raps_info: self.status.tx_raps_info,
        };

        let push = match self.history.back() {
            None => true,
            Some(last) => flush_reason != FlushReason::None || entry.differs_from(last),
        };
        if !push {
            return;
        }

        debug_log!(
            "ErpsBase",
            inst = self.inst,
            local = %entry.local_request,
            remote = %entry.remote_request,
            rx_port = %entry.rx_ring_port,
            state = %entry.node_state,
            sf0 = entry.sf[0],
            sf1 = entry.sf[1],
            blocked0 = entry.blocked[0],
            blocked1 = entry.blocked[1],
            flush = %entry.flush_reason,
            tx_active = entry.tx_raps_active,
            tx = %entry.tx_raps_info,
            "history"
        );

        if self.history.len() >= HISTORY_MAX {
            self.history.pop_front();
        }
        self.history.push_back(entry);
    }

    /// Decides whether a received PDU calls for a flush (G.8032 10.1.10).
    fn rx_flush_logic(&mut self, rp: RingPort, info: &RapsInfo) -> bool {
        if info.request == RapsRequest::Nr && !info.rb {
            self.ring_port[rp.index()].rx_node_id_bpr = None;
            return false;
        }

        let pair = NodeIdBpr {
            node_id: info.node_id,
            bpr: info.bpr,
        };
        if self.ring_port[rp.index()].rx_node_id_bpr == Some(pair) {
            return false;
        }
        self.ring_port[rp.index()].rx_node_id_bpr = Some(pair);

        if info.dnf {
            return false;
        }

        let single_port = self.conf.ring_type == RingType::InterconnectedSub && !self.conf.virtual_channel;
        if !single_port && self.ring_port[rp.opposite().index()].rx_node_id_bpr == Some(pair) {
            return false;
        }
        true
    }

    fn wtr_timer_start(&mut self, ctx: &mut EngineCtx<'_>) {
        ctx.timers.start(self.timers.wtr, u64::from(self.conf.wtr_secs) * 1000, false);
    }

    fn run_state_machine_init(&mut self, ctx: &mut EngineCtx<'_>) {
        match self.conf.rpl_mode {
            RplMode::Owner | RplMode::Neighbor => {
                let rpl_port = self.conf.rpl_port;
                self.ring_port_block(ctx, rpl_port, true, true);
                self.ring_port_block(ctx, rpl_port.opposite(), false, true);
                if self.conf.rpl_mode == RplMode::Owner && self.conf.revertive {
                    self.wtr_timer_start(ctx);
                }
            }
            RplMode::None => {
                self.ring_port_block(ctx, RingPort::Port0, true, true);
                self.ring_port_block(ctx, RingPort::Port1, false, true);
            }
        }

        self.raps_tx_start(ctx, RapsRequest::Nr, false, false);
        self.status.node_state = NodeState::Pending;
        self.fdb_flush(ctx);
        self.history_update(ctx, Request::None, Request::None, None, RingPort::Port0, FlushReason::Fsm);
    }

    fn local_request(&self, ctx: &EngineCtx<'_>) -> Request {
        let max = self.physical_ring_port_max();
        let ring_ports = || RingPort::ALL.into_iter().filter(move |rp| *rp <= max);

        if self.command == Command::Clear {
            return Request::LocalClear;
        }
        if self.command.is_forced_switch() {
            return Request::LocalFs;
        }
        if self.status.node_state != NodeState::Fs
            && ring_ports().any(|rp| self.status.ring_port_status[rp.index()].sf)
        {
            return Request::LocalSf;
        }
        if ring_ports().any(|rp| self.ring_port[rp.index()].sf_clearing) {
            return Request::LocalSfClear;
        }
        if self.command.is_manual_switch() {
            return Request::LocalMs;
        }
        if self.wtr_event {
            return Request::LocalWtrExpires;
        }
        if ctx.timers.is_active(self.timers.wtr) {
            return Request::LocalWtrRunning;
        }
        if self.wtb_event {
            return Request::LocalWtbExpires;
        }
        if ctx.timers.is_active(self.timers.wtb) {
            return Request::LocalWtbRunning;
        }
        Request::None
    }

    /// Returns the remote request and whether the sender has a higher node
    /// ID than ours.
    fn remote_request(&self, rx: Option<&RapsInfo>) -> (Request, bool) {
        let Some(info) = rx else {
            return (Request::None, false);
        };

        let higher = self.status.tx_raps_info.node_id < info.node_id;
        let request = match info.request {
            RapsRequest::Nr if info.rb => Request::RemoteNrRb,
            RapsRequest::Nr => Request::RemoteNr,
            RapsRequest::Ms => Request::RemoteMs,
            RapsRequest::Sf => Request::RemoteSf,
            RapsRequest::Fs => Request::RemoteFs,
            RapsRequest::Event => Request::None,
        };
        (request, higher)
    }

    /// Applies the transition for the current top priority request.
    /// Returns true if the state machine itself flushed the FDB.
    fn do_run_state_machine(&mut self, ctx: &mut EngineCtx<'_>, remote_higher: bool, do_flush: bool) -> bool {
        let rps = &self.status.ring_port_status;
        let input = FsmInput {
            state: self.status.node_state,
            request: self.top_request,
            command: self.command,
            rpl_mode: self.conf.rpl_mode,
            rpl_port: self.conf.rpl_port,
            revertive: self.conf.revertive,
            ring_port_max: self.fsm_ring_port_max(),
            was_blocked: [rps[0].blocked, rps[1].blocked],
            has_sf: [rps[0].sf, rps[1].sf],
            remote_higher,
        };
        let t = fsm::decide(&input);

        self.status.node_state = t.next_state;

        for rp in RingPort::ALL {
            if t.block[rp.index()] {
                self.ring_port_block(ctx, rp, true, false);
            }
        }
        for rp in RingPort::ALL {
            if t.unblock[rp.index()] {
                self.ring_port_block(ctx, rp, false, false);
            }
        }

        match t.wtr {
            TimerAction::Start if !ctx.timers.is_active(self.timers.wtr) => self.wtr_timer_start(ctx),
            TimerAction::Stop => ctx.timers.stop(self.timers.wtr),
            _ => {}
        }
        match t.wtb {
            TimerAction::Start if !ctx.timers.is_active(self.timers.wtb) => {
                let period = WTB_BASE_MS + u64::from(self.conf.guard_time_msecs);
                ctx.timers.start(self.timers.wtb, period, false);
            }
            TimerAction::Stop => ctx.timers.stop(self.timers.wtb),
            _ => {}
        }
        if t.guard_start {
            ctx.timers.start(self.timers.guard, u64::from(self.conf.guard_time_msecs), false);
        }

        match t.tx {
            TxAction::Start { request, rb, dnf } => self.raps_tx_start(ctx, request, rb, dnf),
            TxAction::Stop => self.raps_tx_stop(),
            TxAction::Keep => {}
        }

        if do_flush || t.fdb_flush {
            self.fdb_flush(ctx);
        }
        t.fdb_flush
    }

    pub(super) fn run_state_machine(&mut self, ctx: &mut EngineCtx<'_>, rx: Option<(RingPort, RapsInfo)>, do_flush: bool) {
        if self.status.node_state == NodeState::Init {
            self.run_state_machine_init(ctx);
        }
        let old_state = self.status.node_state;

        let local = self.local_request(ctx);
        let (remote, remote_higher) = self.remote_request(rx.as_ref().map(|(_, info)| info));
        self.top_request = local.max(remote);

        self.wtr_event = false;
        self.wtb_event = false;
        for state in self.ring_port.iter_mut() {
            state.sf_clearing = false;
        }

        let clear_command = match self.command {
            Command::Nr => false,
            Command::FsToPort0 | Command::FsToPort1 => self.top_request > Request::LocalFs,
            Command::MsToPort0 | Command::MsToPort1 => self.top_request > Request::LocalMs,
            Command::Clear => true,
        };
        if clear_command {
            self.command = Command::Nr;
        }

        let fsm_flushed = self.do_run_state_machine(ctx, remote_higher, do_flush);
        debug_log!(
            "ErpsBase",
            inst = self.inst,
            local = %local,
            remote = %remote,
            from = %old_state,
            to = %self.status.node_state,
            "state machine ran"
        );

        let reason = if fsm_flushed {
            FlushReason::Fsm
        } else if do_flush {
            FlushReason::NodeId
        } else {
            FlushReason::None
        };
        let (rx_rp, pair) = match rx {
            Some((rp, info)) => (
                rp,
                Some(NodeIdBpr {
                    node_id: info.node_id,
                    bpr: info.bpr,
                }),
            ),
            None => (RingPort::Port0, None),
        };
        self.history_update(ctx, local, remote, pair, rx_rp, reason);
    }

    /// Feeds a new SF value for a ring port. Raising SF waits for the
    /// hold-off time, clearing it is immediate.
    pub(crate) fn sf_set(&mut self, ctx: &mut EngineCtx<'_>, rp: RingPort, sf: bool) {
        let no_change = sf == self.ring_port[rp.index()].sf;
        self.ring_port_sf_set(ctx, rp, sf);
        if no_change {
            return;
        }

        let hold_off = u64::from(self.conf.hold_off_msecs);
        let status = &mut self.status.ring_port_status[rp.index()];
        if sf {
            status.statistics.sf_cnt += 1;
        }

        let published = status.sf;
        if sf && !published && hold_off != 0 {
            ctx.timers.start(self.timers.hoff[rp.index()], hold_off, false);
            return;
        }
        if (!sf && published) || hold_off == 0 {
            ctx.timers.stop(self.timers.hoff[rp.index()]);
            status.sf = sf;
        }
        if !sf {
            self.ring_port[rp.index()].sf_clearing = true;
        }
        self.run_state_machine(ctx, None, false);
    }

    /// Handles expiry of one of this instance's timers.
    pub(crate) fn timeout(&mut self, ctx: &mut EngineCtx<'_>, kind: TimerKind) {
        match kind {
            TimerKind::Wtr => {
                self.wtr_event = true;
                self.run_state_machine(ctx, None, false);
            }
            TimerKind::Wtb => {
                self.wtb_event = true;
                self.run_state_machine(ctx, None, false);
            }
            TimerKind::Guard | TimerKind::Tc => {}
            TimerKind::HoldOff(rp) => {
                let sf = self.ring_port[rp.index()].sf;
                let status = &mut self.status.ring_port_status[rp.index()];
                if sf && !status.sf {
                    status.sf = true;
                    self.run_state_machine(ctx, None, false);
                }
            }
            TimerKind::Rx => self.dfop_to_set(true),
            TimerKind::Pm(rp) => self.status.ring_port_status[rp.index()].cfop_pm = false,
            TimerKind::Tx => self.raps_tx_timeout(ctx),
        }
    }

    /// Applies an operator command. A forced or manual switch is cleared
    /// before a different command takes its place.
    pub(crate) fn command_set(&mut self, ctx: &mut EngineCtx<'_>, command: Command) {
        if command == self.command {
            return;
        }

        let old = self.command;
        if (old.is_forced_switch() || old.is_manual_switch()) && command != Command::Clear {
            self.command = Command::Clear;
            self.run_state_machine(ctx, None, false);
        }

        info_log!("ErpsBase", inst = self.inst, from = %old, to = %command, "command");
        self.command = command;
        self.run_state_machine(ctx, None, false);
    }

    /// Processes an R-APS PDU received on `rp`.
    pub(crate) fn rx_frame(&mut self, ctx: &mut EngineCtx<'_>, rp: RingPort, frame: &[u8]) {
        let parsed = match RapsFrame::validate(frame, self.conf.ring_id, self.conf.level) {
            Ok(parsed) => parsed,
            Err(e) => {
                self.status.ring_port_status[rp.index()].statistics.rx_error += 1;
                debug_log!("ErpsBase", inst = self.inst, ring_port = %rp, error = %e, "R-APS PDU dropped");
                return;
            }
        };

        self.rx_timer_start(ctx);
        self.dfop_to_set(false);

        if parsed.node_id == self.status.tx_raps_info.node_id {
            self.status.ring_port_status[rp.index()].statistics.rx_own += 1;
            return;
        }
        if ctx.timers.is_active(self.timers.guard) {
            self.status.ring_port_status[rp.index()].statistics.rx_guard += 1;
            return;
        }

        let info = RapsInfo {
            update_time_secs: ctx.now_ms() / 1000,
            request: parsed.request,
            version: parsed.version,
            rb: parsed.rb,
            dnf: parsed.dnf,
            bpr: parsed.bpr,
            node_id: parsed.node_id,
            smac: parsed.smac,
        };

        // Another node claims to be RPL owner.
        if self.conf.rpl_mode == RplMode::Owner && info.request == RapsRequest::Nr && info.rb {
            self.status.ring_port_status[rp.index()].cfop_pm = true;
            ctx.timers.start(self.timers.pm[rp.index()], RX_TIMEOUT_MS, false);
            self.status.ring_port_status[rp.index()].statistics.rx_fop_pm += 1;
        }

        let status = &mut self.status.ring_port_status[rp.index()];
        status.rx_raps_info = info;
        status.statistics.count_rx(info.request, info.rb);

        if info.request == RapsRequest::Event {
            self.fdb_flush(ctx);
            self.history_update(ctx, Request::None, Request::None, None, rp, FlushReason::Event);
            return;
        }

        let do_flush = self.rx_flush_logic(rp, &info);
        self.run_state_machine(ctx, Some((rp, info)), do_flush);
    }

    /// Resets all protocol state. Oper state, warning and the Tx identity
    /// (version, node ID, SMAC) survive.
    pub(crate) fn state_clear(&mut self, ctx: &mut EngineCtx<'_>) {
        self.command = Command::Nr;

        let old = std::mem::take(&mut self.status);
        self.status = ErpsStatus {
            oper_state: old.oper_state,
            oper_warning: old.oper_warning,
            node_state: NodeState::Init,
            tx_raps_info: RapsInfo {
                version: old.tx_raps_info.version,
                node_id: old.tx_raps_info.node_id,
                smac: old.tx_raps_info.smac,
                ..RapsInfo::default()
            },
            ..ErpsStatus::default()
        };

        for state in self.ring_port.iter_mut() {
            state.sf = false;
            state.sf_clearing = false;
            state.rx_node_id_bpr = None;
            state.raps_pdu_transmitted = false;
        }

        self.timers.stop_all(ctx.timers);
        self.ace = None;
        self.wtr_event = false;
        self.wtb_event = false;
        self.top_request = Request::None;
        self.expect_raps_rx = false;
        self.dfop_to = false;
        self.tx_info_bytes = [0; 2];
        self.tx_info_stamped = false;

        self.history.clear();
        self.history_update(ctx, Request::None, Request::None, None, RingPort::Port0, FlushReason::None);
    }

    pub(crate) fn statistics_clear(&mut self) {
        for status in self.status.ring_port_status.iter_mut() {
            status.statistics = Statistics::default();
        }
    }

    pub(crate) fn history_clear(&mut self) {
        self.history.clear();
    }
}
