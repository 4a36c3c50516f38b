//! The G.8032 state transition table.
//!
//! [`decide`] is a pure function of the current node state, the top
//! priority request and the ring port state. The engine applies the
//! returned [`Transition`].

use super::types::Request;
use crate::types::{Command, NodeState, RapsRequest, RplMode};
use erps_types::RingPort;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum TimerAction {
    #[default]
    Keep,
    /// Start unless already running
    Start,
    Stop,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum TxAction {
    #[default]
    Keep,
    Start { request: RapsRequest, rb: bool, dnf: bool },
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FsmInput {
    pub state: NodeState,
    pub request: Request,
    pub command: Command,
    pub rpl_mode: RplMode,
    pub rpl_port: RingPort,
    pub revertive: bool,
    /// Highest ring port that takes part in blocking.
    pub ring_port_max: RingPort,
    pub was_blocked: [bool; 2],
    pub has_sf: [bool; 2],
    /// The received PDU came from a node with a higher node ID.
    pub remote_higher: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Transition {
    pub next_state: NodeState,
    pub block: [bool; 2],
    pub unblock: [bool; 2],
    pub wtr: TimerAction,
    pub wtb: TimerAction,
    pub guard_start: bool,
    pub tx: TxAction,
    pub fdb_flush: bool,
}

impl Transition {
    fn stay(state: NodeState) -> Self {
        Self {
            next_state: state,
            block: [false; 2],
            unblock: [false; 2],
            wtr: TimerAction::Keep,
            wtb: TimerAction::Keep,
            guard_start: false,
            tx: TxAction::Keep,
            fdb_flush: false,
        }
    }

    fn tx(&mut self, request: RapsRequest, rb: bool, dnf: bool) {
        self.tx = TxAction::Start { request, rb, dnf };
    }

    fn block(&mut self, rp: RingPort) {
        self.block[rp.index()] = true;
    }

    fn unblock(&mut self, rp: RingPort) {
        self.unblock[rp.index()] = true;
    }
}

fn ring_ports(max: RingPort) -> impl Iterator<Item = RingPort> {
    RingPort::ALL.into_iter().filter(move |rp| *rp <= max)
}

pub(crate) fn decide(input: &FsmInput) -> Transition {
    use NodeState::*;

    let state = input.state;
    let mut t = Transition::stay(state);
    let owner = input.rpl_mode == RplMode::Owner;
    let owner_revertive = owner && input.revertive;
    let rpl_port = input.rpl_port;
    let non_rpl_port = rpl_port.opposite();
    let cmd_port = input.command.blocked_port();
    let non_cmd_port = cmd_port.opposite();
    let was_blocked = |rp: RingPort| input.was_blocked[rp.index()];
    let has_sf = |rp: RingPort| input.has_sf[rp.index()];
    let any_blocked = ring_ports(input.ring_port_max).any(was_blocked);

    // Leaving Pending as RPL owner cancels both restore timers.
    let stop_pending_timers = |t: &mut Transition| {
        if state == Pending && owner {
            t.wtr = TimerAction::Stop;
            t.wtb = TimerAction::Stop;
        }
    };

    // Block `rp` and tell the ring not to flush if it was blocked already.
    let block_with_flush = |t: &mut Transition, rp: RingPort| -> bool {
        t.block(rp);
        if was_blocked(rp) {
            true
        } else {
            t.fdb_flush = true;
            false
        }
    };

    match input.request {
        Request::LocalClear => match state {
            Ms | Fs => {
                t.next_state = Pending;
                if any_blocked {
                    t.tx(RapsRequest::Nr, false, false);
                    if owner_revertive {
                        t.wtb = TimerAction::Start;
                    }
                }
            }
            Pending => {
                t.next_state = Idle;
                if owner {
                    t.wtr = TimerAction::Stop;
                    t.wtb = TimerAction::Stop;
                    let dnf = block_with_flush(&mut t, rpl_port);
                    t.unblock(non_rpl_port);
                    t.tx(RapsRequest::Nr, true, dnf);
                }
            }
            _ => {}
        },

        Request::LocalFs => match state {
            Idle | Protection | Ms | Pending => {
                t.next_state = Fs;
                let dnf = block_with_flush(&mut t, cmd_port);
                t.unblock(non_cmd_port);
                t.tx(RapsRequest::Fs, false, dnf);
                stop_pending_timers(&mut t);
            }
            Fs => {
                t.block(cmd_port);
                t.tx(RapsRequest::Fs, false, false);
                t.fdb_flush = true;
            }
            Init => {}
        },

        Request::RemoteFs => {
            if matches!(state, Idle | Protection | Ms | Pending) {
                t.next_state = Fs;
                t.unblock(RingPort::Port0);
                t.unblock(RingPort::Port1);
                t.tx = TxAction::Stop;
                stop_pending_timers(&mut t);
            }
        }

        Request::LocalSf => {
            if matches!(state, Idle | Protection | Ms | Pending) {
                t.next_state = Protection;
                for rp in ring_ports(input.ring_port_max) {
                    if has_sf(rp) {
                        t.block(rp);
                        if !was_blocked(rp) {
                            t.fdb_flush = true;
                        }
                    } else {
                        t.unblock(rp);
                    }
                }
                let dnf = !t.fdb_flush;
                t.tx(RapsRequest::Sf, false, dnf);
                stop_pending_timers(&mut t);
            }
        }

        Request::LocalSfClear => {
            if state == Protection {
                t.next_state = Pending;
                t.guard_start = true;
                t.tx(RapsRequest::Nr, false, false);
                if owner_revertive {
                    t.wtr = TimerAction::Start;
                }
            }
        }

        Request::RemoteSf => {
            if matches!(state, Idle | Ms | Pending) {
                t.next_state = Protection;
                for rp in ring_ports(input.ring_port_max) {
                    t.unblock[rp.index()] = !has_sf(rp);
                }
                t.tx = TxAction::Stop;
                stop_pending_timers(&mut t);
            }
        }

        Request::RemoteMs => match state {
            Idle | Pending => {
                t.next_state = Ms;
                for rp in ring_ports(input.ring_port_max) {
                    t.unblock[rp.index()] = !has_sf(rp);
                }
                t.tx = TxAction::Stop;
                stop_pending_timers(&mut t);
            }
            Ms if any_blocked => {
                t.next_state = Pending;
                t.guard_start = true;
                t.tx(RapsRequest::Nr, false, false);
                if owner_revertive {
                    t.wtb = TimerAction::Start;
                }
            }
            _ => {}
        },

        Request::LocalMs => {
            if matches!(state, Idle | Pending) {
                t.next_state = Ms;
                let dnf = block_with_flush(&mut t, cmd_port);
                t.unblock(non_cmd_port);
                t.tx(RapsRequest::Ms, false, dnf);
                stop_pending_timers(&mut t);
            }
        }

        Request::LocalWtrExpires | Request::LocalWtbExpires => {
            if state == Pending {
                t.next_state = Idle;
                if owner {
                    if input.request == Request::LocalWtrExpires {
                        t.wtb = TimerAction::Stop;
                    } else {
                        t.wtr = TimerAction::Stop;
                    }
                    let dnf = block_with_flush(&mut t, rpl_port);
                    t.unblock(non_rpl_port);
                    t.tx(RapsRequest::Nr, true, dnf);
                }
            }
        }

        Request::LocalWtrRunning | Request::LocalWtbRunning | Request::None => {}

        Request::RemoteNrRb => match state {
            Idle => {
                match input.rpl_mode {
                    RplMode::None => ring_ports(input.ring_port_max).for_each(|rp| t.unblock(rp)),
                    _ => t.unblock(non_rpl_port),
                }
                if !owner {
                    t.tx = TxAction::Stop;
                }
            }
            Pending => {
                t.next_state = Idle;
                match input.rpl_mode {
                    RplMode::Owner => {
                        t.wtr = TimerAction::Stop;
                        t.wtb = TimerAction::Stop;
                    }
                    RplMode::Neighbor => {
                        t.block(rpl_port);
                        t.unblock(non_rpl_port);
                        t.tx = TxAction::Stop;
                    }
                    RplMode::None => {
                        ring_ports(input.ring_port_max).for_each(|rp| t.unblock(rp));
                        t.tx = TxAction::Stop;
                    }
                }
            }
            _ => t.next_state = Pending,
        },

        Request::RemoteNr => match state {
            Idle => {
                if input.rpl_mode == RplMode::None && input.remote_higher {
                    for rp in ring_ports(input.ring_port_max) {
                        t.unblock[rp.index()] = !has_sf(rp);
                    }
                    t.tx = TxAction::Stop;
                }
            }
            Protection => {
                t.next_state = Pending;
                if owner_revertive {
                    t.wtr = TimerAction::Start;
                }
            }
            Ms | Fs => {
                t.next_state = Pending;
                if owner_revertive {
                    t.wtb = TimerAction::Start;
                }
            }
            Pending | Init => {
                t.next_state = Pending;
                if input.remote_higher {
                    for rp in ring_ports(input.ring_port_max) {
                        t.unblock[rp.index()] = !has_sf(rp);
                    }
                    t.tx = TxAction::Stop;
                }
            }
        },
    }

    t
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn input(state: NodeState, request: Request) -> FsmInput {
        FsmInput {
            state,
            request,
            command: Command::Nr,
            rpl_mode: RplMode::Owner,
            rpl_port: RingPort::Port0,
            revertive: true,
            ring_port_max: RingPort::Port1,
            was_blocked: [false; 2],
            has_sf: [false; 2],
            remote_higher: false,
        }
    }

    #[test]
    fn test_clear_from_pending_owner_flushes() {
        let t = decide(&input(NodeState::Pending, Request::LocalClear));
        assert_eq!(t.next_state, NodeState::Idle);
        assert_eq!(t.block, [true, false]);
        assert_eq!(t.unblock, [false, true]);
        assert_eq!(t.tx, TxAction::Start { request: RapsRequest::Nr, rb: true, dnf: false });
        assert!(t.fdb_flush);
        assert_eq!(t.wtr, TimerAction::Stop);
        assert_eq!(t.wtb, TimerAction::Stop);
    }

    #[test]
    fn test_clear_from_pending_owner_rpl_already_blocked_sets_dnf() {
        let mut i = input(NodeState::Pending, Request::LocalClear);
        i.was_blocked = [true, false];
        let t = decide(&i);
        assert_eq!(t.tx, TxAction::Start { request: RapsRequest::Nr, rb: true, dnf: true });
        assert!(!t.fdb_flush);
    }

    #[test]
    fn test_clear_from_pending_non_owner_only_changes_state() {
        let mut i = input(NodeState::Pending, Request::LocalClear);
        i.rpl_mode = RplMode::Neighbor;
        let t = decide(&i);
        assert_eq!(t, Transition { next_state: NodeState::Idle, ..Transition::stay(NodeState::Pending) });
    }

    #[test]
    fn test_clear_from_forced_switch() {
        let mut i = input(NodeState::Fs, Request::LocalClear);
        let t = decide(&i);
        assert_eq!(t.next_state, NodeState::Pending);
        assert_eq!(t.tx, TxAction::Keep);

        i.was_blocked = [false, true];
        let t = decide(&i);
        assert_eq!(t.tx, TxAction::Start { request: RapsRequest::Nr, rb: false, dnf: false });
        assert_eq!(t.wtb, TimerAction::Start);
    }

    #[test]
    fn test_local_sf_blocks_failed_port() {
        let mut i = input(NodeState::Idle, Request::LocalSf);
        i.has_sf = [false, true];
        i.was_blocked = [true, false];
        let t = decide(&i);
        assert_eq!(t.next_state, NodeState::Protection);
        assert_eq!(t.block, [false, true]);
        assert_eq!(t.unblock, [true, false]);
        assert!(t.fdb_flush);
        assert_eq!(t.tx, TxAction::Start { request: RapsRequest::Sf, rb: false, dnf: false });
        // Not Pending, so the restore timers are left alone.
        assert_eq!(t.wtr, TimerAction::Keep);
    }

    #[test]
    fn test_local_sf_on_blocked_port_sets_dnf() {
        let mut i = input(NodeState::Pending, Request::LocalSf);
        i.has_sf = [true, false];
        i.was_blocked = [true, false];
        let t = decide(&i);
        assert!(!t.fdb_flush);
        assert_eq!(t.tx, TxAction::Start { request: RapsRequest::Sf, rb: false, dnf: true });
        assert_eq!(t.wtr, TimerAction::Stop);
    }

    #[test]
    fn test_local_sf_ignored_in_forced_switch() {
        let t = decide(&input(NodeState::Fs, Request::LocalSf));
        assert_eq!(t, Transition::stay(NodeState::Fs));
    }

    #[test]
    fn test_sf_clear_enters_pending() {
        let t = decide(&input(NodeState::Protection, Request::LocalSfClear));
        assert_eq!(t.next_state, NodeState::Pending);
        assert!(t.guard_start);
        assert_eq!(t.wtr, TimerAction::Start);
        assert_eq!(t.tx, TxAction::Start { request: RapsRequest::Nr, rb: false, dnf: false });
    }

    #[test]
    fn test_local_fs_blocks_command_port() {
        let mut i = input(NodeState::Idle, Request::LocalFs);
        i.command = Command::FsToPort0;
        let t = decide(&i);
        assert_eq!(t.next_state, NodeState::Fs);
        assert_eq!(t.block, [false, true]);
        assert_eq!(t.unblock, [true, false]);
        assert!(t.fdb_flush);
    }

    #[test]
    fn test_remote_fs_unblocks_everything() {
        let t = decide(&input(NodeState::Pending, Request::RemoteFs));
        assert_eq!(t.next_state, NodeState::Fs);
        assert_eq!(t.unblock, [true, true]);
        assert_eq!(t.tx, TxAction::Stop);
        assert_eq!(t.wtb, TimerAction::Stop);
    }

    #[test]
    fn test_remote_ms_in_ms() {
        let mut i = input(NodeState::Ms, Request::RemoteMs);
        assert_eq!(decide(&i).next_state, NodeState::Ms);

        i.was_blocked = [false, true];
        let t = decide(&i);
        assert_eq!(t.next_state, NodeState::Pending);
        assert!(t.guard_start);
        assert_eq!(t.wtb, TimerAction::Start);
    }

    #[test]
    fn test_wtr_expiry_restores_rpl() {
        let t = decide(&input(NodeState::Pending, Request::LocalWtrExpires));
        assert_eq!(t.next_state, NodeState::Idle);
        assert_eq!(t.block, [true, false]);
        assert_eq!(t.wtb, TimerAction::Stop);
        assert_eq!(t.wtr, TimerAction::Keep);

        let t = decide(&input(NodeState::Pending, Request::LocalWtbExpires));
        assert_eq!(t.wtr, TimerAction::Stop);
        assert_eq!(t.wtb, TimerAction::Keep);
    }

    #[test]
    fn test_remote_nr_rb_in_pending() {
        let mut i = input(NodeState::Pending, Request::RemoteNrRb);
        i.rpl_mode = RplMode::Neighbor;
        i.rpl_port = RingPort::Port1;
        let t = decide(&i);
        assert_eq!(t.next_state, NodeState::Idle);
        assert_eq!(t.block, [false, true]);
        assert_eq!(t.unblock, [true, false]);
        assert_eq!(t.tx, TxAction::Stop);

        i.rpl_mode = RplMode::None;
        i.ring_port_max = RingPort::Port0;
        let t = decide(&i);
        assert_eq!(t.unblock, [true, false]);

        assert_eq!(decide(&input(NodeState::Protection, Request::RemoteNrRb)).next_state, NodeState::Pending);
    }

    #[test]
    fn test_remote_nr_with_higher_node_id() {
        let mut i = input(NodeState::Pending, Request::RemoteNr);
        i.rpl_mode = RplMode::None;
        i.has_sf = [true, false];
        assert_eq!(decide(&i).tx, TxAction::Keep);

        i.remote_higher = true;
        let t = decide(&i);
        assert_eq!(t.unblock, [false, true]);
        assert_eq!(t.tx, TxAction::Stop);

        let t = decide(&input(NodeState::Protection, Request::RemoteNr));
        assert_eq!(t.next_state, NodeState::Pending);
        assert_eq!(t.wtr, TimerAction::Start);
    }

    #[test]
    fn test_running_timers_change_nothing() {
        for state in [NodeState::Idle, NodeState::Pending, NodeState::Protection] {
            for request in [Request::LocalWtrRunning, Request::LocalWtbRunning, Request::None] {
                assert_eq!(decide(&input(state, request)), Transition::stay(state));
            }
        }
    }
}
