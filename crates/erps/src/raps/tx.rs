//! R-APS transmission: per ring port PDU buffers, the x3 burst on changes
//! and the 5 second periodic resend.

use super::pdu::{RapsFrame, VlanTag, TX_INFO_OFFSET};
use crate::{debug_log, warn_log};
use crate::instance::{EngineCtx, ErpsState};
use crate::types::{RapsInfo, RapsRequest, RingType};
use erps_types::RingPort;

/// Period of R-APS retransmission.
pub const TX_PERIOD_MS: u64 = 5000;

/// Bursts are sent this many times back to back.
const BURST_CNT: u64 = 3;

impl ErpsState {
    fn tx_frame_generate(&self, ctx: &EngineCtx<'_>, rp: RingPort, p: usize) -> Option<Vec<u8>> {
        let binding = &self.ring_port[rp.index()].binding;
        let port_no = binding.port_states[p]?;
        let Some(entry) = ctx.ports.get(port_no) else {
            warn_log!("RapsCodec", inst = self.inst, ring_port = %rp, port = %port_no, "unknown port, no Tx PDU");
            return None;
        };
        let tpid = entry.tpid;

        let frame = RapsFrame {
            ring_id: self.conf.ring_id,
            smac: binding.smac,
            tag: Some(VlanTag {
                tpid,
                pcp: self.conf.pcp,
                vid: self.conf.control_vlan,
            }),
            level: self.conf.level,
            version: self.status.tx_raps_info.version,
            request: RapsRequest::Nr,
            rb: false,
            dnf: false,
            bpr: RingPort::Port0,
            node_id: self.status.tx_raps_info.node_id,
        };
        let mut bytes = frame.encode();
        bytes[TX_INFO_OFFSET..TX_INFO_OFFSET + 2].copy_from_slice(&self.tx_info_bytes);
        Some(bytes)
    }

    /// Sends the buffered PDU once. Returns false if nothing went out.
    fn raps_tx(&self, ctx: &EngineCtx<'_>, rp: RingPort, p: usize) -> bool {
        let state = &self.ring_port[rp.index()];
        let (Some(port_no), Some(frame)) = (state.binding.port_states[p], state.tx_frames[p].as_ref()) else {
            return false;
        };

        if !ctx.ports.link(port_no) {
            return false;
        }

        if rp == RingPort::Port1 && self.conf.ring_type == RingType::InterconnectedSub && self.conf.virtual_channel {
            // The virtual channel follows the connected ring's blocking.
            let Some(peer) = ctx.peers.get(&self.conf.interconnect.connected_ring_inst) else {
                return false;
            };
            if peer.status.ring_port_status[p].blocked {
                return false;
            }
        }

        match ctx.platform.frame_tx(port_no, frame) {
            Ok(()) => true,
            Err(e) => {
                debug_log!("RapsCodec", inst = self.inst, port = %port_no, error = %e, "frame_tx failed");
                false
            }
        }
    }

    fn raps_tx_three_times(&mut self, ctx: &EngineCtx<'_>, rp: RingPort, p: usize, is_event: bool) -> bool {
        if !self.status.tx_raps_active && !is_event {
            return false;
        }
        if self.ring_port[rp.index()].tx_frames[p].is_none() {
            return false;
        }

        let mut transmitted = false;
        for _ in 0..BURST_CNT {
            if self.raps_tx(ctx, rp, p) {
                transmitted = true;
            }
        }
        self.ring_port[rp.index()].raps_pdu_transmitted = transmitted;
        transmitted
    }

    fn raps_frame_tx_cancel(&mut self, ctx: &mut EngineCtx<'_>, rp: RingPort, p: usize) {
        ctx.timers.stop(self.timers.tx);
        let state = &mut self.ring_port[rp.index()];
        state.tx_frames[p] = None;
        state.raps_pdu_transmitted = false;
    }

    fn raps_frame_update(&mut self, ctx: &mut EngineCtx<'_>, rp: RingPort, p: usize) {
        if self.ring_port[rp.index()].binding.port_states[p].is_none() {
            self.raps_frame_tx_cancel(ctx, rp, p);
            return;
        }

        let Some(frame) = self.tx_frame_generate(ctx, rp, p) else {
            return;
        };
        if self.ring_port[rp.index()].tx_frames[p].as_ref() == Some(&frame) {
            return;
        }

        self.raps_frame_tx_cancel(ctx, rp, p);
        debug_log!("RapsCodec", inst = self.inst, ring_port = %rp, p, "Tx PDU regenerated");
        self.ring_port[rp.index()].tx_frames[p] = Some(frame);
    }

    /// Regenerates all Tx PDUs after a change to anything they encode. With
    /// `do_tx` the new PDUs go out right away and the periodic timer restarts.
    pub(crate) fn raps_tx_frame_update(&mut self, ctx: &mut EngineCtx<'_>, do_tx: bool) {
        for rp in RingPort::ALL {
            let mut transmitted = false;
            for p in 0..2 {
                self.raps_frame_update(ctx, rp, p);
                if do_tx && self.raps_tx_three_times(ctx, rp, p, false) {
                    transmitted = true;
                }
            }
            if transmitted {
                let info = self.status.tx_raps_info;
                self.status.ring_port_status[rp.index()]
                    .statistics
                    .count_tx(info.request, info.rb, BURST_CNT);
            }
        }

        if do_tx {
            ctx.timers.start(self.timers.tx, TX_PERIOD_MS, true);
        }
    }

    /// Patches the request and flags of all Tx PDUs and bursts them if they
    /// changed. EVENTs are always sent and leave the stored PDUs untouched.
    pub(crate) fn raps_tx_info_update(&mut self, ctx: &mut EngineCtx<'_>, new: &RapsInfo) {
        let is_event = new.request == RapsRequest::Event;
        let new_bytes = RapsFrame::info_bytes(new.request, new.rb, new.dnf, new.bpr);
        let old_bytes = self.tx_info_bytes;
        let mut restart_timer = false;

        for rp in RingPort::ALL {
            let was_transmitted = self.ring_port[rp.index()].raps_pdu_transmitted;
            let mut transmitted = false;

            for p in 0..2 {
                let info = match self.ring_port[rp.index()].tx_frames[p].as_ref() {
                    Some(frame) => [frame[TX_INFO_OFFSET], frame[TX_INFO_OFFSET + 1]],
                    None => continue,
                };
                if was_transmitted && !is_event && info == new_bytes {
                    continue;
                }

                self.patch_tx_info(rp, p, new_bytes);
                if self.raps_tx_three_times(ctx, rp, p, is_event) {
                    transmitted = true;
                }
                if is_event {
                    self.patch_tx_info(rp, p, old_bytes);
                } else {
                    restart_timer = true;
                }
            }

            if transmitted {
                self.status.ring_port_status[rp.index()]
                    .statistics
                    .count_tx(new.request, new.rb, BURST_CNT);
            }
        }

        if restart_timer {
            ctx.timers.start(self.timers.tx, TX_PERIOD_MS, true);
        }
        if !is_event {
            self.tx_info_bytes = new_bytes;
        }
    }

    fn patch_tx_info(&mut self, rp: RingPort, p: usize, bytes: [u8; 2]) {
        if let Some(frame) = self.ring_port[rp.index()].tx_frames[p].as_mut() {
            frame[TX_INFO_OFFSET..TX_INFO_OFFSET + 2].copy_from_slice(&bytes);
        }
    }

    /// Periodic resend.
    pub(crate) fn raps_tx_timeout(&mut self, ctx: &mut EngineCtx<'_>) {
        if !self.status.tx_raps_active {
            return;
        }

        for rp in RingPort::ALL {
            let mut transmitted = false;
            for p in 0..2 {
                if self.raps_tx(ctx, rp, p) {
                    transmitted = true;
                }
            }
            if transmitted {
                let info = self.status.tx_raps_info;
                self.status.ring_port_status[rp.index()]
                    .statistics
                    .count_tx(info.request, info.rb, 1);
            }
        }
    }

    /// Frees every Tx PDU.
    pub(crate) fn raps_deactivate(&mut self, ctx: &mut EngineCtx<'_>) {
        for rp in RingPort::ALL {
            for p in 0..2 {
                self.raps_frame_tx_cancel(ctx, rp, p);
            }
        }
    }
}
