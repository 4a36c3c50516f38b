//! Notifications from the switch's other modules.
//!
//! The platform raises port, VLAN and CFM changes by pushing a
//! [`SwitchEvent`] onto the registry's [`EventQueue`], possibly from inside
//! one of its own [`ErpsPlatform`](crate::platform::ErpsPlatform) calls.
//! [`Registry::process_events`](super::Registry::process_events) delivers
//! them in arrival order.

use crate::debug_log;
use crate::platform::VlanPortConf;
use crate::types::MepKey;
use erps_types::PortNo;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchEvent {
    Link { port: PortNo, up: bool },
    VlanPortConf { port: PortNo, conf: VlanPortConf },
    VlanMembership { vid: u16 },
    CustomTpid { tpid: u16 },
    Mep { key: MepKey },
    /// MEPs were added, removed or reconfigured
    CfmConf,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<SwitchEvent>,
    configuring_vlan: bool,
    suppressed: u64,
}

/// Shared inbox of switch events.
///
/// VLAN port changes pushed while the registry itself is programming VLAN
/// ingress filtering are the echo of that call and get dropped.
#[derive(Debug, Clone, Default)]
pub struct EventQueue {
    state: Arc<Mutex<QueueState>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, event: SwitchEvent) {
        let mut state = self.lock();
        if state.configuring_vlan && matches!(event, SwitchEvent::VlanPortConf { .. }) {
            state.suppressed += 1;
            debug_log!("ErpsManager", event = ?event, "own VLAN port change ignored");
            return;
        }
        state.pending.push_back(event);
    }

    pub fn has_pending(&self) -> bool {
        !self.lock().pending.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// VLAN port changes dropped because the registry caused them.
    pub fn suppressed_count(&self) -> u64 {
        self.lock().suppressed
    }

    /// Runs a VLAN configuration call of the registry. The lock is not held
    /// across `f`, so the platform may push from inside it.
    pub(crate) fn configuring_vlan<R>(&self, f: impl FnOnce() -> R) -> R {
        self.lock().configuring_vlan = true;
        let result = f();
        self.lock().configuring_vlan = false;
        result
    }

    pub(crate) fn pop(&self) -> Option<SwitchEvent> {
        self.lock().pending.pop_front()
    }
}
