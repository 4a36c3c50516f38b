//! ErpsDaemon implementation.
//!
//! The daemon owns the [`Registry`] and its simulated platform, applies the
//! configured instances and turns wall-clock time into the registry's
//! virtual time.

use super::config::DaemonConfig;
use super::sim::SimPlatform;
use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::manager::Registry;
use crate::{audit_log, debug_log, error_log, info_log, warn_log};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Configuration for the ErpsDaemon.
#[derive(Debug, Clone)]
pub struct ErpsDaemonConfig {
    /// Upper bound on the time between two timer runs, in milliseconds
    pub tick_ms: u64,
}

impl Default for ErpsDaemonConfig {
    fn default() -> Self {
        Self { tick_ms: 1000 }
    }
}

pub struct ErpsDaemon {
    config: ErpsDaemonConfig,
    registry: Registry,
    platform: Arc<SimPlatform>,
    epoch: Instant,
    running: bool,
}

impl ErpsDaemon {
    /// Builds the registry over a simulated switch described by `conf` and
    /// loads its port table.
    pub fn new(config: ErpsDaemonConfig, conf: &DaemonConfig) -> Self {
        let platform = Arc::new(SimPlatform::from_config(conf));
        let mut registry =
            Registry::new(platform.clone(), conf.chassis_mac).with_capabilities(conf.capabilities());
        registry.load(conf.port_infos());
        platform.attach_events(registry.event_queue());
        for (port, info) in conf.port_infos() {
            platform.set_vlan_port_conf(port, info.vlan_conf);
        }
        if let Some(tpid) = conf.custom_tpid {
            registry.custom_tpid_change(tpid, 0);
        }

        Self {
            config,
            registry,
            platform,
            epoch: Instant::now(),
            running: false,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn platform(&self) -> Arc<SimPlatform> {
        Arc::clone(&self.platform)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Applies the configured instances. Returns how many were accepted;
    /// rejected instances are logged and skipped.
    pub fn init(&mut self, conf: &DaemonConfig) -> usize {
        audit_log!(AuditRecord::new(AuditCategory::SystemLifecycle, "ErpsDaemon", "daemon_initialization_start")
            .with_outcome(AuditOutcome::InProgress)
            .with_details(serde_json::json!({
                "instances": conf.instances.len(),
                "ports": conf.ports.len(),
            })));

        let mut accepted = 0;
        for (inst, erps_conf) in &conf.instances {
            let now = self.now_ms();
            match self.registry.conf_set(*inst, erps_conf, now) {
                Ok(()) => accepted += 1,
                Err(e) => error_log!("ErpsDaemon", inst = *inst, error = %e, "instance rejected"),
            }
        }

        let outcome = if accepted == conf.instances.len() {
            AuditOutcome::Success
        } else {
            AuditOutcome::Failure
        };
        audit_log!(AuditRecord::new(AuditCategory::SystemLifecycle, "ErpsDaemon", "daemon_initialization_end")
            .with_outcome(outcome)
            .with_details(serde_json::json!({
                "accepted": accepted,
                "rejected": conf.instances.len() - accepted,
            })));
        accepted
    }

    /// Starts protocol operation.
    pub fn start(&mut self) {
        let now = self.now_ms();
        self.registry.start(now);
        self.running = true;
        info_log!("ErpsDaemon", tick_ms = self.config.tick_ms, "running");
    }

    /// Delivers pending switch events, fires due timers and returns how long
    /// to sleep until the next run.
    pub fn tick(&mut self) -> Duration {
        let now = self.now_ms();
        let events = self.registry.process_events(now);
        self.registry.run_timers(now);

        // The simulated switch has no wire behind it.
        let sent = self.platform.take_tx();
        if events > 0 || !sent.is_empty() {
            debug_log!("ErpsDaemon", now, events, frames = sent.len(), "tick");
        }

        let tick = self.config.tick_ms;
        let wait = self
            .registry
            .next_deadline()
            .map_or(tick, |deadline| deadline.saturating_sub(now).min(tick));
        Duration::from_millis(wait.max(1))
    }

    /// Deactivates every instance. Ring ports are left forwarding.
    pub fn stop(&mut self) {
        if !self.running {
            warn_log!("ErpsDaemon", "stop requested while not running");
            return;
        }
        info_log!("ErpsDaemon", "stopping");
        self.registry.shutdown();
        self.running = false;

        audit_log!(AuditRecord::new(AuditCategory::AdminAction, "ErpsDaemon", "stop_requested")
            .with_outcome(AuditOutcome::Success));
    }

    /// Status of every instance as JSON, keyed by instance number.
    pub fn status_report(&self) -> serde_json::Value {
        let mut report = serde_json::Map::new();
        let mut prev = None;
        while let Some(inst) = self.registry.itr(prev) {
            if let Ok(status) = self.registry.status_get(inst) {
                let value = serde_json::to_value(&status).unwrap_or(serde_json::Value::Null);
                report.insert(inst.to_string(), value);
            }
            prev = Some(inst);
        }
        serde_json::Value::Object(report)
    }
}
