//! `erpsd` configuration file.
//!
//! File format:
//! ```json
//! {
//!   "chassis_mac": "00:01:c1:00:00:aa",
//!   "ports": [
//!     { "port": 0, "ifindex": 1000, "mac": "00:01:c1:00:00:01", "link": true,
//!       "vlan_conf": { "port_type": "c" } }
//!   ],
//!   "control_vlan_members": { "100": [0, 1] },
//!   "instances": {
//!     "1": { "control_vlan": 100, "protected_vlans": [10, 20], "admin_active": true }
//!   }
//! }
//! ```
//!
//! Omitted instance fields take their defaults.

use crate::platform::{MepConf, PortInfo};
use crate::types::{Capabilities, ErpsConf, MepKey};
use anyhow::{bail, Context, Result};
use erps_types::{MacAddress, PortNo};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfig {
    pub port: PortNo,
    #[serde(flatten)]
    pub info: PortInfo,
}

/// A MEP known to the simulated CFM module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MepConfig {
    pub key: MepKey,
    #[serde(default)]
    pub conf: MepConf,
    /// No defect reported
    #[serde(default = "default_true")]
    pub ok: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub chassis_mac: MacAddress,
    /// Overrides the default instance limit
    pub inst_cnt_max: Option<u32>,
    /// TPID of S-custom ports
    pub custom_tpid: Option<u16>,
    pub ports: Vec<PortConfig>,
    pub control_vlan_members: BTreeMap<u16, Vec<PortNo>>,
    pub meps: Vec<MepConfig>,
    pub instances: BTreeMap<u32, ErpsConf>,
}

impl DaemonConfig {
    /// Reads and checks a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("failed to open config file {}", path.display()))?;
        let config: DaemonConfig = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config
            .check()
            .with_context(|| format!("invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Checks what the registry cannot: the port table itself. Instance
    /// configuration is validated when it is applied.
    pub fn check(&self) -> Result<()> {
        if !self.chassis_mac.is_unicast() || self.chassis_mac.is_zero() {
            bail!("chassis MAC {} is not a unicast address", self.chassis_mac);
        }
        if self.ports.is_empty() {
            bail!("no ports configured");
        }

        let mut port_nos = BTreeSet::new();
        let mut ifindexes = BTreeSet::new();
        for port in &self.ports {
            if !port_nos.insert(port.port) {
                bail!("port {} configured twice", port.port);
            }
            if !ifindexes.insert(port.info.ifindex) {
                bail!("ifindex {} used by more than one port", port.info.ifindex);
            }
        }

        for (vid, members) in &self.control_vlan_members {
            if let Some(unknown) = members.iter().find(|port| !port_nos.contains(*port)) {
                bail!("VLAN {} member {} is not a configured port", vid, unknown);
            }
        }

        if self.inst_cnt_max == Some(0) {
            bail!("inst_cnt_max must be at least 1");
        }
        Ok(())
    }

    pub fn capabilities(&self) -> Capabilities {
        let mut capabilities = Capabilities::default();
        if let Some(max) = self.inst_cnt_max {
            capabilities.inst_cnt_max = max;
        }
        capabilities
    }

    pub fn port_infos(&self) -> impl Iterator<Item = (PortNo, PortInfo)> + '_ {
        self.ports.iter().map(|port| (port.port, port.info.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::VlanPortType;
    use crate::types::{RingType, RplMode};
    use std::io::Write;
    use tempfile::NamedTempFile;

    const CONFIG: &str = r#"{
  "chassis_mac": "00:01:c1:00:00:aa",
  "ports": [
    { "port": 0, "ifindex": 1000, "mac": "00:01:c1:00:00:01", "link": true,
      "vlan_conf": { "port_type": "c" } },
    { "port": 1, "ifindex": 1001, "mac": "00:01:c1:00:00:02", "link": false }
  ],
  "control_vlan_members": { "100": [0, 1] },
  "meps": [ { "key": { "md": "md1", "ma": "ma1", "mepid": 1 } } ],
  "instances": {
    "1": {
      "control_vlan": 100,
      "rpl_mode": "owner",
      "protected_vlans": [10, 20],
      "ring_port_conf": [ { "ifindex": 1000 }, { "ifindex": 1001 } ],
      "admin_active": true
    }
  }
}"#;

    fn write(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_config_file() {
        let file = write(CONFIG);
        let config = DaemonConfig::load(file.path()).unwrap();

        assert_eq!(config.chassis_mac, "00:01:c1:00:00:aa".parse::<MacAddress>().unwrap());
        assert_eq!(config.ports.len(), 2);
        assert_eq!(config.ports[0].info.vlan_conf.port_type, VlanPortType::C);
        assert!(!config.ports[1].info.link);
        assert_eq!(config.control_vlan_members[&100], vec![PortNo::new(0), PortNo::new(1)]);
        assert!(config.meps[0].ok);
        assert_eq!(config.capabilities(), Capabilities::default());

        let inst = &config.instances[&1];
        assert_eq!(inst.rpl_mode, RplMode::Owner);
        assert_eq!(inst.ring_port_conf[1].ifindex, 1001);
        assert!(inst.protected_vlans.contains(20));
        // Omitted fields take the defaults.
        assert_eq!(inst.ring_type, RingType::Major);
        assert_eq!(inst.wtr_secs, 300);
        assert_eq!(inst.level, 7);
    }

    #[test]
    fn test_missing_file() {
        let err = DaemonConfig::load("/nonexistent/erpsd.json").unwrap_err();
        assert!(err.to_string().contains("failed to open config file"));
    }

    #[test]
    fn test_malformed_json() {
        let file = write("{ \"ports\": [ ");
        let err = DaemonConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("failed to parse config file"));
    }

    #[test]
    fn test_port_table_checks() {
        let mut config: DaemonConfig = serde_json::from_str(CONFIG).unwrap();
        config.check().unwrap();

        config.ports[1].info.ifindex = 1000;
        assert!(config.check().unwrap_err().to_string().contains("ifindex 1000"));

        config.ports[1].info.ifindex = 1001;
        config.control_vlan_members.insert(200, vec![PortNo::new(7)]);
        assert!(config.check().unwrap_err().to_string().contains("member 7"));

        config.control_vlan_members.remove(&200);
        config.chassis_mac = MacAddress::BROADCAST;
        assert!(config.check().is_err());
    }

    #[test]
    fn test_instance_limit_override() {
        let config = DaemonConfig {
            inst_cnt_max: Some(8),
            ..Default::default()
        };
        assert_eq!(config.capabilities().inst_cnt_max, 8);
        assert_eq!(config.capabilities().wtr_secs_max, 720);
    }
}
